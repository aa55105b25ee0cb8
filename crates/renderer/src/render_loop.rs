use std::time::{Duration, Instant};

/// Identifies one scheduled tick of one loop instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickToken {
    generation: u64,
    sequence: u64,
}

/// Published after every accepted tick; capture jobs key off `version`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentedFrame {
    pub version: u64,
    pub at: Instant,
    pub width: u32,
    pub height: u32,
}

/// Per-instance tick bookkeeping for the presentation-driven render loop.
///
/// At most one tick is pending at a time. Cancelling drops it, and tokens from
/// an earlier generation or a cancelled loop are rejected by
/// [`RenderLoop::begin_tick`].
#[derive(Debug)]
pub struct RenderLoop {
    generation: u64,
    started: Instant,
    pending: Option<TickToken>,
    next_sequence: u64,
    version: u64,
    cancelled: bool,
}

impl RenderLoop {
    pub fn start(generation: u64, now: Instant) -> Self {
        tracing::debug!(generation, "render loop started");
        Self {
            generation,
            started: now,
            pending: None,
            next_sequence: 0,
            version: 0,
            cancelled: false,
        }
    }

    /// Reserves the next tick. Returns the already pending token if there is
    /// one, and `None` once cancelled.
    pub fn schedule(&mut self) -> Option<TickToken> {
        if self.cancelled {
            return None;
        }
        if self.pending.is_none() {
            self.pending = Some(TickToken {
                generation: self.generation,
                sequence: self.next_sequence,
            });
            self.next_sequence += 1;
        }
        self.pending
    }

    /// Consumes the pending tick if `token` is it.
    pub fn begin_tick(&mut self, token: TickToken) -> bool {
        if self.cancelled || self.pending != Some(token) {
            tracing::trace!(?token, "ignoring stale tick");
            return false;
        }
        self.pending = None;
        true
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.pending = None;
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    pub fn elapsed_seconds(&self, now: Instant) -> f32 {
        self.elapsed(now).as_secs_f32()
    }

    pub fn last_version(&self) -> u64 {
        self.version
    }

    pub fn present(&mut self, now: Instant, width: u32, height: u32) -> PresentedFrame {
        self.version += 1;
        PresentedFrame {
            version: self.version,
            at: now,
            width,
            height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_pending_token_is_accepted() {
        let now = Instant::now();
        let mut render_loop = RenderLoop::start(1, now);
        let token = render_loop.schedule().unwrap();
        assert_eq!(render_loop.schedule(), Some(token));

        assert!(render_loop.begin_tick(token));
        assert!(!render_loop.begin_tick(token));

        let next = render_loop.schedule().unwrap();
        assert_ne!(next, token);
        assert!(render_loop.begin_tick(next));
    }

    #[test]
    fn cancelled_loop_rejects_pending_tick() {
        let mut render_loop = RenderLoop::start(1, Instant::now());
        let token = render_loop.schedule().unwrap();
        render_loop.cancel();
        assert!(!render_loop.begin_tick(token));
        assert!(render_loop.schedule().is_none());
    }

    #[test]
    fn restart_rejects_tokens_from_previous_instance() {
        let now = Instant::now();
        let mut first = RenderLoop::start(1, now);
        let stale = first.schedule().unwrap();
        first.cancel();

        let mut second = RenderLoop::start(2, now);
        second.schedule();
        assert!(!second.begin_tick(stale));
    }

    #[test]
    fn restart_begins_time_at_zero() {
        let origin = Instant::now();
        let first = RenderLoop::start(1, origin);
        let later = origin + Duration::from_secs(5);
        assert!((first.elapsed_seconds(later) - 5.0).abs() < 1e-4);

        let second = RenderLoop::start(2, later);
        assert_eq!(second.elapsed_seconds(later), 0.0);
        assert_eq!(second.elapsed(origin), Duration::ZERO);
    }

    #[test]
    fn presented_versions_increase() {
        let now = Instant::now();
        let mut render_loop = RenderLoop::start(1, now);
        let a = render_loop.present(now, 10, 10);
        let b = render_loop.present(now, 12, 10);
        assert_eq!(a.version, 1);
        assert_eq!(b.version, 2);
        assert_eq!(render_loop.last_version(), 2);
        assert_eq!(b.width, 12);
    }
}
