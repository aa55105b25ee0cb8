use std::time::Instant;

pub const MIN_DURATION_SECONDS: f32 = 0.5;
pub const MIN_FPS: f32 = 1.0;
pub const MAX_FPS: f32 = 60.0;
pub const MIN_SCALE: f32 = 0.1;
pub const MAX_SCALE: f32 = 1.0;

/// Caller-facing animation request, sanitized by [`AnimationSettings::plan`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnimationSettings {
    pub duration_seconds: f32,
    pub fps: f32,
    pub scale: f32,
}

impl Default for AnimationSettings {
    fn default() -> Self {
        Self {
            duration_seconds: 3.0,
            fps: 20.0,
            scale: 0.5,
        }
    }
}

impl AnimationSettings {
    /// Clamps the request into its supported ranges. Non-finite duration falls
    /// back to the floor; non-finite fps and scale fall back to their upper
    /// bounds.
    pub fn plan(&self) -> AnimationPlan {
        let duration_seconds = if self.duration_seconds.is_finite() {
            self.duration_seconds.max(MIN_DURATION_SECONDS)
        } else {
            MIN_DURATION_SECONDS
        };
        let fps = if self.fps.is_finite() {
            self.fps.clamp(MIN_FPS, MAX_FPS)
        } else {
            MAX_FPS
        };
        let scale = if self.scale.is_finite() {
            self.scale.clamp(MIN_SCALE, MAX_SCALE)
        } else {
            MAX_SCALE
        };

        let frame_interval_ms = 1000.0 / fps as f64;
        let frame_count = ((duration_seconds as f64 * fps as f64).round() as u32).max(1);

        AnimationPlan {
            duration_seconds,
            fps,
            scale,
            frame_interval_ms,
            frame_count,
        }
    }
}

/// Sanitized animation parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnimationPlan {
    pub duration_seconds: f32,
    pub fps: f32,
    pub scale: f32,
    pub frame_interval_ms: f64,
    pub frame_count: u32,
}

impl AnimationPlan {
    /// Wall-clock budget after which the job stops even if frames are missing.
    pub fn budget_ms(&self) -> f64 {
        self.duration_seconds as f64 * 1000.0 + self.frame_interval_ms
    }

    pub fn frame_delay_ms(&self) -> u32 {
        self.frame_interval_ms.round() as u32
    }

    pub fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
        if self.scale >= MAX_SCALE {
            return (width, height);
        }
        let scale = self.scale as f64;
        (
            ((width as f64 * scale).round() as u32).max(1),
            ((height as f64 * scale).round() as u32).max(1),
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduleStep {
    pub capture: bool,
    pub finished: bool,
}

/// Decides, per presented frame, whether an animation captures a step.
///
/// Runs on its own start instant. At most one step is taken per tick, and the
/// job finishes when all frames are in or the budget has elapsed, whichever
/// comes first.
#[derive(Debug)]
pub struct AnimationSchedule {
    plan: AnimationPlan,
    started: Instant,
    next_due_ms: f64,
    captured: u32,
    finished: bool,
}

impl AnimationSchedule {
    pub fn new(plan: AnimationPlan, started: Instant) -> Self {
        Self {
            plan,
            started,
            next_due_ms: 0.0,
            captured: 0,
            finished: false,
        }
    }

    pub fn advance(&mut self, now: Instant) -> ScheduleStep {
        if self.finished {
            return ScheduleStep {
                capture: false,
                finished: true,
            };
        }

        let elapsed_ms = now.saturating_duration_since(self.started).as_secs_f64() * 1000.0;
        let capture = elapsed_ms >= self.next_due_ms && self.captured < self.plan.frame_count;
        if capture {
            self.captured += 1;
            self.next_due_ms += self.plan.frame_interval_ms;
        }

        self.finished =
            self.captured >= self.plan.frame_count || elapsed_ms > self.plan.budget_ms();
        ScheduleStep {
            capture,
            finished: self.finished,
        }
    }

    pub fn captured(&self) -> u32 {
        self.captured
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
