use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use super::controller::CaptureRequest;
use super::schedule::AnimationSettings;
use super::CaptureError;

/// Cloneable entry point for capture requests, valid while the compositor
/// that issued it is initialised.
#[derive(Clone, Debug)]
pub struct CaptureHandle {
    requests: Sender<CaptureRequest>,
}

impl CaptureHandle {
    pub(crate) fn new(requests: Sender<CaptureRequest>) -> Self {
        Self { requests }
    }

    /// PNG of the next presented frame.
    pub fn capture_image(&self) -> Result<PendingCapture<Vec<u8>>, CaptureError> {
        let (reply, pending) = PendingCapture::channel();
        self.submit(CaptureRequest::Still { reply })?;
        Ok(pending)
    }

    /// Looping GIF sampled from upcoming presented frames.
    pub fn capture_animation(
        &self,
        settings: AnimationSettings,
    ) -> Result<PendingCapture<Vec<u8>>, CaptureError> {
        let (reply, pending) = PendingCapture::channel();
        self.submit(CaptureRequest::Animation { settings, reply })?;
        Ok(pending)
    }

    fn submit(&self, request: CaptureRequest) -> Result<(), CaptureError> {
        self.requests
            .send(request)
            .map_err(|_| CaptureError::Unavailable)
    }
}

/// Requests a still through an optional readiness handle.
pub fn capture_image(
    handle: Option<&CaptureHandle>,
) -> Result<PendingCapture<Vec<u8>>, CaptureError> {
    handle.ok_or(CaptureError::Unavailable)?.capture_image()
}

/// Requests an animation through an optional readiness handle.
pub fn capture_animation(
    handle: Option<&CaptureHandle>,
    settings: AnimationSettings,
) -> Result<PendingCapture<Vec<u8>>, CaptureError> {
    handle
        .ok_or(CaptureError::Unavailable)?
        .capture_animation(settings)
}

/// Result of one capture request, delivered once.
#[derive(Debug)]
pub struct PendingCapture<T> {
    reply: Receiver<Result<T, CaptureError>>,
}

impl<T> PendingCapture<T> {
    pub(crate) fn channel() -> (Sender<Result<T, CaptureError>>, Self) {
        let (tx, rx) = bounded(1);
        (tx, Self { reply: rx })
    }

    pub fn wait(self) -> Result<T, CaptureError> {
        self.reply.recv().unwrap_or(Err(CaptureError::Unavailable))
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, CaptureError> {
        match self.reply.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(CaptureError::TimedOut),
            Err(RecvTimeoutError::Disconnected) => Err(CaptureError::Unavailable),
        }
    }

    /// Non-blocking poll; `None` while the job is still running.
    pub fn try_take(&self) -> Option<Result<T, CaptureError>> {
        match self.reply.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(CaptureError::Unavailable)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn missing_handle_is_unavailable() {
        assert_eq!(capture_image(None).unwrap_err(), CaptureError::Unavailable);
        assert_eq!(
            capture_animation(None, AnimationSettings::default()).unwrap_err(),
            CaptureError::Unavailable
        );
    }

    #[test]
    fn torn_down_receiver_rejects_requests() {
        let (tx, rx) = unbounded();
        let handle = CaptureHandle::new(tx);
        drop(rx);
        assert_eq!(
            handle.capture_image().unwrap_err(),
            CaptureError::Unavailable
        );
    }

    #[test]
    fn dropped_reply_resolves_to_unavailable() {
        let (tx, rx) = unbounded();
        let handle = CaptureHandle::new(tx);
        let pending = handle.capture_image().unwrap();
        assert!(pending.try_take().is_none());

        let request = rx.recv().unwrap();
        drop(request);
        assert_eq!(pending.wait(), Err(CaptureError::Unavailable));
    }

    #[test]
    fn replies_reach_the_waiter() {
        let (tx, rx) = unbounded();
        let handle = CaptureHandle::new(tx);
        let pending = handle
            .capture_animation(AnimationSettings::default())
            .unwrap();
        assert_eq!(
            pending.wait_timeout(Duration::from_millis(1)),
            Err(CaptureError::TimedOut)
        );

        match rx.recv().unwrap() {
            CaptureRequest::Animation { reply, settings } => {
                assert_eq!(settings, AnimationSettings::default());
                reply.send(Ok(vec![1, 2, 3])).unwrap();
            }
            other => panic!("unexpected request {other:?}"),
        }
        assert_eq!(pending.try_take(), Some(Ok(vec![1, 2, 3])));
    }
}
