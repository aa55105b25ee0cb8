use std::time::Instant;

use crossbeam_channel::Sender;

use crate::render_loop::PresentedFrame;

use super::animation::AnimationJob;
use super::encode::encode_png;
use super::schedule::AnimationSettings;
use super::{CaptureError, FrameGrabber};

pub(crate) type Reply = Sender<Result<Vec<u8>, CaptureError>>;

#[derive(Debug)]
pub enum CaptureRequest {
    Still {
        reply: Reply,
    },
    Animation {
        settings: AnimationSettings,
        reply: Reply,
    },
}

struct PendingStill {
    after_version: u64,
    reply: Reply,
}

struct RunningAnimation {
    job: AnimationJob,
    reply: Reply,
}

/// Outstanding capture jobs, advanced once per presented frame.
///
/// The controller only reads pixels; it never touches ramps, LUTs or the
/// uniforms the render loop pushes.
#[derive(Default)]
pub struct CaptureController {
    stills: Vec<PendingStill>,
    animations: Vec<RunningAnimation>,
    last_version: u64,
}

impl CaptureController {
    /// Queues a request. `surface` is the current drawing size, `None` when
    /// no surface exists.
    pub fn submit(&mut self, request: CaptureRequest, surface: Option<(u32, u32)>, now: Instant) {
        let surface = surface.filter(|&(width, height)| width > 0 && height > 0);
        match request {
            CaptureRequest::Still { reply } => {
                if surface.is_none() {
                    let _ = reply.send(Err(CaptureError::NoSurface));
                    return;
                }
                self.stills.push(PendingStill {
                    after_version: self.last_version,
                    reply,
                });
            }
            CaptureRequest::Animation { settings, reply } => {
                let Some(size) = surface else {
                    let _ = reply.send(Err(CaptureError::NoSurface));
                    return;
                };
                match AnimationJob::start(settings, size, now) {
                    Ok(job) => self.animations.push(RunningAnimation { job, reply }),
                    Err(err) => {
                        let _ = reply.send(Err(err));
                    }
                }
            }
        }
    }

    pub fn on_presented(&mut self, frame: PresentedFrame, grabber: &mut dyn FrameGrabber) {
        if frame.version <= self.last_version {
            return;
        }
        self.last_version = frame.version;

        let (ready, waiting): (Vec<_>, Vec<_>) = self
            .stills
            .drain(..)
            .partition(|still| still.after_version < frame.version);
        self.stills = waiting;
        for still in ready {
            let result = capture_still(&frame, grabber);
            if let Err(err) = &result {
                tracing::error!(error = %err, "still capture failed");
            }
            let _ = still.reply.send(result);
        }

        self.animations.retain_mut(|running| {
            match running.job.on_presented(frame.at, grabber) {
                Some(result) => {
                    if let Err(err) = &result {
                        tracing::error!(error = %err, "animation capture failed");
                    }
                    let _ = running.reply.send(result);
                    false
                }
                None => true,
            }
        });
    }

    /// Drops every outstanding job; their waiters observe `Unavailable`.
    pub fn abort_all(&mut self) {
        let outstanding = self.stills.len() + self.animations.len();
        if outstanding > 0 {
            tracing::debug!(outstanding, "aborting outstanding captures");
        }
        self.stills.clear();
        self.animations.clear();
    }

    pub fn is_idle(&self) -> bool {
        self.stills.is_empty() && self.animations.is_empty()
    }

    /// Frame sizes of in-flight animations.
    pub fn animation_sizes(&self) -> Vec<(u32, u32)> {
        self.animations
            .iter()
            .map(|running| running.job.source_size())
            .collect()
    }
}

fn capture_still(
    frame: &PresentedFrame,
    grabber: &mut dyn FrameGrabber,
) -> Result<Vec<u8>, CaptureError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(CaptureError::NoSurface);
    }
    let image = grabber.grab(frame.width, frame.height)?.into_top_down()?;
    let bytes = encode_png(&image)?;
    tracing::info!(
        width = frame.width,
        height = frame.height,
        bytes = bytes.len(),
        "still captured"
    );
    Ok(bytes)
}
