use std::time::Instant;

use super::encode::{scale_frame, GifAssembler};
use super::schedule::{AnimationPlan, AnimationSchedule, AnimationSettings};
use super::{CaptureError, FrameGrabber};

/// One looping-animation capture with dimensions fixed at start.
pub(crate) struct AnimationJob {
    plan: AnimationPlan,
    schedule: AnimationSchedule,
    source_size: (u32, u32),
    output_size: (u32, u32),
    assembler: Option<GifAssembler>,
}

impl AnimationJob {
    pub(crate) fn start(
        settings: AnimationSettings,
        surface_size: (u32, u32),
        now: Instant,
    ) -> Result<Self, CaptureError> {
        let (width, height) = surface_size;
        if width == 0 || height == 0 {
            return Err(CaptureError::NoSurface);
        }
        let plan = settings.plan();
        let output_size = plan.output_size(width, height);
        let assembler = GifAssembler::new(output_size.0, output_size.1, plan.frame_delay_ms())?;
        tracing::info!(
            width,
            height,
            out_width = output_size.0,
            out_height = output_size.1,
            frames = plan.frame_count,
            fps = plan.fps,
            "animation capture started"
        );
        Ok(Self {
            plan,
            schedule: AnimationSchedule::new(plan, now),
            source_size: surface_size,
            output_size,
            assembler: Some(assembler),
        })
    }

    pub(crate) fn source_size(&self) -> (u32, u32) {
        self.source_size
    }

    /// Advances on a presented frame; returns the finished bytes or the first
    /// failure once the job is over.
    pub(crate) fn on_presented(
        &mut self,
        at: Instant,
        grabber: &mut dyn FrameGrabber,
    ) -> Option<Result<Vec<u8>, CaptureError>> {
        let step = self.schedule.advance(at);
        if step.capture {
            if let Err(err) = self.capture_step(grabber) {
                self.assembler = None;
                return Some(Err(err));
            }
        }
        if !step.finished {
            return None;
        }

        let assembler = self.assembler.take()?;
        tracing::debug!(
            frames = assembler.frames(),
            planned = self.plan.frame_count,
            "animation capture finished"
        );
        Some(assembler.finish())
    }

    fn capture_step(&mut self, grabber: &mut dyn FrameGrabber) -> Result<(), CaptureError> {
        let (width, height) = self.source_size;
        let frame = grabber.grab(width, height)?.into_top_down()?;
        let frame = scale_frame(frame, self.output_size.0, self.output_size.1);
        match self.assembler.as_mut() {
            Some(assembler) => assembler.push(&frame),
            None => Err(CaptureError::EncodingEmpty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{PixelReadback, RowOrder};
    use std::time::Duration;

    struct SolidGrabber {
        requests: Vec<(u32, u32)>,
        rows: RowOrder,
    }

    impl FrameGrabber for SolidGrabber {
        fn grab(&mut self, width: u32, height: u32) -> Result<PixelReadback, CaptureError> {
            self.requests.push((width, height));
            Ok(PixelReadback {
                width,
                height,
                rows: self.rows,
                rgba: vec![90; (width * height * 4) as usize],
            })
        }
    }

    fn settings(duration_seconds: f32, fps: f32, scale: f32) -> AnimationSettings {
        AnimationSettings {
            duration_seconds,
            fps,
            scale,
        }
    }

    #[test]
    fn zero_sized_surface_is_rejected() {
        assert!(matches!(
            AnimationJob::start(settings(1.0, 10.0, 1.0), (0, 10), Instant::now()),
            Err(CaptureError::NoSurface)
        ));
    }

    #[test]
    fn job_runs_to_completion_at_fixed_size() {
        let start = Instant::now();
        let mut job = AnimationJob::start(settings(0.5, 10.0, 0.5), (40, 20), start).unwrap();
        let mut grabber = SolidGrabber {
            requests: Vec::new(),
            rows: RowOrder::BottomUp,
        };

        let mut result = None;
        for tick in 0..200u64 {
            let at = start + Duration::from_millis(tick * 16);
            if let Some(done) = job.on_presented(at, &mut grabber) {
                result = Some(done);
                break;
            }
        }

        let bytes = result.expect("job finished").unwrap();
        assert_eq!(&bytes[..6], b"GIF89a");
        assert_eq!(grabber.requests.len(), 5);
        assert!(grabber.requests.iter().all(|&size| size == (40, 20)));
        assert_eq!(job.source_size(), (40, 20));
    }

    #[test]
    fn grab_failure_ends_the_job() {
        struct Broken;
        impl FrameGrabber for Broken {
            fn grab(&mut self, _: u32, _: u32) -> Result<PixelReadback, CaptureError> {
                Err(CaptureError::Readback("device lost".into()))
            }
        }

        let start = Instant::now();
        let mut job = AnimationJob::start(settings(1.0, 10.0, 1.0), (8, 8), start).unwrap();
        let outcome = job.on_presented(start, &mut Broken);
        assert_eq!(
            outcome,
            Some(Err(CaptureError::Readback("device lost".into())))
        );
    }
}
