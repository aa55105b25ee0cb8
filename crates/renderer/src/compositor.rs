use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver};
use ramp::{sample_ramp, Axis, ControlPoint, Lut};
use tracing::{error, info};

use crate::capture::{
    self, AnimationSettings, CaptureController, CaptureError, CaptureHandle, CaptureRequest,
    FrameGrabber, PendingCapture,
};
use crate::error::InitError;
use crate::gpu::GpuState;
use crate::render_loop::{PresentedFrame, RenderLoop, TickToken};
use crate::source::{FeedStatus, FrameSource, SourceState, VideoFeed};
use crate::types::{GpuPowerPreference, Intensities, RampSet};

/// Logical container the surface is sized against.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceLayout {
    pub logical_width: f64,
    pub logical_height: f64,
    pub scale_factor: f64,
}

/// Displacement compositor bound to one drawing surface.
///
/// Owns the GPU state, the frame source, the render loop and outstanding
/// captures. Everything runs on the thread that owns the surface; other
/// threads reach it through the [`CaptureHandle`] returned by
/// [`Compositor::init`].
pub struct Compositor {
    gpu: Option<GpuState>,
    source: FrameSource,
    render_loop: Option<RenderLoop>,
    captures: CaptureController,
    requests: Option<Receiver<CaptureRequest>>,
    handle: Option<CaptureHandle>,
    luts: [Lut; 2],
    intensities: Intensities,
    init_error: Option<String>,
    generation: u64,
}

impl Compositor {
    pub fn new(ramps: RampSet, intensities: Intensities) -> Self {
        let luts = ramps.luts();
        Self {
            gpu: None,
            source: FrameSource::new(),
            render_loop: None,
            captures: CaptureController::default(),
            requests: None,
            handle: None,
            luts,
            intensities,
            init_error: None,
            generation: 0,
        }
    }

    /// Creates GPU state for `target` and starts a fresh render loop.
    ///
    /// A failure is terminal for this instance: later calls return
    /// [`InitError::Terminal`] with the original message.
    pub fn init(
        &mut self,
        target: impl Into<wgpu::SurfaceTarget<'static>>,
        layout: SurfaceLayout,
        gpu_power: GpuPowerPreference,
        vsync: bool,
    ) -> Result<CaptureHandle, InitError> {
        if let Some(message) = &self.init_error {
            return Err(InitError::Terminal(message.clone()));
        }
        if let Some(handle) = &self.handle {
            return Ok(handle.clone());
        }

        let size = crate::gpu::resolve_backing_size(
            layout.logical_width,
            layout.logical_height,
            layout.scale_factor,
        );
        let gpu = match GpuState::new(
            target,
            size,
            gpu_power,
            vsync,
            &self.luts,
            self.source.procedural(),
            self.intensities,
        ) {
            Ok(gpu) => gpu,
            Err(err) => {
                error!(error = %err, "compositor initialisation failed");
                self.init_error = Some(err.to_string());
                return Err(err);
            }
        };

        self.source.on_context_restored();
        self.generation += 1;
        self.render_loop = Some(RenderLoop::start(self.generation, Instant::now()));
        self.captures = CaptureController::default();
        let (tx, rx) = unbounded();
        let handle = CaptureHandle::new(tx);
        self.requests = Some(rx);
        self.handle = Some(handle.clone());
        self.gpu = Some(gpu);
        info!(
            width = size.width,
            height = size.height,
            generation = self.generation,
            "compositor ready"
        );
        Ok(handle)
    }

    /// Cancels the pending tick, fails outstanding captures and releases all
    /// GPU resources. Safe to call repeatedly or before `init`.
    pub fn teardown(&mut self) {
        if let Some(render_loop) = self.render_loop.as_mut() {
            render_loop.cancel();
        }
        self.render_loop = None;
        self.captures.abort_all();
        self.requests = None;
        self.handle = None;
        if let Some(mut gpu) = self.gpu.take() {
            let released = gpu.dispose();
            info!(released, "compositor torn down");
        }
    }

    pub fn is_ready(&self) -> bool {
        self.gpu.is_some()
    }

    pub fn init_error(&self) -> Option<&str> {
        self.init_error.as_deref()
    }

    /// Readiness handle; `None` before init and after teardown.
    pub fn capture_handle(&self) -> Option<CaptureHandle> {
        self.handle.clone()
    }

    pub fn capture_image(&self) -> Result<PendingCapture<Vec<u8>>, CaptureError> {
        capture::capture_image(self.handle.as_ref())
    }

    pub fn capture_animation(
        &self,
        settings: AnimationSettings,
    ) -> Result<PendingCapture<Vec<u8>>, CaptureError> {
        capture::capture_animation(self.handle.as_ref(), settings)
    }

    /// Version of the last presented frame of the current loop, 0 when idle.
    pub fn frame_version(&self) -> u64 {
        self.render_loop
            .as_ref()
            .map_or(0, RenderLoop::last_version)
    }

    pub fn captures_pending(&self) -> bool {
        !self.captures.is_idle()
    }

    /// Fixed frame sizes of in-flight animation captures.
    pub fn animation_sizes(&self) -> Vec<(u32, u32)> {
        self.captures.animation_sizes()
    }

    pub fn source_state(&self) -> SourceState {
        self.source.state()
    }

    pub fn lut(&self, axis: Axis) -> &Lut {
        &self.luts[axis.index()]
    }

    /// Resamples one axis and writes it into the live LUT texture.
    pub fn set_ramp(&mut self, axis: Axis, points: &[ControlPoint]) {
        let lut = sample_ramp(points);
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.update_lut(axis, &lut);
        }
        self.luts[axis.index()] = lut;
    }

    pub fn set_intensities(&mut self, intensities: Intensities) {
        self.intensities = intensities;
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.set_intensities(intensities);
        }
    }

    pub fn set_feed(&mut self, status: FeedStatus, feed: Option<Box<dyn VideoFeed>>) {
        self.source.sync(status, feed);
    }

    /// Returns whether the surface was reallocated.
    pub fn resize(&mut self, layout: SurfaceLayout) -> bool {
        match self.gpu.as_mut() {
            Some(gpu) => gpu.resize(
                layout.logical_width,
                layout.logical_height,
                layout.scale_factor,
            ),
            None => false,
        }
    }

    pub fn reconfigure_surface(&self) {
        if let Some(gpu) = &self.gpu {
            gpu.reconfigure();
        }
    }

    /// Reserves the next tick; `None` when not running.
    pub fn request_tick(&mut self) -> Option<TickToken> {
        self.render_loop.as_mut()?.schedule()
    }

    /// Runs one tick if `token` is still current: accepts capture requests,
    /// binds the frame source, draws, and advances captures on the new
    /// presented frame. Captures advance even when the surface rejects the
    /// draw; the surface error is returned afterwards.
    pub fn tick(
        &mut self,
        token: TickToken,
        now: Instant,
    ) -> Result<Option<PresentedFrame>, wgpu::SurfaceError> {
        let Some(render_loop) = self.render_loop.as_mut() else {
            return Ok(None);
        };
        if !render_loop.begin_tick(token) {
            return Ok(None);
        }
        let Some(gpu) = self.gpu.as_mut() else {
            return Ok(None);
        };

        if let Some(requests) = &self.requests {
            for request in requests.try_iter() {
                self.captures.submit(request, gpu.surface_size(), now);
            }
        }
        if let Some(upload) = self.source.poll() {
            gpu.bind_image(upload);
        }

        let drawn = gpu.render(render_loop.elapsed_seconds(now));
        let size = gpu.size();
        publish_frame(
            render_loop,
            &mut self.captures,
            gpu,
            drawn,
            now,
            (size.width, size.height),
        )
    }
}

/// Publishes the tick's frame and lets captures read it, then reports how
/// the surface draw went.
fn publish_frame(
    render_loop: &mut RenderLoop,
    captures: &mut CaptureController,
    grabber: &mut dyn FrameGrabber,
    drawn: Result<(), wgpu::SurfaceError>,
    now: Instant,
    (width, height): (u32, u32),
) -> Result<Option<PresentedFrame>, wgpu::SurfaceError> {
    let frame = render_loop.present(now, width, height);
    captures.on_presented(frame, grabber);
    drawn.map(|()| Some(frame))
}

impl Drop for Compositor {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{PixelReadback, RowOrder};
    use crossbeam_channel::bounded;
    use ramp::FLAT_MID;
    use std::time::Duration;

    #[test]
    fn capture_before_init_is_unavailable() {
        let compositor = Compositor::new(RampSet::default(), Intensities::default());
        assert!(compositor.capture_handle().is_none());
        assert_eq!(
            compositor.capture_image().unwrap_err(),
            CaptureError::Unavailable
        );
        assert_eq!(
            compositor
                .capture_animation(AnimationSettings::default())
                .unwrap_err(),
            CaptureError::Unavailable
        );
    }

    #[test]
    fn teardown_without_init_is_a_no_op() {
        let mut compositor = Compositor::new(RampSet::default(), Intensities::default());
        compositor.teardown();
        compositor.teardown();
        assert!(!compositor.is_ready());
        assert!(compositor.init_error().is_none());
        assert!(compositor.request_tick().is_none());
        assert_eq!(compositor.frame_version(), 0);
        assert!(!compositor.captures_pending());
        assert!(compositor.animation_sizes().is_empty());
    }

    #[test]
    fn ramps_resample_without_gpu() {
        let mut compositor = Compositor::new(RampSet::default(), Intensities::default());
        assert_eq!(compositor.lut(Axis::Horizontal).get(0), Some(FLAT_MID));

        compositor.set_ramp(
            Axis::Horizontal,
            &[ControlPoint::new(0, 0.0, 1.0), ControlPoint::new(1, 1.0, 0.0)],
        );
        assert_eq!(compositor.lut(Axis::Horizontal).get(0), Some(255));
        assert_eq!(compositor.lut(Axis::Horizontal).get(255), Some(0));
        assert_eq!(compositor.lut(Axis::Vertical).get(0), Some(FLAT_MID));
    }

    struct BlankGrabber {
        grabs: usize,
    }

    impl FrameGrabber for BlankGrabber {
        fn grab(&mut self, width: u32, height: u32) -> Result<PixelReadback, CaptureError> {
            self.grabs += 1;
            Ok(PixelReadback {
                width,
                height,
                rows: RowOrder::TopDown,
                rgba: vec![90; (width * height * 4) as usize],
            })
        }
    }

    #[test]
    fn captures_advance_while_the_surface_rejects_frames() {
        let start = Instant::now();
        let mut render_loop = RenderLoop::start(1, start);
        let mut captures = CaptureController::default();
        let mut grabber = BlankGrabber { grabs: 0 };
        let (reply, rx) = bounded(1);
        captures.submit(
            CaptureRequest::Animation {
                settings: AnimationSettings {
                    duration_seconds: 0.5,
                    fps: 10.0,
                    scale: 1.0,
                },
                reply,
            },
            Some((8, 8)),
            start,
        );

        let mut ticks = 0u64;
        while !captures.is_idle() {
            ticks += 1;
            assert!(ticks < 100, "animation never finished");
            let failure = if ticks % 2 == 0 {
                wgpu::SurfaceError::Timeout
            } else {
                wgpu::SurfaceError::Outdated
            };
            let at = start + Duration::from_millis(ticks * 40);
            let result = publish_frame(
                &mut render_loop,
                &mut captures,
                &mut grabber,
                Err(failure.clone()),
                at,
                (8, 8),
            );
            assert_eq!(result, Err(failure));
        }

        let bytes = rx.try_recv().unwrap().unwrap();
        assert_eq!(&bytes[..6], b"GIF89a");
        assert!(grabber.grabs > 0);
        assert_eq!(render_loop.last_version(), ticks);
    }

    #[test]
    fn successful_draw_returns_the_published_frame() {
        let start = Instant::now();
        let mut render_loop = RenderLoop::start(1, start);
        let mut captures = CaptureController::default();
        let mut grabber = BlankGrabber { grabs: 0 };
        let (reply, rx) = bounded(1);
        captures.submit(CaptureRequest::Still { reply }, Some((4, 4)), start);

        let frame = publish_frame(
            &mut render_loop,
            &mut captures,
            &mut grabber,
            Ok(()),
            start,
            (4, 4),
        )
        .unwrap()
        .unwrap();
        assert_eq!(frame.version, 1);
        assert_eq!((frame.width, frame.height), (4, 4));
        assert!(rx.try_recv().unwrap().is_ok());
    }

    #[test]
    fn feed_status_is_forwarded_to_source() {
        struct Silent;
        impl VideoFeed for Silent {
            fn poll_frame(&mut self) -> crate::source::FeedEvent {
                crate::source::FeedEvent::Idle
            }
        }

        let mut compositor = Compositor::new(RampSet::default(), Intensities::default());
        compositor.set_feed(FeedStatus::Pending, Some(Box::new(Silent)));
        assert_eq!(
            compositor.source_state(),
            SourceState::LiveVideo { ready: false }
        );
        compositor.set_feed(FeedStatus::Inactive, None);
        assert_eq!(compositor.source_state(), SourceState::Procedural);
    }
}
