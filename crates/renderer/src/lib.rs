//! Renderer crate for rampwarp.
//!
//! Composites a base image through two tone-ramp lookup tables and a wave
//! wobble on the GPU, and exports what it draws as PNG stills or looping
//! GIFs. The overall flow is:
//!
//! ```text
//!   CLI / rampwarp
//!          │ RendererConfig
//!          ▼
//!   WindowRuntime::spawn ──▶ winit event loop ──▶ Compositor::tick
//!          ▲                                            │
//!          │ CaptureHandle                              ├─▶ FrameSource::poll ─▶ base texture
//!          └──────── PendingCapture ◀── captures ◀──────┴─▶ GpuState::render ─▶ PresentedFrame
//! ```
//!
//! `Compositor` owns the GPU state and is driven on the window thread;
//! other threads only ever talk to it through a [`CaptureHandle`] or the
//! [`WindowRuntime`] command proxy.

mod capture;
mod compile;
mod compositor;
mod error;
mod gpu;
mod render_loop;
mod source;
mod types;
mod window;

pub use capture::{
    capture_animation, capture_image, encode_png, AnimationPlan, AnimationSettings,
    CaptureError, CaptureHandle, PendingCapture, PixelReadback, RowOrder, MAX_FPS, MAX_SCALE,
    MIN_DURATION_SECONDS, MIN_FPS, MIN_SCALE,
};
pub use compositor::{Compositor, SurfaceLayout};
pub use error::InitError;
pub use render_loop::{PresentedFrame, TickToken};
pub use source::{
    procedural_image, ChannelFeed, FeedEvent, FeedStatus, SourceState, VideoFeed, VideoFrame,
    PROCEDURAL_SIZE,
};
pub use types::{GpuPowerPreference, Intensities, RampSet, RendererConfig};
pub use window::{KeyAction, Readiness, RuntimeEvent, WindowRuntime};

pub use ramp::{Axis, ControlPoint, Lut};
