//! Still and looping-animation export.
//!
//! Capture jobs run on the window thread and advance on every
//! [`PresentedFrame`](crate::render_loop::PresentedFrame). They read pixels
//! through a [`FrameGrabber`] so the scheduling and encoding rules can be
//! exercised without a GPU.
//! - `schedule` sanitizes animation settings and decides when a step is due.
//! - `encode` turns frames into PNG bytes or a quantized, looping GIF.
//! - `animation` ties one schedule to one GIF and a fixed frame size.
//! - `controller` owns outstanding jobs and answers their requests.
//! - `handle` is the cross-thread entry point handed out once the compositor
//!   is ready.

mod animation;
mod controller;
mod encode;
mod handle;
mod schedule;

use image::imageops::flip_vertical_in_place;
use image::RgbaImage;

pub use controller::{CaptureController, CaptureRequest};
pub use encode::{encode_png, quantize, GifAssembler, QuantizedFrame};
pub use handle::{capture_animation, capture_image, CaptureHandle, PendingCapture};
pub use schedule::{
    AnimationPlan, AnimationSchedule, AnimationSettings, ScheduleStep, MAX_FPS, MAX_SCALE,
    MIN_DURATION_SECONDS, MIN_FPS, MIN_SCALE,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("renderer is not ready for capture")]
    Unavailable,
    #[error("no drawing surface is available")]
    NoSurface,
    #[error("animation encoding produced no data")]
    EncodingEmpty,
    #[error("timed out waiting for capture")]
    TimedOut,
    #[error("pixel readback failed: {0}")]
    Readback(String),
    #[error("image encoding failed: {0}")]
    Encode(String),
}

/// Scanline order of a readback buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowOrder {
    TopDown,
    BottomUp,
}

/// Tightly packed RGBA8 pixels read back from the GPU.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelReadback {
    pub width: u32,
    pub height: u32,
    pub rows: RowOrder,
    pub rgba: Vec<u8>,
}

impl std::fmt::Debug for PixelReadback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelReadback")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("rows", &self.rows)
            .field("bytes", &self.rgba.len())
            .finish()
    }
}

impl PixelReadback {
    /// Returns the pixels as an image with the top scanline first.
    pub fn into_top_down(self) -> Result<RgbaImage, CaptureError> {
        let (width, height, rows) = (self.width, self.height, self.rows);
        let mut image = RgbaImage::from_raw(width, height, self.rgba).ok_or_else(|| {
            CaptureError::Readback(format!("buffer does not hold {width}x{height} RGBA pixels"))
        })?;
        if rows == RowOrder::BottomUp {
            flip_vertical_in_place(&mut image);
        }
        Ok(image)
    }
}

/// Renders the current frame state at a given size and reads it back.
pub trait FrameGrabber {
    fn grab(&mut self, width: u32, height: u32) -> Result<PixelReadback, CaptureError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(order: RowOrder) -> PixelReadback {
        let mut rgba = Vec::new();
        for row in 0..3u8 {
            rgba.extend([row, row, row, 255, row, row, row, 255]);
        }
        PixelReadback {
            width: 2,
            height: 3,
            rows: order,
            rgba,
        }
    }

    #[test]
    fn bottom_up_readback_is_flipped() {
        let image = rows(RowOrder::BottomUp).into_top_down().unwrap();
        assert_eq!(image.get_pixel(0, 0).0[0], 2);
        assert_eq!(image.get_pixel(1, 2).0[0], 0);
    }

    #[test]
    fn top_down_readback_is_untouched() {
        let image = rows(RowOrder::TopDown).into_top_down().unwrap();
        assert_eq!(image.get_pixel(0, 0).0[0], 0);
        assert_eq!(image.get_pixel(0, 2).0[0], 2);
    }

    #[test]
    fn short_buffers_are_rejected() {
        let mut readback = rows(RowOrder::TopDown);
        readback.rgba.truncate(4);
        assert!(matches!(
            readback.into_top_down(),
            Err(CaptureError::Readback(_))
        ));
    }
}
