use std::io::Cursor;

use color_quant::NeuQuant;
use gif::{Encoder, Frame, Repeat};
use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbaImage};

use super::CaptureError;

/// NeuQuant sampling factor; 10 is the reference quality/speed trade-off.
const QUANT_SAMPLE_FACTOR: i32 = 10;
const PALETTE_SIZE: usize = 256;

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, CaptureError> {
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Png)
        .map_err(|err| CaptureError::Encode(err.to_string()))?;
    Ok(bytes.into_inner())
}

/// Downscales with a triangle filter when the target is smaller.
pub fn scale_frame(image: RgbaImage, width: u32, height: u32) -> RgbaImage {
    if image.dimensions() == (width, height) {
        return image;
    }
    imageops::resize(&image, width, height, FilterType::Triangle)
}

/// An adaptive palette plus one index per pixel.
#[derive(Debug)]
pub struct QuantizedFrame {
    /// Packed RGB triples, at most 256 of them.
    pub palette: Vec<u8>,
    pub indices: Vec<u8>,
}

pub fn quantize(image: &RgbaImage) -> QuantizedFrame {
    let rgba = image.as_raw();
    let quantizer = NeuQuant::new(QUANT_SAMPLE_FACTOR, PALETTE_SIZE, rgba);
    let indices = rgba
        .chunks_exact(4)
        .map(|pixel| quantizer.index_of(pixel) as u8)
        .collect();
    QuantizedFrame {
        palette: quantizer.color_map_rgb(),
        indices,
    }
}

/// GIF delays are stored in hundredths of a second.
pub fn delay_centiseconds(delay_ms: u32) -> u16 {
    ((delay_ms + 5) / 10).clamp(1, u16::MAX as u32) as u16
}

/// Streams quantized frames into an infinitely looping GIF.
pub struct GifAssembler {
    width: u16,
    height: u16,
    delay: u16,
    encoder: Option<Encoder<Vec<u8>>>,
    frames: u32,
}

impl GifAssembler {
    pub fn new(width: u32, height: u32, delay_ms: u32) -> Result<Self, CaptureError> {
        let width = u16::try_from(width)
            .map_err(|_| CaptureError::Encode(format!("GIF width {width} exceeds 65535")))?;
        let height = u16::try_from(height)
            .map_err(|_| CaptureError::Encode(format!("GIF height {height} exceeds 65535")))?;
        Ok(Self {
            width,
            height,
            delay: delay_centiseconds(delay_ms),
            encoder: None,
            frames: 0,
        })
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    pub fn push(&mut self, image: &RgbaImage) -> Result<(), CaptureError> {
        if image.dimensions() != (self.width as u32, self.height as u32) {
            return Err(CaptureError::Encode(format!(
                "frame is {}x{}, animation is {}x{}",
                image.width(),
                image.height(),
                self.width,
                self.height
            )));
        }

        let quantized = quantize(image);
        let mut frame = Frame::from_palette_pixels(
            self.width,
            self.height,
            quantized.indices,
            quantized.palette,
            None,
        );
        frame.delay = self.delay;

        if self.encoder.is_none() {
            let mut encoder = Encoder::new(Vec::new(), self.width, self.height, &[])
                .map_err(|err| CaptureError::Encode(err.to_string()))?;
            encoder
                .set_repeat(Repeat::Infinite)
                .map_err(|err| CaptureError::Encode(err.to_string()))?;
            self.encoder = Some(encoder);
        }
        if let Some(encoder) = self.encoder.as_mut() {
            encoder
                .write_frame(&frame)
                .map_err(|err| CaptureError::Encode(err.to_string()))?;
            self.frames += 1;
        }
        Ok(())
    }

    pub fn finish(self) -> Result<Vec<u8>, CaptureError> {
        let Some(encoder) = self.encoder else {
            return Err(CaptureError::EncodingEmpty);
        };
        let bytes = encoder
            .into_inner()
            .map_err(|err| CaptureError::Encode(err.to_string()))?;
        if bytes.is_empty() {
            return Err(CaptureError::EncodingEmpty);
        }
        Ok(bytes)
    }
}
