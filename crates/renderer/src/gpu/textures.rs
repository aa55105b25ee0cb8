use image::RgbaImage;
use ramp::{Axis, Lut, LUT_SIZE};
use wgpu::util::{DeviceExt, TextureDataOrder};

use crate::compile::guarded;
use crate::error::InitError;

use super::resources::{GpuObject, ResourceArena, ResourceId};

const BASE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const LUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R8Unorm;

pub(crate) struct TextureSlot {
    pub id: ResourceId,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

pub(crate) fn create_lut_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    axis: Axis,
    lut: &Lut,
    arena: &mut ResourceArena<GpuObject>,
) -> Result<TextureSlot, InitError> {
    let label = format!("{axis} lut");
    let texture = guarded(device, || {
        device.create_texture_with_data(
            queue,
            &wgpu::TextureDescriptor {
                label: Some(&label),
                size: wgpu::Extent3d {
                    width: LUT_SIZE as u32,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D1,
                format: LUT_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            TextureDataOrder::LayerMajor,
            lut.as_bytes(),
        )
    })
    .map_err(|message| InitError::Allocation {
        resource: "lut texture",
        message,
    })?;

    let view = texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some(&label),
        dimension: Some(wgpu::TextureViewDimension::D1),
        ..Default::default()
    });
    Ok(TextureSlot {
        id: arena.insert(GpuObject::Texture(texture)),
        view,
        width: LUT_SIZE as u32,
        height: 1,
    })
}

/// Overwrites a LUT texture in place.
pub(crate) fn write_lut(queue: &wgpu::Queue, texture: &wgpu::Texture, lut: &Lut) {
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        lut.as_bytes(),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(LUT_SIZE as u32),
            rows_per_image: None,
        },
        wgpu::Extent3d {
            width: LUT_SIZE as u32,
            height: 1,
            depth_or_array_layers: 1,
        },
    );
}

/// Allocates the base texture from bottom-origin rows.
pub(crate) fn create_base_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    image: &RgbaImage,
    arena: &mut ResourceArena<GpuObject>,
) -> Result<TextureSlot, String> {
    let (width, height) = image.dimensions();
    let texture = guarded(device, || {
        device.create_texture_with_data(
            queue,
            &wgpu::TextureDescriptor {
                label: Some("base image"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: BASE_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            TextureDataOrder::LayerMajor,
            image.as_raw(),
        )
    })?;
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    Ok(TextureSlot {
        id: arena.insert(GpuObject::Texture(texture)),
        view,
        width,
        height,
    })
}

pub(crate) fn write_base(queue: &wgpu::Queue, texture: &wgpu::Texture, image: &RgbaImage) {
    let (width, height) = image.dimensions();
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        image.as_raw(),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * 4),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
}

/// Offscreen render target plus the buffer it is copied into for readback.
pub(crate) struct CaptureTarget {
    pub texture: ResourceId,
    pub view: wgpu::TextureView,
    pub buffer: ResourceId,
    pub width: u32,
    pub height: u32,
    pub padded_bytes_per_row: u32,
}

pub(crate) fn create_capture_target(
    device: &wgpu::Device,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
    arena: &mut ResourceArena<GpuObject>,
) -> Result<CaptureTarget, String> {
    let texture = guarded(device, || {
        device.create_texture(&wgpu::TextureDescriptor {
            label: Some("capture target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        })
    })?;
    let padded_bytes_per_row = padded_bytes_per_row(width);
    let buffer = match guarded(device, || {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("capture readback"),
            size: padded_bytes_per_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        })
    }) {
        Ok(buffer) => buffer,
        Err(message) => {
            texture.destroy();
            return Err(message);
        }
    };

    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    Ok(CaptureTarget {
        texture: arena.insert(GpuObject::Texture(texture)),
        view,
        buffer: arena.insert(GpuObject::Buffer(buffer)),
        width,
        height,
        padded_bytes_per_row,
    })
}

pub(crate) fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Strips row padding from a mapped readback buffer.
pub(crate) fn unpad_rows(data: &[u8], width: u32, height: u32, padded_bytes_per_row: u32) -> Vec<u8> {
    let row_bytes = (width * 4) as usize;
    let mut rgba = Vec::with_capacity(row_bytes * height as usize);
    for row in data
        .chunks(padded_bytes_per_row as usize)
        .take(height as usize)
    {
        rgba.extend_from_slice(&row[..row_bytes.min(row.len())]);
    }
    rgba
}

/// Converts readback bytes in `format` to RGBA8 in place.
pub(crate) fn normalize_channels(
    format: wgpu::TextureFormat,
    pixels: &mut [u8],
) -> Result<(), String> {
    match format {
        wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb => Ok(()),
        wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb => {
            for pixel in pixels.chunks_exact_mut(4) {
                pixel.swap(0, 2);
            }
            Ok(())
        }
        other => Err(format!("cannot read back {other:?} pixels")),
    }
}
