use std::sync::mpsc;
use std::time::{Duration, Instant};

use image::RgbaImage;
use ramp::{Axis, Lut};
use tracing::{debug, warn};
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;

use crate::capture::{CaptureError, FrameGrabber, PixelReadback, RowOrder};
use crate::compile::guarded;
use crate::error::InitError;
use crate::source::{ImageUpload, UploadKind};
use crate::types::{GpuPowerPreference, Intensities};

use super::context::{resolve_backing_size, GpuContext};
use super::pipeline::CompositorPipeline;
use super::resources::{GpuObject, ResourceArena, ResourceId};
use super::textures::{
    create_base_texture, create_capture_target, create_lut_texture, normalize_channels,
    unpad_rows, write_base, write_lut, CaptureTarget, TextureSlot,
};
use super::uniforms::CompositorUniforms;

/// Offscreen capture targets kept alive between readbacks.
const MAX_CAPTURE_TARGETS: usize = 2;

/// Everything owned through the arena, plus views and bind groups derived
/// from it. Gone after [`GpuState::dispose`].
struct Resources {
    arena: ResourceArena<GpuObject>,
    pipeline: CompositorPipeline,
    uniform_buffer: ResourceId,
    luts: [TextureSlot; 2],
    base: TextureSlot,
    bind_group: wgpu::BindGroup,
    capture_targets: Vec<CaptureTarget>,
}

impl Resources {
    fn rebuild_bind_group(&mut self, device: &wgpu::Device) {
        if let Some(uniform_buffer) = self.arena.buffer(self.uniform_buffer) {
            self.bind_group = build_bind_group(
                device,
                &self.pipeline,
                uniform_buffer,
                &self.base,
                &self.luts,
            );
        }
    }

    /// Returns the index of a capture target of the given size, creating one
    /// and evicting the oldest if needed.
    fn capture_target(
        &mut self,
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> Result<usize, String> {
        if let Some(index) = self
            .capture_targets
            .iter()
            .position(|target| target.width == width && target.height == height)
        {
            return Ok(index);
        }
        if self.capture_targets.len() >= MAX_CAPTURE_TARGETS {
            let evicted = self.capture_targets.remove(0);
            self.arena.release(evicted.texture);
            self.arena.release(evicted.buffer);
        }
        let target = create_capture_target(device, format, width, height, &mut self.arena)?;
        debug!(width, height, "allocated capture target");
        self.capture_targets.push(target);
        Ok(self.capture_targets.len() - 1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Viewport {
    width: u32,
    height: u32,
}

struct RenderStats {
    frames: u32,
    since: Instant,
}

/// GPU side of the compositor: program, base image, LUTs, geometry and
/// uniforms, plus offscreen readback for captures.
pub(crate) struct GpuState {
    context: GpuContext,
    resources: Option<Resources>,
    intensities: Intensities,
    uniforms: CompositorUniforms,
    viewport: Viewport,
    stats: RenderStats,
}

impl GpuState {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        target: impl Into<wgpu::SurfaceTarget<'static>>,
        size: PhysicalSize<u32>,
        gpu_power: GpuPowerPreference,
        vsync: bool,
        luts: &[Lut; 2],
        base_image: &RgbaImage,
        intensities: Intensities,
    ) -> Result<Self, InitError> {
        let context = GpuContext::new(target, size, gpu_power, vsync)?;

        let mut arena = ResourceArena::default();
        let resources = match build_resources(&context, &mut arena, luts, base_image) {
            Ok(parts) => parts,
            Err(err) => {
                arena.dispose_all();
                return Err(err);
            }
        };
        let (pipeline, uniform_buffer, lut_slots, base, bind_group) = resources;
        debug!(live = arena.live(), "GPU resources initialised");

        Ok(Self {
            context,
            resources: Some(Resources {
                arena,
                pipeline,
                uniform_buffer,
                luts: lut_slots,
                base,
                bind_group,
                capture_targets: Vec::new(),
            }),
            intensities,
            uniforms: CompositorUniforms::new(intensities, 0.0),
            viewport: Viewport {
                width: size.width,
                height: size.height,
            },
            stats: RenderStats {
                frames: 0,
                since: Instant::now(),
            },
        })
    }

    pub(crate) fn size(&self) -> PhysicalSize<u32> {
        self.context.size
    }

    /// Current drawing size, `None` when there is no surface to draw into.
    pub(crate) fn surface_size(&self) -> Option<(u32, u32)> {
        if self.resources.is_none() || !self.context.has_surface() {
            return None;
        }
        Some((self.context.size.width, self.context.size.height))
    }

    /// Writes a new LUT into the existing texture for `axis`.
    pub(crate) fn update_lut(&mut self, axis: Axis, lut: &Lut) {
        let Some(resources) = self.resources.as_ref() else {
            return;
        };
        let slot = &resources.luts[axis.index()];
        if let Some(texture) = resources.arena.texture(slot.id) {
            write_lut(&self.context.queue, texture, lut);
        }
    }

    pub(crate) fn set_intensities(&mut self, intensities: Intensities) {
        self.intensities = intensities;
    }

    /// Resolves the backing store for a logical container size. The surface
    /// is reconfigured only when the pixel size changes; the viewport is
    /// always reset. Returns whether the surface was reallocated.
    pub(crate) fn resize(&mut self, logical_width: f64, logical_height: f64, scale_factor: f64) -> bool {
        let size = resolve_backing_size(logical_width, logical_height, scale_factor);
        let reallocated = self.context.resize(size);
        self.viewport = Viewport {
            width: size.width,
            height: size.height,
        };
        if reallocated {
            debug!(width = size.width, height = size.height, "surface reconfigured");
        }
        reallocated
    }

    pub(crate) fn reconfigure(&self) {
        self.context.reconfigure();
    }

    /// Binds new base-image content, reallocating for full uploads or when
    /// the dimensions change.
    pub(crate) fn bind_image(&mut self, upload: ImageUpload) {
        let kind = upload.kind;
        let image = upload.into_texture_rows();
        let Some(resources) = self.resources.as_mut() else {
            return;
        };
        let (width, height) = image.dimensions();
        let max = self.context.max_texture_dimension;
        if width > max || height > max {
            warn!(width, height, max, "base image exceeds GPU limits; keeping previous image");
            return;
        }

        let same_size = resources.base.width == width && resources.base.height == height;
        if kind == UploadKind::Update && same_size {
            if let Some(texture) = resources.arena.texture(resources.base.id) {
                write_base(&self.context.queue, texture, &image);
                return;
            }
        }

        match create_base_texture(
            &self.context.device,
            &self.context.queue,
            &image,
            &mut resources.arena,
        ) {
            Ok(slot) => {
                let previous = std::mem::replace(&mut resources.base, slot);
                resources.arena.release(previous.id);
                resources.rebuild_bind_group(&self.context.device);
                debug!(width, height, "base image reallocated");
            }
            Err(message) => warn!(%message, "failed to allocate base image"),
        }
    }

    /// Pushes uniforms for `time` and presents one frame.
    pub(crate) fn render(&mut self, time: f32) -> Result<(), wgpu::SurfaceError> {
        let Some(resources) = self.resources.as_ref() else {
            return Ok(());
        };
        self.uniforms = CompositorUniforms::new(self.intensities, time);
        if let Some(buffer) = resources.arena.buffer(resources.uniform_buffer) {
            self.context
                .queue
                .write_buffer(buffer, 0, bytemuck::bytes_of(&self.uniforms));
        }
        if !self.context.has_surface() {
            return Ok(());
        }

        let frame = self.context.surface.get_current_texture()?;
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("compositor frame"),
            });
        encode_draw(&mut encoder, &view, resources, self.viewport);
        self.context.queue.submit(Some(encoder.finish()));
        frame.present();

        self.stats.frames += 1;
        let elapsed = self.stats.since.elapsed();
        if elapsed >= Duration::from_secs(5) {
            debug!(
                fps = (self.stats.frames as f32 / elapsed.as_secs_f32()).round(),
                time,
                width = self.viewport.width,
                height = self.viewport.height,
                "render stats"
            );
            self.stats.frames = 0;
            self.stats.since = Instant::now();
        }
        Ok(())
    }

    /// Releases every GPU resource exactly once. Later calls return 0.
    pub(crate) fn dispose(&mut self) -> usize {
        let Some(mut resources) = self.resources.take() else {
            return 0;
        };
        let released = resources.arena.dispose_all();
        debug!(released, "GPU resources disposed");
        released
    }

    fn read_pixels(&mut self, width: u32, height: u32) -> Result<PixelReadback, CaptureError> {
        let context = &self.context;
        let Some(resources) = self.resources.as_mut() else {
            return Err(CaptureError::Unavailable);
        };
        if width == 0 || height == 0 {
            return Err(CaptureError::NoSurface);
        }
        if width > context.max_texture_dimension || height > context.max_texture_dimension {
            return Err(CaptureError::Readback(format!(
                "{width}x{height} exceeds the GPU texture limit"
            )));
        }

        let index = resources
            .capture_target(&context.device, context.surface_format, width, height)
            .map_err(CaptureError::Readback)?;
        let resources = &*resources;
        let target = &resources.capture_targets[index];
        let buffer = resources
            .arena
            .buffer(target.buffer)
            .ok_or_else(|| CaptureError::Readback("capture buffer missing".to_string()))?;
        let texture = resources
            .arena
            .texture(target.texture)
            .ok_or_else(|| CaptureError::Readback("capture texture missing".to_string()))?;

        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("capture readback"),
            });
        encode_draw(&mut encoder, &target.view, resources, Viewport { width, height });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(target.padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        context.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        context
            .device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| CaptureError::Readback(err.to_string()))?;
        rx.recv()
            .map_err(|_| CaptureError::Readback("map callback dropped".to_string()))?
            .map_err(|err| CaptureError::Readback(err.to_string()))?;

        let mut rgba = {
            let mapped = slice.get_mapped_range();
            unpad_rows(&mapped, width, height, target.padded_bytes_per_row)
        };
        buffer.unmap();
        normalize_channels(context.surface_format, &mut rgba).map_err(CaptureError::Readback)?;

        Ok(PixelReadback {
            width,
            height,
            rows: RowOrder::TopDown,
            rgba,
        })
    }
}

impl FrameGrabber for GpuState {
    fn grab(&mut self, width: u32, height: u32) -> Result<PixelReadback, CaptureError> {
        self.read_pixels(width, height)
    }
}

impl Drop for GpuState {
    fn drop(&mut self) {
        self.dispose();
    }
}

type ResourceParts = (
    CompositorPipeline,
    ResourceId,
    [TextureSlot; 2],
    TextureSlot,
    wgpu::BindGroup,
);

fn build_resources(
    context: &GpuContext,
    arena: &mut ResourceArena<GpuObject>,
    luts: &[Lut; 2],
    base_image: &RgbaImage,
) -> Result<ResourceParts, InitError> {
    let device = &context.device;
    let queue = &context.queue;

    let pipeline = CompositorPipeline::new(device, context.surface_format, arena)?;

    let uniforms = CompositorUniforms::default();
    let uniform_buffer = guarded(device, || {
        device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("compositor uniforms"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        })
    })
    .map_err(|message| InitError::Allocation {
        resource: "uniform buffer",
        message,
    })?;

    let lut_slots = [
        create_lut_texture(device, queue, Axis::Horizontal, &luts[0], arena)?,
        create_lut_texture(device, queue, Axis::Vertical, &luts[1], arena)?,
    ];
    let base = create_base_texture(device, queue, base_image, arena).map_err(|message| {
        InitError::Allocation {
            resource: "base image texture",
            message,
        }
    })?;

    let bind_group = build_bind_group(device, &pipeline, &uniform_buffer, &base, &lut_slots);
    let uniform_buffer = arena.insert(GpuObject::Buffer(uniform_buffer));
    Ok((pipeline, uniform_buffer, lut_slots, base, bind_group))
}

fn build_bind_group(
    device: &wgpu::Device,
    pipeline: &CompositorPipeline,
    uniform_buffer: &wgpu::Buffer,
    base: &TextureSlot,
    luts: &[TextureSlot; 2],
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("compositor bind group"),
        layout: &pipeline.bind_group_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(&base.view),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::Sampler(&pipeline.base_sampler),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: wgpu::BindingResource::TextureView(&luts[0].view),
            },
            wgpu::BindGroupEntry {
                binding: 4,
                resource: wgpu::BindingResource::TextureView(&luts[1].view),
            },
            wgpu::BindGroupEntry {
                binding: 5,
                resource: wgpu::BindingResource::Sampler(&pipeline.lut_sampler),
            },
        ],
    })
}

fn encode_draw(
    encoder: &mut wgpu::CommandEncoder,
    view: &wgpu::TextureView,
    resources: &Resources,
    viewport: Viewport,
) {
    let (Some(pipeline), Some(vertex_buffer)) = (
        resources.arena.pipeline(resources.pipeline.pipeline),
        resources.arena.buffer(resources.pipeline.vertex_buffer),
    ) else {
        warn!("draw skipped: pipeline resources released");
        return;
    };

    let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("compositor pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            depth_slice: None,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        occlusion_query_set: None,
        timestamp_writes: None,
    });
    render_pass.set_viewport(
        0.0,
        0.0,
        viewport.width.max(1) as f32,
        viewport.height.max(1) as f32,
        0.0,
        1.0,
    );
    render_pass.set_pipeline(pipeline);
    render_pass.set_bind_group(0, &resources.bind_group, &[]);
    render_pass.set_vertex_buffer(0, vertex_buffer.slice(..));
    render_pass.draw(0..3, 0..1);
}
