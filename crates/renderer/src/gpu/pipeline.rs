use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::compile::{compile_fragment_shader, compile_vertex_shader, guarded};
use crate::error::InitError;

use super::resources::{GpuObject, ResourceArena, ResourceId};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Vertex {
    position: [f32; 2],
}

unsafe impl Zeroable for Vertex {}
unsafe impl Pod for Vertex {}

/// Oversized triangle covering clip space, counter-clockwise.
pub(crate) const FULLSCREEN_TRIANGLE: [Vertex; 3] = [
    Vertex {
        position: [-1.0, -1.0],
    },
    Vertex {
        position: [3.0, -1.0],
    },
    Vertex {
        position: [-1.0, 3.0],
    },
];

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];

/// The linked program plus the layout its bind groups are built against.
pub(crate) struct CompositorPipeline {
    pub pipeline: ResourceId,
    pub vertex_buffer: ResourceId,
    pub bind_group_layout: wgpu::BindGroupLayout,
    pub base_sampler: wgpu::Sampler,
    pub lut_sampler: wgpu::Sampler,
}

impl CompositorPipeline {
    pub fn new(
        device: &wgpu::Device,
        target_format: wgpu::TextureFormat,
        arena: &mut ResourceArena<GpuObject>,
    ) -> Result<Self, InitError> {
        let vertex_module = compile_vertex_shader(device)?;
        let fragment_module = compile_fragment_shader(device)?;

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("compositor layout"),
            entries: &layout_entries(),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("compositor pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = guarded(device, || {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("compositor pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vertex_module,
                    entry_point: Some("main"),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &VERTEX_ATTRIBUTES,
                    }],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &fragment_module,
                    entry_point: Some("main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: target_format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                multiview: None,
                cache: None,
            })
        })
        .map_err(InitError::ProgramLink)?;

        arena.insert(GpuObject::Shader(vertex_module));
        arena.insert(GpuObject::Shader(fragment_module));
        let pipeline = arena.insert(GpuObject::Pipeline(pipeline));

        let vertex_buffer = guarded(device, || {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("fullscreen triangle"),
                contents: bytemuck::cast_slice(&FULLSCREEN_TRIANGLE),
                usage: wgpu::BufferUsages::VERTEX,
            })
        })
        .map_err(|message| InitError::Allocation {
            resource: "vertex buffer",
            message,
        })?;
        let vertex_buffer = arena.insert(GpuObject::Buffer(vertex_buffer));

        let base_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("base image sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let lut_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("lut sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Ok(Self {
            pipeline,
            vertex_buffer,
            bind_group_layout,
            base_sampler,
            lut_sampler,
        })
    }
}

fn layout_entries() -> [wgpu::BindGroupLayoutEntry; 6] {
    let texture = |binding, view_dimension| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension,
            multisampled: false,
        },
        count: None,
    };
    let sampler = |binding| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    };

    [
        wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        },
        texture(1, wgpu::TextureViewDimension::D2),
        sampler(2),
        texture(3, wgpu::TextureViewDimension::D1),
        texture(4, wgpu::TextureViewDimension::D1),
        sampler(5),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triangle_covers_clip_space() {
        let xs = FULLSCREEN_TRIANGLE.map(|vertex| vertex.position[0]);
        let ys = FULLSCREEN_TRIANGLE.map(|vertex| vertex.position[1]);
        assert_eq!(xs.iter().cloned().fold(f32::MAX, f32::min), -1.0);
        assert_eq!(ys.iter().cloned().fold(f32::MAX, f32::min), -1.0);
        assert!(xs.iter().any(|&x| x >= 3.0));
        assert!(ys.iter().any(|&y| y >= 3.0));

        // Counter-clockwise winding: positive signed area.
        let [a, b, c] = FULLSCREEN_TRIANGLE.map(|vertex| vertex.position);
        let area = (b[0] - a[0]) * (c[1] - a[1]) - (c[0] - a[0]) * (b[1] - a[1]);
        assert!(area > 0.0);
    }

    #[test]
    fn layout_binds_two_one_dimensional_luts() {
        let entries = layout_entries();
        let dims: Vec<_> = entries
            .iter()
            .filter_map(|entry| match entry.ty {
                wgpu::BindingType::Texture { view_dimension, .. } => {
                    Some((entry.binding, view_dimension))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            dims,
            vec![
                (1, wgpu::TextureViewDimension::D2),
                (3, wgpu::TextureViewDimension::D1),
                (4, wgpu::TextureViewDimension::D1),
            ]
        );
    }
}
