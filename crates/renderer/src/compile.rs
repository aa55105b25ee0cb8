use std::borrow::Cow;

use wgpu::naga::ShaderStage;

use crate::error::InitError;

/// Runs a resource constructor inside validation and out-of-memory error
/// scopes and reports the first captured error synchronously.
pub(crate) fn guarded<T>(device: &wgpu::Device, create: impl FnOnce() -> T) -> Result<T, String> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = create();
    let validation = pollster::block_on(device.pop_error_scope());
    let memory = pollster::block_on(device.pop_error_scope());
    match validation.or(memory) {
        Some(err) => Err(err.to_string()),
        None => Ok(value),
    }
}

pub(crate) fn compile_vertex_shader(device: &wgpu::Device) -> Result<wgpu::ShaderModule, InitError> {
    compile(device, "compositor vertex", VERTEX_SHADER_GLSL, ShaderStage::Vertex)
        .map_err(|message| InitError::ShaderCompile {
            stage: "vertex",
            message,
        })
}

pub(crate) fn compile_fragment_shader(
    device: &wgpu::Device,
) -> Result<wgpu::ShaderModule, InitError> {
    compile(
        device,
        "compositor fragment",
        FRAGMENT_SHADER_GLSL,
        ShaderStage::Fragment,
    )
    .map_err(|message| InitError::ShaderCompile {
        stage: "fragment",
        message,
    })
}

fn compile(
    device: &wgpu::Device,
    label: &'static str,
    source: &'static str,
    stage: ShaderStage,
) -> Result<wgpu::ShaderModule, String> {
    guarded(device, || {
        device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Borrowed(source),
                stage,
                defines: &[],
            },
        })
    })
}

/// Full-viewport triangle; positions come from the vertex buffer.
///
/// `v_uv` is bottom-origin: `v_uv.y == 1.0` is the top edge of the target, so
/// texture row 0 must hold the bottom scanline.
pub(crate) const VERTEX_SHADER_GLSL: &str = r"#version 450
layout(location = 0) in vec2 position;
layout(location = 0) out vec2 v_uv;

void main() {
    v_uv = position * 0.5 + vec2(0.5, 0.5);
    gl_Position = vec4(position, 0.0, 1.0);
}
";

pub(crate) const FRAGMENT_SHADER_GLSL: &str = r"#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 out_color;

layout(std140, set = 0, binding = 0) uniform CompositorParams {
    float intensity_x;
    float intensity_y;
    float wave;
    float time;
} params;

layout(set = 0, binding = 1) uniform texture2D base_image;
layout(set = 0, binding = 2) uniform sampler base_sampler;
layout(set = 0, binding = 3) uniform texture1D lut_x;
layout(set = 0, binding = 4) uniform texture1D lut_y;
layout(set = 0, binding = 5) uniform sampler lut_sampler;

const float DISPLACEMENT = 0.35;
const vec2 FRINGE_OFFSET = vec2(0.004, -0.003);
const float BLEND_CAP = 0.85;

void main() {
    vec2 uv = v_uv;
    float h = texture(sampler1D(lut_x, lut_sampler), uv.x).r;
    float v = texture(sampler1D(lut_y, lut_sampler), uv.y).r;

    float ix = max(params.intensity_x, 0.0);
    float iy = max(params.intensity_y, 0.0);

    float wobble_x = sin(uv.y * 14.0 + params.time * 1.7) * 0.012 * params.wave;
    float wobble_y = sin(uv.x * 11.0 + params.time * 1.3) * 0.009 * params.wave;

    vec2 offset = vec2(
        (h - 0.5) * ix * DISPLACEMENT + wobble_x,
        (v - 0.5) * iy * DISPLACEMENT + wobble_y
    );
    vec2 displaced = uv + offset;

    vec3 primary = texture(sampler2D(base_image, base_sampler), displaced).rgb;
    vec3 fringe = texture(sampler2D(base_image, base_sampler), displaced + FRINGE_OFFSET).rgb;
    float blend = min((ix + iy) * 0.5, BLEND_CAP);

    out_color = vec4(mix(primary, fringe, blend), 1.0);
}
";

#[cfg(test)]
mod tests {
    use super::*;
    use wgpu::naga::front::glsl::{Frontend, Options};

    fn parse(source: &str, stage: ShaderStage) {
        let mut frontend = Frontend::default();
        if let Err(errors) = frontend.parse(&Options::from(stage), source) {
            panic!("{stage:?} shader failed to parse: {errors:?}");
        }
    }

    #[test]
    fn vertex_shader_parses() {
        parse(VERTEX_SHADER_GLSL, ShaderStage::Vertex);
    }

    #[test]
    fn fragment_shader_parses() {
        parse(FRAGMENT_SHADER_GLSL, ShaderStage::Fragment);
    }

    #[test]
    fn fragment_bindings_match_pipeline_layout() {
        for binding in 0..=5 {
            assert!(
                FRAGMENT_SHADER_GLSL.contains(&format!("binding = {binding})")),
                "missing binding {binding}"
            );
        }
        assert!(FRAGMENT_SHADER_GLSL.contains("BLEND_CAP = 0.85"));
    }
}
