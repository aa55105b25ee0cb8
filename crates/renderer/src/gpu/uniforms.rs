use bytemuck::{Pod, Zeroable};

use crate::types::Intensities;

/// Mirrors the `CompositorParams` std140 block in the fragment shader.
#[repr(C, align(16))]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct CompositorUniforms {
    pub intensity_x: f32,
    pub intensity_y: f32,
    pub wave: f32,
    pub time: f32,
}

unsafe impl Zeroable for CompositorUniforms {}
unsafe impl Pod for CompositorUniforms {}

impl CompositorUniforms {
    pub(crate) fn new(intensities: Intensities, time: f32) -> Self {
        Self {
            intensity_x: finite_or_zero(intensities.horizontal),
            intensity_y: finite_or_zero(intensities.vertical),
            wave: finite_or_zero(intensities.wave),
            time,
        }
    }
}

fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, offset_of, size_of};

    #[test]
    fn layout_matches_std140_block() {
        assert_eq!(size_of::<CompositorUniforms>(), 16);
        assert_eq!(align_of::<CompositorUniforms>(), 16);
        assert_eq!(offset_of!(CompositorUniforms, intensity_x), 0);
        assert_eq!(offset_of!(CompositorUniforms, intensity_y), 4);
        assert_eq!(offset_of!(CompositorUniforms, wave), 8);
        assert_eq!(offset_of!(CompositorUniforms, time), 12);
    }

    #[test]
    fn non_finite_intensities_are_zeroed() {
        let uniforms = CompositorUniforms::new(
            Intensities {
                horizontal: f32::NAN,
                vertical: -0.5,
                wave: f32::INFINITY,
            },
            2.5,
        );
        assert_eq!(uniforms.intensity_x, 0.0);
        assert_eq!(uniforms.intensity_y, -0.5);
        assert_eq!(uniforms.wave, 0.0);
        assert_eq!(uniforms.time, 2.5);
        assert_eq!(bytemuck::bytes_of(&uniforms).len(), 16);
    }
}
