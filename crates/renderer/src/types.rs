use ramp::{sample_ramp, Axis, ControlPoint, Lut};

/// GPU adapter power preference hint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum GpuPowerPreference {
    #[default]
    Low,
    High,
}

impl GpuPowerPreference {
    pub(crate) fn to_wgpu(self) -> wgpu::PowerPreference {
        match self {
            GpuPowerPreference::Low => wgpu::PowerPreference::LowPower,
            GpuPowerPreference::High => wgpu::PowerPreference::HighPerformance,
        }
    }
}

/// Scalars pushed to the fragment stage every tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Intensities {
    pub horizontal: f32,
    pub vertical: f32,
    pub wave: f32,
}

impl Default for Intensities {
    fn default() -> Self {
        Self {
            horizontal: 0.5,
            vertical: 0.5,
            wave: 0.3,
        }
    }
}

/// Control points for both displacement axes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RampSet {
    pub horizontal: Vec<ControlPoint>,
    pub vertical: Vec<ControlPoint>,
}

impl RampSet {
    pub fn points(&self, axis: Axis) -> &[ControlPoint] {
        match axis {
            Axis::Horizontal => &self.horizontal,
            Axis::Vertical => &self.vertical,
        }
    }

    pub fn set_points(&mut self, axis: Axis, points: Vec<ControlPoint>) {
        match axis {
            Axis::Horizontal => self.horizontal = points,
            Axis::Vertical => self.vertical = points,
        }
    }

    /// Samples both ramps, indexed by [`Axis::index`].
    pub fn luts(&self) -> [Lut; 2] {
        [
            sample_ramp(&self.horizontal),
            sample_ramp(&self.vertical),
        ]
    }
}

/// Configuration consumed by the window runtime.
#[derive(Clone, Debug)]
pub struct RendererConfig {
    /// Initial window size in logical pixels.
    pub surface_size: (u32, u32),
    pub title: String,
    pub show_window: bool,
    pub ramps: RampSet,
    pub intensities: Intensities,
    pub gpu_power: GpuPowerPreference,
    /// Present with vsync (Fifo); otherwise prefer Mailbox/Immediate.
    pub vsync: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            surface_size: (960, 540),
            title: "rampwarp".to_string(),
            show_window: true,
            ramps: RampSet::default(),
            intensities: Intensities::default(),
            gpu_power: GpuPowerPreference::default(),
            vsync: true,
        }
    }
}
