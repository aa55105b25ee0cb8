use winit::dpi::PhysicalSize;

use crate::error::InitError;
use crate::types::GpuPowerPreference;

/// Backing-store size for a logical container at a device pixel ratio.
///
/// A zero-area result means there is nothing to draw into.
pub(crate) fn resolve_backing_size(
    logical_width: f64,
    logical_height: f64,
    scale_factor: f64,
) -> PhysicalSize<u32> {
    let scale = if scale_factor.is_finite() && scale_factor > 0.0 {
        scale_factor
    } else {
        1.0
    };
    let pixels = |logical: f64| {
        if logical.is_finite() && logical > 0.0 {
            (logical * scale).round().min(u32::MAX as f64) as u32
        } else {
            0
        }
    };
    PhysicalSize::new(pixels(logical_width), pixels(logical_height))
}

pub(crate) struct GpuContext {
    _instance: wgpu::Instance,
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
    /// Resolved backing-store size; zero while minimised.
    pub size: PhysicalSize<u32>,
    pub surface_format: wgpu::TextureFormat,
    pub max_texture_dimension: u32,
}

impl GpuContext {
    pub(crate) fn new(
        target: impl Into<wgpu::SurfaceTarget<'static>>,
        initial_size: PhysicalSize<u32>,
        gpu_power: GpuPowerPreference,
        vsync: bool,
    ) -> Result<Self, InitError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });

        let surface = instance
            .create_surface(target)
            .map_err(|err| InitError::Surface(err.to_string()))?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: gpu_power.to_wgpu(),
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(|err| InitError::Adapter(err.to_string()))?;

        let adapter_info = adapter.get_info();
        tracing::debug!(
            name = %adapter_info.name,
            backend = ?adapter_info.backend,
            device_type = ?adapter_info.device_type,
            "selected GPU adapter"
        );

        let limits = adapter.limits();
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("rampwarp device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits.clone(),
            memory_hints: wgpu::MemoryHints::MemoryUsage,
            trace: wgpu::Trace::default(),
        }))
        .map_err(|err| InitError::Device(err.to_string()))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = choose_surface_format(&surface_caps.formats).ok_or_else(|| {
            InitError::Surface("surface reports no supported formats".to_string())
        })?;

        let present_mode = choose_present_mode(&surface_caps.present_modes, vsync);
        tracing::debug!(?surface_format, ?present_mode, "configuring surface");

        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: initial_size.width.max(1),
            height: initial_size.height.max(1),
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        if initial_size.width > 0 && initial_size.height > 0 {
            surface.configure(&device, &config);
        }

        Ok(Self {
            _instance: instance,
            surface,
            device,
            queue,
            config,
            size: initial_size,
            surface_format,
            max_texture_dimension: limits.max_texture_dimension_2d,
        })
    }

    pub(crate) fn has_surface(&self) -> bool {
        self.size.width > 0 && self.size.height > 0
    }

    /// Reconfigures the swapchain when the pixel size changes. Returns whether
    /// anything was reallocated.
    pub(crate) fn resize(&mut self, new_size: PhysicalSize<u32>) -> bool {
        if new_size == self.size {
            return false;
        }
        self.size = new_size;
        if !self.has_surface() {
            return false;
        }
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(&self.device, &self.config);
        true
    }

    /// Reapplies the current configuration after a lost or outdated surface.
    pub(crate) fn reconfigure(&self) {
        if self.has_surface() {
            self.surface.configure(&self.device, &self.config);
        }
    }
}

/// Picks an 8-bit non-sRGB format so the shader output lands unconverted.
fn choose_surface_format(formats: &[wgpu::TextureFormat]) -> Option<wgpu::TextureFormat> {
    const PREFERRED: [wgpu::TextureFormat; 2] = [
        wgpu::TextureFormat::Bgra8Unorm,
        wgpu::TextureFormat::Rgba8Unorm,
    ];
    PREFERRED
        .iter()
        .copied()
        .find(|format| formats.contains(format))
        .or_else(|| formats.iter().copied().find(|format| !format.is_srgb()))
        .or_else(|| {
            let fallback = formats.first().copied();
            if let Some(format) = fallback {
                tracing::warn!(?format, "no linear surface format available; falling back");
            }
            fallback
        })
}

fn choose_present_mode(modes: &[wgpu::PresentMode], vsync: bool) -> wgpu::PresentMode {
    let find = |wanted: wgpu::PresentMode| modes.iter().copied().find(|mode| *mode == wanted);
    if vsync {
        return find(wgpu::PresentMode::Fifo).unwrap_or(wgpu::PresentMode::AutoVsync);
    }
    find(wgpu::PresentMode::Mailbox)
        .or_else(|| find(wgpu::PresentMode::Immediate))
        .unwrap_or(wgpu::PresentMode::AutoNoVsync)
}
