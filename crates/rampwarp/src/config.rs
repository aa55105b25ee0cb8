use std::fs;
use std::path::{Path, PathBuf};

use ramp::ControlPoint;
use renderer::{AnimationSettings, GpuPowerPreference, Intensities, RampSet, RendererConfig};
use serde::{Deserialize, Serialize};

use crate::cli::RunArgs;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialise configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything a run needs, merged from the session file and the command line.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub window: WindowSection,
    pub intensities: IntensitySection,
    pub animation: AnimationSection,
    pub output: OutputSection,
    pub gpu: GpuSection,
    pub ramps: RampSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowSection {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowSection {
    fn default() -> Self {
        let defaults = RendererConfig::default();
        Self {
            width: defaults.surface_size.0,
            height: defaults.surface_size.1,
            title: defaults.title,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RampSection {
    pub horizontal: Vec<ControlPoint>,
    pub vertical: Vec<ControlPoint>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct IntensitySection {
    pub horizontal: f32,
    pub vertical: f32,
    pub wave: f32,
}

impl Default for IntensitySection {
    fn default() -> Self {
        let defaults = Intensities::default();
        Self {
            horizontal: defaults.horizontal,
            vertical: defaults.vertical,
            wave: defaults.wave,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnimationSection {
    pub duration_seconds: f32,
    pub fps: f32,
    pub scale: f32,
}

impl Default for AnimationSection {
    fn default() -> Self {
        let defaults = AnimationSettings::default();
        Self {
            duration_seconds: defaults.duration_seconds,
            fps: defaults.fps,
            scale: defaults.scale,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSection {
    pub dir: PathBuf,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerSetting {
    #[default]
    Low,
    High,
}

impl From<PowerSetting> for GpuPowerPreference {
    fn from(value: PowerSetting) -> Self {
        match value {
            PowerSetting::Low => GpuPowerPreference::Low,
            PowerSetting::High => GpuPowerPreference::High,
        }
    }
}

impl From<GpuPowerPreference> for PowerSetting {
    fn from(value: GpuPowerPreference) -> Self {
        match value {
            GpuPowerPreference::Low => PowerSetting::Low,
            GpuPowerPreference::High => PowerSetting::High,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GpuSection {
    pub power: PowerSetting,
    pub vsync: bool,
}

impl Default for GpuSection {
    fn default() -> Self {
        Self {
            power: PowerSetting::default(),
            vsync: true,
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Loads the session file named by `args` (if any) and layers the
    /// command-line overrides on top.
    pub fn resolve(args: &RunArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_overrides(args);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, args: &RunArgs) {
        if let Some(points) = &args.horizontal {
            self.ramps.horizontal = points.0.clone();
        }
        if let Some(points) = &args.vertical {
            self.ramps.vertical = points.0.clone();
        }
        if let Some(value) = args.intensity_x {
            self.intensities.horizontal = value;
        }
        if let Some(value) = args.intensity_y {
            self.intensities.vertical = value;
        }
        if let Some(value) = args.wave {
            self.intensities.wave = value;
        }
        if let Some((width, height)) = args.size {
            self.window.width = width;
            self.window.height = height;
        }
        if let Some(value) = args.duration {
            self.animation.duration_seconds = value;
        }
        if let Some(value) = args.fps {
            self.animation.fps = value;
        }
        if let Some(value) = args.scale {
            self.animation.scale = value;
        }
        if let Some(dir) = &args.output_dir {
            self.output.dir = dir.clone();
        }
        if let Some(power) = args.gpu_power {
            self.gpu.power = power.into();
        }
        if args.no_vsync {
            self.gpu.vsync = false;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "window size {}x{} must be non-zero",
                self.window.width, self.window.height
            )));
        }
        let intensities = [
            ("horizontal", self.intensities.horizontal),
            ("vertical", self.intensities.vertical),
            ("wave", self.intensities.wave),
        ];
        for (name, value) in intensities {
            if !value.is_finite() {
                return Err(ConfigError::Invalid(format!(
                    "{name} intensity must be finite"
                )));
            }
        }
        for (axis, points) in [
            ("horizontal", &self.ramps.horizontal),
            ("vertical", &self.ramps.vertical),
        ] {
            if points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
                return Err(ConfigError::Invalid(format!(
                    "{axis} ramp has a non-finite control point"
                )));
            }
        }
        Ok(())
    }

    pub fn ramps(&self) -> RampSet {
        RampSet {
            horizontal: self.ramps.horizontal.clone(),
            vertical: self.ramps.vertical.clone(),
        }
    }

    pub fn intensities(&self) -> Intensities {
        Intensities {
            horizontal: self.intensities.horizontal,
            vertical: self.intensities.vertical,
            wave: self.intensities.wave,
        }
    }

    pub fn animation_settings(&self) -> AnimationSettings {
        AnimationSettings {
            duration_seconds: self.animation.duration_seconds,
            fps: self.animation.fps,
            scale: self.animation.scale,
        }
    }

    pub fn renderer_config(&self, show_window: bool) -> RendererConfig {
        RendererConfig {
            surface_size: (self.window.width, self.window.height),
            title: self.window.title.clone(),
            show_window,
            ramps: self.ramps(),
            intensities: self.intensities(),
            gpu_power: self.gpu.power.into(),
            vsync: self.gpu.vsync,
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::PointList;

    const SAMPLE: &str = r#"
[window]
width = 640
height = 360

[intensities]
wave = 0.8

[animation]
fps = 12.0

[gpu]
power = "high"

[[ramps.horizontal]]
x = 0.0
y = 1.0
locked = true

[[ramps.horizontal]]
x = 1.0
y = 0.0
locked = true
"#;

    #[test]
    fn parses_partial_session_and_fills_defaults() {
        let config = SessionConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!((config.window.width, config.window.height), (640, 360));
        assert_eq!(config.window.title, "rampwarp");
        assert_eq!(config.intensities.wave, 0.8);
        assert_eq!(config.intensities.horizontal, 0.5);
        assert_eq!(config.animation.fps, 12.0);
        assert_eq!(config.animation.duration_seconds, 3.0);
        assert_eq!(config.gpu.power, PowerSetting::High);
        assert!(config.gpu.vsync);
        assert_eq!(config.ramps.horizontal.len(), 2);
        assert!(config.ramps.vertical.is_empty());

        let lut = config.ramps().luts();
        assert_eq!(lut[0].get(0), Some(255));
        assert_eq!(lut[0].get(255), Some(0));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = SessionConfig::from_toml_str("[window]\ndepth = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_window_size_is_invalid() {
        let err = SessionConfig::from_toml_str("[window]\nwidth = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn command_line_overrides_file_values() {
        let mut config = SessionConfig::from_toml_str(SAMPLE).unwrap();
        let args = RunArgs {
            vertical: Some(PointList(vec![ControlPoint::new(0, 0.5, 1.0)])),
            wave: Some(0.1),
            size: Some((320, 200)),
            scale: Some(1.0),
            gpu_power: Some(GpuPowerPreference::Low),
            no_vsync: true,
            output_dir: Some(PathBuf::from("/tmp/captures")),
            ..RunArgs::default()
        };
        config.apply_overrides(&args);

        assert_eq!(config.intensities.wave, 0.1);
        assert_eq!((config.window.width, config.window.height), (320, 200));
        assert_eq!(config.animation.scale, 1.0);
        assert_eq!(config.animation.fps, 12.0);
        assert_eq!(config.gpu.power, PowerSetting::Low);
        assert!(!config.gpu.vsync);
        assert_eq!(config.output.dir, PathBuf::from("/tmp/captures"));
        assert_eq!(config.ramps.horizontal.len(), 2);
        assert_eq!(config.ramps.vertical.len(), 1);

        let renderer = config.renderer_config(false);
        assert_eq!(renderer.surface_size, (320, 200));
        assert!(!renderer.show_window);
        assert!(!renderer.vsync);
        assert_eq!(renderer.intensities.wave, 0.1);
    }

    #[test]
    fn resolved_config_round_trips_through_toml() {
        let config = SessionConfig::from_toml_str(SAMPLE).unwrap();
        let rendered = config.to_toml().unwrap();
        let reparsed = SessionConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn missing_file_reports_path() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("absent.toml");
        let err = SessionConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }
}
