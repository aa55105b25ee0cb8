use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use ramp::{parse_control_points, ControlPoint};
use renderer::GpuPowerPreference;

#[derive(Parser, Debug)]
#[command(
    name = "rampwarp",
    author,
    version,
    about = "Tone-ramp displacement compositor with PNG and GIF export",
    arg_required_else_help = false
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Session file (TOML) providing ramps, intensities and export defaults.
    #[arg(long, value_name = "PATH", env = "RAMPWARP_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Horizontal ramp as `X:Y` pairs (e.g. `0:1,0.5:0.2,1:0`).
    #[arg(long, value_name = "POINTS", value_parser = parse_points)]
    pub horizontal: Option<PointList>,

    /// Vertical ramp as `X:Y` pairs.
    #[arg(long, value_name = "POINTS", value_parser = parse_points)]
    pub vertical: Option<PointList>,

    /// Horizontal displacement intensity.
    #[arg(long, value_name = "AMOUNT", value_parser = parse_intensity)]
    pub intensity_x: Option<f32>,

    /// Vertical displacement intensity.
    #[arg(long, value_name = "AMOUNT", value_parser = parse_intensity)]
    pub intensity_y: Option<f32>,

    /// Wave wobble intensity.
    #[arg(long, value_name = "AMOUNT", value_parser = parse_intensity)]
    pub wave: Option<f32>,

    /// Window size in logical pixels (e.g. `960x540`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_surface_size)]
    pub size: Option<(u32, u32)>,

    /// GIF length in seconds (floored at 0.5).
    #[arg(long, value_name = "SECONDS")]
    pub duration: Option<f32>,

    /// GIF sampling rate (clamped to 1..=60).
    #[arg(long, value_name = "FPS")]
    pub fps: Option<f32>,

    /// GIF resolution relative to the surface (clamped to 0.1..=1).
    #[arg(long, value_name = "FACTOR")]
    pub scale: Option<f32>,

    /// Directory interactive captures are written to.
    #[arg(long, value_name = "DIR", env = "RAMPWARP_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Capture a PNG as soon as the renderer is ready, write it and exit.
    #[arg(long, value_name = "PATH")]
    pub export_still: Option<PathBuf>,

    /// Record a GIF as soon as the renderer is ready, write it and exit.
    #[arg(long, value_name = "PATH")]
    pub export_gif: Option<PathBuf>,

    /// Keep the window invisible (useful with the export flags).
    #[arg(long)]
    pub hidden: bool,

    /// Animated GIF streamed in as the live video source.
    #[arg(long, value_name = "FILE")]
    pub video: Option<PathBuf>,

    /// Number of passes over `--video` before the feed ends (0 = forever).
    #[arg(long, value_name = "COUNT", default_value_t = 1)]
    pub video_loops: u32,

    /// Adapter power preference: `low` or `high`.
    #[arg(
        long,
        value_name = "MODE",
        value_parser = parse_gpu_power,
        env = "RAMPWARP_GPU_POWER"
    )]
    pub gpu_power: Option<GpuPowerPreference>,

    /// Present without waiting for vblank.
    #[arg(long)]
    pub no_vsync: bool,

    /// How long to wait for the renderer to come up, in milliseconds.
    #[arg(long, value_name = "MILLISECONDS", default_value_t = 10_000)]
    pub ready_timeout_ms: u64,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the 256-entry lookup table sampled from a control-point list.
    Lut(LutArgs),
    /// Print the resolved session configuration as TOML.
    Config,
}

#[derive(Parser, Debug)]
pub struct LutArgs {
    /// Control points as `X:Y` pairs; empty yields the flat table.
    #[arg(value_name = "POINTS", default_value = "")]
    pub points: String,

    /// Output layout.
    #[arg(long, value_enum, default_value_t = LutFormat::Rows)]
    pub format: LutFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LutFormat {
    /// Sixteen values per line.
    Rows,
    /// JSON array.
    Json,
    /// Continuous lowercase hex string.
    Hex,
}

/// Control points given on the command line.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointList(pub Vec<ControlPoint>);

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_points(value: &str) -> Result<PointList, String> {
    parse_control_points(value)
        .map(PointList)
        .map_err(|err| err.to_string())
}

pub fn parse_intensity(value: &str) -> Result<f32, String> {
    let parsed: f32 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid intensity '{value}'"))?;
    if !parsed.is_finite() {
        return Err(format!("intensity must be finite, got '{value}'"));
    }
    Ok(parsed)
}

pub fn parse_surface_size(value: &str) -> Result<(u32, u32), String> {
    let trimmed = value.trim();
    let (width, height) = trimmed
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("invalid size '{trimmed}'; expected WIDTHxHEIGHT"))?;
    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| format!("invalid width in '{trimmed}'"))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| format!("invalid height in '{trimmed}'"))?;
    if width == 0 || height == 0 {
        return Err("size dimensions must be greater than zero".to_string());
    }
    Ok((width, height))
}

pub fn parse_gpu_power(value: &str) -> Result<GpuPowerPreference, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("gpu power preference must not be empty".to_string());
    }

    match trimmed.to_ascii_lowercase().as_str() {
        "low" | "low-power" | "integrated" => Ok(GpuPowerPreference::Low),
        "high" | "high-performance" | "discrete" => Ok(GpuPowerPreference::High),
        other => Err(format!(
            "unknown gpu power preference '{other}'; expected low or high"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn surface_size_accepts_either_separator_case() {
        assert_eq!(parse_surface_size("1280x720"), Ok((1280, 720)));
        assert_eq!(parse_surface_size(" 640 X 480 "), Ok((640, 480)));
        assert!(parse_surface_size("0x480").is_err());
        assert!(parse_surface_size("1280").is_err());
        assert!(parse_surface_size("wide x tall").is_err());
    }

    #[test]
    fn gpu_power_aliases() {
        assert_eq!(parse_gpu_power("HIGH"), Ok(GpuPowerPreference::High));
        assert_eq!(parse_gpu_power("integrated"), Ok(GpuPowerPreference::Low));
        assert!(parse_gpu_power("").is_err());
        assert!(parse_gpu_power("turbo").is_err());
    }

    #[test]
    fn intensity_rejects_non_finite() {
        assert_eq!(parse_intensity("0.75"), Ok(0.75));
        assert!(parse_intensity("inf").is_err());
        assert!(parse_intensity("NaN").is_err());
        assert!(parse_intensity("lots").is_err());
    }

    #[test]
    fn ramp_flags_parse_control_points() {
        let cli = Cli::try_parse_from([
            "rampwarp",
            "--horizontal",
            "0:1,1:0",
            "--fps",
            "30",
            "--hidden",
        ])
        .unwrap();
        let points = cli.run.horizontal.unwrap().0;
        assert_eq!(points.len(), 2);
        assert_eq!((points[0].x, points[0].y), (0.0, 1.0));
        assert!(points[0].locked);
        assert_eq!(cli.run.fps, Some(30.0));
        assert!(cli.run.hidden);
        assert!(cli.command.is_none());
    }

    #[test]
    fn malformed_ramp_flag_is_rejected() {
        assert!(Cli::try_parse_from(["rampwarp", "--vertical", "0.5"]).is_err());
    }

    #[test]
    fn lut_subcommand_defaults_to_rows() {
        let cli = Cli::try_parse_from(["rampwarp", "lut", "0:0,1:1"]).unwrap();
        match cli.command {
            Some(Command::Lut(args)) => {
                assert_eq!(args.points, "0:0,1:1");
                assert_eq!(args.format, LutFormat::Rows);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
