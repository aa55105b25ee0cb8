use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use crossbeam_channel::RecvTimeoutError;
use ramp::{parse_control_points, sample_ramp, Lut};
use renderer::{
    capture_animation, capture_image, AnimationSettings, CaptureError, CaptureHandle, FeedStatus,
    KeyAction, PendingCapture, Readiness, RuntimeEvent, WindowRuntime,
};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, LutArgs, LutFormat, RunArgs};
use crate::config::SessionConfig;
use crate::feed::spawn_gif_feed;

const EVENT_POLL: Duration = Duration::from_millis(50);
const LUT_ROW: usize = 16;

pub fn run(cli: Cli) -> Result<()> {
    initialise_tracing();

    match cli.command {
        Some(Command::Lut(args)) => print_lut(&args),
        Some(Command::Config) => print_config(&cli.run),
        None => run_session(&cli.run),
    }
}

fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_lut(args: &LutArgs) -> Result<()> {
    let points = parse_control_points(&args.points).context("invalid control points")?;
    let lut = sample_ramp(&points);
    println!("{}", format_lut(&lut, args.format)?);
    Ok(())
}

fn print_config(args: &RunArgs) -> Result<()> {
    let config = SessionConfig::resolve(args)?;
    print!("{}", config.to_toml()?);
    Ok(())
}

pub fn format_lut(lut: &Lut, format: LutFormat) -> Result<String> {
    let bytes = lut.as_bytes();
    Ok(match format {
        LutFormat::Rows => bytes
            .chunks(LUT_ROW)
            .map(|row| {
                row.iter()
                    .map(|value| format!("{value:>3}"))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n"),
        LutFormat::Json => serde_json::to_string(bytes).context("failed to encode LUT as JSON")?,
        LutFormat::Hex => bytes.iter().map(|value| format!("{value:02x}")).collect(),
    })
}

fn run_session(args: &RunArgs) -> Result<()> {
    let config = SessionConfig::resolve(args)?;
    let headless = args.export_still.is_some() || args.export_gif.is_some();
    tracing::info!(
        width = config.window.width,
        height = config.window.height,
        headless,
        hidden = args.hidden,
        "starting rampwarp"
    );

    let runtime = WindowRuntime::spawn(config.renderer_config(!args.hidden))?;
    let ready_timeout = Duration::from_millis(args.ready_timeout_ms);
    let handle = runtime.wait_ready(ready_timeout)?;

    if let Some(path) = &args.video {
        let (feed, _producer) = spawn_gif_feed(path, args.video_loops)?;
        runtime.set_feed(FeedStatus::Active, Some(Box::new(feed)))?;
        tracing::info!(video = %path.display(), loops = args.video_loops, "live video attached");
    }

    if headless {
        let result = export(&handle, args, &config, ready_timeout);
        runtime.shutdown()?;
        return result;
    }

    interactive(runtime, handle, &config)
}

fn export(
    handle: &CaptureHandle,
    args: &RunArgs,
    config: &SessionConfig,
    grace: Duration,
) -> Result<()> {
    if let Some(path) = &args.export_still {
        let bytes = handle
            .capture_image()
            .and_then(|pending| pending.wait_timeout(grace))
            .context("still capture failed")?;
        write_capture(path, &bytes)?;
    }
    if let Some(path) = &args.export_gif {
        let settings = config.animation_settings();
        let timeout = animation_timeout(&settings, grace);
        let bytes = handle
            .capture_animation(settings)
            .and_then(|pending| pending.wait_timeout(timeout))
            .context("animation capture failed")?;
        write_capture(path, &bytes)?;
    }
    Ok(())
}

fn animation_timeout(settings: &AnimationSettings, grace: Duration) -> Duration {
    let budget = Duration::from_secs_f64(settings.plan().budget_ms() / 1000.0);
    budget * 2 + grace
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CaptureKind {
    Still,
    Animation,
}

impl CaptureKind {
    fn extension(self) -> &'static str {
        match self {
            CaptureKind::Still => "png",
            CaptureKind::Animation => "gif",
        }
    }
}

struct OutstandingCapture {
    path: PathBuf,
    pending: PendingCapture<Vec<u8>>,
}

impl OutstandingCapture {
    /// Returns true once the capture has resolved either way.
    fn poll(&self) -> bool {
        match self.pending.try_take() {
            None => false,
            Some(Ok(bytes)) => {
                if let Err(err) = write_capture(&self.path, &bytes) {
                    tracing::error!(error = %err, "failed to save capture");
                }
                true
            }
            Some(Err(err)) => {
                tracing::warn!(path = %self.path.display(), error = %err, "capture failed");
                true
            }
        }
    }
}

fn interactive(runtime: WindowRuntime, handle: CaptureHandle, config: &SessionConfig) -> Result<()> {
    let output_dir = config.output.dir.clone();
    fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    tracing::info!(
        dir = %output_dir.display(),
        "press S to save a PNG, G to record a GIF, Escape to quit"
    );

    let settings = config.animation_settings();
    let mut handle = Some(handle);
    let mut outstanding: Vec<OutstandingCapture> = Vec::new();

    loop {
        match runtime.events().recv_timeout(EVENT_POLL) {
            Ok(RuntimeEvent::Key(KeyAction::SaveStill)) => {
                let request = capture_image(handle.as_ref());
                track(&mut outstanding, &output_dir, CaptureKind::Still, request);
            }
            Ok(RuntimeEvent::Key(KeyAction::RecordAnimation)) => {
                let request = capture_animation(handle.as_ref(), settings);
                track(&mut outstanding, &output_dir, CaptureKind::Animation, request);
            }
            Ok(RuntimeEvent::Key(KeyAction::Close)) => break,
            Ok(RuntimeEvent::Readiness(Readiness::Ready(next))) => handle = Some(next),
            Ok(RuntimeEvent::Readiness(Readiness::TornDown)) => handle = None,
            Ok(RuntimeEvent::Readiness(Readiness::Failed(message))) => {
                return Err(anyhow!("renderer failed: {message}"));
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        outstanding.retain(|capture| !capture.poll());
    }

    if !outstanding.is_empty() {
        tracing::warn!(
            abandoned = outstanding.len(),
            "window closed with captures in flight"
        );
    }
    runtime.shutdown()
}

fn track(
    outstanding: &mut Vec<OutstandingCapture>,
    dir: &Path,
    kind: CaptureKind,
    request: Result<PendingCapture<Vec<u8>>, CaptureError>,
) {
    match request {
        Ok(pending) => {
            let path = dir.join(capture_file_name(kind, Local::now()));
            tracing::info!(path = %path.display(), ?kind, "capture requested");
            outstanding.push(OutstandingCapture { path, pending });
        }
        Err(err) => tracing::warn!(?kind, error = %err, "capture rejected"),
    }
}

fn capture_file_name(kind: CaptureKind, at: DateTime<Local>) -> String {
    format!(
        "rampwarp-{}.{}",
        at.format("%Y%m%d-%H%M%S-%3f"),
        kind.extension()
    )
}

fn write_capture(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), bytes = bytes.len(), "capture saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ramp::ControlPoint;

    #[test]
    fn flat_lut_rows_are_sixteen_wide() {
        let text = format_lut(&sample_ramp(&[]), LutFormat::Rows).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 16);
        assert!(lines
            .iter()
            .all(|line| line.split_whitespace().count() == 16));
        assert!(text.split_whitespace().all(|value| value == "127"));
    }

    #[test]
    fn hex_and_json_cover_every_entry() {
        let lut = sample_ramp(&[ControlPoint::new(0, 0.0, 1.0), ControlPoint::new(1, 1.0, 0.0)]);

        let hex = format_lut(&lut, LutFormat::Hex).unwrap();
        assert_eq!(hex.len(), 512);
        assert!(hex.starts_with("ff"));
        assert!(hex.ends_with("00"));

        let json = format_lut(&lut, LutFormat::Json).unwrap();
        let values: Vec<u8> = serde_json::from_str(&json).unwrap();
        assert_eq!(values.len(), 256);
        assert_eq!(values[0], 255);
        assert_eq!(values[255], 0);
    }

    #[test]
    fn capture_names_sort_by_time_and_carry_extension() {
        let at = Local.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).single().unwrap();
        assert_eq!(
            capture_file_name(CaptureKind::Still, at),
            "rampwarp-20260304-050607-000.png"
        );
        assert_eq!(
            capture_file_name(CaptureKind::Animation, at),
            "rampwarp-20260304-050607-000.gif"
        );
    }

    #[test]
    fn animation_timeout_covers_budget() {
        let settings = AnimationSettings {
            duration_seconds: 2.0,
            fps: 10.0,
            scale: 0.5,
        };
        let timeout = animation_timeout(&settings, Duration::from_secs(1));
        let budget = Duration::from_secs_f64(settings.plan().budget_ms() / 1000.0);
        assert!(timeout > budget);
    }

    #[test]
    fn writing_a_capture_creates_parent_directories() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested/out/still.png");
        write_capture(&path, b"png-bytes").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"png-bytes");
    }

    #[test]
    fn rejected_requests_are_not_tracked() {
        let temp = tempfile::tempdir().unwrap();
        let mut outstanding = Vec::new();
        track(
            &mut outstanding,
            temp.path(),
            CaptureKind::Still,
            capture_image(None),
        );
        assert!(outstanding.is_empty());
    }
}
