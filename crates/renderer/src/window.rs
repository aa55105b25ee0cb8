use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use ramp::Axis;
use tracing::{error, info, warn};
use winit::dpi::LogicalSize;
use winit::event::{ElementState, Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoopBuilder, EventLoopProxy};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowBuilder};

use crate::capture::CaptureHandle;
use crate::compositor::{Compositor, SurfaceLayout};
use crate::source::{FeedStatus, VideoFeed};
use crate::types::{Intensities, RampSet, RendererConfig};

/// Lifecycle transitions of the compositor living on the window thread.
///
/// Callers should drop any handle they hold on `TornDown` and re-obtain it
/// from the next `Ready`.
#[derive(Debug, Clone)]
pub enum Readiness {
    Ready(CaptureHandle),
    Failed(String),
    TornDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    SaveStill,
    RecordAnimation,
    Close,
}

#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    Readiness(Readiness),
    Key(KeyAction),
}

enum WindowCommand {
    Update {
        ramps: RampSet,
        intensities: Intensities,
    },
    SetFeed {
        status: FeedStatus,
        feed: Option<Box<dyn VideoFeed>>,
    },
    Shutdown,
}

/// Owns the window thread that hosts the compositor.
pub struct WindowRuntime {
    proxy: EventLoopProxy<WindowCommand>,
    events: Receiver<RuntimeEvent>,
    join_handle: Option<JoinHandle<Result<()>>>,
}

impl WindowRuntime {
    pub fn spawn(config: RendererConfig) -> Result<Self> {
        let (ready_tx, ready_rx) = bounded(1);
        let (event_tx, event_rx) = unbounded();
        let handle = thread::Builder::new()
            .name("rampwarp-window".into())
            .spawn(move || run_window_thread(config, ready_tx, event_tx))
            .map_err(|err| anyhow!("failed to spawn window thread: {err}"))?;

        let proxy = ready_rx
            .recv()
            .map_err(|err| anyhow!("window thread failed to start: {err}"))??;

        Ok(Self {
            proxy,
            events: event_rx,
            join_handle: Some(handle),
        })
    }

    pub fn events(&self) -> &Receiver<RuntimeEvent> {
        &self.events
    }

    /// Blocks until the compositor reports readiness.
    pub fn wait_ready(&self, timeout: Duration) -> Result<CaptureHandle> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(RuntimeEvent::Readiness(Readiness::Ready(handle))) => return Ok(handle),
                Ok(RuntimeEvent::Readiness(Readiness::Failed(message))) => {
                    bail!("renderer failed to initialise: {message}")
                }
                Ok(RuntimeEvent::Readiness(Readiness::TornDown)) => {
                    bail!("renderer was torn down before it became ready")
                }
                Ok(RuntimeEvent::Key(_)) => continue,
                Err(RecvTimeoutError::Timeout) => {
                    bail!("renderer not ready after {}ms", timeout.as_millis())
                }
                Err(RecvTimeoutError::Disconnected) => bail!("window thread exited"),
            }
        }
    }

    pub fn update(&self, ramps: RampSet, intensities: Intensities) -> Result<()> {
        self.send(WindowCommand::Update { ramps, intensities })
    }

    pub fn set_feed(&self, status: FeedStatus, feed: Option<Box<dyn VideoFeed>>) -> Result<()> {
        self.send(WindowCommand::SetFeed { status, feed })
    }

    pub fn shutdown(mut self) -> Result<()> {
        if let Some(handle) = self.join_handle.take() {
            let _ = self.proxy.send_event(WindowCommand::Shutdown);
            handle
                .join()
                .map_err(|err| anyhow!("window thread panicked: {err:?}"))??;
        }
        Ok(())
    }

    fn send(&self, command: WindowCommand) -> Result<()> {
        self.proxy
            .send_event(command)
            .map_err(|_| anyhow!("window event loop has closed"))
    }
}

impl Drop for WindowRuntime {
    fn drop(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            let _ = self.proxy.send_event(WindowCommand::Shutdown);
            let _ = handle.join();
        }
    }
}

pub(crate) fn key_action(key: &Key) -> Option<KeyAction> {
    match key {
        Key::Named(NamedKey::Escape) => Some(KeyAction::Close),
        Key::Character(value) if value.eq_ignore_ascii_case("s") => Some(KeyAction::SaveStill),
        Key::Character(value) if value.eq_ignore_ascii_case("g") => {
            Some(KeyAction::RecordAnimation)
        }
        _ => None,
    }
}

fn surface_layout(window: &Window) -> SurfaceLayout {
    let scale_factor = window.scale_factor();
    let logical = window.inner_size().to_logical::<f64>(scale_factor);
    SurfaceLayout {
        logical_width: logical.width,
        logical_height: logical.height,
        scale_factor,
    }
}

fn shut_down(compositor: &mut Compositor, events: &Sender<RuntimeEvent>) {
    if compositor.is_ready() {
        if compositor.captures_pending() {
            warn!("tearing down with captures in flight");
        }
        compositor.teardown();
        let _ = events.send(RuntimeEvent::Readiness(Readiness::TornDown));
    }
}

fn run_window_thread(
    config: RendererConfig,
    ready_tx: Sender<Result<EventLoopProxy<WindowCommand>, anyhow::Error>>,
    events: Sender<RuntimeEvent>,
) -> Result<()> {
    let mut builder = EventLoopBuilder::<WindowCommand>::with_user_event();
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        use winit::platform::wayland::EventLoopBuilderExtWayland;
        EventLoopBuilderExtWayland::with_any_thread(&mut builder, true);
    }

    #[cfg(any(
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    ))]
    {
        use winit::platform::x11::EventLoopBuilderExtX11;
        EventLoopBuilderExtX11::with_any_thread(&mut builder, true);
    }
    let event_loop = match builder.build() {
        Ok(event_loop) => event_loop,
        Err(err) => {
            let message = format!("failed to create event loop: {err}");
            let _ = ready_tx.send(Err(anyhow!(message.clone())));
            bail!(message);
        }
    };
    let proxy = event_loop.create_proxy();

    let (width, height) = config.surface_size;
    let window = match WindowBuilder::new()
        .with_title(config.title.clone())
        .with_inner_size(LogicalSize::new(width.max(1), height.max(1)))
        .with_visible(config.show_window)
        .build(&event_loop)
    {
        Ok(window) => Arc::new(window),
        Err(err) => {
            let message = format!("failed to create window: {err}");
            let _ = ready_tx.send(Err(anyhow!(message.clone())));
            bail!(message);
        }
    };
    let _ = ready_tx.send(Ok(proxy));

    let mut compositor = Compositor::new(config.ramps.clone(), config.intensities);
    match compositor.init(
        window.clone(),
        surface_layout(&window),
        config.gpu_power,
        config.vsync,
    ) {
        Ok(handle) => {
            let _ = events.send(RuntimeEvent::Readiness(Readiness::Ready(handle)));
        }
        Err(err) => {
            let _ = events.send(RuntimeEvent::Readiness(Readiness::Failed(err.to_string())));
            return Ok(());
        }
    }

    let mut pending = compositor.request_tick();
    window.request_redraw();

    let run_result = event_loop.run(move |event, elwt| {
        elwt.set_control_flow(ControlFlow::Wait);
        match event {
            Event::UserEvent(command) => match command {
                WindowCommand::Update { ramps, intensities } => {
                    for axis in Axis::ALL {
                        compositor.set_ramp(axis, ramps.points(axis));
                    }
                    compositor.set_intensities(intensities);
                }
                WindowCommand::SetFeed { status, feed } => compositor.set_feed(status, feed),
                WindowCommand::Shutdown => {
                    shut_down(&mut compositor, &events);
                    elwt.exit();
                }
            },
            Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
                WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                    let _ = events.send(RuntimeEvent::Key(KeyAction::Close));
                    shut_down(&mut compositor, &events);
                    elwt.exit();
                }
                WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                    compositor.resize(surface_layout(&window));
                }
                WindowEvent::KeyboardInput { event, .. } => {
                    if event.state != ElementState::Pressed || event.repeat {
                        return;
                    }
                    if let Some(action) = key_action(&event.logical_key) {
                        let _ = events.send(RuntimeEvent::Key(action));
                        if action == KeyAction::Close {
                            shut_down(&mut compositor, &events);
                            elwt.exit();
                        }
                    }
                }
                WindowEvent::RedrawRequested => {
                    if let Some(token) = pending.take() {
                        match compositor.tick(token, Instant::now()) {
                            Ok(_) => {}
                            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                                warn!("surface lost or outdated; reconfiguring");
                                compositor.reconfigure_surface();
                            }
                            Err(wgpu::SurfaceError::OutOfMemory) => {
                                error!("surface out of memory; closing window");
                                shut_down(&mut compositor, &events);
                                elwt.exit();
                                return;
                            }
                            Err(other) => {
                                warn!(error = ?other, "surface error; retrying next frame");
                            }
                        }
                    }
                    pending = compositor.request_tick();
                    if pending.is_some() {
                        window.request_redraw();
                    }
                }
                _ => {}
            },
            Event::LoopExiting => {
                shut_down(&mut compositor, &events);
                info!("window event loop exiting");
            }
            _ => {}
        }
    });

    run_result.map_err(|err| anyhow!("window event loop error: {err}"))
}
