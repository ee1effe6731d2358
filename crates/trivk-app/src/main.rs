// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use trivk_core::init_tracing;
use trivk_render_vk::{FrameStatus, RenderSize, VkRenderer};

use trivk_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    raw_window_handle::{HasDisplayHandle, HasWindowHandle},
    window::{Window, WindowId},
};

mod config;

use config::{load_cfg, AppCfg, DEFAULT_CONFIG_PATH};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

fn render_size(window: &Window) -> RenderSize {
    let size = trivk_platform::drawable_size(window);
    RenderSize {
        width: size.width,
        height: size.height,
    }
}

struct App {
    cfg: AppCfg,
    // Field order matters: the renderer must go before the window it draws into.
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    paused: bool,
    failure: Option<anyhow::Error>,

    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        Self {
            cfg,
            renderer: None,
            window: None,
            paused: false,
            failure: None,
            frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = event_loop
            .create_window(self.cfg.window_spec().attributes())
            .context("create_window")?;
        let size = render_size(&window);

        let wh = window.window_handle().context("window_handle")?;
        let dh = window.display_handle().context("display_handle")?;
        let renderer = VkRenderer::new(&wh, &dh, size, self.cfg.renderer_config())
            .context("Vulkan initialization")?;

        self.paused = size.is_empty();
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        self.failure = Some(err);
        self.renderer = None;
        event_loop.exit();
    }

    fn tick_fps(&mut self) {
        self.frames = self.frames.saturating_add(1);
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_instant);
        if elapsed >= Duration::from_secs(1) {
            let fps = self.frames as f64 / elapsed.as_secs_f64();
            debug!("fps: {fps:.1}");
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }

        info!("resumed → paused={}", self.paused);
        if !self.paused {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.renderer = None;
                self.window = None;
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                let size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                let now_paused = size.is_empty();
                if self.paused != now_paused {
                    self.paused = now_paused;
                    info!(
                        "Resized → {}x{} (paused={})",
                        size.width, size.height, self.paused
                    );
                }
                if let Some(r) = &mut self.renderer {
                    r.resize(size);
                }
                if !self.paused {
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.paused {
                    return;
                }
                let Some(r) = &mut self.renderer else {
                    return;
                };
                match r.draw_frame() {
                    Ok(FrameStatus::Presented) => self.tick_fps(),
                    Ok(FrameStatus::Skipped | FrameStatus::Parked) => {}
                    Err(e) => {
                        let err = anyhow::Error::new(e).context("frame failed");
                        self.fail(event_loop, err);
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_none() {
            return;
        }
        if self.paused {
            // Minimized: sleep until a resize brings the drawable back.
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }
}

fn run(args: Args) -> Result<()> {
    let cfg = load_cfg(&args.config);
    debug!("config: {cfg:?}");

    let event_loop = EventLoop::new().context("EventLoop::new")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(cfg);
    event_loop.run_app(&mut app).context("event loop")?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
