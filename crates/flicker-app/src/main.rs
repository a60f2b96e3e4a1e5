// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use flicker_core::init_tracing;
use flicker_math::{Camera, Movement};
use flicker_platform::{FrameClock, PlatformWindow};
use flicker_render::{FrameStatus, RenderSize, Renderer, Ubo, Vertex, WindowSurface};
use flicker_render_vk::VkEngine;
use tracing::{error, info};

use flicker_platform::winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::{DeviceEvent, DeviceId, ElementState, KeyEvent, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

mod config;
mod mesh;

use config::AppCfg;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file
    #[arg(long, default_value = config::DEFAULT_CONFIG)]
    config: PathBuf,

    /// Vertex file to draw (overrides the config)
    #[arg(long)]
    mesh: Option<PathBuf>,

    /// Directory holding mesh.vert.spv / mesh.frag.spv
    #[arg(long)]
    shader_dir: Option<PathBuf>,

    /// Enable the Khronos validation layer
    #[arg(long)]
    validation: bool,

    /// Force FIFO presentation
    #[arg(long)]
    vsync: bool,
}

impl Args {
    fn apply(&self, cfg: &mut AppCfg) {
        if let Some(mesh) = &self.mesh {
            cfg.mesh = Some(mesh.clone());
        }
        if let Some(dir) = &self.shader_dir {
            cfg.render.shader_dir = dir.clone();
        }
        cfg.render.validation |= self.validation;
        cfg.render.vsync |= self.vsync;
    }
}

fn key_movement(code: KeyCode) -> Option<Movement> {
    match code {
        KeyCode::KeyW => Some(Movement::FORWARD),
        KeyCode::KeyS => Some(Movement::BACK),
        KeyCode::KeyA => Some(Movement::LEFT),
        KeyCode::KeyD => Some(Movement::RIGHT),
        KeyCode::Space => Some(Movement::UP),
        KeyCode::ShiftLeft => Some(Movement::DOWN),
        _ => None,
    }
}

struct App {
    cfg: AppCfg,
    vertices: Vec<Vertex>,
    window: Option<PlatformWindow>,
    engine: Option<VkEngine>,

    camera: Camera,
    held: Movement,
    clock: FrameClock,

    exiting: bool,
    failure: Option<anyhow::Error>,
}

impl App {
    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.failure = Some(e);
        self.shutdown(event_loop);
    }

    /// Engine first: its surface refers to the window.
    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        if let Some(mut engine) = self.engine.take() {
            engine.deinit();
        }
        self.window = None;
        event_loop.exit();
    }

    fn open(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(LogicalSize::new(self.cfg.window.width, self.cfg.window.height));
        let window = event_loop.create_window(attrs).context("create_window")?;
        let mut window = PlatformWindow::new(window);

        let engine = VkEngine::init(&window, &self.vertices, &self.cfg.render)?;
        if let Some(name) = engine.device_name() {
            info!("renderer = vk ({name}), {} vertices", self.vertices.len());
        }

        if self.cfg.window.grab_cursor {
            // not fatal; mouse-look just needs a click later
            let _ = window.grab_cursor();
        }
        window.window().request_redraw();

        self.window = Some(window);
        self.engine = Some(engine);
        Ok(())
    }

    fn on_key(&mut self, event_loop: &ActiveEventLoop, event: KeyEvent) {
        let PhysicalKey::Code(code) = event.physical_key else {
            return;
        };
        let pressed = event.state == ElementState::Pressed;

        if code == KeyCode::Escape && pressed {
            // first press frees the mouse, second one quits
            let grabbed = self.window.as_ref().is_some_and(PlatformWindow::is_grabbed);
            if grabbed {
                if let Some(w) = self.window.as_mut() {
                    w.release_cursor();
                }
            } else {
                info!("Escape");
                self.shutdown(event_loop);
            }
            return;
        }

        if let Some(m) = key_movement(code) {
            self.held.set(m, pressed);
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(window), Some(engine)) = (self.window.as_ref(), self.engine.as_mut()) else {
            return;
        };

        let dt = self.clock.tick();
        self.camera.apply(self.held, dt);

        let aspect = window.framebuffer_size().aspect();
        let ubo = Ubo {
            view: self.camera.view_rows(),
            proj: self.camera.proj_rows(aspect),
        };

        match engine.draw_frame(window, &ubo) {
            Ok(FrameStatus::Presented) => self.clock.count_frame(),
            Ok(FrameStatus::Recreated) => {
                if let Some(size) = engine.extent() {
                    info!("swapchain now {}x{}", size.width, size.height);
                }
            }
            Ok(FrameStatus::Suspended) => {}
            Err(e) => {
                self.fail(event_loop, e);
                return;
            }
        }

        if let Some(fps) = self.clock.fps() {
            info!("fps ~ {:.0}", fps);
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() && !self.exiting {
            if let Err(e) = self.open(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Poll);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if let Some(window) = &self.window {
            if window_id != window.window().id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                let size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                info!("Resized → {}x{}", size.width, size.height);
                if let Some(engine) = &mut self.engine {
                    engine.resize(size);
                }
            }

            WindowEvent::Focused(false) => {
                // keys released while unfocused never arrive
                self.held = Movement::empty();
            }

            WindowEvent::KeyboardInput { event, .. } => self.on_key(event_loop, event),

            WindowEvent::MouseInput {
                state: ElementState::Pressed,
                button: MouseButton::Left,
                ..
            } => {
                if let Some(w) = self.window.as_mut() {
                    if !w.is_grabbed() {
                        let _ = w.grab_cursor();
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if !self.exiting {
                    self.redraw(event_loop);
                }
            }

            _ => {}
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _device_id: DeviceId, event: DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta: (dx, dy) } = event {
            if self.window.as_ref().is_some_and(PlatformWindow::is_grabbed) {
                self.camera.look(dx as f32, dy as f32);
            }
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if let Some(w) = &self.window {
            w.window().request_redraw();
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = config::load_or_default(&args.config);
    args.apply(&mut cfg);

    let vertices = match &cfg.mesh {
        Some(path) => mesh::load_file(path).with_context(|| format!("loading mesh {}", path.display()))?,
        None => mesh::builtin_cube(),
    };
    info!("mesh: {} vertices", vertices.len());

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        camera: cfg.camera.camera(),
        cfg,
        vertices,
        window: None,
        engine: None,
        held: Movement::empty(),
        clock: FrameClock::new(),
        exiting: false,
        failure: None,
    };

    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_config() {
        let args = Args::parse_from([
            "flicker",
            "--mesh",
            "m.vertex",
            "--shader-dir",
            "out/spv",
            "--vsync",
        ]);
        let mut cfg = AppCfg::default();
        cfg.render.validation = false;
        args.apply(&mut cfg);
        assert_eq!(cfg.mesh, Some(PathBuf::from("m.vertex")));
        assert_eq!(cfg.render.shader_dir, PathBuf::from("out/spv"));
        assert!(cfg.render.vsync);
        assert!(!cfg.render.validation);
        assert_eq!(args.config, PathBuf::from(config::DEFAULT_CONFIG));
    }

    #[test]
    fn flags_never_switch_config_values_off() {
        let args = Args::parse_from(["flicker"]);
        let mut cfg = AppCfg::default();
        cfg.render.vsync = true;
        cfg.render.validation = true;
        args.apply(&mut cfg);
        assert!(cfg.render.vsync);
        assert!(cfg.render.validation);
    }

    #[test]
    fn wasd_maps_to_movement() {
        assert_eq!(key_movement(KeyCode::KeyW), Some(Movement::FORWARD));
        assert_eq!(key_movement(KeyCode::KeyA), Some(Movement::LEFT));
        assert_eq!(key_movement(KeyCode::KeyQ), None);
    }
}
