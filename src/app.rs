// =============================================================================
// APPLICATION - winit event loop around the engine
// =============================================================================
//
// LOOP SHAPE (ControlFlow::Poll):
//   window events (drained by winit) -> about_to_wait -> one draw
//
// Close or Escape only raises the stop flag. The flag is checked before every
// draw, so the frame in flight finishes and no new one starts.

use crate::backend::{Backend, VulkanBackend};
use crate::config::Config;
use crate::engine::{Engine, EngineSettings};
use crate::error::{FrameError, InitError};
use crate::shader_cache::{Glslc, ShaderCache};
use ash::vk;
use winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow},
    keyboard::{Key, NamedKey},
    window::{Window, WindowAttributes, WindowId},
};

/// Events the loop cares about, already stripped of windowing details
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEvent {
    Quit,
    Other,
}

impl LoopEvent {
    fn from_window_event(event: &WindowEvent) -> Self {
        match event {
            WindowEvent::CloseRequested => LoopEvent::Quit,
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => LoopEvent::Quit,
            _ => LoopEvent::Other,
        }
    }
}

/// Outcome of one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Drew,
    Stopped,
}

#[derive(Debug, Default)]
pub struct FrameLoop {
    stop_requested: bool,
}

impl FrameLoop {
    pub fn handle_event(&mut self, event: LoopEvent) {
        if event == LoopEvent::Quit {
            self.stop_requested = true;
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Draw one frame unless a stop was requested
    pub fn tick<B: Backend>(&mut self, engine: &mut Engine<B>) -> Result<Tick, FrameError> {
        if self.stop_requested {
            return Ok(Tick::Stopped);
        }
        engine.draw()?;
        Ok(Tick::Drew)
    }
}

pub struct App {
    config: Config,
    app_name: String,
    // The surface is created from the window, so the engine is released first
    engine: Option<Engine<VulkanBackend>>,
    window: Option<Window>,
    frame_loop: FrameLoop,
    fatal: Option<anyhow::Error>,
}

impl App {
    pub fn new(config: Config, app_name: String) -> Self {
        Self {
            config,
            app_name,
            engine: None,
            window: None,
            frame_loop: FrameLoop::default(),
            fatal: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<(), InitError> {
        let window_attributes = WindowAttributes::default()
            .with_title(&self.app_name)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(false);
        let window = event_loop.create_window(window_attributes)?;

        let backend = VulkanBackend {
            enable_validation: self.config.enable_validation(),
            present_mode: self.config.present_mode(),
        };
        let settings = EngineSettings {
            app_name: self.app_name.clone(),
            extent: vk::Extent2D {
                width: self.config.window.width,
                height: self.config.window.height,
            },
            frame_timeout: self.config.frame_timeout(),
            vertex_shader: self.config.shaders.vertex_path(),
            fragment_shader: self.config.shaders.fragment_path(),
        };
        let shaders = ShaderCache::new(Glslc::new(self.config.shaders.compiler.clone()));

        // On error `window` drops here, after the partial engine
        let engine = Engine::initialize(&backend, &window, &settings, &shaders)?;
        if !engine.pipeline().is_ready() {
            log::info!("No graphics pipeline yet, frames only clear");
        }

        self.engine = Some(engine);
        self.window = Some(window);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        self.fatal = Some(error);
        event_loop.exit();
    }

    /// Release the engine, then the window. Returns the fatal error, if any.
    pub fn shutdown(mut self) -> anyhow::Result<()> {
        if let Some(engine) = self.engine.take() {
            log::info!("Shutting down after {} frames", engine.frame_number());
        }
        drop(self.window.take());

        match self.fatal.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.fatal.is_some() {
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);

        if let Err(e) = self.init(event_loop) {
            let error = anyhow::Error::new(e).context("Failed to initialize engine");
            self.fail(event_loop, error);
        }
    }

    fn window_event(&mut self, _: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let event = LoopEvent::from_window_event(&event);
        if event == LoopEvent::Quit && !self.frame_loop.stop_requested() {
            log::info!("Quit requested");
        }
        self.frame_loop.handle_event(event);
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };

        match self.frame_loop.tick(engine) {
            Ok(Tick::Drew) => {}
            Ok(Tick::Stopped) => event_loop.exit(),
            Err(e) => {
                let error = anyhow::Error::new(e).context(format!(
                    "Frame {} failed at {:?}",
                    engine.frame_number(),
                    engine.frames().stage()
                ));
                self.fail(event_loop, error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{settings_in, MockBackend, StubCompiler};

    #[test]
    fn close_request_is_quit() {
        assert_eq!(
            LoopEvent::from_window_event(&WindowEvent::CloseRequested),
            LoopEvent::Quit
        );
        assert_eq!(
            LoopEvent::from_window_event(&WindowEvent::Focused(true)),
            LoopEvent::Other
        );
    }

    #[test]
    fn quit_mid_loop_stops_after_current_draw() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::new();
        let mut engine = Engine::initialize(
            &backend,
            &(),
            &settings_in(dir.path()),
            &ShaderCache::new(StubCompiler),
        )
        .unwrap();
        let mut frame_loop = FrameLoop::default();

        for _ in 0..3 {
            frame_loop.handle_event(LoopEvent::Other);
            assert_eq!(frame_loop.tick(&mut engine).unwrap(), Tick::Drew);
        }
        frame_loop.handle_event(LoopEvent::Quit);
        frame_loop.handle_event(LoopEvent::Other);

        assert_eq!(frame_loop.tick(&mut engine).unwrap(), Tick::Stopped);
        assert_eq!(frame_loop.tick(&mut engine).unwrap(), Tick::Stopped);
        assert_eq!(engine.frame_number(), 3);

        drop(engine);
        assert_eq!(
            backend.events().last().map(String::as_str),
            Some("destroy context")
        );
    }

    #[test]
    fn frame_error_surfaces_from_tick() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = MockBackend::new();
        backend.hang_after_submits = Some(0);
        let mut engine = Engine::initialize(
            &backend,
            &(),
            &settings_in(dir.path()),
            &ShaderCache::new(StubCompiler),
        )
        .unwrap();
        let mut frame_loop = FrameLoop::default();

        assert_eq!(frame_loop.tick(&mut engine).unwrap(), Tick::Drew);
        assert!(matches!(
            frame_loop.tick(&mut engine),
            Err(FrameError::GpuHangSuspected { .. })
        ));
        assert_eq!(engine.frame_number(), 1);
    }
}
