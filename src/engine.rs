// =============================================================================
// ENGINE - ordered initialization, drawing, teardown
// =============================================================================
//
// INIT ORDER:
//   context -> presentation -> frame sync -> pipeline (stub)
//
// TEARDOWN is the exact reverse and happens by drop order: the engine's
// fields are declared newest-first, and a failed initialize drops the locals
// built so far in reverse. No manual destroy sequence exists anywhere.

use crate::backend::Backend;
use crate::error::{FrameError, InitError};
use crate::frame::FrameEngine;
use crate::shader_cache::{ShaderCache, ShaderCompiler};
use ash::vk;
use std::path::PathBuf;
use std::time::Duration;

/// Everything `Engine::initialize` needs besides the backend and window
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub app_name: String,
    pub extent: vk::Extent2D,
    pub frame_timeout: Duration,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

/// Graphics pipeline state.
///
/// No pipeline is built yet. The stub still compiles and loads both shader
/// stages, and owns the modules so they are released with everything else.
pub enum Pipeline<S> {
    // Held for their Drop only
    #[allow(dead_code)]
    Stub { vertex: S, fragment: S },
}

impl<S> Pipeline<S> {
    fn load<B, C>(
        backend: &B,
        context: &B::Context,
        shaders: &ShaderCache<C>,
        settings: &EngineSettings,
    ) -> Result<Self, InitError>
    where
        B: Backend<ShaderModule = S>,
        C: ShaderCompiler,
    {
        let vertex_code = shaders.load_words(&settings.vertex_shader)?;
        let vertex = backend.create_shader_module(context, &vertex_code)?;

        let fragment_code = shaders.load_words(&settings.fragment_shader)?;
        let fragment = backend.create_shader_module(context, &fragment_code)?;

        log::info!(
            "Loaded shaders {} and {} (pipeline not built yet)",
            settings.vertex_shader.display(),
            settings.fragment_shader.display()
        );

        Ok(Pipeline::Stub { vertex, fragment })
    }

    /// Whether draw calls can be issued. Always false for the stub.
    pub fn is_ready(&self) -> bool {
        match self {
            Pipeline::Stub { .. } => false,
        }
    }
}

pub struct Engine<B: Backend> {
    // Field order is teardown order (reverse of creation)
    pipeline: Pipeline<B::ShaderModule>,
    frame_sync: B::FrameSync,
    presentation: B::Presentation,
    // Only held so it outlives everything created from it
    #[allow(dead_code)]
    context: B::Context,
    frames: FrameEngine,
}

impl<B: Backend> Engine<B> {
    /// Bring up every GPU object in order. On failure, whatever was already
    /// created is destroyed in reverse before the error is returned.
    pub fn initialize<C: ShaderCompiler>(
        backend: &B,
        window: &B::Window,
        settings: &EngineSettings,
        shaders: &ShaderCache<C>,
    ) -> Result<Self, InitError> {
        log::info!("Initializing engine: {}", settings.app_name);

        let context = backend.create_context(&settings.app_name, window)?;
        let presentation = backend.create_presentation(&context, settings.extent)?;
        let frame_sync = backend.create_frame_sync(&context)?;
        let pipeline = Pipeline::load(backend, &context, shaders, settings)?;

        log::info!("Engine initialized");

        Ok(Self {
            pipeline,
            frame_sync,
            presentation,
            context,
            frames: FrameEngine::new(settings.frame_timeout),
        })
    }

    /// One full wait/acquire/record/submit/present cycle
    pub fn draw(&mut self) -> Result<(), FrameError> {
        self.frames.draw(&mut self.frame_sync, &self.presentation)
    }

    pub fn frame_number(&self) -> u64 {
        self.frames.frame_number()
    }

    pub fn frames(&self) -> &FrameEngine {
        &self.frames
    }

    pub fn pipeline(&self) -> &Pipeline<B::ShaderModule> {
        &self.pipeline
    }
}
