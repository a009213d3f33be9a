// Backend module - Vulkan abstraction layer
//
// `Backend` is the seam between the engine's lifecycle and the GPU driver.
// `VulkanBackend` implements it over ash; the engine tests implement it with
// counting mocks.

pub mod context;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use context::Context;
pub use render_pass::RenderTargets;
pub use shader::ShaderModule;
pub use swapchain::Swapchain;
pub use sync::FrameSync;

use crate::error::{ContextInitError, PresentationError, ShaderError, SyncInitError};
use crate::frame::FrameOps;
use ash::vk;
use std::sync::Arc;
use std::time::Duration;
use winit::window::Window;

/// Wait bound in nanoseconds for fence and acquire waits, saturating at
/// `u64::MAX` (wait forever)
pub fn timeout_nanos(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

/// Creates every GPU object the engine owns. Destruction is each object's
/// own Drop, so the engine's field order decides teardown order.
pub trait Backend {
    type Window;
    type Context;
    type Presentation;
    type FrameSync: FrameOps<Target = Self::Presentation>;
    type ShaderModule;

    fn create_context(
        &self,
        app_name: &str,
        window: &Self::Window,
    ) -> Result<Self::Context, ContextInitError>;

    fn create_presentation(
        &self,
        context: &Self::Context,
        desired_extent: vk::Extent2D,
    ) -> Result<Self::Presentation, PresentationError>;

    fn create_frame_sync(&self, context: &Self::Context) -> Result<Self::FrameSync, SyncInitError>;

    fn create_shader_module(
        &self,
        context: &Self::Context,
        code: &[u32],
    ) -> Result<Self::ShaderModule, ShaderError>;
}

/// Swapchain, render pass and framebuffers
pub struct Presentation {
    // Framebuffers reference the swapchain's image views, so they go first
    pub targets: RenderTargets,
    pub swapchain: Swapchain,
}

impl Presentation {
    pub fn new(
        context: Arc<Context>,
        desired_extent: vk::Extent2D,
        present_mode: vk::PresentModeKHR,
    ) -> Result<Self, PresentationError> {
        let swapchain = Swapchain::new(context.clone(), desired_extent, present_mode)?;
        let targets = RenderTargets::new(context, &swapchain)?;
        Ok(Self { targets, swapchain })
    }
}

pub struct VulkanBackend {
    pub enable_validation: bool,
    pub present_mode: vk::PresentModeKHR,
}

impl Backend for VulkanBackend {
    type Window = Window;
    type Context = Arc<Context>;
    type Presentation = Presentation;
    type FrameSync = FrameSync;
    type ShaderModule = ShaderModule;

    fn create_context(
        &self,
        app_name: &str,
        window: &Window,
    ) -> Result<Arc<Context>, ContextInitError> {
        Context::new(app_name, window, self.enable_validation).map(Arc::new)
    }

    fn create_presentation(
        &self,
        context: &Arc<Context>,
        desired_extent: vk::Extent2D,
    ) -> Result<Presentation, PresentationError> {
        Presentation::new(context.clone(), desired_extent, self.present_mode)
    }

    fn create_frame_sync(&self, context: &Arc<Context>) -> Result<FrameSync, SyncInitError> {
        FrameSync::new(context.clone())
    }

    fn create_shader_module(
        &self,
        context: &Arc<Context>,
        code: &[u32],
    ) -> Result<ShaderModule, ShaderError> {
        ShaderModule::new(context.clone(), code)
    }
}
