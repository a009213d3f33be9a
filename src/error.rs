// Error taxonomy
//
// Initialization failures are always fatal. Frame failures are fatal too,
// except a suboptimal present which the frame engine absorbs.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

/// Failure while bringing up the instance, surface, adapter or device.
#[derive(Debug, Error)]
pub enum ContextInitError {
    #[error("failed to load the Vulkan library: {0}")]
    Loader(#[from] ash::LoadingError),

    #[error("Vulkan {major}.{minor} is available, 1.1 or newer is required")]
    UnsupportedApiVersion { major: u32, minor: u32 },

    #[error("window handle is not usable for Vulkan: {0}")]
    WindowHandle(vk::Result),

    #[error("application name contains an interior NUL byte")]
    InvalidAppName,

    #[error("failed to create Vulkan instance: {0}")]
    Instance(vk::Result),

    #[error("failed to create debug messenger: {0}")]
    DebugMessenger(vk::Result),

    #[error("failed to create window surface: {0}")]
    Surface(vk::Result),

    #[error("failed to query physical devices: {0}")]
    Enumerate(vk::Result),

    #[error("no GPU supports Vulkan 1.1 with swapchain presentation")]
    NoSuitableDevice,

    #[error("no GPU exposes a queue family with both graphics and present support")]
    NoGraphicsQueue,

    #[error("failed to create logical device: {0}")]
    Device(vk::Result),
}

/// Failure while building the swapchain, render pass or framebuffers.
#[derive(Debug, Error)]
pub enum PresentationError {
    #[error("failed to query surface support: {0}")]
    SurfaceQuery(vk::Result),

    #[error("surface reports no pixel formats")]
    NoSurfaceFormat,

    #[error("failed to create swapchain: {0}")]
    Swapchain(vk::Result),

    #[error("failed to create swapchain image view: {0}")]
    ImageView(vk::Result),

    #[error("failed to create render pass: {0}")]
    RenderPass(vk::Result),

    #[error("failed to create framebuffer {index}: {result}")]
    Framebuffer { index: usize, result: vk::Result },

    #[error("swapchain has {images} images but {views} views and {framebuffers} framebuffers")]
    CountMismatch {
        images: usize,
        views: usize,
        framebuffers: usize,
    },
}

/// Failure while creating the command pool, command buffer, fence or semaphores.
#[derive(Debug, Error)]
pub enum SyncInitError {
    #[error("failed to create command pool: {0}")]
    CommandPool(vk::Result),

    #[error("failed to allocate command buffer: {0}")]
    CommandBuffer(vk::Result),

    #[error("failed to create render fence: {0}")]
    Fence(vk::Result),

    #[error("failed to create semaphore: {0}")]
    Semaphore(vk::Result),
}

/// Failure of the shader cache or shader module creation.
#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("shader source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("failed to compile {}:\n{diagnostics}", .path.display())]
    Compile { path: PathBuf, diagnostics: String },

    #[error("shader cache I/O on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not valid SPIR-V: {source}", .path.display())]
    InvalidSpirv {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create shader module: {0}")]
    Module(vk::Result),
}

/// Any startup failure. Always aborts the run.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("failed to create window: {0}")]
    Window(#[from] winit::error::OsError),

    #[error("context initialization failed")]
    Context(#[from] ContextInitError),

    #[error("presentation setup failed")]
    Presentation(#[from] PresentationError),

    #[error("frame synchronization setup failed")]
    Sync(#[from] SyncInitError),

    #[error("shader setup failed")]
    Shader(#[from] ShaderError),
}

/// Failure inside one draw cycle.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("render fence did not signal within {timeout_ms} ms, GPU hang suspected")]
    GpuHangSuspected { timeout_ms: u64 },

    #[error("no swapchain image became available within {timeout_ms} ms")]
    SwapchainAcquireTimeout { timeout_ms: u64 },

    #[error("swapchain is out of date and recreation is not supported")]
    SwapchainOutOfDate,

    #[error("present failed: {0}")]
    Present(vk::Result),

    #[error("device call failed during {stage}: {result}")]
    Device {
        stage: &'static str,
        result: vk::Result,
    },
}
