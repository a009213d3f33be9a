// =============================================================================
// VULKAN BOOTSTRAP ENGINE - window, device, swapchain and a clearing frame loop
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  App (winit event loop, quit handling)                          │
// │    └── Engine (init order, drop-order teardown)                 │
// │          ├── Context (instance, surface, device, queue)         │
// │          ├── Presentation (swapchain, render pass, framebuffers)│
// │          ├── FrameSync (command buffer, fence, semaphores)      │
// │          └── Pipeline stub (shader modules from the cache)      │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Wait for the previous frame's fence, reset it
// 2. Acquire swapchain image
// 3. Record: begin render pass with a pulsing clear colour, end
// 4. Submit
// 5. Present
//
// =============================================================================

mod app;
mod backend;
mod config;
mod engine;
mod error;
mod frame;
mod shader_cache;

use anyhow::Result;
use app::App;
use clap::Parser;
use config::Config;
use winit::event_loop::EventLoop;

#[derive(Parser, Debug)]
#[command(version, about = "Minimal Vulkan engine: opens a window and clears it every frame")]
struct Cli {
    /// Application name, used as the window title and the Vulkan application name
    app_name: Option<String>,
}

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging();

    let config = Config::load();
    let app_name = cli
        .app_name
        .unwrap_or_else(|| config.window.title.clone());

    log::info!("Starting {}", app_name);
    log::info!(
        "Window: {}x{}, present mode: {}",
        config.window.width,
        config.window.height,
        config.graphics.present_mode
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config, app_name);
    event_loop.run_app(&mut app)?;

    // Teardown happens here, before the process exits
    app.shutdown()
}

/// `RUST_LOG` overrides the default `info` filter
fn init_logging() {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();
}
