// Aurora renderer
//
// Vulkan frame-rendering core: device selection, swapchain lifecycle,
// frame synchronization, and command recording behind a small frontend.

pub mod backend;
pub mod config;
pub mod renderer;

pub use config::Config;
pub use renderer::{RenderBackend, RenderPacket, Renderer};
