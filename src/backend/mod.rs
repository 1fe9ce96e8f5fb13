// Backend module - Vulkan abstraction layer
//
// RAII wrappers around ash objects plus the frame orchestrator that
// drives them. Everything device-facing lives under here.

pub mod buffer;
pub mod command;
pub mod device;
pub mod frame;
pub mod framebuffer;
pub mod image;
pub mod instance;
pub mod pipeline;
pub mod renderpass;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod vulkan;

pub use buffer::VulkanBuffer;
pub use command::{CommandBuffer, CommandOp, RecordState, StateError};
pub use device::{DeviceRequirements, QueueFamilyIndices, SwapchainSupport, VulkanDevice};
pub use frame::{
    FrameSequencer, FrameSlot, ImageIndex, PerFrame, PerImage, SizeTracker, MAX_FRAMES_IN_FLIGHT,
};
pub use framebuffer::Framebuffer;
pub use image::VulkanImage;
pub use instance::VulkanInstance;
pub use pipeline::{Pipeline, Vertex3d};
pub use renderpass::Renderpass;
pub use shader::ObjectShader;
pub use surface::VulkanSurface;
pub use swapchain::{AcquireOutcome, PresentOutcome, Swapchain};
pub use sync::{Fence, FrameSync, Semaphore};
pub use vulkan::VulkanBackend;

use ash::vk;

/// Viewport flipped on Y so world space keeps Y pointing up.
pub fn flipped_viewport(width: u32, height: u32) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: height as f32,
        width: width as f32,
        height: -(height as f32),
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_is_flipped_on_y() {
        let viewport = flipped_viewport(1280, 720);

        assert_eq!(viewport.x, 0.0);
        assert_eq!(viewport.y, 720.0);
        assert_eq!(viewport.width, 1280.0);
        assert_eq!(viewport.height, -720.0);
        assert_eq!(viewport.min_depth, 0.0);
        assert_eq!(viewport.max_depth, 1.0);
    }
}
