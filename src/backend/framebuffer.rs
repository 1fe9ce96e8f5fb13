// Framebuffer
//
// One per swapchain image, binding that image's color view and the
// shared depth view to the render pass.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::{PerImage, Renderpass, Swapchain, VulkanDevice};

pub struct Framebuffer {
    pub handle: vk::Framebuffer,
    device: Arc<VulkanDevice>,
}

impl Framebuffer {
    pub fn new(
        device: Arc<VulkanDevice>,
        renderpass: &Renderpass,
        width: u32,
        height: u32,
        attachments: &[vk::ImageView],
    ) -> Result<Self> {
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(renderpass.handle)
            .attachments(attachments)
            .width(width)
            .height(height)
            .layers(1);

        let handle = unsafe { device.device.create_framebuffer(&create_info, None) }
            .context("Failed to create framebuffer")?;

        Ok(Self { handle, device })
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_framebuffer(self.handle, None);
        }
    }
}

/// Builds the full set of framebuffers for the current swapchain images.
/// Called after every swapchain (re)creation.
pub fn create_for_swapchain(
    device: &Arc<VulkanDevice>,
    swapchain: &Swapchain,
    renderpass: &Renderpass,
) -> Result<PerImage<Framebuffer>> {
    let framebuffers: Result<Vec<_>> = swapchain
        .image_views
        .iter()
        .map(|&view| {
            let attachments = [view, swapchain.depth.view];
            Framebuffer::new(
                device.clone(),
                renderpass,
                swapchain.extent.width,
                swapchain.extent.height,
                &attachments,
            )
        })
        .collect();

    Ok(PerImage::new(framebuffers?))
}
