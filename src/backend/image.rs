// Vulkan image
//
// An image with its backing allocation and an optional view, destroyed
// together. The swapchain uses this for its depth attachment.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

pub struct VulkanImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub width: u32,
    pub height: u32,
    device: Arc<VulkanDevice>,
}

impl VulkanImage {
    pub fn new(
        device: Arc<VulkanDevice>,
        width: u32,
        height: u32,
        format: vk::Format,
        tiling: vk::ImageTiling,
        usage: vk::ImageUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
        view_aspect: Option<vk::ImageAspectFlags>,
    ) -> Result<Self> {
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&create_info, None) }
            .context("Failed to create image")?;

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };
        let memory_index = device
            .find_memory_index(requirements.memory_type_bits, memory_flags)
            .context("No compatible memory type for image")?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_index);

        let memory = unsafe { device.device.allocate_memory(&alloc_info, None) }
            .context("Failed to allocate image memory")?;

        unsafe { device.device.bind_image_memory(image, memory, 0) }
            .context("Failed to bind image memory")?;

        let view = match view_aspect {
            Some(aspect) => {
                let view_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: aspect,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });

                unsafe { device.device.create_image_view(&view_info, None) }
                    .context("Failed to create image view")?
            }
            None => vk::ImageView::null(),
        };

        Ok(Self {
            image,
            memory,
            view,
            width,
            height,
            device,
        })
    }
}

impl Drop for VulkanImage {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.device.destroy_image_view(self.view, None);
            }
            self.device.device.destroy_image(self.image, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}
