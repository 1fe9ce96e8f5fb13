// Swapchain - presentation image chain
//
// Owns the swapchain images, their views, and the depth attachment, and
// maps acquire/present results onto outcomes the frame loop can act on.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::{ImageIndex, VulkanDevice, VulkanImage, VulkanSurface};

/// Result of asking the swapchain for the next image.
pub enum AcquireOutcome {
    Acquired(ImageIndex),
    /// The surface no longer matches the swapchain. Nothing was acquired;
    /// the chain must be rebuilt before rendering can continue.
    OutOfDate,
}

/// Result of queueing a finished image for presentation.
pub enum PresentOutcome {
    Presented,
    /// Presented or rejected with a stale surface; rebuild before the
    /// next frame.
    NeedsRecreate,
}

pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub loader: ash::extensions::khr::Swapchain,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub depth: VulkanImage,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        surface: &VulkanSurface,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        // Capabilities can change between creations, so always query fresh
        let support = VulkanDevice::query_swapchain_support(device.physical_device, surface)?;

        let format =
            choose_surface_format(&support.formats).context("No surface formats available")?;
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, width, height);
        let image_count = choose_image_count(&support.capabilities);

        log::info!(
            "Creating swapchain: {}x{} ({:?}, {:?})",
            extent.width,
            extent.height,
            format.format,
            present_mode
        );

        let loader =
            ash::extensions::khr::Swapchain::new(&device.instance.instance, &device.device);

        let families = device.queue_families;
        let queue_indices = [families.graphics, families.present];
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        // Images touched by two distinct families need concurrent sharing
        create_info = if families.graphics != families.present {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_indices)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let handle = unsafe { loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        let images = unsafe { loader.get_swapchain_images(handle) }?;
        log::info!("Created swapchain with {} images", images.len());

        let image_views: Result<Vec<_>> = images
            .iter()
            .map(|&image| {
                let create_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(format.format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });

                unsafe {
                    device
                        .device
                        .create_image_view(&create_info, None)
                        .context("Failed to create swapchain image view")
                }
            })
            .collect();

        let depth = VulkanImage::new(
            device.clone(),
            extent.width,
            extent.height,
            device.depth_format,
            vk::ImageTiling::OPTIMAL,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Some(vk::ImageAspectFlags::DEPTH),
        )
        .context("Failed to create depth attachment")?;

        Ok(Self {
            handle,
            loader,
            format,
            extent,
            images,
            image_views: image_views?,
            depth,
            device,
        })
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire the next image, signalling `semaphore` when it is ready.
    /// A suboptimal-but-usable image is still reported as acquired; the
    /// present path picks up the rebuild.
    pub fn acquire_next_image(
        &self,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> Result<AcquireOutcome> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.handle, timeout, semaphore, vk::Fence::null())
        };

        match result {
            Ok((index, _suboptimal)) => Ok(AcquireOutcome::Acquired(ImageIndex(index))),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e).context("Failed to acquire swapchain image"),
        }
    }

    /// Queue `image` for presentation once `wait_semaphore` signals.
    pub fn present(
        &self,
        queue: vk::Queue,
        wait_semaphore: vk::Semaphore,
        image: ImageIndex,
    ) -> Result<PresentOutcome> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.handle];
        let image_indices = [image.0];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.loader.queue_present(queue, &present_info) };

        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            // Suboptimal still presented; out-of-date did not
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::NeedsRecreate),
            Err(e) => Err(e).context("Failed to present swapchain image"),
        }
    }

    /// Tear down and rebuild the chain for a new surface size. The old
    /// depth attachment is replaced along with it. Safe to retry after a
    /// failed attempt.
    pub fn recreate(&mut self, surface: &VulkanSurface, width: u32, height: u32) -> Result<()> {
        log::info!("Recreating swapchain: {}x{}", width, height);

        self.device.wait_idle()?;
        unsafe { self.destroy_raw() };

        *self = Self::new(self.device.clone(), surface, width, height)?;
        Ok(())
    }

    // Destroys the handles this struct owns directly and nulls them so
    // Drop (and a retried recreate) can run on the remains.
    unsafe fn destroy_raw(&mut self) {
        for view in self.image_views.drain(..) {
            self.device.device.destroy_image_view(view, None);
        }
        self.images.clear();

        if self.handle != vk::SwapchainKHR::null() {
            self.loader.destroy_swapchain(self.handle, None);
            self.handle = vk::SwapchainKHR::null();
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe { self.destroy_raw() };
    }
}

/// Prefer 32-bit BGRA with an sRGB colorspace, otherwise take whatever
/// the surface lists first.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_UNORM
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// Mailbox when the driver offers it, otherwise FIFO. FIFO is the only
/// mode the standard guarantees.
fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    present_modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface dictates the extent when it reports a fixed one; either
/// way the result is clamped to the supported range.
fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    let mut extent = if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D { width, height }
    };

    extent.width = extent.width.clamp(
        capabilities.min_image_extent.width,
        capabilities.max_image_extent.width,
    );
    extent.height = extent.height.clamp(
        capabilities.min_image_extent.height,
        capabilities.max_image_extent.height,
    );
    extent
}

/// One more than the minimum so acquisition rarely blocks, capped by the
/// maximum when the surface reports one.
fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && count > capabilities.max_image_count {
        count = capabilities.max_image_count;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn preferred_surface_format_wins_regardless_of_order() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats).unwrap();

        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn surface_format_falls_back_to_the_first_listed() {
        let formats = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats).unwrap();

        assert_eq!(chosen.format, vk::Format::R8G8B8A8_SRGB);
    }

    #[test]
    fn no_surface_formats_is_an_error() {
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn mailbox_preferred_over_everything_else() {
        let modes = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn fifo_is_the_fallback_present_mode() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&[]), vk::PresentModeKHR::FIFO);
    }

    fn capabilities(
        current: (u32, u32),
        min: (u32, u32),
        max: (u32, u32),
    ) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            ..Default::default()
        }
    }

    #[test]
    fn fixed_current_extent_overrides_the_request() {
        let caps = capabilities((800, 600), (1, 1), (4096, 4096));
        let extent = choose_extent(&caps, 1920, 1080);

        assert_eq!(extent.width, 800);
        assert_eq!(extent.height, 600);
    }

    #[test]
    fn requested_extent_is_clamped_to_the_supported_range() {
        let caps = capabilities((u32::MAX, u32::MAX), (320, 240), (1600, 900));

        let small = choose_extent(&caps, 100, 100);
        assert_eq!((small.width, small.height), (320, 240));

        let large = choose_extent(&caps, 3840, 2160);
        assert_eq!((large.width, large.height), (1600, 900));

        let fits = choose_extent(&caps, 1280, 720);
        assert_eq!((fits.width, fits.height), (1280, 720));
    }

    #[test]
    fn image_count_is_one_over_the_minimum() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps), 3);
    }

    #[test]
    fn image_count_respects_the_maximum() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps), 3);
    }

    #[test]
    fn zero_maximum_means_unbounded() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 4,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps), 5);
    }
}
