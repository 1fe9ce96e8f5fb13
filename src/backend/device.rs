// Vulkan device
//
// Physical device selection against configurable requirements, logical
// device + queue creation, command pools, and the cached capability data
// the rest of the backend keys off.

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::CStr;
use std::sync::Arc;

use super::{VulkanInstance, VulkanSurface};

/// Capability toggles a device must satisfy to be selected.
pub struct DeviceRequirements {
    pub discrete_gpu: bool,
    pub sampler_anisotropy: bool,
}

impl Default for DeviceRequirements {
    fn default() -> Self {
        Self {
            discrete_gpu: false,
            sampler_anisotropy: true,
        }
    }
}

/// Queue family indices resolved during selection. Graphics and present
/// may coincide; transfer prefers a dedicated family when one exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
    pub transfer: u32,
}

/// Surface capability snapshot for a physical device. Captured during
/// selection and re-queried fresh on every swapchain (re)creation.
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Selected GPU with its logical device, queues, and command pools.
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,

    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub transfer_queue: vk::Queue,
    pub queue_families: QueueFamilyIndices,

    // Frame recording allocates from the graphics pool; transient uploads
    // go through the transfer pool
    pub graphics_pool: vk::CommandPool,
    pub transfer_pool: vk::CommandPool,

    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub depth_format: vk::Format,
    pub swapchain_support: SwapchainSupport,

    pub instance: Arc<VulkanInstance>,
}

struct Selection {
    physical_device: vk::PhysicalDevice,
    queue_families: QueueFamilyIndices,
    properties: vk::PhysicalDeviceProperties,
    features: vk::PhysicalDeviceFeatures,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    swapchain_support: SwapchainSupport,
}

impl VulkanDevice {
    pub fn new(
        instance: &Arc<VulkanInstance>,
        surface: &VulkanSurface,
        requirements: &DeviceRequirements,
    ) -> Result<Arc<Self>> {
        let selection = Self::pick_physical_device(instance, surface, requirements)?;

        let name = device_name(&selection.properties);
        log::info!(
            "Selected GPU: {} ({:?})",
            name,
            selection.properties.device_type
        );
        log::info!(
            "API version: {}.{}.{}",
            vk::api_version_major(selection.properties.api_version),
            vk::api_version_minor(selection.properties.api_version),
            vk::api_version_patch(selection.properties.api_version)
        );
        log::info!(
            "Queue families: graphics={}, present={}, transfer={}",
            selection.queue_families.graphics,
            selection.queue_families.present,
            selection.queue_families.transfer
        );

        let device = Self::create_logical_device(
            &instance.instance,
            selection.physical_device,
            selection.queue_families,
            requirements,
        )?;

        let graphics_queue =
            unsafe { device.get_device_queue(selection.queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(selection.queue_families.present, 0) };
        let transfer_queue =
            unsafe { device.get_device_queue(selection.queue_families.transfer, 0) };

        let graphics_pool = Self::create_command_pool(
            &device,
            selection.queue_families.graphics,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;
        let transfer_pool = Self::create_command_pool(
            &device,
            selection.queue_families.transfer,
            vk::CommandPoolCreateFlags::TRANSIENT,
        )?;

        let depth_format =
            Self::detect_depth_format(&instance.instance, selection.physical_device)?;
        log::debug!("Depth format: {:?}", depth_format);

        Ok(Arc::new(Self {
            device,
            physical_device: selection.physical_device,
            graphics_queue,
            present_queue,
            transfer_queue,
            queue_families: selection.queue_families,
            graphics_pool,
            transfer_pool,
            properties: selection.properties,
            features: selection.features,
            memory_properties: selection.memory_properties,
            depth_format,
            swapchain_support: selection.swapchain_support,
            instance: instance.clone(),
        }))
    }

    fn pick_physical_device(
        instance: &Arc<VulkanInstance>,
        surface: &VulkanSurface,
        requirements: &DeviceRequirements,
    ) -> Result<Selection> {
        let devices = unsafe { instance.instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        let mut best: Option<(u32, Selection)> = None;

        for candidate in devices {
            let selection = match Self::evaluate_device(instance, surface, candidate, requirements)?
            {
                Some(selection) => selection,
                None => continue,
            };

            let score = device_type_score(selection.properties.device_type);
            if best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
                best = Some((score, selection));
            }
        }

        best.map(|(_, selection)| selection)
            .ok_or_else(|| anyhow::anyhow!("No GPU meets the device requirements"))
    }

    /// Checks one candidate against the requirements. Returns None when
    /// any required capability is missing.
    fn evaluate_device(
        instance: &Arc<VulkanInstance>,
        surface: &VulkanSurface,
        physical_device: vk::PhysicalDevice,
        requirements: &DeviceRequirements,
    ) -> Result<Option<Selection>> {
        let properties = unsafe {
            instance
                .instance
                .get_physical_device_properties(physical_device)
        };
        let features = unsafe {
            instance
                .instance
                .get_physical_device_features(physical_device)
        };
        let memory_properties = unsafe {
            instance
                .instance
                .get_physical_device_memory_properties(physical_device)
        };
        let name = device_name(&properties);

        if requirements.discrete_gpu
            && properties.device_type != vk::PhysicalDeviceType::DISCRETE_GPU
        {
            log::debug!("Skipping {}: not a discrete GPU", name);
            return Ok(None);
        }

        if requirements.sampler_anisotropy && features.sampler_anisotropy != vk::TRUE {
            log::debug!("Skipping {}: no anisotropic sampling", name);
            return Ok(None);
        }

        let families = unsafe {
            instance
                .instance
                .get_physical_device_queue_family_properties(physical_device)
        };
        let mut present_support = Vec::with_capacity(families.len());
        for index in 0..families.len() as u32 {
            let supported = unsafe {
                surface.loader.get_physical_device_surface_support(
                    physical_device,
                    index,
                    surface.handle,
                )
            }?;
            present_support.push(supported);
        }

        let queue_families = match select_queue_families(&families, &present_support) {
            Some(indices) => indices,
            None => {
                log::debug!("Skipping {}: missing required queue families", name);
                return Ok(None);
            }
        };

        if !Self::check_extension_support(&instance.instance, physical_device)? {
            log::debug!("Skipping {}: missing required device extensions", name);
            return Ok(None);
        }

        let swapchain_support = Self::query_swapchain_support(physical_device, surface)?;
        if swapchain_support.formats.is_empty() || swapchain_support.present_modes.is_empty() {
            log::debug!("Skipping {}: no swapchain support on this surface", name);
            return Ok(None);
        }

        Ok(Some(Selection {
            physical_device,
            queue_families,
            properties,
            features,
            memory_properties,
            swapchain_support,
        }))
    }

    fn check_extension_support(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
    ) -> Result<bool> {
        let available =
            unsafe { instance.enumerate_device_extension_properties(physical_device) }
                .context("Failed to enumerate device extensions")?;

        let required = [ash::extensions::khr::Swapchain::name()];
        Ok(required.iter().all(|needed| {
            available.iter().any(|ext| {
                let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
                name == *needed
            })
        }))
    }

    /// Fresh surface capability data. The swapchain calls this on every
    /// create so a recreation never runs on stale capabilities.
    pub fn query_swapchain_support(
        physical_device: vk::PhysicalDevice,
        surface: &VulkanSurface,
    ) -> Result<SwapchainSupport> {
        let capabilities = unsafe {
            surface
                .loader
                .get_physical_device_surface_capabilities(physical_device, surface.handle)
        }
        .context("Failed to query surface capabilities")?;
        let formats = unsafe {
            surface
                .loader
                .get_physical_device_surface_formats(physical_device, surface.handle)
        }
        .context("Failed to query surface formats")?;
        let present_modes = unsafe {
            surface
                .loader
                .get_physical_device_surface_present_modes(physical_device, surface.handle)
        }
        .context("Failed to query surface present modes")?;

        Ok(SwapchainSupport {
            capabilities,
            formats,
            present_modes,
        })
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: QueueFamilyIndices,
        requirements: &DeviceRequirements,
    ) -> Result<ash::Device> {
        // Shared indices must only be requested once
        let mut unique_families = vec![queue_families.graphics];
        if !unique_families.contains(&queue_families.present) {
            unique_families.push(queue_families.present);
        }
        if !unique_families.contains(&queue_families.transfer) {
            unique_families.push(queue_families.transfer);
        }

        let queue_priorities = [1.0];
        let queue_infos: Vec<_> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions = [ash::extensions::khr::Swapchain::name().as_ptr()];
        let features =
            vk::PhysicalDeviceFeatures::builder().sampler_anisotropy(requirements.sampler_anisotropy);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        Ok(device)
    }

    fn create_command_pool(
        device: &ash::Device,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<vk::CommandPool> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family)
            .flags(flags);

        unsafe { device.create_command_pool(&create_info, None) }
            .context("Failed to create command pool")
    }

    fn detect_depth_format(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::Format> {
        let candidates = [
            vk::Format::D32_SFLOAT,
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D24_UNORM_S8_UINT,
        ];
        let needed = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;

        for format in candidates {
            let props = unsafe {
                instance.get_physical_device_format_properties(physical_device, format)
            };
            if props.linear_tiling_features.contains(needed)
                || props.optimal_tiling_features.contains(needed)
            {
                return Ok(format);
            }
        }

        anyhow::bail!("No supported depth format found")
    }

    /// First memory type matching the requirement mask and properties.
    pub fn find_memory_index(
        &self,
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        let index = find_memory_index_in(&self.memory_properties, type_bits, properties);
        if index.is_none() {
            log::warn!("Unable to find a suitable memory type");
        }
        index
    }

    /// Wait for all queues to drain. Used on shutdown, before swapchain
    /// rebuilds, and around blocking resource operations.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device");

        let _ = self.wait_idle();

        unsafe {
            self.device.destroy_command_pool(self.transfer_pool, None);
            self.device.destroy_command_pool(self.graphics_pool, None);
            self.device.destroy_device(None);
        }
    }
}

fn device_name(properties: &vk::PhysicalDeviceProperties) -> String {
    unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

fn device_type_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        _ => 1,
    }
}

/// Resolves queue family indices in a single pass. The transfer family
/// keeps the candidate with the fewest extra capability bits, so a
/// dedicated transfer family wins over a do-everything family.
pub(crate) fn select_queue_families(
    families: &[vk::QueueFamilyProperties],
    present_support: &[bool],
) -> Option<QueueFamilyIndices> {
    let mut graphics = None;
    let mut present = None;
    let mut transfer = None;
    let mut min_transfer_score = u8::MAX;

    for (i, family) in families.iter().enumerate() {
        let index = i as u32;
        let mut transfer_score = 0u8;

        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            graphics = Some(index);
            transfer_score += 1;
        }
        if family.queue_flags.contains(vk::QueueFlags::COMPUTE) {
            transfer_score += 1;
        }
        if family.queue_flags.contains(vk::QueueFlags::TRANSFER)
            && transfer_score <= min_transfer_score
        {
            min_transfer_score = transfer_score;
            transfer = Some(index);
        }
        if present_support.get(i).copied().unwrap_or(false) {
            present = Some(index);
        }
    }

    Some(QueueFamilyIndices {
        graphics: graphics?,
        present: present?,
        transfer: transfer?,
    })
}

fn find_memory_index_in(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0
            && memory.memory_types[i as usize]
                .property_flags
                .contains(properties)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn dedicated_transfer_family_wins() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = select_queue_families(&families, &[true, false]).unwrap();

        assert_eq!(indices.graphics, 0);
        assert_eq!(indices.present, 0);
        assert_eq!(indices.transfer, 1);
    }

    #[test]
    fn transfer_tie_keeps_the_later_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = select_queue_families(&families, &[true, false, false]).unwrap();

        assert_eq!(indices.transfer, 2);
    }

    #[test]
    fn single_do_everything_family_serves_all_roles() {
        let families = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];
        let indices = select_queue_families(&families, &[true]).unwrap();

        assert_eq!(indices.graphics, 0);
        assert_eq!(indices.present, 0);
        assert_eq!(indices.transfer, 0);
    }

    #[test]
    fn no_present_capable_family_fails_selection() {
        let families = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER,
        )];
        assert!(select_queue_families(&families, &[false]).is_none());
    }

    #[test]
    fn no_graphics_family_fails_selection() {
        let families = [family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)];
        assert!(select_queue_families(&families, &[true]).is_none());
    }

    fn memory_with_types(types: &[(vk::MemoryPropertyFlags, u32)]) -> vk::PhysicalDeviceMemoryProperties {
        let mut memory = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &(flags, heap)) in types.iter().enumerate() {
            memory.memory_types[i] = vk::MemoryType {
                property_flags: flags,
                heap_index: heap,
            };
        }
        memory
    }

    #[test]
    fn memory_scan_returns_first_match() {
        let memory = memory_with_types(&[
            (vk::MemoryPropertyFlags::DEVICE_LOCAL, 0),
            (
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                1,
            ),
            (
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                1,
            ),
        ]);

        let found = find_memory_index_in(
            &memory,
            0b111,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        );
        assert_eq!(found, Some(1));
    }

    #[test]
    fn memory_scan_honors_the_type_mask() {
        let memory = memory_with_types(&[
            (vk::MemoryPropertyFlags::DEVICE_LOCAL, 0),
            (vk::MemoryPropertyFlags::DEVICE_LOCAL, 0),
        ]);

        // Bit 0 excluded by the requirement mask
        let found = find_memory_index_in(&memory, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL);
        assert_eq!(found, Some(1));
    }

    #[test]
    fn memory_scan_fails_without_a_match() {
        let memory = memory_with_types(&[(vk::MemoryPropertyFlags::DEVICE_LOCAL, 0)]);
        let found = find_memory_index_in(&memory, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE);
        assert_eq!(found, None);
    }

    #[test]
    fn discrete_gpus_outscore_integrated() {
        assert!(
            device_type_score(vk::PhysicalDeviceType::DISCRETE_GPU)
                > device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
        );
        assert!(
            device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
                > device_type_score(vk::PhysicalDeviceType::CPU)
        );
    }
}
