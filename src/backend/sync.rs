// Synchronization primitives
//
// Fences carry a CPU-side signaled mirror so the frame loop can skip
// redundant driver waits. Semaphores stay GPU-only and are never
// inspected from the CPU.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

/// GPU-only ordering signal.
pub struct Semaphore {
    pub handle: vk::Semaphore,
    device: Arc<VulkanDevice>,
}

impl Semaphore {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let handle = unsafe { device.device.create_semaphore(&create_info, None) }
            .context("Failed to create semaphore")?;
        Ok(Self { handle, device })
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_semaphore(self.handle, None);
        }
    }
}

/// CPU-observable completion signal.
///
/// `is_signaled` mirrors the last known GPU state: it turns true when a
/// wait completes and false on reset. Waiting on an already-signaled
/// fence returns immediately without calling into the driver.
pub struct Fence {
    pub handle: vk::Fence,
    is_signaled: bool,
    device: Arc<VulkanDevice>,
}

impl Fence {
    pub fn new(device: Arc<VulkanDevice>, create_signaled: bool) -> Result<Self> {
        let create_info = vk::FenceCreateInfo::builder().flags(fence_create_flags(create_signaled));
        let handle = unsafe { device.device.create_fence(&create_info, None) }
            .context("Failed to create fence")?;
        Ok(Self {
            handle,
            is_signaled: create_signaled,
            device,
        })
    }

    pub fn is_signaled(&self) -> bool {
        self.is_signaled
    }

    /// Waits for the fence to signal. Returns true when the fence is
    /// usable; false means the caller should skip the frame.
    pub fn wait(&mut self, timeout_ns: u64) -> bool {
        if self.is_signaled {
            return true;
        }

        let result = unsafe {
            self.device
                .device
                .wait_for_fences(&[self.handle], true, timeout_ns)
        };
        match result {
            Ok(()) => {
                self.is_signaled = true;
                true
            }
            Err(vk::Result::TIMEOUT) => {
                log::warn!("Fence wait timed out");
                false
            }
            Err(vk::Result::ERROR_DEVICE_LOST) => {
                log::error!("Fence wait failed: device lost");
                false
            }
            Err(e) => {
                log::error!("Fence wait failed: {:?}", e);
                false
            }
        }
    }

    /// Returns the fence to the unsignaled state ahead of a submission.
    pub fn reset(&mut self) -> Result<()> {
        if self.is_signaled {
            unsafe { self.device.device.reset_fences(&[self.handle]) }
                .context("Failed to reset fence")?;
            self.is_signaled = false;
        }
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_fence(self.handle, None);
        }
    }
}

/// Maps the requested initial state onto fence creation flags.
pub(crate) fn fence_create_flags(create_signaled: bool) -> vk::FenceCreateFlags {
    if create_signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    }
}

/// Per-slot synchronization set, one per frame in flight.
///
/// The in-flight fence starts signaled so the first frame through each
/// slot does not block on work that was never submitted.
pub struct FrameSync {
    pub image_available: Semaphore,
    pub render_complete: Semaphore,
    pub in_flight: Fence,
}

impl FrameSync {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        Ok(Self {
            image_available: Semaphore::new(device.clone())?,
            render_complete: Semaphore::new(device.clone())?,
            in_flight: Fence::new(device.clone(), true)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signaled_creation_maps_to_signaled_flag() {
        assert_eq!(fence_create_flags(true), vk::FenceCreateFlags::SIGNALED);
    }

    #[test]
    fn unsignaled_creation_maps_to_no_flags() {
        assert_eq!(fence_create_flags(false), vk::FenceCreateFlags::empty());
    }
}
