// Buffer utilities for vertex, index, and staging buffers
//
// Host-visible buffers load data through a mapped range; device-local
// buffers are filled through a staging copy on the transfer queue.

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::c_void;
use std::sync::Arc;

use super::{command, VulkanDevice};

pub struct VulkanBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    memory_flags: vk::MemoryPropertyFlags,
    device: Arc<VulkanDevice>,
}

impl VulkanBuffer {
    pub fn new(
        device: Arc<VulkanDevice>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
        bind_on_create: bool,
    ) -> Result<Self> {
        let (buffer, memory) = Self::allocate(&device, size, usage, memory_flags)?;

        let buffer = Self {
            buffer,
            memory,
            size,
            usage,
            memory_flags,
            device,
        };

        if bind_on_create {
            buffer.bind(0)?;
        }
        Ok(buffer)
    }

    fn allocate(
        device: &VulkanDevice,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
    ) -> Result<(vk::Buffer, vk::DeviceMemory)> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .context("Failed to create buffer")?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };
        let memory_index = device
            .find_memory_index(requirements.memory_type_bits, memory_flags)
            .context("No compatible memory type for buffer")?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_index);

        let memory = unsafe { device.device.allocate_memory(&alloc_info, None) }
            .context("Failed to allocate buffer memory")?;

        Ok((buffer, memory))
    }

    pub fn bind(&self, offset: vk::DeviceSize) -> Result<()> {
        unsafe {
            self.device
                .device
                .bind_buffer_memory(self.buffer, self.memory, offset)
        }
        .context("Failed to bind buffer memory")
    }

    /// Map a range for host access. Pair with `unlock`.
    pub fn lock(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> Result<*mut c_void> {
        unsafe {
            self.device
                .device
                .map_memory(self.memory, offset, size, vk::MemoryMapFlags::empty())
        }
        .context("Failed to map buffer memory")
    }

    pub fn unlock(&self) {
        unsafe { self.device.device.unmap_memory(self.memory) };
    }

    /// Copy a slice into the buffer at `offset`. Host-visible memory only.
    pub fn load_data<T: Copy>(&self, offset: vk::DeviceSize, data: &[T]) -> Result<()> {
        let size = std::mem::size_of_val(data) as vk::DeviceSize;
        let ptr = self.lock(offset, size)? as *mut T;
        unsafe { ptr.copy_from_nonoverlapping(data.as_ptr(), data.len()) };
        self.unlock();
        Ok(())
    }

    /// Grow the buffer, carrying its contents over. Blocks until the copy
    /// lands and the old allocation is released.
    pub fn resize(
        &mut self,
        new_size: vk::DeviceSize,
        pool: vk::CommandPool,
        queue: vk::Queue,
    ) -> Result<()> {
        let (new_buffer, new_memory) =
            Self::allocate(&self.device, new_size, self.usage, self.memory_flags)?;
        unsafe {
            self.device
                .device
                .bind_buffer_memory(new_buffer, new_memory, 0)
        }
        .context("Failed to bind resized buffer memory")?;

        copy_region(
            &self.device,
            pool,
            queue,
            self.buffer,
            0,
            new_buffer,
            0,
            self.size,
        )?;
        self.device.wait_idle()?;

        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
            self.device.device.free_memory(self.memory, None);
        }

        self.buffer = new_buffer;
        self.memory = new_memory;
        self.size = new_size;
        Ok(())
    }

    /// Copy a region of this buffer into `dest`. Blocks until the transfer
    /// completes.
    pub fn copy_to(
        &self,
        dest: &VulkanBuffer,
        src_offset: vk::DeviceSize,
        dst_offset: vk::DeviceSize,
        size: vk::DeviceSize,
        pool: vk::CommandPool,
        queue: vk::Queue,
    ) -> Result<()> {
        copy_region(
            &self.device,
            pool,
            queue,
            self.buffer,
            src_offset,
            dest.buffer,
            dst_offset,
            size,
        )
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}

fn copy_region(
    device: &Arc<VulkanDevice>,
    pool: vk::CommandPool,
    queue: vk::Queue,
    src: vk::Buffer,
    src_offset: vk::DeviceSize,
    dst: vk::Buffer,
    dst_offset: vk::DeviceSize,
    size: vk::DeviceSize,
) -> Result<()> {
    // The queue must be quiet before touching buffers it may still read
    unsafe { device.device.queue_wait_idle(queue) }
        .context("Failed to wait for transfer queue")?;

    command::submit_single_use(device, pool, queue, |cmd| {
        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        unsafe {
            device.device.cmd_copy_buffer(cmd.handle, src, dst, &[region]);
        }
        Ok(())
    })
}

/// Pushes data into a device-local buffer through a temporary staging
/// buffer. The destination must carry TRANSFER_DST usage.
pub fn upload_data_range<T: Copy>(
    device: &Arc<VulkanDevice>,
    pool: vk::CommandPool,
    queue: vk::Queue,
    dest: &VulkanBuffer,
    offset: vk::DeviceSize,
    data: &[T],
) -> Result<()> {
    let size = std::mem::size_of_val(data) as vk::DeviceSize;

    let staging = VulkanBuffer::new(
        device.clone(),
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        true,
    )?;

    staging.load_data(0, data)?;
    staging.copy_to(dest, 0, offset, size, pool, queue)
}
