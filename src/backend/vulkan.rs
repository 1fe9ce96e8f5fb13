// Vulkan backend
//
// Owns every Vulkan object, declared in destruction order, and drives
// the per-frame acquire / record / submit / present cycle.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

use super::{
    buffer, flipped_viewport, framebuffer, AcquireOutcome, CommandBuffer, DeviceRequirements,
    Framebuffer, FrameSequencer, FrameSync, ImageIndex, ObjectShader, PerFrame, PerImage,
    PresentOutcome, Renderpass, SizeTracker, Swapchain, Vertex3d, VulkanBuffer, VulkanDevice,
    VulkanInstance, VulkanSurface,
};
use crate::config::Config;
use crate::renderer::RenderBackend;

pub struct VulkanBackend {
    frame_number: u64,
    size: SizeTracker,
    recreating: bool,
    current_image: Option<ImageIndex>,
    sequencer: FrameSequencer,

    // GPU objects in destruction order
    object_shader: ObjectShader,
    vertex_buffer: VulkanBuffer,
    vertex_count: u32,
    command_buffers: PerImage<CommandBuffer>,
    framebuffers: PerImage<Framebuffer>,
    sync: PerFrame<FrameSync>,
    renderpass: Renderpass,
    swapchain: Swapchain,
    device: Arc<VulkanDevice>,
    surface: VulkanSurface,
    _instance: Arc<VulkanInstance>,
}

impl VulkanBackend {
    pub fn new(
        config: &Config,
        app_name: &str,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        // Step 1: Instance, with validation when enabled
        let instance =
            VulkanInstance::new(app_name, display_handle, config.debug.validation_layers)?;

        // Step 2: Window surface
        let surface = VulkanSurface::new(instance.clone(), display_handle, window_handle)?;

        // Step 3: Device selection, queues, command pools
        let requirements = DeviceRequirements {
            discrete_gpu: config.device.require_discrete_gpu,
            sampler_anisotropy: config.device.sampler_anisotropy,
        };
        let device = VulkanDevice::new(&instance, &surface, &requirements)?;

        // Step 4: Swapchain and render pass
        let swapchain = Swapchain::new(device.clone(), &surface, width, height)?;
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: swapchain.extent,
        };
        let renderpass = Renderpass::new(
            device.clone(),
            swapchain.format.format,
            device.depth_format,
            render_area,
            config.graphics.clear_color,
            1.0,
            0,
        )?;

        // Step 5: Framebuffers and per-image command buffers
        let framebuffers = framebuffer::create_for_swapchain(&device, &swapchain, &renderpass)?;
        let command_buffers = Self::allocate_command_buffers(&device, swapchain.image_count())?;

        // Step 6: Per-slot sync objects and the image owner table
        let sync = PerFrame::new(|_slot| FrameSync::new(&device))?;
        let sequencer = FrameSequencer::new(swapchain.image_count());

        // Step 7: Builtin shader and its vertex data
        let object_shader = ObjectShader::new(device.clone(), &renderpass, swapchain.extent)?;
        let (vertex_buffer, vertex_count) = Self::create_builtin_geometry(&device)?;

        log::info!("Vulkan backend initialized");

        Ok(Self {
            frame_number: 0,
            size: SizeTracker::new(width, height),
            recreating: false,
            current_image: None,
            sequencer,
            object_shader,
            vertex_buffer,
            vertex_count,
            command_buffers,
            framebuffers,
            sync,
            renderpass,
            swapchain,
            device,
            surface,
            _instance: instance,
        })
    }

    fn allocate_command_buffers(
        device: &Arc<VulkanDevice>,
        count: usize,
    ) -> Result<PerImage<CommandBuffer>> {
        let buffers: Result<Vec<_>> = (0..count)
            .map(|_| CommandBuffer::allocate(device.clone(), device.graphics_pool, true))
            .collect();
        Ok(PerImage::new(buffers?))
    }

    fn create_builtin_geometry(device: &Arc<VulkanDevice>) -> Result<(VulkanBuffer, u32)> {
        // One triangle, counter-clockwise with Y up
        let vertices = [
            Vertex3d {
                position: glam::Vec3::new(0.0, 0.5, 0.0),
            },
            Vertex3d {
                position: glam::Vec3::new(-0.5, -0.5, 0.0),
            },
            Vertex3d {
                position: glam::Vec3::new(0.5, -0.5, 0.0),
            },
        ];

        let size = std::mem::size_of_val(&vertices) as vk::DeviceSize;
        let vertex_buffer = VulkanBuffer::new(
            device.clone(),
            size,
            vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            true,
        )?;

        buffer::upload_data_range(
            device,
            device.transfer_pool,
            device.transfer_queue,
            &vertex_buffer,
            0,
            &vertices,
        )?;

        Ok((vertex_buffer, vertices.len() as u32))
    }

    /// Rebuilds the swapchain and everything sized by it. Returns false
    /// when the rebuild was skipped or failed; the recorded size stays
    /// pending so a later frame retries.
    fn recreate_swapchain(&mut self) -> bool {
        if self.recreating {
            return false;
        }

        let (width, height) = self.size.size();
        if self.size.is_degenerate() {
            log::debug!("Deferring swapchain rebuild for {}x{} surface", width, height);
            return false;
        }

        self.recreating = true;
        let result = self.rebuild_swapchain(width, height);
        self.recreating = false;

        match result {
            Ok(()) => {
                self.size.mark_processed();
                true
            }
            Err(e) => {
                log::error!("Swapchain recreation failed: {:#}", e);
                false
            }
        }
    }

    fn rebuild_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        self.swapchain.recreate(&self.surface, width, height)?;

        let extent = self.swapchain.extent;
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        // The surface format may have changed with the swapchain, so the
        // pass and pipeline are rebuilt against the fresh chain
        self.renderpass = Renderpass::new(
            self.device.clone(),
            self.swapchain.format.format,
            self.device.depth_format,
            render_area,
            self.renderpass.clear_color,
            self.renderpass.depth,
            self.renderpass.stencil,
        )?;
        self.framebuffers =
            framebuffer::create_for_swapchain(&self.device, &self.swapchain, &self.renderpass)?;
        self.command_buffers =
            Self::allocate_command_buffers(&self.device, self.swapchain.image_count())?;
        self.sequencer.reset_images(self.swapchain.image_count());
        self.object_shader.rebuild_pipeline(&self.renderpass, extent)?;

        log::info!(
            "Swapchain resources rebuilt at {}x{}",
            extent.width,
            extent.height
        );
        Ok(())
    }
}

impl RenderBackend for VulkanBackend {
    fn begin_frame(&mut self, _delta_time: f32) -> Result<bool> {
        if self.recreating {
            self.device.wait_idle()?;
            return Ok(false);
        }

        // Pending resize: rebuild now, render next frame
        if self.size.pending() {
            self.device.wait_idle()?;
            self.recreate_swapchain();
            return Ok(false);
        }

        // This slot's previous submission must clear before its command
        // buffer and semaphores are reused
        let slot = self.sequencer.current();
        if !self.sync[slot].in_flight.wait(u64::MAX) {
            log::warn!("In-flight fence wait failed, skipping frame");
            return Ok(false);
        }

        let image_available = self.sync[slot].image_available.handle;
        let image = match self.swapchain.acquire_next_image(u64::MAX, image_available)? {
            AcquireOutcome::Acquired(image) => image,
            AcquireOutcome::OutOfDate => {
                self.recreate_swapchain();
                return Ok(false);
            }
        };

        let cmd = &mut self.command_buffers[image];
        cmd.reset()?;
        cmd.begin(false, false, false)?;

        let viewport = flipped_viewport(self.swapchain.extent.width, self.swapchain.extent.height);
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.swapchain.extent,
        };
        unsafe {
            self.device.device.cmd_set_viewport(cmd.handle, 0, &[viewport]);
            self.device.device.cmd_set_scissor(cmd.handle, 0, &[scissor]);
        }

        self.renderpass.begin(cmd, self.framebuffers[image].handle)?;

        self.current_image = Some(image);
        Ok(true)
    }

    fn end_frame(&mut self, _delta_time: f32) -> Result<()> {
        let image = self
            .current_image
            .take()
            .context("end_frame called without a frame in progress")?;
        let slot = self.sequencer.current();

        {
            let cmd = &mut self.command_buffers[image];

            // Builtin geometry, recorded inside the main pass
            self.object_shader.bind(cmd);
            unsafe {
                self.device.device.cmd_bind_vertex_buffers(
                    cmd.handle,
                    0,
                    &[self.vertex_buffer.buffer],
                    &[0],
                );
                self.device
                    .device
                    .cmd_draw(cmd.handle, self.vertex_count, 1, 0, 0);
            }

            self.renderpass.end(cmd)?;
            cmd.end()?;
        }

        // The image may still belong to an earlier frame's submission
        if let Some(previous) = self.sequencer.claim(image) {
            if previous != slot && !self.sync[previous].in_flight.wait(u64::MAX) {
                anyhow::bail!("Wait on the fence guarding image {} failed", image.0);
            }
        }

        self.sync[slot].in_flight.reset()?;

        let wait_semaphores = [self.sync[slot].image_available.handle];
        let signal_semaphores = [self.sync[slot].render_complete.handle];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.command_buffers[image].handle];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                self.sync[slot].in_flight.handle,
            )
        }
        .context("Failed to submit frame commands")?;
        self.command_buffers[image].mark_submitted()?;

        // The slot advances on every present attempt, whatever the outcome
        let render_complete = self.sync[slot].render_complete.handle;
        let outcome = self
            .swapchain
            .present(self.device.present_queue, render_complete, image);
        self.sequencer.advance();

        match outcome? {
            PresentOutcome::Presented => {}
            PresentOutcome::NeedsRecreate => {
                self.recreate_swapchain();
            }
        }

        self.frame_number += 1;
        Ok(())
    }

    fn on_resize(&mut self, width: u32, height: u32) {
        self.size.record(width, height);
        log::debug!("Resize recorded: {}x{}", width, height);
    }

    fn shutdown(&mut self) {
        log::info!("Shutting down Vulkan backend");
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device wait failed during shutdown: {:#}", e);
        }
    }

    fn frame_number(&self) -> u64 {
        self.frame_number
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        // All fields carry their own cleanup; they only need a quiet device
        let _ = self.device.wait_idle();
        log::info!("Vulkan backend destroyed");
    }
}
