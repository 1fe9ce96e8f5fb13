// Render pass
//
// Single-subpass color + depth pass. Color clears to the configured
// value and ends ready for presentation; depth clears and is discarded.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::{CommandBuffer, VulkanDevice};

pub struct Renderpass {
    pub handle: vk::RenderPass,
    pub render_area: vk::Rect2D,
    pub clear_color: [f32; 4],
    pub depth: f32,
    pub stencil: u32,
    device: Arc<VulkanDevice>,
}

impl Renderpass {
    pub fn new(
        device: Arc<VulkanDevice>,
        color_format: vk::Format,
        depth_format: vk::Format,
        render_area: vk::Rect2D,
        clear_color: [f32; 4],
        depth: f32,
        stencil: u32,
    ) -> Result<Self> {
        let attachments = [
            // Color: cleared on load, kept for presentation
            vk::AttachmentDescription::builder()
                .format(color_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                .build(),
            // Depth: cleared on load, contents not needed afterwards
            vk::AttachmentDescription::builder()
                .format(depth_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .build(),
        ];

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref)
            .build()];

        // Color writes must wait for the previous frame to release the image
        let dependencies = [vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            )
            .build()];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let handle = unsafe { device.device.create_render_pass(&create_info, None) }
            .context("Failed to create render pass")?;

        Ok(Self {
            handle,
            render_area,
            clear_color,
            depth,
            stencil,
            device,
        })
    }

    pub fn begin(&self, cmd: &mut CommandBuffer, framebuffer: vk::Framebuffer) -> Result<()> {
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: self.depth,
                    stencil: self.stencil,
                },
            },
        ];

        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.handle)
            .framebuffer(framebuffer)
            .render_area(self.render_area)
            .clear_values(&clear_values);

        cmd.begin_render_pass(&begin_info)
    }

    pub fn end(&self, cmd: &mut CommandBuffer) -> Result<()> {
        cmd.end_render_pass()
    }
}

impl Drop for Renderpass {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_render_pass(self.handle, None);
        }
    }
}
