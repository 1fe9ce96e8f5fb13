// Shader loading
//
// Shaders ship as SPIR-V files under assets/shaders, one file per stage.
// The builtin object shader and its pipeline live here; the modules
// persist across pipeline rebuilds.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use super::{CommandBuffer, Pipeline, Renderpass, VulkanDevice};

pub const BUILTIN_SHADER_NAME: &str = "object";

fn shader_path(name: &str, stage: &str) -> PathBuf {
    PathBuf::from("assets/shaders").join(format!("{}.{}.spv", name, stage))
}

/// Reads one compiled stage and wraps it in a shader module.
pub fn load_shader_module(
    device: &VulkanDevice,
    name: &str,
    stage: &str,
) -> Result<vk::ShaderModule> {
    let path = shader_path(name, stage);
    let bytes = std::fs::read(&path)
        .with_context(|| format!("Failed to read shader file {}", path.display()))?;

    // SPIR-V is a stream of 4-byte words; read_spv validates size and magic
    let code = ash::util::read_spv(&mut Cursor::new(&bytes))
        .with_context(|| format!("Invalid SPIR-V in {}", path.display()))?;

    let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);
    unsafe { device.device.create_shader_module(&create_info, None) }
        .context("Failed to create shader module")
}

/// The builtin forward-pass shader: vertex and fragment stages plus the
/// pipeline built from them.
pub struct ObjectShader {
    vertex_module: vk::ShaderModule,
    fragment_module: vk::ShaderModule,
    pub pipeline: Pipeline,
    device: Arc<VulkanDevice>,
}

impl ObjectShader {
    pub fn new(
        device: Arc<VulkanDevice>,
        renderpass: &Renderpass,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let vertex_module = load_shader_module(&device, BUILTIN_SHADER_NAME, "vert")?;
        let fragment_module = load_shader_module(&device, BUILTIN_SHADER_NAME, "frag")?;

        let pipeline =
            Self::build_pipeline(&device, renderpass, extent, vertex_module, fragment_module)?;

        log::info!("Loaded builtin shader '{}'", BUILTIN_SHADER_NAME);

        Ok(Self {
            vertex_module,
            fragment_module,
            pipeline,
            device,
        })
    }

    fn build_pipeline(
        device: &Arc<VulkanDevice>,
        renderpass: &Renderpass,
        extent: vk::Extent2D,
        vertex_module: vk::ShaderModule,
        fragment_module: vk::ShaderModule,
    ) -> Result<Pipeline> {
        let entry_point = c"main";
        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module)
                .name(entry_point)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_module)
                .name(entry_point)
                .build(),
        ];

        Pipeline::new(device.clone(), renderpass, extent, &stages, &[], false)
    }

    /// Replaces the pipeline after the render pass or extent changed,
    /// reusing the loaded modules.
    pub fn rebuild_pipeline(
        &mut self,
        renderpass: &Renderpass,
        extent: vk::Extent2D,
    ) -> Result<()> {
        self.pipeline = Self::build_pipeline(
            &self.device,
            renderpass,
            extent,
            self.vertex_module,
            self.fragment_module,
        )?;
        Ok(())
    }

    pub fn bind(&self, cmd: &CommandBuffer) {
        self.pipeline.bind(cmd, vk::PipelineBindPoint::GRAPHICS);
    }
}

impl Drop for ObjectShader {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .destroy_shader_module(self.fragment_module, None);
            self.device
                .device
                .destroy_shader_module(self.vertex_module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_files_follow_the_naming_convention() {
        let path = shader_path("object", "vert");
        assert!(path.ends_with("object.vert.spv"));
        assert!(path.starts_with("assets/shaders"));
    }
}
