//! Dynamic-rendering graphics and compute pipelines built from compiled
//! SPIR-V artifacts against the bindless set layouts.

use std::ffi::CStr;

use ash::vk;

use super::descriptors::BindlessLayouts;
use crate::pipeline::PipelineDesc;
use crate::shader::{CompiledArtifact, ShaderStage};
use kiln_common::{KilnError, KilnResult};

const ENTRY_POINT: &CStr = c"main";

/// A pipeline and the layout it was created with.
pub struct VulkanPipeline {
    device: ash::Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    bind_point: vk::PipelineBindPoint,
    label: String,
}

impl VulkanPipeline {
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Bind the pipeline and the bindless sets.
    ///
    /// # Safety
    /// `cmd` must be in the recording state.
    pub unsafe fn bind(&self, cmd: vk::CommandBuffer, sets: &[vk::DescriptorSet]) {
        self.device.cmd_bind_pipeline(cmd, self.bind_point, self.pipeline);
        self.device
            .cmd_bind_descriptor_sets(cmd, self.bind_point, self.layout, 0, sets, &[]);
    }
}

impl Drop for VulkanPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Shader modules that only live for one pipeline creation.
struct ShaderModules<'d> {
    device: &'d ash::Device,
    modules: Vec<vk::ShaderModule>,
}

impl<'d> ShaderModules<'d> {
    fn new(device: &'d ash::Device, artifacts: &[&CompiledArtifact]) -> KilnResult<Self> {
        let mut modules = Self {
            device,
            modules: Vec::with_capacity(artifacts.len()),
        };
        for artifact in artifacts {
            let create_info = vk::ShaderModuleCreateInfo::default().code(artifact.words());
            let module = unsafe { device.create_shader_module(&create_info, None) }
                .map_err(|e| KilnError::device(format!("shader module '{}'", artifact.name()), e))?;
            modules.modules.push(module);
        }
        Ok(modules)
    }

    fn stages(&self, artifacts: &[&CompiledArtifact]) -> Vec<vk::PipelineShaderStageCreateInfo<'static>> {
        self.modules
            .iter()
            .zip(artifacts)
            .map(|(&module, artifact)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(artifact.stage().to_vk())
                    .module(module)
                    .name(ENTRY_POINT)
            })
            .collect()
    }
}

impl Drop for ShaderModules<'_> {
    fn drop(&mut self) {
        for &module in &self.modules {
            unsafe { self.device.destroy_shader_module(module, None) };
        }
    }
}

fn create_layout(device: &ash::Device, layouts: &BindlessLayouts, push_constants_size: u32) -> KilnResult<vk::PipelineLayout> {
    let push_ranges = [vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::ALL,
        offset: 0,
        size: push_constants_size,
    }];
    let mut info = vk::PipelineLayoutCreateInfo::default().set_layouts(&layouts.sets);
    if push_constants_size > 0 {
        info = info.push_constant_ranges(&push_ranges);
    }
    unsafe { device.create_pipeline_layout(&info, None) }.map_err(|e| KilnError::device("pipeline layout", e))
}

/// Start a pipeline whose layout is owned from the outset, so a failed
/// creation below still releases it.
fn begin(
    device: &ash::Device,
    desc: &PipelineDesc,
    layouts: &BindlessLayouts,
    bind_point: vk::PipelineBindPoint,
) -> KilnResult<VulkanPipeline> {
    Ok(VulkanPipeline {
        device: device.clone(),
        pipeline: vk::Pipeline::null(),
        layout: create_layout(device, layouts, desc.push_constants_size)?,
        bind_point,
        label: desc.label.clone(),
    })
}

fn blend_attachment(blend: bool) -> vk::PipelineColorBlendAttachmentState {
    let attachment = vk::PipelineColorBlendAttachmentState::default().color_write_mask(vk::ColorComponentFlags::RGBA);
    if !blend {
        return attachment.blend_enable(false);
    }
    attachment
        .blend_enable(true)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
        .alpha_blend_op(vk::BlendOp::ADD)
}

fn build_error(desc: &PipelineDesc, reason: impl std::fmt::Debug) -> KilnError {
    KilnError::device(format!("pipeline '{}'", desc.label), reason)
}

pub fn build_graphics(
    device: &ash::Device,
    cache: vk::PipelineCache,
    desc: &PipelineDesc,
    artifacts: &[&CompiledArtifact],
    layouts: &BindlessLayouts,
) -> KilnResult<VulkanPipeline> {
    if artifacts.is_empty() {
        return Err(build_error(desc, "no shader stages"));
    }
    // Mesh pipelines take no vertex input or input assembly state.
    let mesh = artifacts.iter().any(|a| a.stage() == ShaderStage::Mesh);

    let modules = ShaderModules::new(device, artifacts)?;
    let stages = modules.stages(artifacts);
    let mut pipeline = begin(device, desc, layouts, vk::PipelineBindPoint::GRAPHICS)?;

    // Vertices are pulled from bindless buffers.
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(desc.topology)
        .primitive_restart_enable(false);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(desc.polygon_mode)
        .line_width(1.0)
        .cull_mode(desc.cull_mode)
        .front_face(desc.front_face);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(desc.depth_test)
        .depth_write_enable(desc.depth_write)
        .depth_compare_op(desc.depth_compare)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let blend_attachments: Vec<_> = desc.color_formats.iter().map(|_| blend_attachment(desc.blend)).collect();
    let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&blend_attachments);

    let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
        .color_attachment_formats(&desc.color_formats)
        .depth_attachment_format(desc.depth_format);

    let mut pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(pipeline.layout)
        .push_next(&mut rendering_info);
    if !mesh {
        pipeline_info = pipeline_info
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly);
    }

    let created = unsafe { device.create_graphics_pipelines(cache, &[pipeline_info], None) }
        .map_err(|(_, e)| build_error(desc, e))?;
    pipeline.pipeline = created[0];
    Ok(pipeline)
}

pub fn build_compute(
    device: &ash::Device,
    cache: vk::PipelineCache,
    desc: &PipelineDesc,
    artifact: &CompiledArtifact,
    layouts: &BindlessLayouts,
) -> KilnResult<VulkanPipeline> {
    if artifact.stage() != ShaderStage::Compute {
        return Err(build_error(desc, format!("{} stage in a compute pipeline", artifact.stage())));
    }

    let artifacts = [artifact];
    let modules = ShaderModules::new(device, &artifacts)?;
    let stages = modules.stages(&artifacts);
    let mut pipeline = begin(device, desc, layouts, vk::PipelineBindPoint::COMPUTE)?;

    let pipeline_info = vk::ComputePipelineCreateInfo::default()
        .stage(stages[0])
        .layout(pipeline.layout);
    let created = unsafe { device.create_compute_pipelines(cache, &[pipeline_info], None) }
        .map_err(|(_, e)| build_error(desc, e))?;
    pipeline.pipeline = created[0];
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opaque_blend_attachment() {
        let attachment = blend_attachment(false);
        assert_eq!(attachment.blend_enable, vk::FALSE);
        assert_eq!(attachment.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn test_alpha_blend_attachment() {
        let attachment = blend_attachment(true);
        assert_eq!(attachment.blend_enable, vk::TRUE);
        assert_eq!(attachment.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(attachment.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
    }

    #[test]
    fn test_build_error_names_pipeline() {
        let err = build_error(&PipelineDesc::labeled("sky"), vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let text = err.to_string();
        assert!(text.contains("pipeline 'sky'"));
        assert!(text.contains("ERROR_OUT_OF_DEVICE_MEMORY"));
    }
}
