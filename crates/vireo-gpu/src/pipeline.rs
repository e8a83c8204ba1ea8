//! Graphics pipeline creation.

use crate::error::{GpuError, Result};
use ash::vk;
use std::mem::{offset_of, size_of};
use vireo_core::{SpriteVertex, Vertex};

/// Vertex record layout at binding 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VertexLayout {
    /// Position, texture coordinate, normal ([`Vertex`]).
    #[default]
    Standard,
    /// Position, texture coordinate ([`SpriteVertex`]).
    PositionTexCoord,
}

impl VertexLayout {
    /// Size of one vertex record in bytes.
    pub const fn stride(self) -> u32 {
        match self {
            Self::Standard => size_of::<Vertex>() as u32,
            Self::PositionTexCoord => size_of::<SpriteVertex>() as u32,
        }
    }

    /// Binding descriptions.
    pub const fn bindings(self) -> [vk::VertexInputBindingDescription; 1] {
        [vk::VertexInputBindingDescription {
            binding: 0,
            stride: self.stride(),
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    /// Attribute descriptions in shader location order.
    pub fn attributes(self) -> Vec<vk::VertexInputAttributeDescription> {
        let attribute = |location, format, offset: usize| vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format,
            offset: offset as u32,
        };
        match self {
            Self::Standard => vec![
                attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, position)),
                attribute(1, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, tex_coord)),
                attribute(2, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, normal)),
            ],
            Self::PositionTexCoord => vec![
                attribute(
                    0,
                    vk::Format::R32G32B32_SFLOAT,
                    offset_of!(SpriteVertex, position),
                ),
                attribute(
                    1,
                    vk::Format::R32G32_SFLOAT,
                    offset_of!(SpriteVertex, tex_coord),
                ),
            ],
        }
    }
}

/// Graphics pipeline configuration.
#[derive(Clone, Debug)]
pub struct GraphicsPipelineConfig {
    pub vertex_shader: Vec<u32>,
    pub fragment_shader: Vec<u32>,
    pub vertex_layout: VertexLayout,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    /// Standard alpha blending on the color attachment.
    pub blend: bool,
    pub depth_test: bool,
    pub depth_write: bool,
}

impl Default for GraphicsPipelineConfig {
    fn default() -> Self {
        Self {
            vertex_shader: Vec::new(),
            fragment_shader: Vec::new(),
            vertex_layout: VertexLayout::Standard,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            blend: false,
            depth_test: true,
            depth_write: true,
        }
    }
}

impl GraphicsPipelineConfig {
    /// Same configuration with another polygon mode.
    #[must_use]
    pub fn with_polygon_mode(&self, polygon_mode: vk::PolygonMode) -> Self {
        Self {
            polygon_mode,
            ..self.clone()
        }
    }
}

unsafe fn create_shader_module(
    device: &ash::Device,
    code: &[u32],
    stage: &str,
) -> Result<vk::ShaderModule> {
    if code.is_empty() {
        return Err(GpuError::ShaderCompilation(format!("{stage}: empty SPIR-V")));
    }
    let info = vk::ShaderModuleCreateInfo::default().code(code);
    // SAFETY: device is valid per the caller's contract.
    unsafe { device.create_shader_module(&info, None) }
        .map_err(|e| GpuError::ShaderCompilation(format!("{stage}: {e}")))
}

/// Create a pipeline layout.
///
/// # Safety
/// The device and set layouts must be valid.
pub unsafe fn create_pipeline_layout(
    device: &ash::Device,
    set_layouts: &[vk::DescriptorSetLayout],
    push_constant_ranges: &[vk::PushConstantRange],
) -> Result<vk::PipelineLayout> {
    let layout_info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(set_layouts)
        .push_constant_ranges(push_constant_ranges);

    // SAFETY: handles are valid per the caller's contract.
    unsafe { device.create_pipeline_layout(&layout_info, None) }
        .map_err(|e| GpuError::PipelineCreation(e.to_string()))
}

/// Create a graphics pipeline for subpass 0 of `render_pass`.
///
/// Viewport and scissor are dynamic.
///
/// # Safety
/// All handles must be valid and shader code must be valid SPIR-V.
pub unsafe fn create_graphics_pipeline(
    device: &ash::Device,
    config: &GraphicsPipelineConfig,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
) -> Result<vk::Pipeline> {
    // SAFETY: device is valid per the caller's contract.
    let vert_module = unsafe { create_shader_module(device, &config.vertex_shader, "vertex")? };
    // SAFETY: as above.
    let frag_module =
        match unsafe { create_shader_module(device, &config.fragment_shader, "fragment") } {
            Ok(module) => module,
            Err(e) => {
                // SAFETY: the module was created above and is unused.
                unsafe { device.destroy_shader_module(vert_module, None) };
                return Err(e);
            }
        };

    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert_module)
            .name(c"main"),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag_module)
            .name(c"main"),
    ];

    let vertex_bindings = config.vertex_layout.bindings();
    let vertex_attributes = config.vertex_layout.attributes();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&vertex_bindings)
        .vertex_attribute_descriptions(&vertex_attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(config.topology)
        .primitive_restart_enable(false);

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(config.polygon_mode)
        .cull_mode(config.cull_mode)
        .front_face(config.front_face)
        .depth_bias_enable(false)
        .line_width(1.0);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1)
        .sample_shading_enable(false);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(config.depth_test)
        .depth_write_enable(config.depth_write)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let color_blend_attachment = if config.blend {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
    } else {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
    };
    let color_blend_attachments = [color_blend_attachment];

    let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    // SAFETY: every referenced create info lives until the call returns.
    let result = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    };

    // SAFETY: modules are no longer referenced once the pipeline is built.
    unsafe {
        device.destroy_shader_module(vert_module, None);
        device.destroy_shader_module(frag_module, None);
    }

    let pipelines = result.map_err(|(_pipelines, e)| GpuError::PipelineCreation(e.to_string()))?;
    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| GpuError::PipelineCreation("driver returned no pipeline".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_layout_matches_vertex_record() {
        let layout = VertexLayout::Standard;
        assert_eq!(layout.bindings()[0].stride, 32);

        let attributes = layout.attributes();
        let offsets: Vec<u32> = attributes.iter().map(|a| a.offset).collect();
        let locations: Vec<u32> = attributes.iter().map(|a| a.location).collect();
        assert_eq!(offsets, [0, 12, 20]);
        assert_eq!(locations, [0, 1, 2]);
        assert_eq!(attributes[1].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn reduced_layout_drops_normal() {
        let layout = VertexLayout::PositionTexCoord;
        assert_eq!(layout.stride(), 20);
        assert_eq!(layout.attributes().len(), 2);
    }

    #[test]
    fn polygon_mode_variant_keeps_everything_else() {
        let config = GraphicsPipelineConfig {
            vertex_shader: vec![0x0723_0203],
            blend: true,
            ..Default::default()
        };
        let wire = config.with_polygon_mode(vk::PolygonMode::LINE);
        assert_eq!(wire.polygon_mode, vk::PolygonMode::LINE);
        assert_eq!(wire.vertex_shader, config.vertex_shader);
        assert!(wire.blend);
    }
}
