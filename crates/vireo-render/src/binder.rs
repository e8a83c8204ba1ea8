//! Descriptor and pipeline binding.
//!
//! [`PipelineBinder`] owns the session-lifetime objects (descriptor set
//! layout, pipeline layout, sampler, bound texture) and one
//! [`PipelineResource`] holding everything that depends on the current
//! [`SurfaceState`]: the pipelines, the descriptor pool and one descriptor
//! set plus uniform buffer per swap image. Any surface rebuild must be
//! followed by [`PipelineBinder::build`] before the next frame is recorded.

use std::mem::size_of;

use ash::vk;
use gpu_allocator::MemoryLocation;
use tracing::{debug, info, warn};
use vireo_core::constants::{TEXTURE_BINDING, UNIFORM_BINDING};
use vireo_core::{PixelRegion, RenderMode, UniformFrameData};
use vireo_gpu::{
    Command, DescriptorSetLayoutBuilder, DescriptorWrite, DeviceBuffer, GpuError,
    GraphicsPipelineConfig, RenderDevice, Result, SamplerDesc, VertexLayout,
};

use crate::surface::SurfaceState;
use crate::texture::Texture;
use crate::upload::Uploader;

/// Shader interface of one rendering session variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorLayoutDesc {
    /// Combined image sampler binding, if the shaders sample a texture.
    pub texture_binding: Option<u32>,
    pub texture_stages: vk::ShaderStageFlags,
    /// Uniform buffer binding, if the shaders read per-frame uniforms.
    pub uniform_binding: Option<u32>,
    pub uniform_stages: vk::ShaderStageFlags,
    /// Size of the uniform block in bytes.
    pub uniform_size: u64,
}

impl Default for DescriptorLayoutDesc {
    fn default() -> Self {
        Self {
            texture_binding: Some(TEXTURE_BINDING),
            texture_stages: vk::ShaderStageFlags::FRAGMENT,
            uniform_binding: Some(UNIFORM_BINDING),
            uniform_stages: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            uniform_size: size_of::<UniformFrameData>() as u64,
        }
    }
}

impl DescriptorLayoutDesc {
    fn builder(&self) -> DescriptorSetLayoutBuilder {
        let mut builder = DescriptorSetLayoutBuilder::new();
        if let Some(binding) = self.texture_binding {
            builder = builder.combined_image_sampler(binding, self.texture_stages);
        }
        if let Some(binding) = self.uniform_binding {
            builder = builder.uniform_buffer(binding, self.uniform_stages);
        }
        builder
    }

    fn validate(&self) -> Result<()> {
        if self.texture_binding.is_some() && self.texture_binding == self.uniform_binding {
            return Err(GpuError::PipelineCreation(
                "texture and uniform share a descriptor binding".into(),
            ));
        }
        if self.uniform_binding.is_some() && self.uniform_size == 0 {
            return Err(GpuError::PipelineCreation(
                "uniform binding declared with a zero-sized block".into(),
            ));
        }
        Ok(())
    }

    const fn is_empty(&self) -> bool {
        self.texture_binding.is_none() && self.uniform_binding.is_none()
    }
}

/// Shader pair and fixed-function state of a pipeline family.
#[derive(Debug, Clone)]
pub struct PipelineDesc {
    pub vertex_shader: Vec<u32>,
    pub fragment_shader: Vec<u32>,
    pub vertex_layout: VertexLayout,
    /// Sibling pipelines to compile; the first is active after a build.
    pub modes: Vec<RenderMode>,
    pub cull_mode: vk::CullModeFlags,
    pub blend: bool,
    pub depth_test: bool,
    pub depth_write: bool,
    /// Push constant block visible to the vertex and fragment stages.
    pub push_constant_size: u32,
    pub descriptor_layout: DescriptorLayoutDesc,
}

impl PipelineDesc {
    /// Standard vertex layout, back-face culling, depth on, fill only.
    pub fn new(vertex_shader: Vec<u32>, fragment_shader: Vec<u32>) -> Self {
        Self {
            vertex_shader,
            fragment_shader,
            vertex_layout: VertexLayout::Standard,
            modes: vec![RenderMode::Fill],
            cull_mode: vk::CullModeFlags::BACK,
            blend: false,
            depth_test: true,
            depth_write: true,
            push_constant_size: 0,
            descriptor_layout: DescriptorLayoutDesc::default(),
        }
    }

    #[must_use]
    pub fn with_modes(mut self, modes: &[RenderMode]) -> Self {
        self.modes = modes.to_vec();
        self
    }

    #[must_use]
    pub const fn with_vertex_layout(mut self, layout: VertexLayout) -> Self {
        self.vertex_layout = layout;
        self
    }

    #[must_use]
    pub const fn with_cull_mode(mut self, cull_mode: vk::CullModeFlags) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    #[must_use]
    pub const fn with_blend(mut self, blend: bool) -> Self {
        self.blend = blend;
        self
    }

    #[must_use]
    pub const fn with_depth(mut self, test: bool, write: bool) -> Self {
        self.depth_test = test;
        self.depth_write = write;
        self
    }

    #[must_use]
    pub const fn with_push_constants(mut self, size: u32) -> Self {
        self.push_constant_size = size;
        self
    }

    #[must_use]
    pub const fn with_descriptor_layout(mut self, layout: DescriptorLayoutDesc) -> Self {
        self.descriptor_layout = layout;
        self
    }

    fn config(&self, mode: RenderMode) -> GraphicsPipelineConfig {
        GraphicsPipelineConfig {
            vertex_shader: self.vertex_shader.clone(),
            fragment_shader: self.fragment_shader.clone(),
            vertex_layout: self.vertex_layout,
            polygon_mode: match mode {
                RenderMode::Fill => vk::PolygonMode::FILL,
                RenderMode::Wireframe => vk::PolygonMode::LINE,
            },
            cull_mode: self.cull_mode,
            blend: self.blend,
            depth_test: self.depth_test,
            depth_write: self.depth_write,
            ..GraphicsPipelineConfig::default()
        }
    }

    const fn push_stages() -> vk::ShaderStageFlags {
        vk::ShaderStageFlags::from_raw(
            vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw(),
        )
    }
}

/// Everything bound to one surface state.
pub struct PipelineResource<D: RenderDevice> {
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    pipelines: Vec<(RenderMode, vk::Pipeline)>,
    pool: Option<vk::DescriptorPool>,
    sets: Vec<vk::DescriptorSet>,
    uniforms: Vec<D::Buffer>,
}

impl<D: RenderDevice> PipelineResource<D> {
    /// Render pass the pipelines were compiled against.
    pub const fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Extent of the surface state the resource was built for.
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn pipeline(&self, mode: RenderMode) -> Option<vk::Pipeline> {
        self.pipelines
            .iter()
            .find(|(m, _)| *m == mode)
            .map(|(_, p)| *p)
    }

    pub fn modes(&self) -> impl Iterator<Item = RenderMode> + '_ {
        self.pipelines.iter().map(|(m, _)| *m)
    }

    pub fn descriptor_sets(&self) -> &[vk::DescriptorSet] {
        &self.sets
    }

    pub fn uniform_buffers(&self) -> &[D::Buffer] {
        &self.uniforms
    }

    fn empty(surface: &SurfaceState<D>) -> Self {
        Self {
            render_pass: surface.render_pass(),
            extent: surface.extent(),
            pipelines: Vec::new(),
            pool: None,
            sets: Vec::new(),
            uniforms: Vec::new(),
        }
    }

    fn destroy(self, device: &D) {
        if let Some(pool) = self.pool {
            device.destroy_descriptor_pool(pool);
        }
        for buffer in self.uniforms.into_iter().rev() {
            device.destroy_buffer(buffer);
        }
        for (_, pipeline) in self.pipelines.into_iter().rev() {
            device.destroy_pipeline(pipeline);
        }
    }
}

/// Owner of the descriptor and pipeline objects of one session.
pub struct PipelineBinder<D: RenderDevice> {
    desc: PipelineDesc,
    set_layout: Option<vk::DescriptorSetLayout>,
    pipeline_layout: vk::PipelineLayout,
    sampler: Option<vk::Sampler>,
    texture: Option<Texture<D>>,
    max_descriptor_sets: u32,
    wireframe_supported: bool,
    resource: Option<PipelineResource<D>>,
    mode: RenderMode,
}

impl<D: RenderDevice> PipelineBinder<D> {
    /// Create the layouts, the sampler and, when the layout samples a
    /// texture, a 1x1 white placeholder bound until [`Self::bind_texture`].
    pub fn new(
        device: &D,
        uploader: &Uploader,
        desc: PipelineDesc,
        max_descriptor_sets: u32,
    ) -> Result<Self> {
        if desc.modes.is_empty() {
            return Err(GpuError::PipelineCreation("no render modes requested".into()));
        }
        desc.descriptor_layout.validate()?;

        let mut binder = Self {
            mode: desc.modes[0],
            desc,
            set_layout: None,
            pipeline_layout: vk::PipelineLayout::null(),
            sampler: None,
            texture: None,
            max_descriptor_sets,
            wireframe_supported: device.features().wireframe,
            resource: None,
        };
        if let Err(err) = binder.init(device, uploader) {
            binder.destroy(device);
            return Err(err);
        }
        Ok(binder)
    }

    fn init(&mut self, device: &D, uploader: &Uploader) -> Result<()> {
        let layout = self.desc.descriptor_layout;
        let set_layouts = if layout.is_empty() {
            Vec::new()
        } else {
            let set_layout = device.create_descriptor_set_layout(layout.builder().bindings())?;
            self.set_layout = Some(set_layout);
            vec![set_layout]
        };

        let push_ranges = if self.desc.push_constant_size > 0 {
            vec![vk::PushConstantRange {
                stage_flags: PipelineDesc::push_stages(),
                offset: 0,
                size: self.desc.push_constant_size,
            }]
        } else {
            Vec::new()
        };
        self.pipeline_layout = device.create_pipeline_layout(&set_layouts, &push_ranges)?;

        if layout.texture_binding.is_some() {
            self.sampler = Some(device.create_sampler(&SamplerDesc {
                anisotropy: device.features().max_anisotropy,
            })?);
            let white = [0xff_u8; 4];
            self.texture = Some(uploader.upload_texture(
                device,
                &white,
                PixelRegion::packed(1, 1, 4),
                vk::Format::R8G8B8A8_UNORM,
                "placeholder_texture",
            )?);
        }
        Ok(())
    }

    /// Compile the pipelines and allocate descriptor sets for `surface`,
    /// replacing whatever was built for a previous surface state.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn build(&mut self, device: &D, surface: &SurfaceState<D>) -> Result<()> {
        self.release(device);

        let mut resource = PipelineResource::empty(surface);
        if let Err(err) = self.populate(device, surface, &mut resource) {
            resource.destroy(device);
            return Err(err);
        }

        if resource.pipeline(self.mode).is_none() {
            self.mode = self.desc.modes[0];
        }
        info!(
            "Pipelines built for {}x{}: {} modes, {} descriptor sets",
            resource.extent.width,
            resource.extent.height,
            resource.pipelines.len(),
            resource.sets.len()
        );
        self.resource = Some(resource);
        Ok(())
    }

    fn populate(
        &self,
        device: &D,
        surface: &SurfaceState<D>,
        resource: &mut PipelineResource<D>,
    ) -> Result<()> {
        for &mode in &self.desc.modes {
            if mode == RenderMode::Wireframe && !self.wireframe_supported {
                warn!("Wireframe requested but non-solid fill is unavailable, skipping");
                continue;
            }
            if resource.pipeline(mode).is_some() {
                continue;
            }
            let pipeline = device.create_graphics_pipeline(
                &self.desc.config(mode),
                self.pipeline_layout,
                surface.render_pass(),
            )?;
            resource.pipelines.push((mode, pipeline));
        }

        let Some(set_layout) = self.set_layout else {
            return Ok(());
        };
        let image_count = surface.image_count() as u32;
        let layout = self.desc.descriptor_layout;
        let builder = layout.builder();

        let max_sets = image_count.max(self.max_descriptor_sets);
        let pool = device.create_descriptor_pool(max_sets, &builder.pool_sizes(max_sets))?;
        resource.pool = Some(pool);
        resource.sets =
            device.allocate_descriptor_sets(pool, &vec![set_layout; image_count as usize])?;

        if layout.uniform_binding.is_some() {
            for index in 0..image_count {
                let buffer = device.create_buffer(
                    layout.uniform_size,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    MemoryLocation::CpuToGpu,
                    &format!("frame_uniforms_{index}"),
                )?;
                resource.uniforms.push(buffer);
            }
        }

        for (index, &set) in resource.sets.iter().enumerate() {
            let writes = self.writes_for(resource.uniforms.get(index));
            device.update_descriptor_set(set, &writes);
        }
        Ok(())
    }

    fn writes_for(&self, uniform: Option<&D::Buffer>) -> Vec<DescriptorWrite> {
        let layout = self.desc.descriptor_layout;
        let mut writes = Vec::with_capacity(2);
        if let (Some(binding), Some(texture), Some(sampler)) =
            (layout.texture_binding, &self.texture, self.sampler)
        {
            writes.push(DescriptorWrite::CombinedImageSampler {
                binding,
                view: texture.view(),
                sampler,
            });
        }
        if let (Some(binding), Some(buffer)) = (layout.uniform_binding, uniform) {
            writes.push(DescriptorWrite::UniformBuffer {
                binding,
                buffer: buffer.handle(),
                range: layout.uniform_size,
            });
        }
        writes
    }

    /// Destroy the surface-dependent resource, if any.
    pub fn release(&mut self, device: &D) {
        if let Some(resource) = self.resource.take() {
            resource.destroy(device);
        }
    }

    /// Replace the bound texture.
    ///
    /// Waits for the device to go idle, destroys the previous texture and
    /// only then rewrites every descriptor set, so no set ever references a
    /// destroyed image.
    pub fn bind_texture(&mut self, device: &D, texture: Texture<D>) -> Result<()> {
        if self.desc.descriptor_layout.texture_binding.is_none() {
            texture.destroy(device);
            return Err(GpuError::InvalidState(
                "descriptor layout has no texture binding".into(),
            ));
        }

        device.wait_idle()?;
        if let Some(old) = self.texture.take() {
            old.destroy(device);
        }
        debug!(
            "Binding {}x{} texture to {} descriptor sets",
            texture.width(),
            texture.height(),
            self.resource.as_ref().map_or(0, |r| r.sets.len())
        );
        self.texture = Some(texture);

        if let Some(resource) = &self.resource {
            for (index, &set) in resource.sets.iter().enumerate() {
                let writes = self.writes_for(resource.uniforms.get(index));
                device.update_descriptor_set(set, &writes);
            }
        }
        Ok(())
    }

    /// Copy `bytes` into the uniform buffer of `image_index`.
    ///
    /// The caller must know that no frame using this image is in flight.
    pub fn write_uniform_bytes(&self, device: &D, image_index: u32, bytes: &[u8]) -> Result<()> {
        let buffer = self
            .resource
            .as_ref()
            .and_then(|r| r.uniforms.get(image_index as usize))
            .ok_or_else(|| {
                GpuError::InvalidState(format!("no uniform buffer for image {image_index}"))
            })?;
        if bytes.len() as u64 > buffer.size() {
            return Err(GpuError::InvalidState(format!(
                "{} uniform bytes exceed the {}-byte block",
                bytes.len(),
                buffer.size()
            )));
        }
        device.write_buffer(buffer, 0, bytes)
    }

    /// Write the standard per-frame uniform block.
    pub fn write_uniforms(
        &self,
        device: &D,
        image_index: u32,
        data: &UniformFrameData,
    ) -> Result<()> {
        self.write_uniform_bytes(device, image_index, data.as_bytes())
    }

    /// Switch the active pipeline. A mode that was not compiled is logged
    /// and ignored.
    pub fn set_mode(&mut self, mode: RenderMode) -> bool {
        let compiled = self
            .resource
            .as_ref()
            .is_some_and(|r| r.pipeline(mode).is_some());
        if compiled {
            self.mode = mode;
        } else {
            warn!("Render mode {mode} was not compiled, keeping {}", self.mode);
        }
        compiled
    }

    pub const fn mode(&self) -> RenderMode {
        self.mode
    }

    /// Bind the active pipeline and the descriptor set of `image_index`.
    /// Must be recorded inside the render pass of the current surface.
    pub fn record_bind(&self, device: &D, command_buffer: vk::CommandBuffer, image_index: u32) {
        let Some(resource) = &self.resource else {
            return;
        };
        if let Some(pipeline) = resource.pipeline(self.mode) {
            device.record(command_buffer, Command::BindPipeline(pipeline));
        }
        if let Some(&set) = resource.sets.get(image_index as usize) {
            device.record(
                command_buffer,
                Command::BindDescriptorSet {
                    layout: self.pipeline_layout,
                    set,
                },
            );
        }
    }

    /// Record a push constant update for the vertex and fragment stages.
    ///
    /// `data` must be a non-empty multiple of four bytes that fits the
    /// declared block.
    pub fn record_push_constants(
        &self,
        device: &D,
        command_buffer: vk::CommandBuffer,
        data: &[u8],
    ) -> Result<()> {
        if data.is_empty()
            || data.len() % 4 != 0
            || data.len() > self.desc.push_constant_size as usize
        {
            return Err(GpuError::InvalidState(format!(
                "{} bytes of push constants for a {}-byte block",
                data.len(),
                self.desc.push_constant_size
            )));
        }
        device.record(
            command_buffer,
            Command::PushConstants {
                layout: self.pipeline_layout,
                stages: PipelineDesc::push_stages(),
                data,
            },
        );
        Ok(())
    }

    pub const fn resource(&self) -> Option<&PipelineResource<D>> {
        self.resource.as_ref()
    }

    pub const fn texture(&self) -> Option<&Texture<D>> {
        self.texture.as_ref()
    }

    pub const fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    pub const fn set_layout(&self) -> Option<vk::DescriptorSetLayout> {
        self.set_layout
    }

    pub const fn desc(&self) -> &PipelineDesc {
        &self.desc
    }

    /// Release every object in reverse creation order. The device must be
    /// idle.
    pub fn destroy(mut self, device: &D) {
        self.release(device);
        if let Some(texture) = self.texture.take() {
            texture.destroy(device);
        }
        if let Some(sampler) = self.sampler.take() {
            device.destroy_sampler(sampler);
        }
        if self.pipeline_layout != vk::PipelineLayout::null() {
            device.destroy_pipeline_layout(self.pipeline_layout);
        }
        if let Some(set_layout) = self.set_layout.take() {
            device.destroy_descriptor_set_layout(set_layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_follows_binary_contract() {
        let layout = DescriptorLayoutDesc::default();
        let builder = layout.builder();
        let bindings = builder.bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(
            bindings[0].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert_eq!(bindings[1].binding, 1);
        assert_eq!(bindings[1].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(layout.uniform_size, 192);
    }

    #[test]
    fn conflicting_bindings_are_rejected() {
        let layout = DescriptorLayoutDesc {
            uniform_binding: Some(0),
            ..DescriptorLayoutDesc::default()
        };
        assert!(layout.validate().is_err());
    }

    #[test]
    fn wireframe_config_uses_line_mode() {
        let desc = PipelineDesc::new(vec![1], vec![2])
            .with_modes(&RenderMode::ALL)
            .with_cull_mode(vk::CullModeFlags::NONE);
        assert_eq!(
            desc.config(RenderMode::Wireframe).polygon_mode,
            vk::PolygonMode::LINE
        );
        assert_eq!(desc.config(RenderMode::Fill).polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(desc.config(RenderMode::Fill).cull_mode, vk::CullModeFlags::NONE);
    }
}
