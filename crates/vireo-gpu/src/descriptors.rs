//! Descriptor set management.

use crate::device::{DescriptorBinding, DescriptorWrite};
use crate::error::Result;
use ash::vk;

/// Descriptor set layout builder.
#[derive(Debug, Clone, Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding.
    #[must_use]
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(DescriptorBinding {
            binding,
            descriptor_type,
            stages,
        });
        self
    }

    /// Add a uniform buffer binding.
    #[must_use]
    pub fn uniform_buffer(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::UNIFORM_BUFFER, stages)
    }

    /// Add a combined image sampler binding.
    #[must_use]
    pub fn combined_image_sampler(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, stages)
    }

    /// The declared bindings.
    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }

    /// Pool sizes needed for `sets` sets of this layout.
    pub fn pool_sizes(&self, sets: u32) -> Vec<vk::DescriptorPoolSize> {
        let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
        for binding in &self.bindings {
            match sizes.iter_mut().find(|s| s.ty == binding.descriptor_type) {
                Some(size) => size.descriptor_count += sets,
                None => sizes.push(vk::DescriptorPoolSize {
                    ty: binding.descriptor_type,
                    descriptor_count: sets,
                }),
            }
        }
        sizes
    }

    /// Build the descriptor set layout.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn build(&self, device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
        // SAFETY: device is valid per the caller's contract.
        unsafe { create_descriptor_set_layout(device, &self.bindings) }
    }
}

/// Create a descriptor set layout with one descriptor per binding.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_descriptor_set_layout(
    device: &ash::Device,
    bindings: &[DescriptorBinding],
) -> Result<vk::DescriptorSetLayout> {
    let bindings: Vec<_> = bindings
        .iter()
        .map(|b| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(b.binding)
                .descriptor_type(b.descriptor_type)
                .descriptor_count(1)
                .stage_flags(b.stages)
        })
        .collect();
    let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);

    // SAFETY: device is valid per the caller's contract.
    let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None)? };
    Ok(layout)
}

/// Descriptor pool for allocating descriptor sets.
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Create a new descriptor pool.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        // SAFETY: device is valid per the caller's contract.
        let pool = unsafe { device.create_descriptor_pool(&create_info, None)? };
        Ok(Self { pool })
    }

    /// Wrap an existing pool handle.
    pub const fn from_raw(pool: vk::DescriptorPool) -> Self {
        Self { pool }
    }

    /// Get the raw pool handle.
    pub const fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Allocate descriptor sets.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate(
        &self,
        device: &ash::Device,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        // SAFETY: handles are valid per the caller's contract.
        let sets = unsafe { device.allocate_descriptor_sets(&alloc_info)? };
        Ok(sets)
    }

    /// Destroy the pool, implicitly freeing its sets.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        // SAFETY: handles are valid per the caller's contract.
        unsafe { device.destroy_descriptor_pool(self.pool, None) };
    }
}

/// Apply descriptor writes to one set.
///
/// # Safety
/// Device, set and every referenced resource must be valid.
pub unsafe fn write_descriptor_set(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    writes: &[DescriptorWrite],
) {
    let buffer_infos: Vec<_> = writes
        .iter()
        .map(|w| match *w {
            DescriptorWrite::UniformBuffer { buffer, range, .. } => {
                vk::DescriptorBufferInfo::default()
                    .buffer(buffer)
                    .offset(0)
                    .range(range)
            }
            DescriptorWrite::CombinedImageSampler { .. } => vk::DescriptorBufferInfo::default(),
        })
        .collect();
    let image_infos: Vec<_> = writes
        .iter()
        .map(|w| match *w {
            DescriptorWrite::CombinedImageSampler { view, sampler, .. } => {
                vk::DescriptorImageInfo::default()
                    .image_view(view)
                    .sampler(sampler)
                    .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            }
            DescriptorWrite::UniformBuffer { .. } => vk::DescriptorImageInfo::default(),
        })
        .collect();

    let vk_writes: Vec<_> = writes
        .iter()
        .enumerate()
        .map(|(i, w)| {
            let write = vk::WriteDescriptorSet::default().dst_set(dst_set);
            match *w {
                DescriptorWrite::UniformBuffer { binding, .. } => write
                    .dst_binding(binding)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(std::slice::from_ref(&buffer_infos[i])),
                DescriptorWrite::CombinedImageSampler { binding, .. } => write
                    .dst_binding(binding)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(std::slice::from_ref(&image_infos[i])),
            }
        })
        .collect();

    // SAFETY: handles are valid per the caller's contract.
    unsafe { device.update_descriptor_sets(&vk_writes, &[]) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_sizes_merge_types() {
        let builder = DescriptorSetLayoutBuilder::new()
            .combined_image_sampler(0, vk::ShaderStageFlags::FRAGMENT)
            .uniform_buffer(1, vk::ShaderStageFlags::VERTEX)
            .uniform_buffer(2, vk::ShaderStageFlags::FRAGMENT);

        let sizes = builder.pool_sizes(3);
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(sizes[0].descriptor_count, 3);
        assert_eq!(sizes[1].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[1].descriptor_count, 6);
    }
}
