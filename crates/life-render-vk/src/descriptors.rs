// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::vk;
use life_render::schema::CAMERA_UNIFORM_SIZE;

/// Set 0, binding 0: the camera uniform, read by the vertex stage.
/// Swapchain-agnostic; lives as long as the renderer.
pub unsafe fn create_camera_set_layout(device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
    let binding = vk::DescriptorSetLayoutBinding {
        binding: 0,
        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: 1,
        stage_flags: vk::ShaderStageFlags::VERTEX,
        ..Default::default()
    };
    let ci = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: 1,
        p_bindings: &binding,
        ..Default::default()
    };
    unsafe { device.create_descriptor_set_layout(&ci, None) }.context("create_descriptor_set_layout")
}

pub fn pool_sizes(image_count: usize) -> [vk::DescriptorPoolSize; 1] {
    [vk::DescriptorPoolSize {
        ty: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: image_count as u32,
    }]
}

/// Pool sized to the swapchain, one set per image. Rebuilt with the swapchain.
pub struct DescriptorState {
    pub pool: vk::DescriptorPool,
    pub sets: Vec<vk::DescriptorSet>,
    image_count: usize,
}

impl DescriptorState {
    pub unsafe fn new(device: &ash::Device, image_count: usize) -> Result<Self> {
        let sizes = pool_sizes(image_count);
        let pool_ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: image_count as u32,
            pool_size_count: sizes.len() as u32,
            p_pool_sizes: sizes.as_ptr(),
            ..Default::default()
        };
        let pool = unsafe { device.create_descriptor_pool(&pool_ci, None) }
            .context("create_descriptor_pool")?;
        Ok(Self {
            pool,
            sets: Vec::new(),
            image_count,
        })
    }

    /// Set `i` points at `camera_buffers[i]`, whole record.
    pub unsafe fn allocate_sets(
        &mut self,
        device: &ash::Device,
        layout: vk::DescriptorSetLayout,
        camera_buffers: &[vk::Buffer],
    ) -> Result<()> {
        debug_assert_eq!(camera_buffers.len(), self.image_count);
        let layouts = vec![layout; self.image_count];
        let alloc = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.pool,
            descriptor_set_count: layouts.len() as u32,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        self.sets = unsafe { device.allocate_descriptor_sets(&alloc) }
            .context("allocate_descriptor_sets")?;

        let infos: Vec<vk::DescriptorBufferInfo> = camera_buffers
            .iter()
            .map(|&buffer| vk::DescriptorBufferInfo {
                buffer,
                offset: 0,
                range: CAMERA_UNIFORM_SIZE,
            })
            .collect();
        let writes: Vec<vk::WriteDescriptorSet> = self
            .sets
            .iter()
            .zip(&infos)
            .map(|(&set, info)| vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: set,
                dst_binding: 0,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                p_buffer_info: info,
                ..Default::default()
            })
            .collect();
        unsafe { device.update_descriptor_sets(&writes, &[]) };
        Ok(())
    }

    /// Frees the sets along with the pool.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe { device.destroy_descriptor_pool(self.pool, None) };
        self.pool = vk::DescriptorPool::null();
        self.sets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_holds_one_uniform_per_image() {
        let [size] = pool_sizes(3);
        assert_eq!(size.ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(size.descriptor_count, 3);
    }
}
