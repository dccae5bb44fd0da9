// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::vk;
use tracing::debug;

use crate::device::QueueFamilies;

/// The graphics pool always exists. A separate compute pool is only created
/// when compute lives on its own family; otherwise graphics covers both.
pub struct CommandPools {
    pub graphics: vk::CommandPool,
    pub compute: Option<vk::CommandPool>,
}

pub fn needs_compute_pool(families: &QueueFamilies) -> bool {
    families.compute != families.graphics
}

impl CommandPools {
    pub unsafe fn new(device: &ash::Device, families: &QueueFamilies) -> Result<Self> {
        let graphics = unsafe { create_pool(device, families.graphics) }.context("graphics command pool")?;
        let compute = if needs_compute_pool(families) {
            match unsafe { create_pool(device, families.compute) } {
                Ok(p) => Some(p),
                Err(e) => {
                    unsafe { device.destroy_command_pool(graphics, None) };
                    return Err(e.context("compute command pool"));
                }
            }
        } else {
            None
        };
        debug!(
            "command pools: graphics family {}, compute {}",
            families.graphics,
            if compute.is_some() { "separate" } else { "shared" }
        );
        Ok(Self { graphics, compute })
    }

    /// Each distinct pool is destroyed exactly once.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            if let Some(p) = self.compute.take() {
                device.destroy_command_pool(p, None);
            }
            device.destroy_command_pool(self.graphics, None);
        }
        self.graphics = vk::CommandPool::null();
    }
}

unsafe fn create_pool(device: &ash::Device, family: u32) -> Result<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        queue_family_index: family,
        ..Default::default()
    };
    unsafe { device.create_command_pool(&pool_info, None) }.context("create_command_pool")
}

pub unsafe fn allocate(
    device: &ash::Device,
    pool: vk::CommandPool,
    count: usize,
) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: count as u32,
        ..Default::default()
    };
    unsafe { device.allocate_command_buffers(&alloc_info) }.context("allocate_command_buffers")
}

/// Everything a draw needs, per swapchain image index.
pub struct DrawTargets<'a> {
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub extent: vk::Extent2D,
    pub framebuffers: &'a [vk::Framebuffer],
    pub sets: &'a [vk::DescriptorSet],
    pub vertex_buffer: vk::Buffer,
    pub cell_buffer: vk::Buffer,
    pub instances: u32,
    pub clear: vk::ClearValue,
}

/// Recorded once per swapchain build. Buffer `i` draws into framebuffer `i`
/// with descriptor set `i`: six quad corners, one instance per cell.
pub unsafe fn record_draws(
    device: &ash::Device,
    buffers: &[vk::CommandBuffer],
    t: &DrawTargets<'_>,
) -> Result<()> {
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: t.extent.width as f32,
        height: t.extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: t.extent,
    };

    for (i, &cmd) in buffers.iter().enumerate() {
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            ..Default::default()
        };
        unsafe { device.begin_command_buffer(cmd, &begin) }.context("begin_command_buffer")?;

        let clears = [t.clear];
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: t.render_pass,
            framebuffer: t.framebuffers[i],
            render_area: scissor,
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };

        unsafe {
            device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, t.pipeline);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[scissor]);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                t.layout,
                0,
                &[t.sets[i]],
                &[],
            );
            // binding 0: quad corners, binding 1: cells (per instance)
            device.cmd_bind_vertex_buffers(cmd, 0, &[t.vertex_buffer, t.cell_buffer], &[0, 0]);
            device.cmd_draw(cmd, 6, t.instances, 0, 0);
            device.cmd_end_render_pass(cmd);
        }

        unsafe { device.end_command_buffer(cmd) }.context("end_command_buffer")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_family_needs_no_compute_pool() {
        let f = QueueFamilies {
            graphics: 0,
            present: 1,
            compute: 0,
        };
        assert!(!needs_compute_pool(&f));
    }

    #[test]
    fn dedicated_compute_family_gets_its_own_pool() {
        let f = QueueFamilies {
            graphics: 0,
            present: 0,
            compute: 2,
        };
        assert!(needs_compute_pool(&f));
    }
}
