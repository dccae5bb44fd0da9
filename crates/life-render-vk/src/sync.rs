// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use ash::vk;
use life_render::FRAMES_IN_FLIGHT;

/// Per-slot sync. Distinct from swapchain images.
pub struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub render_complete: vk::Semaphore,
    pub in_flight: vk::Fence,
}

pub struct FrameSlots {
    slots: Vec<FrameSlot>,
}

impl FrameSlots {
    /// Fences start signalled so the first wait on every slot returns at once.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        let sem_ci = vk::SemaphoreCreateInfo::default();
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        let mut slots = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for _ in 0..FRAMES_IN_FLIGHT {
            unsafe {
                slots.push(FrameSlot {
                    image_available: device.create_semaphore(&sem_ci, None)?,
                    render_complete: device.create_semaphore(&sem_ci, None)?,
                    in_flight: device.create_fence(&fence_ci, None)?,
                });
            }
        }
        Ok(Self { slots })
    }

    pub fn get(&self, slot: usize) -> &FrameSlot {
        &self.slots[slot]
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for s in self.slots.drain(..) {
            unsafe {
                device.destroy_fence(s.in_flight, None);
                device.destroy_semaphore(s.render_complete, None);
                device.destroy_semaphore(s.image_available, None);
            }
        }
    }
}
