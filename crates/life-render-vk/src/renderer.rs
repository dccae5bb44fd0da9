// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::khr::swapchain;
use ash::vk;
use life_render::schema::CameraUniform;
use life_render::{AcquireOutcome, FrameDevice, GridSeed, PresentOutcome, RenderSize};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::arena::MemoryArena;
use crate::commands::{self, CommandPools, DrawTargets};
use crate::descriptors::{self, DescriptorState};
use crate::device::AcceleratorContext;
use crate::instance::InstanceContext;
use crate::pipeline::{self, ShaderCode};
use crate::swapchain::{image_count, SwapchainState};
use crate::sync::FrameSlots;

pub struct RendererSettings {
    pub grid: GridSeed,
    pub size: RenderSize,
    pub clear_color: [f32; 4],
    pub validation: bool,
    pub shader_dir: PathBuf,
    /// Written into every camera buffer before the first frame.
    pub camera: CameraUniform,
}

/// Everything rebuilt with the swapchain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainRole {
    CommandBuffers,
    Framebuffers,
    Pipeline,
    PipelineLayout,
    RenderPass,
    CameraBuffers,
    DescriptorPool,
    ImageViews,
    Swapchain,
}

/// Dependents strictly before what they were created from.
pub const TEARDOWN_ORDER: [ChainRole; 9] = [
    ChainRole::CommandBuffers,
    ChainRole::Framebuffers,
    ChainRole::Pipeline,
    ChainRole::PipelineLayout,
    ChainRole::RenderPass,
    ChainRole::CameraBuffers,
    ChainRole::DescriptorPool,
    ChainRole::ImageViews,
    ChainRole::Swapchain,
];

impl ChainRole {
    /// Chain objects this one refers to. Descriptor sets only point at camera
    /// buffers, so the pool may outlive them as long as nothing is submitted.
    pub fn depends_on(self) -> &'static [ChainRole] {
        use ChainRole::*;
        match self {
            CommandBuffers => &[Framebuffers, Pipeline, PipelineLayout, RenderPass, DescriptorPool],
            Framebuffers => &[RenderPass, ImageViews],
            Pipeline => &[PipelineLayout, RenderPass],
            PipelineLayout => &[],
            RenderPass => &[Swapchain],
            CameraBuffers => &[Swapchain],
            DescriptorPool => &[Swapchain],
            ImageViews => &[Swapchain],
            Swapchain => &[],
        }
    }
}

/// Handles start null and are filled in creation order, so a chain that
/// failed halfway tears down like a complete one.
struct SwapchainResources {
    swapchain: SwapchainState,
    descriptors: Option<DescriptorState>,
    render_pass: vk::RenderPass,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    framebuffers: Vec<vk::Framebuffer>,
    command_buffers: Vec<vk::CommandBuffer>,
}

impl SwapchainResources {
    fn new(swapchain: SwapchainState) -> Self {
        Self {
            swapchain,
            descriptors: None,
            render_pass: vk::RenderPass::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            framebuffers: Vec::new(),
            command_buffers: Vec::new(),
        }
    }
}

/// Vulkan side of the viewer.
///
/// Lifetime tiers, longest first: instance + surface, device, then
/// renderer-wide objects (set layout, pools, arena, frame slots), then the
/// swapchain chain which is torn down and rebuilt on every resize.
pub struct VkRenderer {
    inst: InstanceContext,
    ctx: AcceleratorContext,
    swapchain_loader: swapchain::Device,
    set_layout: vk::DescriptorSetLayout,
    pools: CommandPools,
    arena: MemoryArena,
    slots: FrameSlots,
    shaders: ShaderCode,
    grid: GridSeed,
    clear: vk::ClearValue,
    last_camera: CameraUniform,
    chain: Option<SwapchainResources>,
}

impl VkRenderer {
    // STRICT ORDER:
    // 1) instance, debug messenger, surface
    // 2) physical device + queues (present support is checked against the surface)
    // 3) shaders, set layout, command pools, arena, frame slots
    // 4) swapchain chain
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        settings: &RendererSettings,
    ) -> Result<Self> {
        unsafe {
            let inst = InstanceContext::new(window, display, settings.validation)?;
            let ctx = AcceleratorContext::new(&inst.instance, &inst.surface_loader, inst.surface)?;
            let swapchain_loader = swapchain::Device::new(&inst.instance, ctx.device());

            let shaders = ShaderCode::load(&settings.shader_dir)?;
            let set_layout = descriptors::create_camera_set_layout(ctx.device())?;
            let pools = CommandPools::new(ctx.device(), &ctx.families())?;

            let caps = inst
                .surface_loader
                .get_physical_device_surface_capabilities(ctx.phys(), inst.surface)
                .context("get_physical_device_surface_capabilities")?;
            let camera_count = image_count(&caps) as usize;
            let arena = MemoryArena::new(&ctx, &inst.instance, &settings.grid, camera_count, &settings.camera)?;
            let slots = FrameSlots::new(ctx.device())?;

            info!(
                "renderer on '{}': {} cells, arena {} bytes, compute queue family {}",
                ctx.name(),
                arena.instance_count(),
                arena.size(),
                ctx.compute().family
            );

            let [r, g, b, a] = settings.clear_color;
            let mut renderer = Self {
                inst,
                ctx,
                swapchain_loader,
                set_layout,
                pools,
                arena,
                slots,
                shaders,
                grid: settings.grid,
                clear: vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: [r, g, b, a],
                    },
                },
                last_camera: settings.camera,
                chain: None,
            };
            renderer.build_chain(settings.size)?;
            Ok(renderer)
        }
    }

    pub fn device_name(&self) -> &str {
        self.ctx.name()
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.chain.as_ref().map(|c| c.swapchain.extent)
    }

    unsafe fn build_chain(&mut self, size: RenderSize) -> Result<()> {
        debug_assert!(self.chain.is_none(), "previous chain not torn down");
        let swapchain = unsafe {
            SwapchainState::new(
                &self.ctx,
                &self.inst.surface_loader,
                &self.swapchain_loader,
                self.inst.surface,
                size,
            )?
        };
        let mut res = SwapchainResources::new(swapchain);
        let result = unsafe { self.fill_chain(&mut res) };
        self.chain = Some(res);
        result
    }

    // STRICT ORDER (creation):
    // descriptor pool -> camera buffers -> sets -> render pass -> layout + pipeline
    // -> framebuffers -> command buffers (recorded here, replayed every frame)
    unsafe fn fill_chain(&mut self, res: &mut SwapchainResources) -> Result<()> {
        let count = res.swapchain.image_count();

        res.descriptors = Some(unsafe { DescriptorState::new(self.ctx.device(), count)? });

        let fits = unsafe { self.arena.ensure_cameras(&self.ctx, count, &self.last_camera)? };
        if !fits {
            info!("arena: regrowing for {count} camera buffers");
            unsafe {
                self.arena.destroy(self.ctx.device());
                self.arena = MemoryArena::new(
                    &self.ctx,
                    &self.inst.instance,
                    &self.grid,
                    count,
                    &self.last_camera,
                )?;
            }
        }

        let device = self.ctx.device();
        let camera_buffers = self.arena.camera_buffers();
        let Some(descriptors) = res.descriptors.as_mut() else {
            return Err(anyhow!("descriptor pool missing"));
        };
        unsafe { descriptors.allocate_sets(device, self.set_layout, &camera_buffers)? };

        res.render_pass = unsafe { pipeline::create_render_pass(device, res.swapchain.format.format)? };
        let (layout, pipe) = unsafe {
            pipeline::create_pipeline(
                device,
                &self.shaders,
                res.render_pass,
                self.set_layout,
                self.grid.size,
            )?
        };
        res.pipeline_layout = layout;
        res.pipeline = pipe;

        res.framebuffers = unsafe {
            pipeline::create_framebuffers(
                device,
                res.render_pass,
                &res.swapchain.views,
                res.swapchain.extent,
            )?
        };

        res.command_buffers = unsafe { commands::allocate(device, self.pools.graphics, count)? };
        let targets = DrawTargets {
            render_pass: res.render_pass,
            pipeline: res.pipeline,
            layout: res.pipeline_layout,
            extent: res.swapchain.extent,
            framebuffers: &res.framebuffers,
            sets: &descriptors.sets,
            vertex_buffer: self.arena.vertex_buffer(),
            cell_buffer: self.arena.front_cells(),
            instances: self.arena.instance_count(),
            clear: self.clear,
        };
        unsafe { commands::record_draws(device, &res.command_buffers, &targets)? };

        debug!("swapchain chain built for {count} images");
        Ok(())
    }

    /// No-op without a chain. The device must be idle.
    unsafe fn teardown_chain(&mut self) {
        let Some(mut res) = self.chain.take() else {
            return;
        };
        let device = self.ctx.device();
        for role in TEARDOWN_ORDER {
            unsafe {
                match role {
                    ChainRole::CommandBuffers => {
                        if !res.command_buffers.is_empty() {
                            device.free_command_buffers(self.pools.graphics, &res.command_buffers);
                            res.command_buffers.clear();
                        }
                    }
                    ChainRole::Framebuffers => {
                        for fb in res.framebuffers.drain(..) {
                            device.destroy_framebuffer(fb, None);
                        }
                    }
                    ChainRole::Pipeline => device.destroy_pipeline(res.pipeline, None),
                    ChainRole::PipelineLayout => device.destroy_pipeline_layout(res.pipeline_layout, None),
                    ChainRole::RenderPass => device.destroy_render_pass(res.render_pass, None),
                    ChainRole::CameraBuffers => self.arena.destroy_cameras(device),
                    ChainRole::DescriptorPool => {
                        if let Some(mut d) = res.descriptors.take() {
                            d.destroy(device);
                        }
                    }
                    ChainRole::ImageViews => res.swapchain.destroy_views(device),
                    ChainRole::Swapchain => res.swapchain.destroy_swapchain(&self.swapchain_loader),
                }
            }
        }
        debug!("swapchain chain torn down");
    }
}

impl FrameDevice for VkRenderer {
    fn image_count(&self) -> usize {
        self.chain.as_ref().map_or(0, |c| c.swapchain.image_count())
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        let fence = self.slots.get(slot).in_flight;
        unsafe { self.ctx.device().wait_for_fences(&[fence], true, u64::MAX) }.context("wait_for_fences")
    }

    fn acquire(&mut self, slot: usize) -> AcquireOutcome {
        let Some(res) = self.chain.as_ref() else {
            return AcquireOutcome::Failed(anyhow!("no swapchain"));
        };
        let semaphore = self.slots.get(slot).image_available;
        let acquired = unsafe {
            self.swapchain_loader.acquire_next_image(
                res.swapchain.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((image, suboptimal)) => {
                if suboptimal {
                    debug!("acquire: suboptimal image {image}");
                }
                AcquireOutcome::Acquired(image)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => AcquireOutcome::OutOfDate,
            Err(e) => AcquireOutcome::Failed(anyhow!("acquire_next_image: {e:?}")),
        }
    }

    fn upload_camera(&mut self, image: u32, camera: &CameraUniform) -> Result<()> {
        self.last_camera = *camera;
        unsafe { self.arena.write_camera(self.ctx.device(), image as usize, camera) }
    }

    fn submit(&mut self, slot: usize, image: u32) -> Result<()> {
        let res = self.chain.as_ref().context("no swapchain")?;
        let cmd = *res
            .command_buffers
            .get(image as usize)
            .with_context(|| format!("no command buffer for image {image}"))?;
        let sync = self.slots.get(slot);
        let device = self.ctx.device();

        let wait_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &sync.image_available,
            p_wait_dst_stage_mask: &wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &sync.render_complete,
            ..Default::default()
        };
        unsafe {
            device.reset_fences(&[sync.in_flight]).context("reset_fences")?;
            device
                .queue_submit(
                    self.ctx.graphics().handle,
                    std::slice::from_ref(&submit),
                    sync.in_flight,
                )
                .context("queue_submit")
        }
    }

    fn present(&mut self, slot: usize, image: u32) -> PresentOutcome {
        let Some(res) = self.chain.as_ref() else {
            return PresentOutcome::Failed(anyhow!("no swapchain"));
        };
        let sync = self.slots.get(slot);
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &sync.render_complete,
            swapchain_count: 1,
            p_swapchains: &res.swapchain.swapchain,
            p_image_indices: &image,
            ..Default::default()
        };
        match unsafe { self.swapchain_loader.queue_present(self.ctx.present().handle, &present) } {
            Ok(false) => PresentOutcome::Presented,
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => PresentOutcome::Stale,
            Err(e) => PresentOutcome::Failed(anyhow!("queue_present: {e:?}")),
        }
    }

    fn rebuild(&mut self, size: RenderSize) -> Result<()> {
        unsafe {
            self.ctx.device().device_wait_idle().context("device_wait_idle")?;
            self.teardown_chain();
            self.build_chain(size)?;
        }
        if let Some(e) = self.extent() {
            info!("swapchain rebuilt at {}x{}", e.width, e.height);
        }
        Ok(())
    }

    fn wait_idle(&mut self) {
        if let Err(e) = unsafe { self.ctx.device().device_wait_idle() } {
            warn!("device_wait_idle: {e:?}");
        }
    }
}

impl Drop for VkRenderer {
    // STRICT ORDER: chain, then renderer-wide objects, then device, then instance.
    fn drop(&mut self) {
        unsafe {
            self.wait_idle();
            self.teardown_chain();
            let device = self.ctx.device();
            self.slots.destroy(device);
            self.pools.destroy(device);
            self.arena.destroy(device);
            device.destroy_descriptor_set_layout(self.set_layout, None);
            self.ctx.destroy();
            self.inst.destroy();
        }
        info!("renderer shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(role: ChainRole) -> usize {
        TEARDOWN_ORDER.iter().position(|&r| r == role).unwrap()
    }

    #[test]
    fn every_role_torn_down_once() {
        for role in TEARDOWN_ORDER {
            assert_eq!(TEARDOWN_ORDER.iter().filter(|&&r| r == role).count(), 1);
        }
    }

    #[test]
    fn dependents_go_before_their_dependencies() {
        for role in TEARDOWN_ORDER {
            for &dep in role.depends_on() {
                assert!(
                    position(role) < position(dep),
                    "{role:?} must be destroyed before {dep:?}"
                );
            }
        }
    }

    #[test]
    fn command_buffers_first_swapchain_last() {
        assert_eq!(TEARDOWN_ORDER[0], ChainRole::CommandBuffers);
        assert_eq!(TEARDOWN_ORDER[8], ChainRole::Swapchain);
        assert!(position(ChainRole::CameraBuffers) < position(ChainRole::DescriptorPool));
        assert!(position(ChainRole::DescriptorPool) < position(ChainRole::ImageViews));
    }
}
