// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::khr::{surface, swapchain};
use ash::vk;
use life_render::RenderSize;
use tracing::info;

use crate::device::{AcceleratorContext, QueueFamilies};

/// One more than the driver minimum, capped by the maximum (0 = unlimited).
pub fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

/// `None` means exclusive: graphics and present share a family.
/// Otherwise the image is concurrently shared between the two families.
pub fn sharing_families(families: &QueueFamilies) -> Option<[u32; 2]> {
    if families.graphics == families.present {
        None
    } else {
        Some([families.graphics, families.present])
    }
}

pub fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// Everything the create info derives from what the surface reports.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainParams {
    pub image_count: u32,
    pub format: vk::SurfaceFormatKHR,
    pub sharing: Option<[u32; 2]>,
    pub extent: vk::Extent2D,
}

/// Same surface answers, same parameters: a rebuild reproduces the chain it replaces.
pub fn swapchain_params(
    caps: &vk::SurfaceCapabilitiesKHR,
    formats: &[vk::SurfaceFormatKHR],
    families: &QueueFamilies,
    size: RenderSize,
) -> Result<SwapchainParams> {
    // First reported format; no ranking.
    let format = *formats
        .first()
        .ok_or_else(|| anyhow!("surface reports no formats"))?;
    Ok(SwapchainParams {
        image_count: image_count(caps),
        format,
        sharing: sharing_families(families),
        extent: extent_from_caps(caps, size),
    })
}

/// Presentable images and one view per image.
pub struct SwapchainState {
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
}

impl SwapchainState {
    pub unsafe fn new(
        ctx: &AcceleratorContext,
        surface_loader: &surface::Instance,
        swapchain_loader: &swapchain::Device,
        surface: vk::SurfaceKHR,
        size: RenderSize,
    ) -> Result<Self> {
        let phys = ctx.phys();
        let caps = unsafe { surface_loader.get_physical_device_surface_capabilities(phys, surface) }
            .context("get_physical_device_surface_capabilities")?;
        let formats = unsafe { surface_loader.get_physical_device_surface_formats(phys, surface) }
            .context("get_physical_device_surface_formats")?;
        let params = swapchain_params(&caps, &formats, &ctx.families(), size)?;
        let (format, extent) = (params.format, params.extent);

        let (sharing_mode, family_count, family_ptr) = match &params.sharing {
            Some(f) => (vk::SharingMode::CONCURRENT, f.len() as u32, f.as_ptr()),
            None => (vk::SharingMode::EXCLUSIVE, 0, std::ptr::null()),
        };

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface,
            min_image_count: params.image_count,
            image_format: format.format,
            image_color_space: format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: family_count,
            p_queue_family_indices: family_ptr,
            pre_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: vk::PresentModeKHR::FIFO,
            clipped: vk::TRUE,
            old_swapchain: vk::SwapchainKHR::null(),
            ..Default::default()
        };

        let swapchain = unsafe { swapchain_loader.create_swapchain(&swap_info, None) }
            .context("create_swapchain")?;
        let mut state = Self {
            swapchain,
            format,
            extent,
            images: Vec::new(),
            views: Vec::new(),
        };
        if let Err(e) = unsafe { state.fill(ctx.device(), swapchain_loader) } {
            unsafe {
                state.destroy_views(ctx.device());
                state.destroy_swapchain(swapchain_loader);
            }
            return Err(e);
        }

        info!(
            "swapchain ready ({}x{}, fmt {:?}, {} images, {:?})",
            extent.width,
            extent.height,
            format.format,
            state.images.len(),
            sharing_mode
        );
        Ok(state)
    }

    /// Views that were created before a failure stay in `views` for cleanup.
    unsafe fn fill(&mut self, device: &ash::Device, loader: &swapchain::Device) -> Result<()> {
        self.images = unsafe { loader.get_swapchain_images(self.swapchain) }
            .context("get_swapchain_images")?;
        self.views.reserve(self.images.len());
        for &img in &self.images {
            self.views.push(unsafe { create_image_view(device, img, self.format.format)? });
        }
        Ok(())
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Views are created from swapchain images; they go first.
    pub unsafe fn destroy_views(&mut self, device: &ash::Device) {
        for iv in self.views.drain(..) {
            unsafe { device.destroy_image_view(iv, None) };
        }
    }

    pub unsafe fn destroy_swapchain(&mut self, loader: &swapchain::Device) {
        debug_assert!(self.views.is_empty(), "image views outlive their swapchain");
        unsafe { loader.destroy_swapchain(self.swapchain, None) };
        self.swapchain = vk::SwapchainKHR::null();
        self.images.clear();
    }
}

unsafe fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
) -> Result<vk::ImageView> {
    let sub = vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    };
    let iv_info = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: sub,
        ..Default::default()
    };
    unsafe { device.create_image_view(&iv_info, None) }.context("create_image_view")
}
