// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::khr::surface;
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use std::ffi::{c_char, CStr};
use tracing::{info, warn};

use crate::debug::DebugMessenger;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance-scoped objects: loader, instance, optional debug messenger and the window surface.
pub struct InstanceContext {
    pub entry: Entry,
    pub instance: Instance,
    debug: Option<DebugMessenger>,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
}

impl InstanceContext {
    // STRICT ORDER:
    // 1) VkInstance (WSI extensions + optional debug utils)
    // 2) debug messenger
    // 3) VkSurfaceKHR from THIS instance; devices are later queried against it
    pub unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        validation: bool,
    ) -> Result<Self> {
        let dh = display
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();

        let entry = unsafe { Entry::load() }.context("load Vulkan loader")?;
        let validation = validation && unsafe { validation_available(&entry) };
        let instance = unsafe { create_instance(&entry, dh, validation) }.context("create_instance")?;

        let mut debug = None;
        if validation {
            match unsafe { DebugMessenger::new(&entry, &instance) } {
                Ok(d) => debug = Some(d),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e.context("create debug messenger"));
                }
            }
        }

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = match unsafe { ash_window::create_surface(&entry, &instance, dh, wh, None) } {
            Ok(s) => s,
            Err(e) => {
                unsafe {
                    if let Some(mut dbg) = debug.take() {
                        dbg.destroy();
                    }
                    instance.destroy_instance(None);
                }
                return Err(anyhow::Error::from(e).context("ash_window::create_surface"));
            }
        };

        Ok(Self {
            entry,
            instance,
            debug,
            surface_loader,
            surface,
        })
    }

    /// Surface, then messenger, then instance. The device must already be gone.
    pub unsafe fn destroy(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some(mut dbg) = self.debug.take() {
                dbg.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe fn validation_available(entry: &Entry) -> bool {
    let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
    let has_layer = layers
        .iter()
        .any(|l| unsafe { CStr::from_ptr(l.layer_name.as_ptr()) } == VALIDATION_LAYER);
    let exts = unsafe { entry.enumerate_instance_extension_properties(None) }.unwrap_or_default();
    let has_ext = exts.iter().any(|e| {
        (unsafe { CStr::from_ptr(e.extension_name.as_ptr()) }) == ash::ext::debug_utils::NAME
    });
    if !(has_layer && has_ext) {
        warn!("validation requested but VK_LAYER_KHRONOS_validation / VK_EXT_debug_utils missing; continuing without");
    }
    has_layer && has_ext
}

unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    validation: bool,
) -> Result<Instance> {
    let app = c"Game of Life";

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: 0,
        p_engine_name: app.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut ext_vec = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();
    let mut layers: Vec<*const c_char> = Vec::new();
    if validation {
        ext_vec.push(ash::ext::debug_utils::NAME.as_ptr());
        layers.push(VALIDATION_LAYER.as_ptr());
    }

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: ext_vec.len() as u32,
        pp_enabled_extension_names: ext_vec.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    let instance = unsafe { entry.create_instance(&create_info, None)? };
    info!("Vulkan instance ready (validation={validation})");
    Ok(instance)
}
