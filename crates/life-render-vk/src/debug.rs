// SPDX-License-Identifier: CEPL-1.0
//! Validation-layer messages, routed into `tracing`.

use anyhow::Result;
use ash::ext::debug_utils;
use ash::{vk, Entry, Instance};
use std::ffi::CStr;
use tracing::{error, info, trace, warn};

pub struct DebugMessenger {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub unsafe fn new(entry: &Entry, instance: &Instance) -> Result<Self> {
        let loader = debug_utils::Instance::new(entry, instance);
        let ci = messenger_info();
        let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None)? };
        Ok(Self { loader, messenger })
    }

    /// Must run before the instance is destroyed.
    pub unsafe fn destroy(&mut self) {
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None)
        };
        self.messenger = vk::DebugUtilsMessengerEXT::null();
    }
}

pub fn messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        // Everything; EnvFilter decides what is printed.
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    }
}

/// Most specific category first.
pub fn category(types: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if types.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation"
    } else if types.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else {
        "general"
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    let p_message = unsafe { (*data).p_message };
    if p_message.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr(p_message) }.to_string_lossy();
    let cat = category(types);

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan/{cat}] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan/{cat}] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        info!("[vulkan/{cat}] {msg}");
    } else {
        trace!("[vulkan/{cat}] {msg}");
    }
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_wins_over_general() {
        let t = vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION;
        assert_eq!(category(t), "validation");
        assert_eq!(
            category(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE),
            "performance"
        );
        assert_eq!(category(vk::DebugUtilsMessageTypeFlagsEXT::GENERAL), "general");
    }

    #[test]
    fn messenger_listens_to_every_severity() {
        let ci = messenger_info();
        assert!(ci
            .message_severity
            .contains(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE));
        assert!(ci
            .message_severity
            .contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO));
        assert!(ci
            .message_severity
            .contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING));
        assert!(ci
            .message_severity
            .contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR));
        assert!(ci.pfn_user_callback.is_some());
    }
}
