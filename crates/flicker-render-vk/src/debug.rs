// SPDX-License-Identifier: CEPL-1.0
use std::ffi::CStr;

use ash::ext::debug_utils;
use ash::vk;

use crate::error::{GfxError, VkResultExt};

pub(crate) const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // valid for the duration of the call
    let msg = {
        let p = (*data).p_message;
        if p.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr(p).to_string_lossy()
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!("[vulkan {:?}] {}", types, msg);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!("[vulkan {:?}] {}", types, msg);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        tracing::debug!("[vulkan {:?}] {}", types, msg);
    } else {
        tracing::trace!("[vulkan {:?}] {}", types, msg);
    }
    vk::FALSE
}

/// Instance-scoped messenger; only created when validation is on.
pub(crate) struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub(crate) unsafe fn create(
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<Self, GfxError> {
        let loader = debug_utils::Instance::new(entry, instance);
        let ci = vk::DebugUtilsMessengerCreateInfoEXT {
            s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
            message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            pfn_user_callback: Some(debug_callback),
            ..Default::default()
        };
        let handle = loader
            .create_debug_utils_messenger(&ci, None)
            .call("create_debug_utils_messenger")?;
        Ok(Self { loader, handle })
    }

    /// Must run before the instance is destroyed.
    pub(crate) unsafe fn destroy(&mut self) {
        if self.handle != vk::DebugUtilsMessengerEXT::null() {
            self.loader.destroy_debug_utils_messenger(self.handle, None);
            self.handle = vk::DebugUtilsMessengerEXT::null();
        }
    }
}
