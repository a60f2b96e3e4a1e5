// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GfxError {
    #[error("{call} failed: {result}")]
    Vk {
        call: &'static str,
        result: vk::Result,
    },

    /// Host or device memory ran out. The caller may free something and retry.
    #[error("{call} ran out of memory: {result}")]
    OutOfMemory {
        call: &'static str,
        result: vk::Result,
    },

    #[error("no physical device has a graphics queue family that can present to the surface")]
    NoSuitableDevice,

    #[error("instance layer {0} is not installed")]
    MissingLayer(String),

    #[error("device feature {0} is not supported")]
    MissingFeature(&'static str),

    #[error("no memory type matches type bits {type_bits:#034b} with {required:?}")]
    NoCompatibleMemory {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("surface reported no formats")]
    NoSurfaceFormats,

    #[error("window handle unavailable: {0}")]
    Window(#[from] raw_window_handle::HandleError),

    #[error("shader {path}: {source}")]
    Shader {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The surface currently has a zero extent, so no swapchain exists.
    #[error("no swapchain: surface extent is zero")]
    NoSwapchain,

    #[error("write of {len} bytes overflows {size}-byte resource")]
    ResourceOverflow { len: usize, size: vk::DeviceSize },
}

impl GfxError {
    pub(crate) fn from_vk(call: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                GfxError::OutOfMemory { call, result }
            }
            _ => GfxError::Vk { call, result },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, GfxError::OutOfMemory { .. })
    }
}

/// Tags a raw `VkResult` with the name of the call that produced it.
pub(crate) trait VkResultExt<T> {
    fn call(self, name: &'static str) -> Result<T, GfxError>;
}

impl<T> VkResultExt<T> for ash::prelude::VkResult<T> {
    fn call(self, name: &'static str) -> Result<T, GfxError> {
        self.map_err(|r| GfxError::from_vk(name, r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_exhaustion_is_retryable() {
        let oom: ash::prelude::VkResult<()> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let err = oom.call("allocate_memory").unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, GfxError::OutOfMemory { call: "allocate_memory", .. }));

        let host: ash::prelude::VkResult<()> = Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        assert!(host.call("create_buffer").unwrap_err().is_retryable());
    }

    #[test]
    fn other_failures_are_fatal() {
        let lost: ash::prelude::VkResult<u32> = Err(vk::Result::ERROR_DEVICE_LOST);
        let err = lost.call("queue_submit").unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().starts_with("queue_submit failed"));
        assert!(!GfxError::NoSuitableDevice.is_retryable());
    }
}
