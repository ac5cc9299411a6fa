// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

/// Everything here is fatal. Swapchain staleness is reported through
/// `SwapchainStatus` instead and never reaches this type.
#[derive(Debug, Error)]
pub enum VkError {
    #[error("no physical device was found that meets requirements")]
    NoCompatibleDevice,

    #[error("no memory type matches type bits {type_bits:#b} with flags {flags:?}")]
    NoMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    #[error("no supported {what} format")]
    NoSupportedFormat { what: &'static str },

    #[error("surface lost")]
    SurfaceLost,

    #[error("device lost ({call})")]
    DeviceLost { call: &'static str },

    #[error("required extension or layer missing: {name}")]
    ExtensionOrLayerMissing { name: String },

    #[error("fatal Vulkan error\nVulkan Call: {call}\nResult: {result:?}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },

    #[error("write of {len} bytes exceeds buffer of {capacity} bytes")]
    OutOfBounds { len: u64, capacity: u64 },

    #[error("shader {}: {reason}", .path.display())]
    Shader { path: PathBuf, reason: String },

    #[error("failed to load the Vulkan library")]
    Loading(#[from] ash::LoadingError),

    #[error("window handle unavailable: {0}")]
    Window(#[from] raw_window_handle::HandleError),
}

impl VkError {
    /// Classifies a driver result from `call`.
    pub fn from_vk(call: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST | vk::Result::TIMEOUT => VkError::DeviceLost { call },
            vk::Result::ERROR_SURFACE_LOST_KHR => VkError::SurfaceLost,
            vk::Result::ERROR_EXTENSION_NOT_PRESENT => VkError::ExtensionOrLayerMissing {
                name: format!("extension requested by {call}"),
            },
            vk::Result::ERROR_LAYER_NOT_PRESENT => VkError::ExtensionOrLayerMissing {
                name: format!("layer requested by {call}"),
            },
            result => VkError::Vulkan { call, result },
        }
    }
}

pub trait VkResultExt<T> {
    /// Tags a failed driver call with its entry-point name.
    fn call(self, name: &'static str) -> Result<T, VkError>;
}

impl<T> VkResultExt<T> for ash::prelude::VkResult<T> {
    fn call(self, name: &'static str) -> Result<T, VkError> {
        self.map_err(|r| VkError::from_vk(name, r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_loss_and_timeouts_are_device_lost() {
        assert!(matches!(
            VkError::from_vk("vkQueueSubmit", vk::Result::ERROR_DEVICE_LOST),
            VkError::DeviceLost {
                call: "vkQueueSubmit"
            }
        ));
        assert!(matches!(
            VkError::from_vk("vkWaitForFences", vk::Result::TIMEOUT),
            VkError::DeviceLost { .. }
        ));
    }

    #[test]
    fn surface_and_missing_features_are_classified() {
        assert!(matches!(
            VkError::from_vk("vkQueuePresentKHR", vk::Result::ERROR_SURFACE_LOST_KHR),
            VkError::SurfaceLost
        ));
        assert!(matches!(
            VkError::from_vk("vkCreateDevice", vk::Result::ERROR_EXTENSION_NOT_PRESENT),
            VkError::ExtensionOrLayerMissing { .. }
        ));
    }

    #[test]
    fn other_results_keep_call_and_code() {
        let r: ash::prelude::VkResult<()> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let err = r.call("vkAllocateMemory").unwrap_err();
        match err {
            VkError::Vulkan { call, result } => {
                assert_eq!(call, "vkAllocateMemory");
                assert_eq!(result, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
            }
            other => panic!("unexpected {other:?}"),
        }
        let text = VkError::from_vk("vkAllocateMemory", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
            .to_string();
        assert!(text.contains("vkAllocateMemory"));
        assert!(text.contains("ERROR_OUT_OF_DEVICE_MEMORY"));
    }
}
