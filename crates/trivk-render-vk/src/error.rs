// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = RenderError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("initialization failed: {0}")]
    Initialization(String),

    #[error("failed to find GPUs with Vulkan support")]
    NoVulkanDevice,

    #[error("no device exposes both a graphics and a present queue family")]
    NoQueueFamilies,

    #[error("failed to find a suitable GPU")]
    NoSuitableDevice,

    #[error("validation layer {0} requested, but not available")]
    MissingLayer(String),

    #[error("failed to load shader {}: {source}", .path.display())]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to find a suitable memory type")]
    NoMemoryType,

    #[error("{call} failed: {result}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },

    #[error("device lost")]
    DeviceLost,

    #[error("surface out of date")]
    SurfaceInvalidated,
}

impl RenderError {
    /// Only an invalidated surface can be recovered from, by rebuilding the swapchain.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RenderError::SurfaceInvalidated)
    }

    pub fn from_vk(call: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => RenderError::DeviceLost,
            vk::Result::ERROR_OUT_OF_DATE_KHR => RenderError::SurfaceInvalidated,
            result => RenderError::Vulkan { call, result },
        }
    }
}

/// Names the failing entry point when lifting an ash result into [`RenderError`].
pub trait VkResultExt<T> {
    fn call(self, call: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn call(self, call: &'static str) -> Result<T> {
        self.map_err(|result| RenderError::from_vk(call, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_lost_gets_its_own_kind() {
        let err = RenderError::from_vk("queue_submit", vk::Result::ERROR_DEVICE_LOST);
        assert!(matches!(err, RenderError::DeviceLost));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn out_of_date_is_the_only_recoverable_kind() {
        let err = RenderError::from_vk("queue_present", vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert!(err.is_recoverable());

        let other = RenderError::from_vk("create_buffer", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert!(!other.is_recoverable());
        assert!(other.to_string().starts_with("create_buffer failed"));
    }

    #[test]
    fn call_names_the_entry_point() {
        let res: VkResult<u32> = Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        match res.call("create_instance") {
            Err(RenderError::Vulkan { call, result }) => {
                assert_eq!(call, "create_instance");
                assert_eq!(result, vk::Result::ERROR_INITIALIZATION_FAILED);
            }
            other => panic!("unexpected {other:?}"),
        }
        let ok: VkResult<u32> = Ok(7);
        assert_eq!(ok.call("noop").unwrap(), 7);
    }
}
