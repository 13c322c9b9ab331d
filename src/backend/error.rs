// GPU errors
//
// One variant per failure point in context/swapchain setup. Nothing here is
// retried locally: the caller either aborts (startup) or recreates the
// swapchain (out-of-date at runtime).

use ash::vk;
use thiserror::Error;

use super::queue_family::QueueRole;

#[derive(Error, Debug)]
pub enum GpuError {
    #[error("Failed to load Vulkan library: {0}")]
    Loader(#[from] ash::LoadingError),

    #[error("Vulkan loader used before loader::init()")]
    LoaderUninitialized,

    #[error("Failed to create Vulkan instance: {0}")]
    InstanceCreation(vk::Result),

    /// No accelerator passed selection (or none exist at all).
    #[error("No compatible GPU found: {0}")]
    DeviceEnumeration(String),

    /// Present-support query for a queue family was rejected by the driver.
    #[error("Failed to query present support for queue family {family}: {result}")]
    QueueFamily { family: u32, result: vk::Result },

    #[error("Selected GPU exposes no graphics-capable queue family")]
    MissingGraphicsQueue,

    #[error("Logical device creation rejected: {0}")]
    DeviceCreation(vk::Result),

    #[error("Failed to create {role} command pool: {result}")]
    CommandPool { role: QueueRole, result: vk::Result },

    #[error("Failed to create surface: {0}")]
    SurfaceCreation(vk::Result),

    #[error("Surface {query} query failed: {result}")]
    SurfaceQuery {
        query: &'static str,
        result: vk::Result,
    },

    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(vk::Result),

    #[error("Failed to create view for swapchain image {index}: {result}")]
    ImageView { index: usize, result: vk::Result },

    #[error("Failed to acquire swapchain image: {0}")]
    Acquire(vk::Result),

    #[error("Failed to present swapchain image: {0}")]
    Present(vk::Result),

    #[error("Swapchain used before create() or after destroy()")]
    SwapchainUninitialized,

    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),
}

impl GpuError {
    /// True when the surface changed under the swapchain and the caller
    /// should run `SwapchainManager::create` again.
    pub fn is_out_of_date(&self) -> bool {
        matches!(
            self,
            GpuError::Acquire(vk::Result::ERROR_OUT_OF_DATE_KHR)
                | GpuError::Present(vk::Result::ERROR_OUT_OF_DATE_KHR)
        )
    }
}

pub type Result<T> = std::result::Result<T, GpuError>;
