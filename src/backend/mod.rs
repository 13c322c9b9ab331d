// Backend module - Vulkan context and presentation
//
// Design: Thin wrapper around ash with safety and ergonomics
// Leaves first: queue_family -> device -> command_pools -> swapchain,
// composed by context.

pub mod command_pools;
pub mod context;
pub mod device;
pub mod error;
pub mod instance;
pub mod loader;
pub mod physical_device;
pub mod queue_family;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use context::Context;
pub use error::{GpuError, Result};
pub use instance::Instance;
pub use queue_family::{QueueFamilyIndex, QueueRole, QueueRoles};
pub use surface::{Surface, SurfaceDescriptor};
pub use swapchain::{AcquiredImage, AshPresentation, PresentationDriver, SwapchainManager};
pub use sync::FrameSync;
