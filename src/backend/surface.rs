// Presentation surface
//
// The window owns the native handle; we only wrap the Vulkan surface made
// from it and re-query its properties whenever the swapchain is rebuilt.

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

use super::error::{GpuError, Result};
use super::instance::Instance;

/// Everything the swapchain needs to know about a surface. Re-queried on every
/// (re)creation since resizes and monitor moves change it.
#[derive(Debug, Clone, Default)]
pub struct SurfaceDescriptor {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceDescriptor {
    /// # Safety
    /// `physical_device` and `surface` must belong to the loader's instance.
    pub unsafe fn query(
        loader: &ash::extensions::khr::Surface,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        let capabilities = loader
            .get_physical_device_surface_capabilities(physical_device, surface)
            .map_err(|result| GpuError::SurfaceQuery {
                query: "capabilities",
                result,
            })?;
        let formats = loader
            .get_physical_device_surface_formats(physical_device, surface)
            .map_err(|result| GpuError::SurfaceQuery {
                query: "formats",
                result,
            })?;
        let present_modes = loader
            .get_physical_device_surface_present_modes(physical_device, surface)
            .map_err(|result| GpuError::SurfaceQuery {
                query: "present modes",
                result,
            })?;

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }
}

/// A Vulkan surface created from a window. Destroyed on drop, before the
/// instance it came from.
pub struct Surface {
    handle: vk::SurfaceKHR,
    instance: Arc<Instance>,
}

impl Surface {
    /// # Safety
    /// The handles must describe a live window that outlives the surface.
    pub unsafe fn from_raw_handles(
        instance: Arc<Instance>,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<Self> {
        let handle =
            ash_window::create_surface(instance.entry(), &instance.instance, display, window, None)
                .map_err(GpuError::SurfaceCreation)?;
        log::debug!("Created window surface");
        Ok(Self { handle, instance })
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.instance
                .surface_loader
                .destroy_surface(self.handle, None);
        }
        log::debug!("Destroyed window surface");
    }
}
