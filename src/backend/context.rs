// GPU context - composition root
//
// Creation order: physical device -> queue roles -> logical device ->
// command pools. Teardown runs the other way round on drop. The instance and
// surface are borrowed in; they are created before the context and destroyed
// after it.

use ash::extensions::khr;
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

use super::command_pools::CommandPoolSet;
use super::device::{create_logical_device, EnabledExtensions, Queues};
use super::error::{GpuError, Result};
use super::instance::Instance;
use super::physical_device::pick_physical_device;
use super::queue_family::{find_queue_families, QueueRole, QueueRoles};
use super::swapchain::AshPresentation;

pub struct Context {
    // Drop tears down pools then device; the other fields own nothing
    pools: CommandPoolSet,
    device: ash::Device,
    queues: Queues,
    roles: QueueRoles,
    extensions: EnabledExtensions,
    physical_device: vk::PhysicalDevice,
    surface: Option<vk::SurfaceKHR>,
    instance: Arc<Instance>,
}

impl Context {
    /// Build the device side of the renderer.
    ///
    /// `surface` decides whether a present queue is requested; pass `None`
    /// for headless use. On failure nothing created here outlives the call.
    pub fn new(instance: Arc<Instance>, surface: Option<vk::SurfaceKHR>) -> Result<Self> {
        let physical_device = unsafe { pick_physical_device(&instance.instance) }?;

        let roles = unsafe {
            find_queue_families(
                &instance.instance,
                physical_device,
                surface.map(|surface| (&instance.surface_loader, surface)),
            )
        }?;
        if !roles.graphics.has_value() {
            return Err(GpuError::MissingGraphicsQueue);
        }

        let logical = unsafe { create_logical_device(&instance.instance, physical_device, &roles) }?;

        let device = &logical.device;
        let pools = match build_pools(
            &roles,
            |info| unsafe { device.create_command_pool(info, None) },
            |pool| unsafe { device.destroy_command_pool(pool, None) },
        ) {
            Ok(pools) => pools,
            Err(e) => {
                unsafe { logical.device.destroy_device(None) };
                return Err(e);
            }
        };

        log::info!("GPU context ready ({})", if surface.is_some() { "windowed" } else { "headless" });

        Ok(Self {
            pools,
            device: logical.device,
            queues: logical.queues,
            roles,
            extensions: logical.extensions,
            physical_device,
            surface,
            instance,
        })
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn surface(&self) -> Option<vk::SurfaceKHR> {
        self.surface
    }

    pub fn queue_roles(&self) -> &QueueRoles {
        &self.roles
    }

    /// Queue for `role`, if that role has a family. Roles sharing a family
    /// return the same queue.
    pub fn queue(&self, role: QueueRole) -> Option<vk::Queue> {
        self.queues.get(role)
    }

    pub fn queues(&self) -> &Queues {
        &self.queues
    }

    pub fn command_pool(&self, role: QueueRole) -> Option<vk::CommandPool> {
        self.pools.get(role)
    }

    pub fn extensions(&self) -> EnabledExtensions {
        self.extensions
    }

    pub fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        unsafe {
            self.instance
                .instance
                .get_physical_device_memory_properties(self.physical_device)
        }
    }

    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    /// Swapchain driver bound to this context's device.
    ///
    /// # Safety
    /// The returned driver (and any `SwapchainManager` owning it) must be
    /// dropped before the context.
    pub unsafe fn presentation(&self) -> AshPresentation {
        AshPresentation {
            physical_device: self.physical_device,
            device: self.device.clone(),
            surface_loader: self.instance.surface_loader.clone(),
            swapchain_loader: khr::Swapchain::new(&self.instance.instance, &self.device),
        }
    }

    /// Wait for device to finish
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        log::info!("Destroying GPU context...");

        if let Err(e) = self.wait_idle() {
            log::warn!("wait_idle before teardown failed: {}", e);
        }

        // Cleanup in reverse order
        unsafe {
            self.pools.destroy(&self.device);
            self.device.destroy_device(None);
        }
    }
}

/// Create the pool set, releasing any pools already made if one fails.
fn build_pools(
    roles: &QueueRoles,
    create_pool: impl FnMut(&vk::CommandPoolCreateInfo) -> VkResult<vk::CommandPool>,
    destroy_pool: impl FnMut(vk::CommandPool),
) -> Result<CommandPoolSet> {
    let mut pools = CommandPoolSet::default();
    if let Err(e) = pools.create_with(roles, create_pool) {
        pools.destroy_with(destroy_pool);
        return Err(e);
    }
    Ok(pools)
}
