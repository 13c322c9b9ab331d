// Command pools - one per submission role
//
// Every pool allows resetting single command buffers. The graphics pool is
// also marked transient since its buffers are re-recorded often.

use ash::prelude::VkResult;
use ash::vk;

use super::error::{GpuError, Result};
use super::queue_family::{QueueRole, QueueRoles};

/// Roles that get their own pool, in creation order.
pub const POOL_ROLES: [QueueRole; 3] = [QueueRole::Graphics, QueueRole::Compute, QueueRole::Transfer];

pub fn pool_flags(role: QueueRole) -> vk::CommandPoolCreateFlags {
    match role {
        QueueRole::Graphics => {
            vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
        }
        _ => vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
    }
}

/// Graphics, compute and transfer pools. Null handles mean "not created".
#[derive(Debug, Default)]
pub struct CommandPoolSet {
    pub graphics: vk::CommandPool,
    pub compute: vk::CommandPool,
    pub transfer: vk::CommandPool,
}

impl CommandPoolSet {
    pub fn get(&self, role: QueueRole) -> Option<vk::CommandPool> {
        let pool = match role {
            QueueRole::Graphics => self.graphics,
            QueueRole::Compute => self.compute,
            QueueRole::Transfer => self.transfer,
            QueueRole::Present => return None,
        };
        (pool != vk::CommandPool::null()).then_some(pool)
    }

    fn slot(&mut self, role: QueueRole) -> Option<&mut vk::CommandPool> {
        match role {
            QueueRole::Graphics => Some(&mut self.graphics),
            QueueRole::Compute => Some(&mut self.compute),
            QueueRole::Transfer => Some(&mut self.transfer),
            QueueRole::Present => None,
        }
    }

    /// Create the three pools in order, stopping at the first failure.
    ///
    /// Pools are stored as they are created, so after an error the set holds
    /// whatever succeeded and `destroy` cleans it up.
    ///
    /// # Safety
    /// `device` must be live and the role families valid for it.
    pub unsafe fn create(&mut self, device: &ash::Device, roles: &QueueRoles) -> Result<()> {
        self.create_with(roles, |info| device.create_command_pool(info, None))
    }

    /// `create` with the driver call supplied by the caller.
    pub fn create_with(
        &mut self,
        roles: &QueueRoles,
        mut create_pool: impl FnMut(&vk::CommandPoolCreateInfo) -> VkResult<vk::CommandPool>,
    ) -> Result<()> {
        for role in POOL_ROLES {
            // A role without a family has nothing to submit to
            let family = roles.get(role).get().ok_or(GpuError::CommandPool {
                role,
                result: vk::Result::ERROR_INITIALIZATION_FAILED,
            })?;

            let pool_info = vk::CommandPoolCreateInfo::builder()
                .queue_family_index(family)
                .flags(pool_flags(role))
                .build();
            let pool = create_pool(&pool_info).map_err(|result| GpuError::CommandPool { role, result })?;

            if let Some(slot) = self.slot(role) {
                *slot = pool;
            }
            log::debug!("Created {} command pool on family {}", role, family);
        }
        Ok(())
    }

    /// Destroy whichever pools exist. Safe to call repeatedly.
    ///
    /// # Safety
    /// `device` must be the device that created the pools, and no command
    /// buffer from them may still be executing.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        self.destroy_with(|pool| device.destroy_command_pool(pool, None));
    }

    /// `destroy` with the driver call supplied by the caller.
    pub fn destroy_with(&mut self, mut destroy_pool: impl FnMut(vk::CommandPool)) {
        for role in POOL_ROLES {
            if let Some(slot) = self.slot(role) {
                if *slot != vk::CommandPool::null() {
                    destroy_pool(*slot);
                    *slot = vk::CommandPool::null();
                    log::debug!("Destroyed {} command pool", role);
                }
            }
        }
    }
}
