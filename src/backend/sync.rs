// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync.
// One set per frame in flight.

use ash::vk;

use super::error::Result;

/// Frame synchronization - one per frame in flight
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    /// # Safety
    /// `device` must be live.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED); // Start signaled

        // Fill in one at a time so a failure can release what exists
        let mut sync = Self::default();
        let result = (|| -> ash::prelude::VkResult<()> {
            sync.image_available = device.create_semaphore(&semaphore_info, None)?;
            sync.render_finished = device.create_semaphore(&semaphore_info, None)?;
            sync.in_flight_fence = device.create_fence(&fence_info, None)?;
            Ok(())
        })();

        match result {
            Ok(()) => Ok(sync),
            Err(e) => {
                sync.destroy(device);
                Err(e.into())
            }
        }
    }

    /// Create `count` sets, releasing all of them if any fails.
    ///
    /// # Safety
    /// `device` must be live.
    pub unsafe fn create_frames(device: &ash::Device, count: usize) -> Result<Vec<Self>> {
        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            match Self::new(device) {
                Ok(frame) => frames.push(frame),
                Err(e) => {
                    for frame in &mut frames {
                        frame.destroy(device);
                    }
                    return Err(e);
                }
            }
        }
        Ok(frames)
    }

    /// Block until this slot's previous submission retired.
    ///
    /// Call before acquiring with `image_available`, since that semaphore is
    /// only free again once the submission waiting on it has run.
    ///
    /// # Safety
    /// The fence must belong to `device`.
    pub unsafe fn wait(&self, device: &ash::Device) -> Result<()> {
        device.wait_for_fences(&[self.in_flight_fence], true, u64::MAX)?;
        Ok(())
    }

    /// Re-arm the fence. Only do this once a submission signalling it is
    /// certain, or the next `wait` on this slot never returns.
    ///
    /// # Safety
    /// The fence must belong to `device` and not be in use.
    pub unsafe fn reset(&self, device: &ash::Device) -> Result<()> {
        device.reset_fences(&[self.in_flight_fence])?;
        Ok(())
    }

    /// Destroy whichever objects exist. Null handles are skipped.
    ///
    /// # Safety
    /// The objects must belong to `device` and no longer be in use.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if self.image_available != vk::Semaphore::null() {
            device.destroy_semaphore(self.image_available, None);
        }
        if self.render_finished != vk::Semaphore::null() {
            device.destroy_semaphore(self.render_finished, None);
        }
        if self.in_flight_fence != vk::Fence::null() {
            device.destroy_fence(self.in_flight_fence, None);
        }
        *self = Self::default();
    }
}
