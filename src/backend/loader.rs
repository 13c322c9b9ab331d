// Vulkan loader - process-wide state
//
// The Vulkan library is loaded exactly once by `init()` and released by
// `shutdown()`. Everything else asks `entry()` for the shared handle, which
// fails loudly instead of loading the library as a side effect.

use parking_lot::Mutex;
use std::sync::Arc;

use super::error::{GpuError, Result};

static ENTRY: Mutex<Option<Arc<ash::Entry>>> = parking_lot::const_mutex(None);

/// Load the Vulkan library. Calling it again returns the loaded entry.
pub fn init() -> Result<Arc<ash::Entry>> {
    let mut slot = ENTRY.lock();
    if let Some(entry) = slot.as_ref() {
        return Ok(entry.clone());
    }

    let entry = Arc::new(unsafe { ash::Entry::load() }?);
    log::info!("Loaded Vulkan library");
    *slot = Some(entry.clone());
    Ok(entry)
}

/// The loaded entry. Errors if `init()` hasn't run.
pub fn entry() -> Result<Arc<ash::Entry>> {
    ENTRY.lock().clone().ok_or(GpuError::LoaderUninitialized)
}

pub fn is_initialized() -> bool {
    ENTRY.lock().is_some()
}

/// Drop the process-wide handle. The library unloads once every instance
/// holding a clone is gone. No-op if nothing is loaded.
pub fn shutdown() {
    if ENTRY.lock().take().is_some() {
        log::debug!("Released Vulkan loader");
    }
}
