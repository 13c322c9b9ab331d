// Physical device selection
//
// Picks the GPU the context runs on (prefer discrete) and answers the
// per-device lookups the renderer needs later: memory types and formats.

use ash::extensions::khr;
use ash::vk;
use std::ffi::CStr;

use super::device::{advertises_extension, supports_base_features, supports_descriptor_indexing};
use super::error::{GpuError, Result};

/// Oldest device API version we accept; descriptor indexing is core from 1.2.
pub const MIN_API_VERSION: u32 = vk::API_VERSION_1_2;

/// What we know about a GPU when choosing between them.
#[derive(Debug, Clone, Default)]
pub struct DeviceCandidate {
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub descriptor_indexing: vk::PhysicalDeviceDescriptorIndexingFeatures,
    pub extensions: Vec<vk::ExtensionProperties>,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
}

impl DeviceCandidate {
    /// # Safety
    /// `device` must belong to `instance`, which must speak at least 1.1.
    pub unsafe fn query(instance: &ash::Instance, device: vk::PhysicalDevice) -> Self {
        let mut descriptor_indexing = vk::PhysicalDeviceDescriptorIndexingFeatures::default();
        let mut features2 =
            vk::PhysicalDeviceFeatures2::builder().push_next(&mut descriptor_indexing);
        instance.get_physical_device_features2(device, &mut features2);
        let features = features2.features;

        // A device that can't list extensions can't be given any
        let extensions = instance
            .enumerate_device_extension_properties(device)
            .unwrap_or_else(|e| {
                log::debug!("Could not enumerate device extensions: {}", e);
                Vec::new()
            });

        Self {
            properties: instance.get_physical_device_properties(device),
            features,
            descriptor_indexing,
            extensions,
            queue_families: instance.get_physical_device_queue_family_properties(device),
        }
    }

    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    /// Score for selection, or why the device can't be used.
    ///
    /// A usable device speaks at least [`MIN_API_VERSION`], has a graphics
    /// queue family, offers the swapchain extension and supports every
    /// feature the logical device will switch on.
    pub fn score(&self) -> std::result::Result<u32, &'static str> {
        if self.properties.api_version < MIN_API_VERSION {
            return Err("API version below 1.2");
        }
        let has_graphics = self
            .queue_families
            .iter()
            .any(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS));
        if !has_graphics {
            return Err("no graphics queue family");
        }
        if !supports_base_features(&self.features) {
            return Err("missing anisotropy or non-solid fill");
        }
        if !supports_descriptor_indexing(&self.descriptor_indexing) {
            return Err("missing descriptor indexing features");
        }
        if !advertises_extension(&self.extensions, khr::Swapchain::name()) {
            return Err("no swapchain extension");
        }

        Ok(match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
            _ => 1,
        })
    }
}

/// Index of the best usable candidate. Ties keep the earlier one.
pub fn best_candidate(candidates: &[DeviceCandidate]) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;

    for (i, candidate) in candidates.iter().enumerate() {
        match candidate.score() {
            Ok(score) => {
                log::debug!("Candidate GPU {} scored {}", candidate.name(), score);
                if best.map_or(true, |(_, best_score)| score > best_score) {
                    best = Some((i, score));
                }
            }
            Err(reason) => log::debug!("Skipping GPU {}: {}", candidate.name(), reason),
        }
    }

    best.map(|(i, _)| i)
}

/// Pick the best GPU. Ties keep the first enumerated device.
///
/// # Safety
/// `instance` must be a live instance.
pub unsafe fn pick_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice> {
    let devices = instance
        .enumerate_physical_devices()
        .map_err(|e| GpuError::DeviceEnumeration(format!("enumeration failed: {e}")))?;

    if devices.is_empty() {
        return Err(GpuError::DeviceEnumeration(
            "no GPUs with Vulkan support".to_string(),
        ));
    }

    let candidates: Vec<_> = devices
        .iter()
        .map(|&device| DeviceCandidate::query(instance, device))
        .collect();

    let best = best_candidate(&candidates).ok_or_else(|| {
        GpuError::DeviceEnumeration("no GPU supports the required features".to_string())
    })?;

    let properties = &candidates[best].properties;
    log::info!("Selected GPU: {}", candidates[best].name());
    log::info!(
        "API Version: {}.{}.{}",
        vk::api_version_major(properties.api_version),
        vk::api_version_minor(properties.api_version),
        vk::api_version_patch(properties.api_version)
    );

    Ok(devices[best])
}

/// First memory type allowed by `type_filter` that has all of `required`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    memory_properties.memory_types[..memory_properties.memory_type_count as usize]
        .iter()
        .enumerate()
        .find(|(i, memory_type)| {
            type_filter & (1u32 << *i) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(i, _)| i as u32)
}

/// First candidate whose features for `tiling` contain `required`.
pub fn pick_supported_format(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    required: vk::FormatFeatureFlags,
    mut format_properties: impl FnMut(vk::Format) -> vk::FormatProperties,
) -> Option<vk::Format> {
    candidates.iter().copied().find(|&format| {
        let properties = format_properties(format);
        match tiling {
            vk::ImageTiling::LINEAR => properties.linear_tiling_features.contains(required),
            vk::ImageTiling::OPTIMAL => properties.optimal_tiling_features.contains(required),
            _ => false,
        }
    })
}
