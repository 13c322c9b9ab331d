// Logical device creation
//
// Responsibilities:
// - One queue request per distinct family (roles may share a family)
// - Fixed extension list: swapchain, plus synchronization2 when the GPU has it
// - Feature chain: base features -> descriptor indexing (-> sync2), linked
//   through PhysicalDeviceFeatures2 and handed to vkCreateDevice as one pNext
// - Queue handles for every role that has a family

use ash::vk;
use std::ffi::CStr;

use super::error::{GpuError, Result};
use super::queue_family::{QueueRole, QueueRoles};

/// Base device features we switch on. The physical device selector rejects
/// GPUs that lack any of these.
const REQUIRED_DEVICE_FEATURES: vk::PhysicalDeviceFeatures = vk::PhysicalDeviceFeatures {
    fill_mode_non_solid: vk::TRUE,
    sampler_anisotropy: vk::TRUE,
    ..unsafe { std::mem::zeroed() }
};

/// True if `available` has every base feature we switch on.
pub fn supports_base_features(available: &vk::PhysicalDeviceFeatures) -> bool {
    available.fill_mode_non_solid == vk::TRUE && available.sampler_anisotropy == vk::TRUE
}

const QUEUE_PRIORITIES: [f32; 1] = [1.0];

/// Queue handles per role. A role without a family has no queue; roles that
/// share a family get the same slot-0 queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Queues {
    pub present: Option<vk::Queue>,
    pub graphics: Option<vk::Queue>,
    pub compute: Option<vk::Queue>,
    pub transfer: Option<vk::Queue>,
}

impl Queues {
    pub fn get(&self, role: QueueRole) -> Option<vk::Queue> {
        match role {
            QueueRole::Present => self.present,
            QueueRole::Graphics => self.graphics,
            QueueRole::Compute => self.compute,
            QueueRole::Transfer => self.transfer,
        }
    }
}

/// Which optional extensions ended up enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnabledExtensions {
    pub synchronization2: bool,
}

pub struct LogicalDevice {
    pub device: ash::Device,
    pub queues: Queues,
    pub extensions: EnabledExtensions,
}

/// Queue create infos for every distinct family among the roles.
///
/// The returned infos point at a static priority array, so they stay valid
/// for as long as the caller holds them.
pub fn queue_create_infos(roles: &QueueRoles) -> Vec<vk::DeviceQueueCreateInfo> {
    roles
        .unique_families()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(family)
                .queue_priorities(&QUEUE_PRIORITIES)
                .build()
        })
        .collect()
}

type IndexingField = fn(&mut vk::PhysicalDeviceDescriptorIndexingFeatures) -> &mut vk::Bool32;

/// Descriptor indexing switches the device turns on.
const DESCRIPTOR_INDEXING_FIELDS: [IndexingField; 9] = [
    |f| &mut f.shader_sampled_image_array_non_uniform_indexing,
    |f| &mut f.shader_uniform_buffer_array_non_uniform_indexing,
    |f| &mut f.shader_storage_buffer_array_non_uniform_indexing,
    |f| &mut f.runtime_descriptor_array,
    |f| &mut f.descriptor_binding_variable_descriptor_count,
    |f| &mut f.descriptor_binding_partially_bound,
    |f| &mut f.descriptor_binding_sampled_image_update_after_bind,
    |f| &mut f.descriptor_binding_uniform_buffer_update_after_bind,
    |f| &mut f.descriptor_binding_storage_buffer_update_after_bind,
];

/// The descriptor indexing block chained into device creation.
pub fn required_descriptor_indexing() -> vk::PhysicalDeviceDescriptorIndexingFeatures {
    let mut features = vk::PhysicalDeviceDescriptorIndexingFeatures::default();
    for field in DESCRIPTOR_INDEXING_FIELDS {
        *field(&mut features) = vk::TRUE;
    }
    features
}

/// True if `available` has every switch `required_descriptor_indexing` sets.
pub fn supports_descriptor_indexing(
    available: &vk::PhysicalDeviceDescriptorIndexingFeatures,
) -> bool {
    let mut available = *available;
    DESCRIPTOR_INDEXING_FIELDS
        .iter()
        .all(|field| *field(&mut available) == vk::TRUE)
}

pub fn advertises_extension(available: &[vk::ExtensionProperties], name: &CStr) -> bool {
    available
        .iter()
        .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == name)
}

/// Device extensions to request, given what the GPU advertises.
pub fn device_extensions(
    available: &[vk::ExtensionProperties],
) -> (Vec<&'static CStr>, EnabledExtensions) {
    let mut extensions = vec![ash::extensions::khr::Swapchain::name()];
    let mut enabled = EnabledExtensions::default();

    let sync2 = ash::extensions::khr::Synchronization2::name();
    if advertises_extension(available, sync2) {
        extensions.push(sync2);
        enabled.synchronization2 = true;
    } else {
        log::warn!("{:?} not supported; continuing without it", sync2);
    }

    (extensions, enabled)
}

/// Build the feature chain on the stack and hand its head to `f`.
///
/// The chained blocks only live for the duration of the call, which is
/// exactly as long as device creation needs them.
pub fn with_feature_chain<R>(
    synchronization2: bool,
    f: impl FnOnce(&mut vk::PhysicalDeviceFeatures2) -> R,
) -> R {
    let mut descriptor_indexing = required_descriptor_indexing();
    let mut sync2 = vk::PhysicalDeviceSynchronization2Features::builder()
        .synchronization2(true)
        .build();

    let mut features2 = vk::PhysicalDeviceFeatures2::builder()
        .features(REQUIRED_DEVICE_FEATURES)
        .push_next(&mut descriptor_indexing);
    if synchronization2 {
        features2 = features2.push_next(&mut sync2);
    }

    f(&mut features2)
}

/// Create the logical device and fetch one queue per role.
///
/// # Safety
/// `physical_device` must belong to `instance`, and every family index in
/// `roles` must be valid for it.
pub unsafe fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    roles: &QueueRoles,
) -> Result<LogicalDevice> {
    let queue_infos = queue_create_infos(roles);
    log::debug!(
        "Requesting queues from families {:?}",
        roles.unique_families()
    );

    let available = instance
        .enumerate_device_extension_properties(physical_device)
        .map_err(GpuError::DeviceCreation)?;
    let (extensions, enabled) = device_extensions(&available);
    let extension_names: Vec<_> = extensions.iter().map(|ext| ext.as_ptr()).collect();

    let device = with_feature_chain(enabled.synchronization2, |features2| {
        // pEnabledFeatures stays null: the base features travel in features2
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_names)
            .push_next(features2);

        instance.create_device(physical_device, &create_info, None)
    })
    .map_err(GpuError::DeviceCreation)?;

    let queue = |role: QueueRole| {
        roles
            .get(role)
            .get()
            .map(|family| device.get_device_queue(family, 0))
    };
    let queues = Queues {
        present: queue(QueueRole::Present),
        graphics: queue(QueueRole::Graphics),
        compute: queue(QueueRole::Compute),
        transfer: queue(QueueRole::Transfer),
    };

    log::info!(
        "Created logical device with {} queue families, {} extensions",
        queue_infos.len(),
        extensions.len()
    );

    Ok(LogicalDevice {
        device,
        queues,
        extensions: enabled,
    })
}
