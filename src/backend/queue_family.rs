// Queue family selection
//
// Partitions a GPU's queue families into present/graphics/compute/transfer
// roles. Dedicated compute and transfer families win over shared ones; a role
// with no dedicated family aliases the graphics (or compute) family instead of
// failing, so a single universal family still yields a usable assignment.

use ash::prelude::VkResult;
use ash::vk;
use std::collections::BTreeSet;
use std::fmt;

use super::error::{GpuError, Result};

/// Index of a queue family that may not exist.
///
/// Kept as a tagged optional so that family 0 is never confused with "absent".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct QueueFamilyIndex(Option<u32>);

impl QueueFamilyIndex {
    pub const NONE: Self = Self(None);

    pub const fn new(index: u32) -> Self {
        Self(Some(index))
    }

    pub const fn has_value(self) -> bool {
        self.0.is_some()
    }

    pub const fn get(self) -> Option<u32> {
        self.0
    }
}

impl From<Option<u32>> for QueueFamilyIndex {
    fn from(index: Option<u32>) -> Self {
        Self(index)
    }
}

impl fmt::Display for QueueFamilyIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(index) => write!(f, "{index}"),
            None => f.write_str("none"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    Present,
    Graphics,
    Compute,
    Transfer,
}

impl QueueRole {
    pub const ALL: [QueueRole; 4] = [
        QueueRole::Present,
        QueueRole::Graphics,
        QueueRole::Compute,
        QueueRole::Transfer,
    ];
}

impl fmt::Display for QueueRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QueueRole::Present => "present",
            QueueRole::Graphics => "graphics",
            QueueRole::Compute => "compute",
            QueueRole::Transfer => "transfer",
        })
    }
}

/// Family chosen for each queue role. Any role may alias another.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueRoles {
    pub present: QueueFamilyIndex,
    pub graphics: QueueFamilyIndex,
    pub compute: QueueFamilyIndex,
    pub transfer: QueueFamilyIndex,
}

impl QueueRoles {
    pub fn get(&self, role: QueueRole) -> QueueFamilyIndex {
        match role {
            QueueRole::Present => self.present,
            QueueRole::Graphics => self.graphics,
            QueueRole::Compute => self.compute,
            QueueRole::Transfer => self.transfer,
        }
    }

    /// Distinct family indices among the roles that have a value.
    pub fn unique_families(&self) -> BTreeSet<u32> {
        QueueRole::ALL
            .iter()
            .filter_map(|&role| self.get(role).get())
            .collect()
    }
}

impl fmt::Display for QueueRoles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "present={} graphics={} compute={} transfer={}",
            self.present, self.graphics, self.compute, self.transfer
        )
    }
}

/// Assign queue roles from a device's family list.
///
/// `present_support` is asked once per family when a surface exists; pass
/// `None` for headless use and the present role stays empty. A failing query
/// aborts selection.
pub fn select_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut present_support: Option<&mut dyn FnMut(u32) -> VkResult<bool>>,
) -> Result<QueueRoles> {
    let mut roles = QueueRoles::default();

    for (i, family) in families.iter().enumerate() {
        let index = i as u32;
        let flags = family.queue_flags;
        let graphics = flags.contains(vk::QueueFlags::GRAPHICS);
        let compute = flags.contains(vk::QueueFlags::COMPUTE);
        let transfer = flags.contains(vk::QueueFlags::TRANSFER);

        // Later matches overwrite earlier ones
        if graphics {
            roles.graphics = QueueFamilyIndex::new(index);
        }
        if compute && !graphics {
            roles.compute = QueueFamilyIndex::new(index);
        }
        if transfer && !graphics && !compute {
            roles.transfer = QueueFamilyIndex::new(index);
        }

        if let Some(query) = present_support.as_deref_mut() {
            let supported =
                query(index).map_err(|result| GpuError::QueueFamily { family: index, result })?;
            if supported {
                roles.present = QueueFamilyIndex::new(index);
            }
        }
    }

    if !roles.compute.has_value() {
        roles.compute = roles.graphics;
        log::warn!("No dedicated compute queue family; compute shares graphics");
    }

    if !roles.transfer.has_value() {
        if roles.compute.has_value() && roles.compute != roles.graphics {
            roles.transfer = roles.compute;
            log::warn!("No dedicated transfer queue family; transfer shares compute");
        } else {
            roles.transfer = roles.graphics;
            log::warn!("No dedicated transfer queue family; transfer shares graphics");
        }
    }

    Ok(roles)
}

/// Query the device's queue families and assign roles.
///
/// # Safety
/// `physical_device` must belong to `instance`, and `surface` (if any) to the
/// same instance.
pub unsafe fn find_queue_families(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface: Option<(&ash::extensions::khr::Surface, vk::SurfaceKHR)>,
) -> Result<QueueRoles> {
    let families = instance.get_physical_device_queue_family_properties(physical_device);
    log::debug!("GPU exposes {} queue families", families.len());

    let roles = match surface {
        Some((loader, surface)) => {
            let mut query = |index: u32| {
                loader.get_physical_device_surface_support(physical_device, index, surface)
            };
            select_queue_families(&families, Some(&mut query))?
        }
        None => select_queue_families(&families, None)?,
    };

    log::info!("Queue roles: {}", roles);
    Ok(roles)
}

#[cfg(test)]
mod tests {
    use super::*;

    const G: vk::QueueFlags = vk::QueueFlags::GRAPHICS;
    const C: vk::QueueFlags = vk::QueueFlags::COMPUTE;
    const T: vk::QueueFlags = vk::QueueFlags::TRANSFER;

    fn families(flags: &[vk::QueueFlags]) -> Vec<vk::QueueFamilyProperties> {
        flags
            .iter()
            .map(|&queue_flags| vk::QueueFamilyProperties {
                queue_flags,
                queue_count: 1,
                ..Default::default()
            })
            .collect()
    }

    fn headless(flags: &[vk::QueueFlags]) -> QueueRoles {
        select_queue_families(&families(flags), None).unwrap()
    }

    fn idx(i: u32) -> QueueFamilyIndex {
        QueueFamilyIndex::new(i)
    }

    #[test]
    fn absent_index_is_distinct_from_zero() {
        assert!(!QueueFamilyIndex::NONE.has_value());
        assert!(idx(0).has_value());
        assert_ne!(QueueFamilyIndex::NONE, idx(0));
        assert_eq!(QueueFamilyIndex::from(Some(3)).get(), Some(3));
    }

    #[test]
    fn single_universal_family_aliases_every_role() {
        let roles = headless(&[G | C | T]);
        assert_eq!(roles.graphics, idx(0));
        assert_eq!(roles.compute, idx(0));
        assert_eq!(roles.transfer, idx(0));
        assert!(!roles.present.has_value());
    }

    #[test]
    fn dedicated_families_are_preferred() {
        let roles = headless(&[G | C | T, C | T, T]);
        assert_eq!(roles.graphics, idx(0));
        assert_eq!(roles.compute, idx(1));
        assert_eq!(roles.transfer, idx(2));
    }

    #[test]
    fn transfer_falls_back_to_dedicated_compute() {
        let roles = headless(&[G | C | T, C | T]);
        assert_eq!(roles.compute, idx(1));
        assert_eq!(roles.transfer, idx(1));
    }

    #[test]
    fn compute_falls_back_to_graphics() {
        let roles = headless(&[G | C | T, T]);
        assert_eq!(roles.compute, idx(0));
        assert_eq!(roles.transfer, idx(1));
    }

    #[test]
    fn later_matches_overwrite_earlier_ones() {
        let roles = headless(&[G | C | T, C, G | C, C | T]);
        assert_eq!(roles.graphics, idx(2));
        assert_eq!(roles.compute, idx(3));
        assert_eq!(roles.transfer, idx(3));
    }

    #[test]
    fn no_graphics_family_leaves_roles_empty() {
        let roles = headless(&[T]);
        assert!(!roles.graphics.has_value());
        assert!(!roles.compute.has_value());
        assert_eq!(roles.transfer, idx(0));

        let roles = headless(&[]);
        assert_eq!(roles, QueueRoles::default());
    }

    #[test]
    fn last_presentable_family_wins() {
        let mut asked = Vec::new();
        let mut query = |index: u32| -> VkResult<bool> {
            asked.push(index);
            Ok(index != 1)
        };
        let roles = select_queue_families(&families(&[G | C | T, C, T]), Some(&mut query)).unwrap();
        assert_eq!(roles.present, idx(2));
        assert_eq!(asked, vec![0, 1, 2]);
    }

    #[test]
    fn present_query_failure_aborts_selection() {
        let mut query = |index: u32| -> VkResult<bool> {
            if index == 1 {
                Err(vk::Result::ERROR_SURFACE_LOST_KHR)
            } else {
                Ok(true)
            }
        };
        let err = select_queue_families(&families(&[G | C | T, C]), Some(&mut query)).unwrap_err();
        assert!(matches!(
            err,
            GpuError::QueueFamily {
                family: 1,
                result: vk::Result::ERROR_SURFACE_LOST_KHR
            }
        ));
    }

    #[test]
    fn fallback_policy_holds_for_every_three_family_layout() {
        let masks: Vec<vk::QueueFlags> = (0..8u32)
            .map(|bits| {
                let mut flags = vk::QueueFlags::empty();
                if bits & 1 != 0 {
                    flags |= G;
                }
                if bits & 2 != 0 {
                    flags |= C;
                }
                if bits & 4 != 0 {
                    flags |= T;
                }
                flags
            })
            .collect();

        for &a in &masks {
            for &b in &masks {
                for &c in &masks {
                    let layout = [a, b, c];
                    let roles = headless(&layout);

                    let has_graphics = layout.iter().any(|f| f.contains(G));
                    let has_dedicated_compute =
                        layout.iter().any(|f| f.contains(C) && !f.contains(G));
                    let has_dedicated_transfer = layout
                        .iter()
                        .any(|f| f.contains(T) && !f.contains(G) && !f.contains(C));

                    if has_graphics {
                        assert!(roles.graphics.has_value(), "{layout:?}");
                    }
                    if !has_dedicated_compute {
                        assert_eq!(roles.compute, roles.graphics, "{layout:?}");
                    }
                    if has_dedicated_compute
                        && !has_dedicated_transfer
                        && roles.compute != roles.graphics
                    {
                        assert_eq!(roles.transfer, roles.compute, "{layout:?}");
                    }
                    assert!(!roles.present.has_value());
                }
            }
        }
    }

    #[test]
    fn unique_families_skip_absent_roles() {
        let headless = QueueRoles {
            present: QueueFamilyIndex::NONE,
            graphics: idx(0),
            compute: idx(0),
            transfer: idx(0),
        };
        assert_eq!(headless.unique_families().into_iter().collect::<Vec<_>>(), vec![0]);

        let split = QueueRoles {
            present: idx(2),
            graphics: idx(0),
            compute: idx(1),
            transfer: idx(1),
        };
        assert_eq!(split.unique_families().into_iter().collect::<Vec<_>>(), vec![0, 1, 2]);
    }
}
