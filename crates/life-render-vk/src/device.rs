// SPDX-License-Identifier: CEPL-1.0
//! Physical device + queue family selection and the logical device.

use anyhow::{Context, Result};
use ash::khr::{surface, swapchain};
use ash::prelude::VkResult;
use ash::{vk, Instance};
use std::collections::BTreeSet;
use std::ffi::CStr;
use std::fmt;
use tracing::info;

use crate::error::SetupError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueRole {
    Graphics,
    Present,
    Compute,
}

impl fmt::Display for QueueRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QueueRole::Graphics => "graphics",
            QueueRole::Present => "presentation",
            QueueRole::Compute => "compute",
        })
    }
}

/// What one queue family can do. A family with zero queues can do nothing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FamilyCaps {
    pub graphics: bool,
    pub present: bool,
    pub compute: bool,
}

impl FamilyCaps {
    fn all(&self) -> bool {
        self.graphics && self.present && self.compute
    }
}

/// Family index per role. Roles may alias the same family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
    pub compute: u32,
}

impl QueueFamilies {
    /// Sorted, deduplicated; one queue-create request per entry.
    pub fn unique(&self) -> Vec<u32> {
        BTreeSet::from([self.graphics, self.present, self.compute])
            .into_iter()
            .collect()
    }
}

/// Present support is only queried for families that have queues. A failed
/// query is an error, not "cannot present".
pub fn family_caps(
    props: &vk::QueueFamilyProperties,
    present: impl FnOnce() -> VkResult<bool>,
) -> VkResult<FamilyCaps> {
    let usable = props.queue_count > 0;
    Ok(FamilyCaps {
        graphics: usable && props.queue_flags.contains(vk::QueueFlags::GRAPHICS),
        present: usable && present()?,
        compute: usable && props.queue_flags.contains(vk::QueueFlags::COMPUTE),
    })
}

/// A family that can do everything wins all three roles; otherwise each role
/// independently takes the lowest family that supports it.
pub fn select_queue_families(caps: &[FamilyCaps]) -> Result<QueueFamilies, SetupError> {
    if let Some(i) = caps.iter().position(FamilyCaps::all) {
        let i = i as u32;
        return Ok(QueueFamilies {
            graphics: i,
            present: i,
            compute: i,
        });
    }

    let first = |role: QueueRole, pred: fn(&FamilyCaps) -> bool| {
        caps.iter()
            .position(pred)
            .map(|i| i as u32)
            .ok_or(SetupError::MissingQueueFamily(role))
    };
    Ok(QueueFamilies {
        graphics: first(QueueRole::Graphics, |c| c.graphics)?,
        present: first(QueueRole::Present, |c| c.present)?,
        compute: first(QueueRole::Compute, |c| c.compute)?,
    })
}

#[derive(Clone, Copy, Debug)]
pub struct Queue {
    pub family: u32,
    pub handle: vk::Queue,
}

/// Physical + logical device and one queue per role.
///
/// Family indices are fixed at creation and never change afterwards.
pub struct AcceleratorContext {
    phys: vk::PhysicalDevice,
    device: ash::Device,
    families: QueueFamilies,
    graphics: Queue,
    present: Queue,
    compute: Queue,
    name: String,
}

impl AcceleratorContext {
    /// Takes the first enumerated physical device; there is no scoring.
    pub unsafe fn new(
        instance: &Instance,
        surface_loader: &surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        let phys = unsafe { instance.enumerate_physical_devices() }
            .context("enumerate_physical_devices")?
            .into_iter()
            .next()
            .ok_or(SetupError::NoPhysicalDevice)?;

        let props = unsafe { instance.get_physical_device_properties(phys) };
        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let qprops = unsafe { instance.get_physical_device_queue_family_properties(phys) };
        let mut caps = Vec::with_capacity(qprops.len());
        for (i, q) in qprops.iter().enumerate() {
            let family = i as u32;
            caps.push(
                family_caps(q, || unsafe {
                    surface_loader.get_physical_device_surface_support(phys, family, surface)
                })
                .with_context(|| format!("surface support for queue family {i}"))?,
            );
        }
        let families = select_queue_families(&caps)?;

        let priorities = [1.0_f32];
        let qinfos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            })
            .collect();

        let device_exts = [swapchain::NAME.as_ptr()];
        let dinfo = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: qinfos.len() as u32,
            p_queue_create_infos: qinfos.as_ptr(),
            enabled_extension_count: device_exts.len() as u32,
            pp_enabled_extension_names: device_exts.as_ptr(),
            ..Default::default()
        };
        let device = unsafe { instance.create_device(phys, &dinfo, None) }.context("create_device")?;

        let queue = |family: u32| Queue {
            family,
            handle: unsafe { device.get_device_queue(family, 0) },
        };
        let graphics = queue(families.graphics);
        let present = queue(families.present);
        let compute = queue(families.compute);

        info!(
            "device '{name}': graphics family {}, present family {}, compute family {}",
            families.graphics, families.present, families.compute
        );

        Ok(Self {
            phys,
            device,
            families,
            graphics,
            present,
            compute,
            name,
        })
    }

    pub fn phys(&self) -> vk::PhysicalDevice {
        self.phys
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn families(&self) -> QueueFamilies {
        self.families
    }

    pub fn graphics(&self) -> Queue {
        self.graphics
    }

    pub fn present(&self) -> Queue {
        self.present
    }

    pub fn compute(&self) -> Queue {
        self.compute
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every child object must already be destroyed.
    pub unsafe fn destroy(&mut self) {
        unsafe { self.device.destroy_device(None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const G: FamilyCaps = FamilyCaps {
        graphics: true,
        present: false,
        compute: false,
    };
    const P: FamilyCaps = FamilyCaps {
        graphics: false,
        present: true,
        compute: false,
    };
    const C: FamilyCaps = FamilyCaps {
        graphics: false,
        present: false,
        compute: true,
    };
    const GC: FamilyCaps = FamilyCaps {
        graphics: true,
        present: false,
        compute: true,
    };
    const ALL: FamilyCaps = FamilyCaps {
        graphics: true,
        present: true,
        compute: true,
    };
    const NONE: FamilyCaps = FamilyCaps {
        graphics: false,
        present: false,
        compute: false,
    };

    #[test]
    fn universal_family_takes_every_role() {
        let f = select_queue_families(&[G, P, ALL, ALL]).unwrap();
        assert_eq!(
            f,
            QueueFamilies {
                graphics: 2,
                present: 2,
                compute: 2
            }
        );
        assert_eq!(f.unique(), vec![2]);
    }

    #[test]
    fn split_roles_take_lowest_index() {
        let f = select_queue_families(&[NONE, C, GC, P, G]).unwrap();
        assert_eq!(f.graphics, 2);
        assert_eq!(f.present, 3);
        assert_eq!(f.compute, 1);
        assert_eq!(f.unique(), vec![1, 2, 3]);
    }

    #[test]
    fn aliased_roles_dedupe_queue_requests() {
        let f = select_queue_families(&[GC, P]).unwrap();
        assert_eq!(f.graphics, f.compute);
        assert_eq!(f.unique(), vec![0, 1]);
    }

    fn family(flags: vk::QueueFlags, queue_count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count,
            ..Default::default()
        }
    }

    #[test]
    fn surface_query_failure_is_not_missing_present() {
        let q = family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 1);
        let err = family_caps(&q, || Err(vk::Result::ERROR_SURFACE_LOST_KHR)).unwrap_err();
        assert_eq!(err, vk::Result::ERROR_SURFACE_LOST_KHR);
    }

    #[test]
    fn family_without_queues_is_never_queried() {
        let q = family(vk::QueueFlags::GRAPHICS, 0);
        let caps = family_caps(&q, || panic!("queried an empty family")).unwrap();
        assert_eq!(caps, NONE);
    }

    #[test]
    fn capabilities_follow_flags_and_surface() {
        let q = family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 2);
        assert_eq!(family_caps(&q, || Ok(true)).unwrap(), ALL);
        assert_eq!(family_caps(&q, || Ok(false)).unwrap(), GC);
    }

    #[test]
    fn missing_role_is_fatal() {
        let err = select_queue_families(&[G, C]).unwrap_err();
        assert!(matches!(
            err,
            SetupError::MissingQueueFamily(QueueRole::Present)
        ));
        assert!(matches!(
            select_queue_families(&[]),
            Err(SetupError::MissingQueueFamily(QueueRole::Graphics))
        ));
    }
}
