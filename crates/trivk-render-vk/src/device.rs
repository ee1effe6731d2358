// SPDX-License-Identifier: CEPL-1.0
//! Physical device selection and logical device creation.
//!
//! Selection runs on [`DeviceSnapshot`]s, plain copies of everything the
//! predicate looks at, so the policy can be exercised without a GPU.
use ash::khr::surface;
use ash::{vk, Instance};
use std::collections::BTreeSet;
use std::ffi::{c_char, CStr, FromBytesUntilNulError};
use tracing::{debug, info};

use crate::error::{RenderError, Result, VkResultExt};

pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 1] = [ash::khr::swapchain::NAME];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilySnapshot {
    pub flags: vk::QueueFlags,
    pub present: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Distinct families, graphics first. One queue is created per entry.
    pub fn unique(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(2);
        for idx in [self.graphics, self.present].into_iter().flatten() {
            if !out.contains(&idx) {
                out.push(idx);
            }
        }
        out
    }
}

/// Everything the suitability predicate needs to know about one physical device.
#[derive(Clone, Debug)]
pub struct DeviceSnapshot {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub geometry_shader: bool,
    pub queue_families: Vec<QueueFamilySnapshot>,
    pub extensions: BTreeSet<String>,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SelectionPolicy {
    pub require_discrete_gpu: bool,
    pub require_geometry_shader: bool,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            require_discrete_gpu: true,
            require_geometry_shader: true,
        }
    }
}

/// First graphics family and first present family; stops once both are known.
pub fn find_queue_families(families: &[QueueFamilySnapshot]) -> QueueFamilyIndices {
    let mut indices = QueueFamilyIndices::default();
    for (i, family) in families.iter().enumerate() {
        if indices.graphics.is_none() && family.flags.contains(vk::QueueFlags::GRAPHICS) {
            indices.graphics = Some(i as u32);
        }
        if indices.present.is_none() && family.present {
            indices.present = Some(i as u32);
        }
        if indices.is_complete() {
            break;
        }
    }
    indices
}

pub fn supports_required_extensions(available: &BTreeSet<String>) -> bool {
    REQUIRED_DEVICE_EXTENSIONS
        .iter()
        .all(|name| available.contains(name.to_string_lossy().as_ref()))
}

pub fn is_device_suitable(device: &DeviceSnapshot, policy: &SelectionPolicy) -> bool {
    if policy.require_discrete_gpu && device.device_type != vk::PhysicalDeviceType::DISCRETE_GPU {
        return false;
    }
    if policy.require_geometry_shader && !device.geometry_shader {
        return false;
    }
    if !find_queue_families(&device.queue_families).is_complete() {
        return false;
    }
    // Surface support is only meaningful once the swapchain extension is known to exist.
    supports_required_extensions(&device.extensions)
        && !device.formats.is_empty()
        && !device.present_modes.is_empty()
}

/// Index of the first suitable device in enumeration order.
pub fn select_device(devices: &[DeviceSnapshot], policy: &SelectionPolicy) -> Result<usize> {
    if devices.is_empty() {
        return Err(RenderError::NoVulkanDevice);
    }
    if let Some(i) = devices.iter().position(|d| {
        let ok = is_device_suitable(d, policy);
        debug!("device \"{}\" ({:?}) suitable={}", d.name, d.device_type, ok);
        ok
    }) {
        return Ok(i);
    }
    if !devices
        .iter()
        .any(|d| find_queue_families(&d.queue_families).is_complete())
    {
        return Err(RenderError::NoQueueFamilies);
    }
    Err(RenderError::NoSuitableDevice)
}

fn lossy(name: std::result::Result<&CStr, FromBytesUntilNulError>) -> String {
    name.map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub unsafe fn snapshot(
    instance: &Instance,
    surf_i: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> Result<DeviceSnapshot> {
    let props = unsafe { instance.get_physical_device_properties(phys) };
    let feats = unsafe { instance.get_physical_device_features(phys) };

    let qprops = unsafe { instance.get_physical_device_queue_family_properties(phys) };
    let mut queue_families = Vec::with_capacity(qprops.len());
    for (i, q) in qprops.iter().enumerate() {
        let present = unsafe { surf_i.get_physical_device_surface_support(phys, i as u32, surface) }
            .call("get_physical_device_surface_support")?;
        queue_families.push(QueueFamilySnapshot {
            flags: q.queue_flags,
            present,
        });
    }

    let extensions = unsafe { instance.enumerate_device_extension_properties(phys) }
        .call("enumerate_device_extension_properties")?
        .iter()
        .map(|e| lossy(e.extension_name_as_c_str()))
        .collect::<BTreeSet<_>>();

    let (formats, present_modes) = if supports_required_extensions(&extensions) {
        (
            unsafe { surf_i.get_physical_device_surface_formats(phys, surface) }
                .call("get_physical_device_surface_formats")?,
            unsafe { surf_i.get_physical_device_surface_present_modes(phys, surface) }
                .call("get_physical_device_surface_present_modes")?,
        )
    } else {
        (Vec::new(), Vec::new())
    };

    Ok(DeviceSnapshot {
        name: lossy(props.device_name_as_c_str()),
        device_type: props.device_type,
        geometry_shader: feats.geometry_shader == vk::TRUE,
        queue_families,
        extensions,
        formats,
        present_modes,
    })
}

pub struct SelectedDevice {
    pub phys: vk::PhysicalDevice,
    pub name: String,
    pub families: QueueFamilyIndices,
}

pub unsafe fn pick_physical_device(
    instance: &Instance,
    surf_i: &surface::Instance,
    surface: vk::SurfaceKHR,
    policy: &SelectionPolicy,
) -> Result<SelectedDevice> {
    let physical = unsafe { instance.enumerate_physical_devices() }
        .call("enumerate_physical_devices")?;

    let mut snapshots = Vec::with_capacity(physical.len());
    for &phys in &physical {
        snapshots.push(unsafe { snapshot(instance, surf_i, surface, phys) }?);
    }

    let chosen = select_device(&snapshots, policy)?;
    let snap = &snapshots[chosen];
    let families = find_queue_families(&snap.queue_families);
    info!(
        "selected GPU \"{}\" (graphics family {:?}, present family {:?})",
        snap.name, families.graphics, families.present
    );
    Ok(SelectedDevice {
        phys: physical[chosen],
        name: snap.name.clone(),
        families,
    })
}

pub struct DeviceQueues {
    pub graphics_family: u32,
    pub present_family: u32,
    pub graphics: vk::Queue,
    pub present: vk::Queue,
}

pub unsafe fn create_logical_device(
    instance: &Instance,
    selected: &SelectedDevice,
    layers: &[*const c_char],
) -> Result<(ash::Device, DeviceQueues)> {
    let (Some(graphics_family), Some(present_family)) =
        (selected.families.graphics, selected.families.present)
    else {
        return Err(RenderError::NoQueueFamilies);
    };

    let priorities = [1.0_f32];
    let qinfos: Vec<vk::DeviceQueueCreateInfo> = selected
        .families
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

    let features = vk::PhysicalDeviceFeatures::default();
    let device_exts: Vec<*const c_char> =
        REQUIRED_DEVICE_EXTENSIONS.iter().map(|n| n.as_ptr()).collect();

    // Device layers are deprecated but older loaders still honour them.
    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: qinfos.len() as u32,
        p_queue_create_infos: qinfos.as_ptr(),
        p_enabled_features: &features,
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    let device = unsafe { instance.create_device(selected.phys, &dinfo, None) }
        .call("create_device")?;
    let graphics = unsafe { device.get_device_queue(graphics_family, 0) };
    let present = unsafe { device.get_device_queue(present_family, 0) };

    Ok((
        device,
        DeviceQueues {
            graphics_family,
            present_family,
            graphics,
            present,
        },
    ))
}

/// First memory type allowed by `type_bits` that has all of `req`.
pub fn find_memory_type(
    mem: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    req: vk::MemoryPropertyFlags,
) -> Result<u32> {
    (0..mem.memory_type_count)
        .find(|&i| {
            (type_bits & (1 << i)) != 0
                && mem.memory_types[i as usize].property_flags.contains(req)
        })
        .ok_or(RenderError::NoMemoryType)
}
