// SPDX-License-Identifier: CEPL-1.0
//! Instance creation plus the instance-scoped debug-utils capability.
use ash::ext::debug_utils;
use ash::khr::surface;
use ash::{vk, Entry, Instance};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{c_char, c_void, CStr};
use tracing::{debug, error, info, trace, warn};

use crate::error::{RenderError, Result, VkResultExt};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

const APP_NAME: &CStr = c"trivk";

/// Severity of the message submitted once the messenger is up.
pub const STARTUP_MESSAGE_SEVERITY: vk::DebugUtilsMessageSeverityFlagsEXT =
    vk::DebugUtilsMessageSeverityFlagsEXT::INFO;

/// Severities the messenger subscribes to. Anything outside the mask is dropped by the loader.
pub fn messenger_severities() -> vk::DebugUtilsMessageSeverityFlagsEXT {
    vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
}

fn messenger_create_info<'a>() -> vk::DebugUtilsMessengerCreateInfoEXT<'a> {
    vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: messenger_severities(),
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader hands us a valid callback struct for the duration of the call.
    let p_message = unsafe { (*data).p_message };
    if p_message.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr(p_message) }.to_string_lossy();

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "validation layer: {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "validation layer: {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(target: "vulkan", "validation layer: {msg}");
    } else {
        trace!(target: "vulkan", "validation layer: {msg}");
    }
    vk::FALSE
}

/// The debug-utils entry points resolved for one instance, with the messenger they own.
struct DebugUtils {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

/// Owns the `VkInstance`. Anything needing the debug-utils functions goes through here.
pub struct VulkanInstance {
    entry: Entry,
    instance: Instance,
    layers: Vec<&'static CStr>,
    debug: Option<DebugUtils>,
}

fn has_layer(available: &[vk::LayerProperties], wanted: &CStr) -> bool {
    available
        .iter()
        .any(|l| l.layer_name_as_c_str().is_ok_and(|name| name == wanted))
}

impl VulkanInstance {
    pub unsafe fn new(display: RawDisplayHandle, validation: bool) -> Result<Self> {
        let entry = Entry::linked();

        let layers: Vec<&'static CStr> = if validation {
            let available = unsafe { entry.enumerate_instance_layer_properties() }
                .call("enumerate_instance_layer_properties")?;
            if !has_layer(&available, VALIDATION_LAYER) {
                return Err(RenderError::MissingLayer(
                    VALIDATION_LAYER.to_string_lossy().into_owned(),
                ));
            }
            vec![VALIDATION_LAYER]
        } else {
            Vec::new()
        };

        let mut ext_vec = ash_window::enumerate_required_extensions(display)
            .call("enumerate_required_extensions")?
            .to_vec();
        if validation {
            ext_vec.push(debug_utils::NAME.as_ptr());
        }
        log_extension_inventory(&entry, &ext_vec);

        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: APP_NAME.as_ptr(),
            application_version: vk::make_api_version(0, 1, 0, 0),
            p_engine_name: APP_NAME.as_ptr(),
            engine_version: vk::make_api_version(0, 1, 0, 0),
            api_version: vk::API_VERSION_1_0,
            ..Default::default()
        };

        let layer_ptrs: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();
        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            p_application_info: &app_info,
            enabled_extension_count: ext_vec.len() as u32,
            pp_enabled_extension_names: ext_vec.as_ptr(),
            enabled_layer_count: layer_ptrs.len() as u32,
            pp_enabled_layer_names: layer_ptrs.as_ptr(),
            ..Default::default()
        };

        let instance =
            unsafe { entry.create_instance(&create_info, None) }.call("create_instance")?;

        let mut this = Self {
            entry,
            instance,
            layers,
            debug: None,
        };
        if validation {
            // On failure `this` drops and takes the instance with it.
            this.debug = Some(unsafe { this.create_debug_messenger() }?);
            this.submit_message(STARTUP_MESSAGE_SEVERITY, c"trivk: debug messenger installed");
        }
        info!(
            "Vulkan instance ready (validation={})",
            this.validation_enabled()
        );
        Ok(this)
    }

    unsafe fn create_debug_messenger(&self) -> Result<DebugUtils> {
        let loader = debug_utils::Instance::new(&self.entry, &self.instance);
        let ci = messenger_create_info();
        let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None) }
            .call("create_debug_utils_messenger")?;
        Ok(DebugUtils { loader, messenger })
    }

    /// Routes a message through the validation callback. No-op without validation.
    pub fn submit_message(&self, severity: vk::DebugUtilsMessageSeverityFlagsEXT, msg: &CStr) {
        let Some(dbg) = &self.debug else {
            return;
        };
        let data = vk::DebugUtilsMessengerCallbackDataEXT {
            s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CALLBACK_DATA_EXT,
            p_message: msg.as_ptr(),
            ..Default::default()
        };
        unsafe {
            dbg.loader.submit_debug_utils_message(
                severity,
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL,
                &data,
            );
        }
    }

    pub unsafe fn create_surface(
        &self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<Surface> {
        let handle = unsafe {
            ash_window::create_surface(&self.entry, &self.instance, display, window, None)
        }
        .call("create_surface")?;
        Ok(Surface {
            loader: surface::Instance::new(&self.entry, &self.instance),
            handle,
        })
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn raw(&self) -> &Instance {
        &self.instance
    }

    /// Layers enabled on the instance; mirrored onto the device for old loaders.
    pub fn layer_ptrs(&self) -> Vec<*const c_char> {
        self.layers.iter().map(|l| l.as_ptr()).collect()
    }

    pub fn validation_enabled(&self) -> bool {
        self.debug.is_some()
    }
}

fn log_extension_inventory(entry: &Entry, required: &[*const c_char]) {
    debug!("required instance extensions:");
    for &ext in required {
        // SAFETY: pointers come from ash_window / ash constants, all static C strings.
        debug!("\t{}", unsafe { CStr::from_ptr(ext) }.to_string_lossy());
    }
    match unsafe { entry.enumerate_instance_extension_properties(None) } {
        Ok(available) => {
            debug!("available instance extensions:");
            for e in &available {
                if let Ok(name) = e.extension_name_as_c_str() {
                    debug!("\t{}", name.to_string_lossy());
                }
            }
        }
        Err(e) => warn!("enumerate_instance_extension_properties: {e}"),
    }
}

/// Owns a `VkSurfaceKHR`. Must be dropped before the [`VulkanInstance`] it came from.
pub struct Surface {
    loader: surface::Instance,
    handle: vk::SurfaceKHR,
}

impl Surface {
    pub fn loader(&self) -> &surface::Instance {
        &self.loader
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.handle, None) };
    }
}

// Children (device, surface) must already be gone; VkRenderer's field order sees to that.
impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some(dbg) = self.debug.take() {
                dbg.loader
                    .destroy_debug_utils_messenger(dbg.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(name: &CStr) -> vk::LayerProperties {
        let mut props = vk::LayerProperties::default();
        for (dst, &src) in props.layer_name.iter_mut().zip(name.to_bytes()) {
            *dst = src as c_char;
        }
        props
    }

    #[test]
    fn validation_layer_lookup() {
        let available = [layer(c"VK_LAYER_MESA_overlay"), layer(VALIDATION_LAYER)];
        assert!(has_layer(&available, VALIDATION_LAYER));
        assert!(!has_layer(&available[..1], VALIDATION_LAYER));
        assert!(!has_layer(&[], VALIDATION_LAYER));
    }

    #[test]
    fn messenger_hears_the_startup_message() {
        assert!(messenger_severities().contains(STARTUP_MESSAGE_SEVERITY));
        let ci = messenger_create_info();
        assert_eq!(ci.message_severity, messenger_severities());
        assert!(ci.pfn_user_callback.is_some());
    }

    #[test]
    fn messenger_covers_every_severity_the_callback_maps() {
        for sev in [
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
            vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        ] {
            assert!(messenger_severities().contains(sev), "{sev:?}");
        }
    }
}
