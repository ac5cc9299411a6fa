// SPDX-License-Identifier: CEPL-1.0
use crate::debug::{messenger_create_info, DebugMessenger};
use crate::error::{VkError, VkResultExt};
use ash::khr::surface;
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::{c_void, CStr, CString};
use tracing::{debug, trace, warn};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance layers and extensions after checking them against the loader.
#[derive(Debug, PartialEq, Eq)]
pub struct InstancePlan {
    pub layers: Vec<CString>,
    pub extensions: Vec<CString>,
    pub validation: bool,
}

pub struct InstanceBuilder {
    app_name: CString,
    app_version: u32,
    api_version: u32,
    validation: bool,
    extensions: Vec<CString>,
}

impl InstanceBuilder {
    pub fn new(app_name: &str) -> Self {
        Self {
            app_name: CString::new(app_name).unwrap_or_else(|_| CString::from(c"Raven")),
            app_version: vk::make_api_version(0, 1, 0, 0),
            api_version: vk::API_VERSION_1_2,
            validation: false,
            extensions: Vec::new(),
        }
    }

    pub fn app_version(mut self, major: u32, minor: u32) -> Self {
        self.app_version = vk::make_api_version(0, major, minor, 0);
        self
    }

    pub fn api_version(mut self, major: u32, minor: u32) -> Self {
        self.api_version = vk::make_api_version(0, major, minor, 0);
        self
    }

    pub fn request_validation(mut self, on: bool) -> Self {
        self.validation = on;
        self
    }

    pub fn require_extension(mut self, name: &CStr) -> Self {
        if !self.extensions.iter().any(|e| e.as_c_str() == name) {
            self.extensions.push(name.to_owned());
        }
        self
    }

    /// Required pieces missing are errors; missing validation pieces only
    /// disable validation.
    pub fn plan(
        &self,
        loader_version: u32,
        available_layers: &[CString],
        available_extensions: &[CString],
    ) -> Result<InstancePlan, VkError> {
        if loader_version < self.api_version {
            return Err(VkError::ExtensionOrLayerMissing {
                name: format!(
                    "Vulkan {}.{} (loader provides {}.{})",
                    vk::api_version_major(self.api_version),
                    vk::api_version_minor(self.api_version),
                    vk::api_version_major(loader_version),
                    vk::api_version_minor(loader_version),
                ),
            });
        }

        let has_ext = |name: &CStr| available_extensions.iter().any(|e| e.as_c_str() == name);
        if let Some(missing) = self.extensions.iter().find(|e| !has_ext(e)) {
            return Err(VkError::ExtensionOrLayerMissing {
                name: missing.to_string_lossy().into_owned(),
            });
        }

        let mut plan = InstancePlan {
            layers: Vec::new(),
            extensions: self.extensions.clone(),
            validation: false,
        };

        if self.validation {
            let has_layer = available_layers
                .iter()
                .any(|l| l.as_c_str() == VALIDATION_LAYER);
            let has_debug_utils = has_ext(ash::ext::debug_utils::NAME);
            if !has_layer {
                warn!(
                    "validation requested but {} is not available",
                    VALIDATION_LAYER.to_string_lossy()
                );
            }
            if !has_debug_utils {
                warn!(
                    "validation requested but {} is not available",
                    ash::ext::debug_utils::NAME.to_string_lossy()
                );
            }
            if has_layer && has_debug_utils {
                plan.layers.push(VALIDATION_LAYER.to_owned());
                plan.extensions
                    .push(ash::ext::debug_utils::NAME.to_owned());
                plan.validation = true;
            } else {
                warn!("continuing without validation");
            }
        }

        Ok(plan)
    }

    pub unsafe fn build(&self, entry: &Entry) -> Result<(Instance, bool), VkError> {
        let loader_version = unsafe { entry.try_enumerate_instance_version() }
            .call("vkEnumerateInstanceVersion")?
            .unwrap_or(vk::API_VERSION_1_0);
        let layers: Vec<CString> = unsafe { entry.enumerate_instance_layer_properties() }
            .call("vkEnumerateInstanceLayerProperties")?
            .iter()
            .map(|p| unsafe { CStr::from_ptr(p.layer_name.as_ptr()) }.to_owned())
            .collect();
        let extensions: Vec<CString> =
            unsafe { entry.enumerate_instance_extension_properties(None) }
                .call("vkEnumerateInstanceExtensionProperties")?
                .iter()
                .map(|p| unsafe { CStr::from_ptr(p.extension_name.as_ptr()) }.to_owned())
                .collect();

        let plan = self.plan(loader_version, &layers, &extensions)?;

        trace!("--- Raven VkInstance Info ---");
        trace!(" - Requested API: {}.{}", vk::api_version_major(self.api_version), vk::api_version_minor(self.api_version));
        for l in &plan.layers {
            trace!(" - Layer: {}", l.to_string_lossy());
        }
        for e in &plan.extensions {
            trace!(" - Extension: {}", e.to_string_lossy());
        }

        let layer_ptrs: Vec<*const std::os::raw::c_char> =
            plan.layers.iter().map(|l| l.as_ptr()).collect();
        let ext_ptrs: Vec<*const std::os::raw::c_char> =
            plan.extensions.iter().map(|e| e.as_ptr()).collect();

        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: self.app_name.as_ptr(),
            application_version: self.app_version,
            p_engine_name: self.app_name.as_ptr(),
            engine_version: self.app_version,
            api_version: self.api_version,
            ..Default::default()
        };

        let debug_ci = messenger_create_info();
        let p_next: *const c_void = if plan.validation {
            (&debug_ci as *const vk::DebugUtilsMessengerCreateInfoEXT).cast()
        } else {
            std::ptr::null()
        };

        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            p_next,
            p_application_info: &app_info,
            enabled_layer_count: layer_ptrs.len() as u32,
            pp_enabled_layer_names: layer_ptrs.as_ptr(),
            enabled_extension_count: ext_ptrs.len() as u32,
            pp_enabled_extension_names: ext_ptrs.as_ptr(),
            ..Default::default()
        };

        let instance =
            unsafe { entry.create_instance(&create_info, None) }.call("vkCreateInstance")?;
        Ok((instance, plan.validation))
    }
}

/// Instance-scoped state: loader, instance, optional messenger and the window surface.
///
/// STRICT ORDER: instance → messenger → surface. Devices are queried against
/// this surface, so it must exist before selection.
pub struct InstanceContext {
    pub entry: Entry,
    pub instance: Instance,
    pub debug: Option<DebugMessenger>,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
}

impl InstanceContext {
    pub unsafe fn new(
        app_name: &str,
        validation: bool,
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
    ) -> Result<Self, VkError> {
        let dh = display.display_handle()?.as_raw();
        let wh = window.window_handle()?.as_raw();

        let entry = unsafe { Entry::load() }?;

        let wsi = ash_window::enumerate_required_extensions(dh)
            .call("enumerate_required_extensions")?;
        let mut builder = InstanceBuilder::new(app_name)
            .app_version(1, 0)
            .api_version(1, 2)
            .request_validation(validation);
        for &ext in wsi {
            builder = builder.require_extension(unsafe { CStr::from_ptr(ext) });
        }

        let (instance, validation) = unsafe { builder.build(&entry) }?;
        debug!("Vulkan instance created (validation={validation})");

        let debug = if validation {
            match unsafe { DebugMessenger::new(&entry, &instance) } {
                Ok(m) => Some(m),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = match unsafe { ash_window::create_surface(&entry, &instance, dh, wh, None) }
            .call("create_surface")
        {
            Ok(s) => s,
            Err(e) => {
                if let Some(m) = &debug {
                    unsafe { m.destroy() };
                }
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };
        debug!("Vulkan surface created <{:?}>", surface);

        Ok(Self {
            entry,
            instance,
            debug,
            surface_loader,
            surface,
        })
    }

    pub fn validation(&self) -> bool {
        self.debug.is_some()
    }

    /// Surface, then messenger, then instance. Every device child must already be gone.
    pub unsafe fn destroy(&self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some(m) = &self.debug {
                m.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&CStr]) -> Vec<CString> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn validation_enabled_when_layer_and_extension_exist() {
        let b = InstanceBuilder::new("Raven")
            .require_extension(ash::khr::surface::NAME)
            .request_validation(true);
        let plan = b
            .plan(
                vk::API_VERSION_1_3,
                &names(&[VALIDATION_LAYER]),
                &names(&[ash::khr::surface::NAME, ash::ext::debug_utils::NAME]),
            )
            .unwrap();
        assert!(plan.validation);
        assert_eq!(plan.layers, names(&[VALIDATION_LAYER]));
        assert!(plan
            .extensions
            .contains(&ash::ext::debug_utils::NAME.to_owned()));
    }

    #[test]
    fn missing_validation_layer_falls_back() {
        let b = InstanceBuilder::new("Raven").request_validation(true);
        let plan = b
            .plan(
                vk::API_VERSION_1_2,
                &[],
                &names(&[ash::ext::debug_utils::NAME]),
            )
            .unwrap();
        assert!(!plan.validation);
        assert!(plan.layers.is_empty());
        assert!(plan.extensions.is_empty());
    }

    #[test]
    fn missing_required_extension_is_fatal() {
        let b = InstanceBuilder::new("Raven").require_extension(ash::khr::surface::NAME);
        let err = b.plan(vk::API_VERSION_1_2, &[], &[]).unwrap_err();
        match err {
            VkError::ExtensionOrLayerMissing { name } => assert_eq!(name, "VK_KHR_surface"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn old_loader_is_rejected() {
        let b = InstanceBuilder::new("Raven").api_version(1, 2);
        assert!(matches!(
            b.plan(vk::API_VERSION_1_0, &[], &[]),
            Err(VkError::ExtensionOrLayerMissing { .. })
        ));
    }

    #[test]
    fn duplicate_extensions_are_collapsed() {
        let b = InstanceBuilder::new("Raven")
            .require_extension(ash::khr::surface::NAME)
            .require_extension(ash::khr::surface::NAME);
        let plan = b
            .plan(vk::API_VERSION_1_2, &[], &names(&[ash::khr::surface::NAME]))
            .unwrap();
        assert_eq!(plan.extensions.len(), 1);
    }
}
