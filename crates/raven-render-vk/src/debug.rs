// SPDX-License-Identifier: CEPL-1.0
//! Validation messenger and object naming (`VK_EXT_debug_utils`).
use crate::error::{VkError, VkResultExt};
use ash::ext::debug_utils;
use ash::vk;
use std::ffi::{c_void, CStr, CString};
use tracing::{debug, error, trace, warn};

/// One entry of a message's related-object list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelatedObject {
    pub object_type: vk::ObjectType,
    pub handle: u64,
    pub name: Option<String>,
}

pub fn severity_tag(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> &'static str {
    use vk::DebugUtilsMessageSeverityFlagsEXT as S;
    if severity.contains(S::ERROR) {
        "ERR"
    } else if severity.contains(S::WARNING) {
        "WRN"
    } else if severity.contains(S::INFO) {
        "INF"
    } else {
        "VRB"
    }
}

fn severity_word(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> &'static str {
    match severity_tag(severity) {
        "ERR" => "Error",
        "WRN" => "Warning",
        "INF" => "Info",
        _ => "Verbose",
    }
}

/// `GEN|PRF|VLD` subset for the message types present.
pub fn type_tag(types: vk::DebugUtilsMessageTypeFlagsEXT) -> String {
    use vk::DebugUtilsMessageTypeFlagsEXT as T;
    [(T::GENERAL, "GEN"), (T::PERFORMANCE, "PRF"), (T::VALIDATION, "VLD")]
        .into_iter()
        .filter(|(bit, _)| types.contains(*bit))
        .map(|(_, tag)| tag)
        .collect::<Vec<_>>()
        .join("|")
}

/// Layer messages look like `<header> | MessageID = 0x.. | <text>`. Pure validation
/// messages are rewritten to a readable block; anything else passes through.
pub fn format_message(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    id_name: &str,
    message: &str,
    objects: &[RelatedObject],
) -> String {
    if types != vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION {
        return message.to_owned();
    }
    let Some(first) = message.find('|') else {
        return message.to_owned();
    };
    let Some(second) = message[first + 1..].find('|').map(|p| p + first + 1) else {
        return message.to_owned();
    };

    let text = message.get(second + 2..).unwrap_or_default();
    let mut out = format!(
        "Validation {}: {}\n - {}",
        severity_word(severity),
        id_name,
        text
    );
    if !objects.is_empty() {
        out.push_str("\n - Related Objects:");
        for (i, obj) in objects.iter().enumerate() {
            out.push_str(&format!(
                "\n   - Object {}: {:?} <{:#x}>",
                i, obj.object_type, obj.handle
            ));
            if let Some(name) = &obj.name {
                out.push_str(&format!(" \"{name}\""));
            }
        }
    }
    out
}

unsafe fn lossy(ptr: *const std::os::raw::c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        // SAFETY: the layer hands us NUL-terminated strings valid for the callback.
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: non-null callback data is valid for the duration of the call.
    let data = unsafe { &*data };
    let message = unsafe { lossy(data.p_message) }.unwrap_or_default();
    let id_name = unsafe { lossy(data.p_message_id_name) }.unwrap_or_default();

    let objects: Vec<RelatedObject> = if data.object_count == 0 || data.p_objects.is_null() {
        Vec::new()
    } else {
        // SAFETY: `p_objects` holds `object_count` entries.
        unsafe { std::slice::from_raw_parts(data.p_objects, data.object_count as usize) }
            .iter()
            .map(|o| RelatedObject {
                object_type: o.object_type,
                handle: o.object_handle,
                name: unsafe { lossy(o.p_object_name) },
            })
            .collect()
    };

    let text = format_message(severity, types, &id_name, &message, &objects);
    let tag = format!("[Vulkan-{}-{}]", severity_tag(severity), type_tag(types));

    use vk::DebugUtilsMessageSeverityFlagsEXT as S;
    if severity.contains(S::ERROR) {
        error!("{tag} {text}");
    } else if severity.contains(S::WARNING) {
        warn!("{tag} {text}");
    } else if severity.contains(S::INFO) {
        if types.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
            debug!("{tag} {text}");
        } else {
            trace!("{tag} {text}");
        }
    } else {
        trace!("{tag} {text}");
    }
    vk::FALSE
}

/// Chained into instance creation too, so create/destroy-time messages are caught.
pub fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    }
}

pub struct DebugMessenger {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub unsafe fn new(entry: &ash::Entry, instance: &ash::Instance) -> Result<Self, VkError> {
        let loader = debug_utils::Instance::new(entry, instance);
        let ci = messenger_create_info();
        let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None) }
            .call("vkCreateDebugUtilsMessengerEXT")?;
        Ok(Self { loader, messenger })
    }

    /// Must run before the instance is destroyed.
    pub unsafe fn destroy(&self) {
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None)
        };
    }
}

/// Attaches debug names to objects while validation is on.
pub struct ObjectNamer {
    loader: debug_utils::Device,
}

impl ObjectNamer {
    pub fn new(instance: &ash::Instance, device: &ash::Device) -> Self {
        Self {
            loader: debug_utils::Device::new(instance, device),
        }
    }

    /// Best effort; a failed name is logged, never fatal.
    pub fn name<H: vk::Handle>(&self, handle: H, name: &str) {
        let Ok(cname) = CString::new(name) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&cname);
        if let Err(e) = unsafe { self.loader.set_debug_utils_object_name(&info) } {
            warn!("vkSetDebugUtilsObjectNameEXT(\"{name}\") failed: {e:?}");
        }
    }
}

/// Names through `namer` when one is present.
pub fn name_object<H: vk::Handle>(namer: Option<&ObjectNamer>, handle: H, name: &str) {
    if let Some(n) = namer {
        n.name(handle, name);
    }
}
