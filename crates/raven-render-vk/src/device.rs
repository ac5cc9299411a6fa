// SPDX-License-Identifier: CEPL-1.0
//! Physical device selection and logical device creation.
use crate::debug::{name_object, ObjectNamer};
use crate::error::{VkError, VkResultExt};
use ash::khr::{surface, swapchain};
use ash::vk;
use std::collections::BTreeSet;
use std::ffi::CStr;
use tracing::{debug, info, trace};

pub const DISCRETE_GPU_BONUS: u64 = 10_000;
pub const PREFERRED_SURFACE_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;

#[derive(Clone, Copy, Debug)]
pub struct QueueFamily {
    pub index: u32,
    pub properties: vk::QueueFamilyProperties,
    pub present: bool,
}

impl QueueFamily {
    pub fn graphics(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::GRAPHICS)
    }
    pub fn compute(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::COMPUTE)
    }
    pub fn transfer(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::TRANSFER)
    }
    pub fn sparse_binding(&self) -> bool {
        self.properties
            .queue_flags
            .contains(vk::QueueFlags::SPARSE_BINDING)
    }
}

/// Family index per queue role.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyAssignment {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
    pub transfer: Option<u32>,
    pub compute: Option<u32>,
}

impl QueueFamilyAssignment {
    pub fn from_families(families: &[QueueFamily]) -> Self {
        let gfx = families.iter().find(|f| f.graphics());
        let graphics = gfx.map(|f| f.index);

        // Graphics family first so one queue can serve both roles.
        let present = gfx
            .filter(|f| f.present)
            .or_else(|| families.iter().find(|f| f.present))
            .map(|f| f.index);

        // Graphics families always support transfer.
        let transfer = families
            .iter()
            .find(|f| f.transfer() && Some(f.index) != graphics)
            .map(|f| f.index)
            .or(graphics);

        let compute = families
            .iter()
            .find(|f| f.compute() && Some(f.index) != graphics)
            .or_else(|| families.iter().find(|f| f.compute()))
            .map(|f| f.index);

        Self {
            graphics,
            present,
            transfer,
            compute,
        }
    }

    /// Graphics and present are both required to drive a swapchain.
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Distinct families in ascending order; one queue is created per entry.
    pub fn unique_families(&self) -> Vec<u32> {
        [self.graphics, self.present, self.transfer, self.compute]
            .into_iter()
            .flatten()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// `"Graphics/Present/Transfer Queue"` style label per distinct family.
    pub fn queue_labels(&self) -> Vec<(u32, String)> {
        self.unique_families()
            .into_iter()
            .map(|family| {
                let roles: Vec<&str> = [
                    (self.graphics, "Graphics"),
                    (self.present, "Present"),
                    (self.transfer, "Transfer"),
                    (self.compute, "Compute"),
                ]
                .into_iter()
                .filter(|(idx, _)| *idx == Some(family))
                .map(|(_, role)| role)
                .collect();
                (family, format!("{} Queue", roles.join("/")))
            })
            .collect()
    }
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    match formats {
        [] => None,
        [only] if only.format == vk::Format::UNDEFINED => Some(vk::SurfaceFormatKHR {
            format: PREFERRED_SURFACE_FORMAT,
            color_space: only.color_space,
        }),
        _ => formats
            .iter()
            .copied()
            .find(|f| f.format == PREFERRED_SURFACE_FORMAT)
            .or(Some(formats[0])),
    }
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Raw per-device facts gathered during enumeration.
#[derive(Clone, Debug, Default)]
pub struct DeviceQuery {
    pub handle: vk::PhysicalDevice,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory: vk::PhysicalDeviceMemoryProperties,
    pub properties: vk::PhysicalDeviceProperties,
    pub surface_caps: vk::SurfaceCapabilitiesKHR,
    pub extensions: Vec<String>,
    pub queue_families: Vec<QueueFamily>,
    pub surface_formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    /// A per-device query failed; the device is listed but never chosen.
    pub query_failed: bool,
}

impl DeviceQuery {
    /// Keeps the value of a per-device query, or records the failure and
    /// falls back to `T::default()` so enumeration can move on.
    pub fn keep<T: Default>(
        &mut self,
        result: ash::prelude::VkResult<T>,
        call: &'static str,
    ) -> T {
        match result {
            Ok(v) => v,
            Err(e) => {
                debug!("{call} failed for {:?}: {e}", self.handle);
                self.query_failed = true;
                T::default()
            }
        }
    }
}

/// Snapshot of one physical device plus the choices derived from it.
#[derive(Clone, Debug)]
pub struct PhysicalDeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory: vk::PhysicalDeviceMemoryProperties,
    pub properties: vk::PhysicalDeviceProperties,
    pub surface_caps: vk::SurfaceCapabilitiesKHR,
    pub extensions: Vec<String>,
    pub queue_families: Vec<QueueFamily>,
    pub assignment: QueueFamilyAssignment,
    pub surface_format: Option<vk::SurfaceFormatKHR>,
    pub present_mode: vk::PresentModeKHR,
    pub score: u64,
}

impl PhysicalDeviceCandidate {
    pub fn evaluate(q: DeviceQuery) -> Self {
        let assignment = QueueFamilyAssignment::from_families(&q.queue_families);
        let surface_format = choose_surface_format(&q.surface_formats);
        let present_mode = choose_present_mode(&q.present_modes);
        let usable = !q.query_failed && assignment.is_complete();
        let score = if usable && surface_format.is_some() {
            score_properties(&q.properties)
        } else {
            0
        };

        Self {
            handle: q.handle,
            features: q.features,
            memory: q.memory,
            properties: q.properties,
            surface_caps: q.surface_caps,
            extensions: q.extensions,
            queue_families: q.queue_families,
            assignment,
            surface_format,
            present_mode,
            score,
        }
    }

    pub fn name(&self) -> String {
        self.properties
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed>".to_owned())
    }

    pub fn supports_extension(&self, name: &CStr) -> bool {
        let name = name.to_string_lossy();
        self.extensions.iter().any(|e| *e == name)
    }
}

/// Discrete bonus plus max 2D image size as a proxy for GPU class.
pub fn score_properties(props: &vk::PhysicalDeviceProperties) -> u64 {
    let bonus = if props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        DISCRETE_GPU_BONUS
    } else {
        0
    };
    bonus + u64::from(props.limits.max_image_dimension2_d)
}

/// Highest score wins; ties keep the first enumerated.
pub fn select_candidate(
    candidates: Vec<PhysicalDeviceCandidate>,
) -> Result<PhysicalDeviceCandidate, VkError> {
    let mut best: Option<PhysicalDeviceCandidate> = None;
    for c in candidates {
        if c.score == 0 {
            continue;
        }
        if best.as_ref().map_or(true, |b| c.score > b.score) {
            best = Some(c);
        }
    }
    best.ok_or(VkError::NoCompatibleDevice)
}

pub fn device_type_name(t: vk::PhysicalDeviceType) -> &'static str {
    match t {
        vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
        vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
        vk::PhysicalDeviceType::CPU => "CPU",
        _ => "Other",
    }
}

fn memory_type_flags(flags: vk::MemoryPropertyFlags) -> String {
    let names: Vec<&str> = [
        (vk::MemoryPropertyFlags::DEVICE_LOCAL, "Device Local"),
        (vk::MemoryPropertyFlags::HOST_VISIBLE, "Host Visible"),
        (vk::MemoryPropertyFlags::HOST_COHERENT, "Host Coherent"),
        (vk::MemoryPropertyFlags::HOST_CACHED, "Host Cached"),
    ]
    .into_iter()
    .filter(|(bit, _)| flags.contains(*bit))
    .map(|(_, n)| n)
    .collect();
    if names.is_empty() {
        "No flags".to_owned()
    } else {
        names.join(", ")
    }
}

fn dump_candidate(i: usize, c: &PhysicalDeviceCandidate) {
    trace!(" - Physical Device {i}: \"{}\"", c.name());
    trace!("   - Type: {}", device_type_name(c.properties.device_type));
    if let Some(f) = c.surface_format {
        trace!("   - Optimal Image Format: {:?}", f.format);
    }
    trace!("   - Optimal Present Mode: {:?}", c.present_mode);

    trace!("   - Memory Properties:");
    trace!("     - Heaps:");
    for (h, heap) in c.memory.memory_heaps_as_slice().iter().enumerate() {
        let mb = heap.size as f64 / 1024.0 / 1024.0;
        let local = if heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL) {
            ", Device Local"
        } else {
            ""
        };
        trace!("       - Heap {h}: {mb:.0}MB{local}");
    }
    trace!("     - Types:");
    for (t, ty) in c.memory.memory_types_as_slice().iter().enumerate() {
        trace!(
            "       - Type {t}: {} on Heap {}",
            memory_type_flags(ty.property_flags),
            ty.heap_index
        );
    }

    trace!("   - Device Queue Families:");
    let a = &c.assignment;
    let mark = |role: Option<u32>, idx: u32| if role == Some(idx) { "*" } else { "" };
    for f in &c.queue_families {
        let mut caps = Vec::new();
        if f.graphics() {
            caps.push(format!("Graphics{}", mark(a.graphics, f.index)));
        }
        if f.compute() {
            caps.push(format!("Compute{}", mark(a.compute, f.index)));
        }
        if f.transfer() {
            caps.push(format!("Transfer{}", mark(a.transfer, f.index)));
        }
        if f.sparse_binding() {
            caps.push("Sparse Binding".to_owned());
        }
        if f.present {
            caps.push(format!("Present{}", mark(a.present, f.index)));
        }
        trace!(
            "     - Family {}: {} Queues <{}>",
            f.index,
            f.properties.queue_count,
            caps.join(", ")
        );
    }

    trace!("   - Device Extensions:");
    for e in &c.extensions {
        trace!("     - {e}");
    }
    trace!("   - Score: {}", c.score);
}

unsafe fn query_device(
    instance: &ash::Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    handle: vk::PhysicalDevice,
) -> DeviceQuery {
    unsafe {
        let mut q = DeviceQuery {
            handle,
            features: instance.get_physical_device_features(handle),
            memory: instance.get_physical_device_memory_properties(handle),
            properties: instance.get_physical_device_properties(handle),
            ..Default::default()
        };

        let families = instance.get_physical_device_queue_family_properties(handle);
        let mut queue_families = Vec::with_capacity(families.len());
        for (i, properties) in families.into_iter().enumerate() {
            let index = i as u32;
            let present = q.keep(
                surface_loader.get_physical_device_surface_support(handle, index, surface),
                "vkGetPhysicalDeviceSurfaceSupportKHR",
            );
            queue_families.push(QueueFamily {
                index,
                properties,
                present,
            });
        }
        q.queue_families = queue_families;

        q.extensions = q
            .keep(
                instance.enumerate_device_extension_properties(handle),
                "vkEnumerateDeviceExtensionProperties",
            )
            .iter()
            .map(|e| {
                CStr::from_ptr(e.extension_name.as_ptr())
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        q.surface_caps = q.keep(
            surface_loader.get_physical_device_surface_capabilities(handle, surface),
            "vkGetPhysicalDeviceSurfaceCapabilitiesKHR",
        );
        q.surface_formats = q.keep(
            surface_loader.get_physical_device_surface_formats(handle, surface),
            "vkGetPhysicalDeviceSurfaceFormatsKHR",
        );
        q.present_modes = q.keep(
            surface_loader.get_physical_device_surface_present_modes(handle, surface),
            "vkGetPhysicalDeviceSurfacePresentModesKHR",
        );
        q
    }
}

/// Enumerates, scores and picks one physical device for `surface`.
pub unsafe fn select_device(
    instance: &ash::Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<PhysicalDeviceCandidate, VkError> {
    let handles =
        unsafe { instance.enumerate_physical_devices() }.call("vkEnumeratePhysicalDevices")?;
    debug!("Found {} Vulkan devices.", handles.len());

    let mut candidates = Vec::with_capacity(handles.len());
    for (i, &h) in handles.iter().enumerate() {
        let q = unsafe { query_device(instance, surface_loader, surface, h) };
        let c = PhysicalDeviceCandidate::evaluate(q);
        dump_candidate(i, &c);
        candidates.push(c);
    }

    let chosen = select_candidate(candidates)?;
    info!(
        "device: {} ({}), score {}",
        chosen.name(),
        device_type_name(chosen.properties.device_type),
        chosen.score
    );
    info!(
        "queues: graphics={:?} present={:?} transfer={:?} compute={:?}",
        chosen.assignment.graphics,
        chosen.assignment.present,
        chosen.assignment.transfer,
        chosen.assignment.compute
    );
    if let Some(f) = chosen.surface_format {
        info!(
            "surface format: {:?} / {:?}, present mode: {:?}",
            f.format, f.color_space, chosen.present_mode
        );
    }
    Ok(chosen)
}

/// One queue per role; roles sharing a family share the queue handle.
#[derive(Clone, Copy, Debug)]
pub struct DeviceQueues {
    pub graphics: vk::Queue,
    pub present: vk::Queue,
    pub transfer: vk::Queue,
    pub compute: Option<vk::Queue>,
}

pub unsafe fn create_logical_device(
    instance: &ash::Instance,
    candidate: &PhysicalDeviceCandidate,
) -> Result<ash::Device, VkError> {
    if !candidate.supports_extension(swapchain::NAME) {
        return Err(VkError::ExtensionOrLayerMissing {
            name: swapchain::NAME.to_string_lossy().into_owned(),
        });
    }

    let families = candidate.assignment.unique_families();
    let priorities = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .iter()
        .map(|&family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let device_exts = [swapchain::NAME.as_ptr()];
    let features = vk::PhysicalDeviceFeatures::default();

    trace!("--- Raven VkDevice Info ---");
    trace!(" - Queues to Create: {}", queue_infos.len());
    trace!(" - Requested Device Extensions:");
    trace!("   - {}", swapchain::NAME.to_string_lossy());

    let create_info = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };

    unsafe { instance.create_device(candidate.handle, &create_info, None) }.call("vkCreateDevice")
}

pub unsafe fn get_queues(
    device: &ash::Device,
    assignment: &QueueFamilyAssignment,
    namer: Option<&ObjectNamer>,
) -> Result<DeviceQueues, VkError> {
    let (Some(g), Some(p), Some(t)) = (assignment.graphics, assignment.present, assignment.transfer)
    else {
        return Err(VkError::NoCompatibleDevice);
    };
    let queues = unsafe {
        DeviceQueues {
            graphics: device.get_device_queue(g, 0),
            present: device.get_device_queue(p, 0),
            transfer: device.get_device_queue(t, 0),
            compute: assignment.compute.map(|c| device.get_device_queue(c, 0)),
        }
    };

    for (family, label) in assignment.queue_labels() {
        let q = unsafe { device.get_device_queue(family, 0) };
        name_object(namer, q, &label);
    }
    Ok(queues)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(index: u32, flags: vk::QueueFlags, present: bool) -> QueueFamily {
        QueueFamily {
            index,
            properties: vk::QueueFamilyProperties {
                queue_flags: flags,
                queue_count: 1,
                ..Default::default()
            },
            present,
        }
    }

    fn all_caps() -> vk::QueueFlags {
        vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER
    }

    fn bgra() -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn query(ty: vk::PhysicalDeviceType, max_dim: u32, name: &str) -> DeviceQuery {
        let mut properties = vk::PhysicalDeviceProperties {
            device_type: ty,
            ..Default::default()
        };
        properties.limits.max_image_dimension2_d = max_dim;
        for (dst, src) in properties.device_name.iter_mut().zip(name.bytes()) {
            *dst = src as std::os::raw::c_char;
        }
        DeviceQuery {
            properties,
            queue_families: vec![family(0, all_caps(), true)],
            surface_formats: vec![bgra()],
            present_modes: vec![vk::PresentModeKHR::FIFO],
            extensions: vec!["VK_KHR_swapchain".into()],
            ..Default::default()
        }
    }

    #[test]
    fn discrete_gpu_beats_integrated() {
        let integrated = query(vk::PhysicalDeviceType::INTEGRATED_GPU, 16384, "Integrated");
        let discrete = query(vk::PhysicalDeviceType::DISCRETE_GPU, 8192, "Discrete");
        let list = vec![
            PhysicalDeviceCandidate::evaluate(integrated),
            PhysicalDeviceCandidate::evaluate(discrete),
        ];
        assert_eq!(list[0].score, 16384);
        assert_eq!(list[1].score, 10_000 + 8192);

        let chosen = select_candidate(list).unwrap();
        assert_eq!(chosen.name(), "Discrete");
    }

    #[test]
    fn ties_keep_enumeration_order() {
        let a = query(vk::PhysicalDeviceType::DISCRETE_GPU, 4096, "First");
        let b = query(vk::PhysicalDeviceType::DISCRETE_GPU, 4096, "Second");
        let chosen = select_candidate(vec![
            PhysicalDeviceCandidate::evaluate(a),
            PhysicalDeviceCandidate::evaluate(b),
        ])
        .unwrap();
        assert_eq!(chosen.name(), "First");
    }

    #[test]
    fn zero_queue_families_is_not_compatible() {
        let mut q = query(vk::PhysicalDeviceType::DISCRETE_GPU, 16384, "Broken");
        q.queue_families.clear();
        let c = PhysicalDeviceCandidate::evaluate(q);
        assert_eq!(c.score, 0);
        assert_eq!(c.assignment, QueueFamilyAssignment::default());
        assert!(matches!(
            select_candidate(vec![c]),
            Err(VkError::NoCompatibleDevice)
        ));
    }

    #[test]
    fn empty_device_list_is_not_compatible() {
        assert!(matches!(
            select_candidate(Vec::new()),
            Err(VkError::NoCompatibleDevice)
        ));
    }

    #[test]
    fn device_without_present_or_formats_scores_zero() {
        let mut no_present = query(vk::PhysicalDeviceType::DISCRETE_GPU, 16384, "A");
        no_present.queue_families = vec![family(0, all_caps(), false)];
        assert_eq!(PhysicalDeviceCandidate::evaluate(no_present).score, 0);

        let mut no_formats = query(vk::PhysicalDeviceType::DISCRETE_GPU, 16384, "B");
        no_formats.surface_formats.clear();
        assert_eq!(PhysicalDeviceCandidate::evaluate(no_formats).score, 0);
    }

    #[test]
    fn failed_query_skips_device_instead_of_aborting() {
        let mut lost = query(vk::PhysicalDeviceType::CPU, 16384, "Lavapipe");
        let present: bool = lost.keep(
            Err(vk::Result::ERROR_SURFACE_LOST_KHR),
            "vkGetPhysicalDeviceSurfaceSupportKHR",
        );
        assert!(!present);
        assert!(lost.query_failed);

        let gpu = query(vk::PhysicalDeviceType::DISCRETE_GPU, 8192, "Discrete");
        let list = vec![
            PhysicalDeviceCandidate::evaluate(lost),
            PhysicalDeviceCandidate::evaluate(gpu),
        ];
        assert_eq!(list[0].score, 0);
        assert_eq!(select_candidate(list).unwrap().name(), "Discrete");
    }

    #[test]
    fn every_query_failing_is_not_compatible() {
        let mut q = query(vk::PhysicalDeviceType::DISCRETE_GPU, 16384, "Gone");
        let formats: Vec<vk::SurfaceFormatKHR> = q.keep(
            Err(vk::Result::ERROR_SURFACE_LOST_KHR),
            "vkGetPhysicalDeviceSurfaceFormatsKHR",
        );
        assert!(formats.is_empty());
        assert!(matches!(
            select_candidate(vec![PhysicalDeviceCandidate::evaluate(q)]),
            Err(VkError::NoCompatibleDevice)
        ));
    }

    #[test]
    fn successful_query_passes_value_through() {
        let mut q = query(vk::PhysicalDeviceType::DISCRETE_GPU, 16384, "Ok");
        assert!(q.keep(Ok(true), "vkGetPhysicalDeviceSurfaceSupportKHR"));
        assert!(!q.query_failed);
    }

    #[test]
    fn winner_is_strict_maximum() {
        let dims = [1024u32, 8192, 4096, 8192, 2048];
        let list: Vec<_> = dims
            .iter()
            .enumerate()
            .map(|(i, &d)| {
                PhysicalDeviceCandidate::evaluate(query(
                    vk::PhysicalDeviceType::INTEGRATED_GPU,
                    d,
                    &format!("gpu{i}"),
                ))
            })
            .collect();
        assert_eq!(select_candidate(list).unwrap().name(), "gpu1");
    }

    #[test]
    fn single_family_serves_every_role() {
        let a = QueueFamilyAssignment::from_families(&[family(0, all_caps(), true)]);
        assert_eq!(a.graphics, Some(0));
        assert_eq!(a.present, Some(0));
        assert_eq!(a.transfer, Some(0));
        assert_eq!(a.compute, Some(0));
        assert_eq!(a.unique_families(), vec![0]);
        assert_eq!(
            a.queue_labels(),
            vec![(0, "Graphics/Present/Transfer/Compute Queue".to_owned())]
        );
    }

    #[test]
    fn dedicated_families_are_preferred() {
        let families = [
            family(0, all_caps(), true),
            family(1, vk::QueueFlags::TRANSFER, false),
            family(2, vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, false),
        ];
        let a = QueueFamilyAssignment::from_families(&families);
        assert_eq!(a.graphics, Some(0));
        assert_eq!(a.present, Some(0));
        assert_eq!(a.transfer, Some(1));
        assert_eq!(a.compute, Some(2));
        assert_eq!(a.unique_families(), vec![0, 1, 2]);
    }

    #[test]
    fn present_falls_back_to_another_family() {
        let families = [
            family(0, vk::QueueFlags::GRAPHICS, false),
            family(1, vk::QueueFlags::TRANSFER, true),
        ];
        let a = QueueFamilyAssignment::from_families(&families);
        assert_eq!(a.graphics, Some(0));
        assert_eq!(a.present, Some(1));
        assert!(a.is_complete());
    }

    #[test]
    fn transfer_always_resolves_and_compute_only_when_advertised() {
        let shapes: [&[vk::QueueFlags]; 4] = [
            &[vk::QueueFlags::GRAPHICS],
            &[vk::QueueFlags::GRAPHICS, vk::QueueFlags::GRAPHICS],
            &[vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE],
            &[vk::QueueFlags::TRANSFER, vk::QueueFlags::GRAPHICS],
        ];
        for shape in shapes {
            let families: Vec<_> = shape
                .iter()
                .enumerate()
                .map(|(i, &f)| family(i as u32, f, true))
                .collect();
            let a = QueueFamilyAssignment::from_families(&families);
            assert!(a.graphics.is_some());
            assert!(a.transfer.is_some(), "{shape:?}");
            let any_compute = families.iter().any(|f| f.compute());
            assert_eq!(a.compute.is_some(), any_compute, "{shape:?}");
        }
    }

    #[test]
    fn compute_falls_back_to_graphics_family() {
        let families = [family(0, all_caps(), true), family(1, vk::QueueFlags::TRANSFER, false)];
        let a = QueueFamilyAssignment::from_families(&families);
        assert_eq!(a.compute, Some(0));
    }

    #[test]
    fn surface_format_preference() {
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[srgb, bgra()]), Some(bgra()));
        assert_eq!(choose_surface_format(&[srgb]), Some(srgb));
        assert_eq!(choose_surface_format(&[]), None);

        let undefined = vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[undefined]), Some(bgra()));
    }

    #[test]
    fn present_mode_preference() {
        use vk::PresentModeKHR as P;
        assert_eq!(choose_present_mode(&[P::FIFO, P::IMMEDIATE, P::MAILBOX]), P::MAILBOX);
        assert_eq!(choose_present_mode(&[P::IMMEDIATE, P::FIFO]), P::IMMEDIATE);
        assert_eq!(choose_present_mode(&[P::FIFO_RELAXED]), P::FIFO);
        assert_eq!(choose_present_mode(&[]), P::FIFO);
    }

    #[test]
    fn swapchain_extension_lookup() {
        let c = PhysicalDeviceCandidate::evaluate(query(
            vk::PhysicalDeviceType::DISCRETE_GPU,
            1,
            "x",
        ));
        assert!(c.supports_extension(swapchain::NAME));
        assert!(!c.supports_extension(ash::ext::hdr_metadata::NAME));
    }
}
