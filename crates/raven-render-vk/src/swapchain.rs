// SPDX-License-Identifier: CEPL-1.0
//! Presentable image chain, its depth target and framebuffers.
use crate::debug::{name_object, ObjectNamer};
use crate::device::{PhysicalDeviceCandidate, QueueFamilyAssignment};
use crate::error::{VkError, VkResultExt};
use crate::memory::{Allocator, GpuImage};
use ash::khr::{surface, swapchain};
use ash::vk;
use raven_render::RenderSize;
use tracing::{debug, info};

pub const DEPTH_FORMATS: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// First of `DEPTH_FORMATS` that `supports` accepts.
pub fn choose_depth_format(
    supports: impl Fn(vk::Format) -> bool,
) -> Result<vk::Format, VkError> {
    DEPTH_FORMATS
        .into_iter()
        .find(|&f| supports(f))
        .ok_or(VkError::NoSupportedFormat { what: "depth" })
}

pub fn depth_has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// Aspect of the depth view; combined formats must name both planes.
pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if depth_has_stencil(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

/// `min + 1`, capped by `max` unless the surface reports no maximum (0).
pub fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

pub fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

pub fn choose_pre_transform(caps: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    }
}

pub fn choose_composite_alpha(
    supported: vk::CompositeAlphaFlagsKHR,
) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|&a| supported.contains(a))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Creation parameters derived from live surface capabilities.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub image_count: u32,
    pub extent: vk::Extent2D,
    pub sharing_mode: vk::SharingMode,
    /// Families sharing the images; empty for exclusive sharing.
    pub queue_families: Vec<u32>,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
}

impl SwapchainPlan {
    pub fn new(
        caps: &vk::SurfaceCapabilitiesKHR,
        assignment: &QueueFamilyAssignment,
        want: RenderSize,
    ) -> Self {
        let (sharing_mode, queue_families) = match (assignment.graphics, assignment.present) {
            (Some(g), Some(p)) if g != p => (vk::SharingMode::CONCURRENT, vec![g, p]),
            _ => (vk::SharingMode::EXCLUSIVE, Vec::new()),
        };
        Self {
            image_count: image_count(caps),
            extent: extent_from_caps(caps, want),
            sharing_mode,
            queue_families,
            pre_transform: choose_pre_transform(caps),
            composite_alpha: choose_composite_alpha(caps.supported_composite_alpha),
        }
    }
}

/// Result of presenting or acquiring against the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapchainStatus {
    Optimal,
    Suboptimal,
    OutOfDate,
}

impl SwapchainStatus {
    pub fn needs_recreate(self) -> bool {
        self != SwapchainStatus::Optimal
    }
}

pub struct DepthTarget {
    pub format: vk::Format,
    pub image: GpuImage,
    pub view: vk::ImageView,
}

/// The live chain. `images`, `views` and `framebuffers` always have equal length.
pub struct SwapchainState {
    pub handle: vk::SwapchainKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub depth: DepthTarget,
    pub framebuffers: Vec<vk::Framebuffer>,
}

pub struct SwapchainManager {
    device: ash::Device,
    loader: swapchain::Device,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    physical: vk::PhysicalDevice,
    assignment: QueueFamilyAssignment,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    depth_format: vk::Format,
    render_pass: vk::RenderPass,
    state: Option<SwapchainState>,
}

impl SwapchainManager {
    pub unsafe fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        surface_loader: &surface::Instance,
        surface: vk::SurfaceKHR,
        candidate: &PhysicalDeviceCandidate,
    ) -> Result<Self, VkError> {
        let surface_format = candidate
            .surface_format
            .ok_or(VkError::NoSupportedFormat { what: "surface" })?;
        let depth_format = choose_depth_format(|f| {
            let props =
                unsafe { instance.get_physical_device_format_properties(candidate.handle, f) };
            props
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })?;
        info!("depth format: {:?}", depth_format);

        let render_pass =
            unsafe { create_render_pass(device, surface_format.format, depth_format) }?;
        debug!("render pass created <{:?}>", render_pass);

        Ok(Self {
            device: device.clone(),
            loader: swapchain::Device::new(instance, device),
            surface_loader: surface_loader.clone(),
            surface,
            physical: candidate.handle,
            assignment: candidate.assignment,
            surface_format,
            present_mode: candidate.present_mode,
            depth_format,
            render_pass,
            state: None,
        })
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn state(&self) -> Option<&SwapchainState> {
        self.state.as_ref()
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.state.as_ref().map(|s| s.extent)
    }

    /// Builds the chain at `want`, handing any previous chain to the driver as a hint.
    pub unsafe fn create(
        &mut self,
        want: RenderSize,
        allocator: &Allocator,
        namer: Option<&ObjectNamer>,
    ) -> Result<(), VkError> {
        let caps = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical, self.surface)
        }
        .call("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;
        let plan = SwapchainPlan::new(&caps, &self.assignment, want);

        // Old framebuffers, views and depth go now; only the bare handle is kept as the hint.
        let old_handle = match self.state.take() {
            Some(old) => unsafe { release_targets(&self.device, old) },
            None => vk::SwapchainKHR::null(),
        };

        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: self.surface,
            min_image_count: plan.image_count,
            image_format: self.surface_format.format,
            image_color_space: self.surface_format.color_space,
            image_extent: plan.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: plan.sharing_mode,
            queue_family_index_count: plan.queue_families.len() as u32,
            p_queue_family_indices: plan.queue_families.as_ptr(),
            pre_transform: plan.pre_transform,
            composite_alpha: plan.composite_alpha,
            present_mode: self.present_mode,
            clipped: vk::TRUE,
            old_swapchain: old_handle,
            ..Default::default()
        };

        let created = unsafe { self.loader.create_swapchain(&info, None) }
            .call("vkCreateSwapchainKHR");
        // The old chain is retired either way once the driver has seen the hint.
        if old_handle != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old_handle, None) };
        }
        let handle = created?;

        let state = unsafe { self.build_targets(handle, plan.extent, allocator) };
        let state = match state {
            Ok(s) => s,
            Err(e) => {
                unsafe { self.loader.destroy_swapchain(handle, None) };
                return Err(e);
            }
        };
        name_object(namer, handle, "Swapchain");
        for (i, &view) in state.views.iter().enumerate() {
            name_object(namer, view, &format!("Swapchain View {i}"));
        }
        name_object(namer, state.depth.image.handle(), "Depth Image");

        info!(
            "swapchain: {}x{}, {} images (requested {}), {:?}, {:?}",
            plan.extent.width,
            plan.extent.height,
            state.images.len(),
            plan.image_count,
            self.present_mode,
            plan.sharing_mode
        );
        self.state = Some(state);
        Ok(())
    }

    // STRICT ORDER (recreate):
    // 1) device_wait_idle() so nothing in flight references the old chain
    // 2) Destroy framebuffers, color views, depth target
    // 3) Create NEW swapchain with the old handle as hint, then destroy the old one
    // 4) Rebuild views, depth target and framebuffers 1:1 against the new images
    pub unsafe fn recreate(
        &mut self,
        want: RenderSize,
        allocator: &Allocator,
        namer: Option<&ObjectNamer>,
    ) -> Result<(), VkError> {
        unsafe { self.device.device_wait_idle() }.call("vkDeviceWaitIdle")?;
        unsafe { self.create(want, allocator, namer) }
    }

    unsafe fn build_targets(
        &self,
        handle: vk::SwapchainKHR,
        extent: vk::Extent2D,
        allocator: &Allocator,
    ) -> Result<SwapchainState, VkError> {
        let images =
            unsafe { self.loader.get_swapchain_images(handle) }.call("vkGetSwapchainImagesKHR")?;

        let mut views = Vec::with_capacity(images.len());
        for &image in &images {
            match unsafe {
                create_view(
                    &self.device,
                    image,
                    self.surface_format.format,
                    vk::ImageAspectFlags::COLOR,
                )
            } {
                Ok(v) => views.push(v),
                Err(e) => {
                    unsafe { destroy_views(&self.device, &views) };
                    return Err(e);
                }
            }
        }

        let depth = match unsafe { self.create_depth(extent, allocator) } {
            Ok(d) => d,
            Err(e) => {
                unsafe { destroy_views(&self.device, &views) };
                return Err(e);
            }
        };

        let mut framebuffers = Vec::with_capacity(views.len());
        for &view in &views {
            let attachments = [view, depth.view];
            let info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass: self.render_pass,
                attachment_count: attachments.len() as u32,
                p_attachments: attachments.as_ptr(),
                width: extent.width,
                height: extent.height,
                layers: 1,
                ..Default::default()
            };
            match unsafe { self.device.create_framebuffer(&info, None) }
                .call("vkCreateFramebuffer")
            {
                Ok(fb) => framebuffers.push(fb),
                Err(e) => {
                    let partial = SwapchainState {
                        handle,
                        extent,
                        images,
                        views,
                        depth,
                        framebuffers,
                    };
                    unsafe { release_targets(&self.device, partial) };
                    return Err(e);
                }
            }
        }

        Ok(SwapchainState {
            handle,
            extent,
            images,
            views,
            depth,
            framebuffers,
        })
    }

    unsafe fn create_depth(
        &self,
        extent: vk::Extent2D,
        allocator: &Allocator,
    ) -> Result<DepthTarget, VkError> {
        let info = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: self.depth_format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = allocator.create_image(&info, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        let view = unsafe {
            create_view(
                &self.device,
                image.handle(),
                self.depth_format,
                depth_aspect(self.depth_format),
            )
        }?;
        Ok(DepthTarget {
            format: self.depth_format,
            image,
            view,
        })
    }

    pub unsafe fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
    ) -> Result<(Option<u32>, SwapchainStatus), VkError> {
        let Some(state) = &self.state else {
            return Ok((None, SwapchainStatus::OutOfDate));
        };
        match unsafe {
            self.loader
                .acquire_next_image(state.handle, u64::MAX, semaphore, vk::Fence::null())
        } {
            Ok((index, false)) => Ok((Some(index), SwapchainStatus::Optimal)),
            Ok((index, true)) => Ok((Some(index), SwapchainStatus::Suboptimal)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok((None, SwapchainStatus::OutOfDate)),
            Err(e) => Err(VkError::from_vk("vkAcquireNextImageKHR", e)),
        }
    }

    pub unsafe fn present(
        &self,
        queue: vk::Queue,
        wait: vk::Semaphore,
        image_index: u32,
    ) -> Result<SwapchainStatus, VkError> {
        let Some(state) = &self.state else {
            return Ok(SwapchainStatus::OutOfDate);
        };
        let info = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &state.handle,
            p_image_indices: &image_index,
            ..Default::default()
        };
        match unsafe { self.loader.queue_present(queue, &info) } {
            Ok(false) => Ok(SwapchainStatus::Optimal),
            Ok(true) => Ok(SwapchainStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SwapchainStatus::OutOfDate),
            Err(e) => Err(VkError::from_vk("vkQueuePresentKHR", e)),
        }
    }

    /// Chain targets, the swapchain, then the render pass. Device must be idle.
    pub unsafe fn destroy(&mut self) {
        unsafe {
            if let Some(state) = self.state.take() {
                let handle = release_targets(&self.device, state);
                self.loader.destroy_swapchain(handle, None);
            }
            if self.render_pass != vk::RenderPass::null() {
                self.device.destroy_render_pass(self.render_pass, None);
                self.render_pass = vk::RenderPass::null();
            }
        }
    }
}

unsafe fn create_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
) -> Result<vk::ImageView, VkError> {
    let info = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    unsafe { device.create_image_view(&info, None) }.call("vkCreateImageView")
}

/// Framebuffers, views, then the depth view and image. Hands back the bare
/// swapchain handle for the caller to destroy last.
unsafe fn release_targets(device: &ash::Device, state: SwapchainState) -> vk::SwapchainKHR {
    let SwapchainState {
        handle,
        views,
        depth,
        framebuffers,
        ..
    } = state;
    unsafe {
        for fb in framebuffers {
            device.destroy_framebuffer(fb, None);
        }
        destroy_views(device, &views);
        device.destroy_image_view(depth.view, None);
    }
    drop(depth);
    handle
}

unsafe fn destroy_views(device: &ash::Device, views: &[vk::ImageView]) {
    for &v in views {
        unsafe { device.destroy_image_view(v, None) };
    }
}

/// Color (clear → store → present) plus depth (clear → discard), one subpass.
unsafe fn create_render_pass(
    device: &ash::Device,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> Result<vk::RenderPass, VkError> {
    let attachments = [
        vk::AttachmentDescription {
            format: color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        },
        vk::AttachmentDescription {
            format: depth_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        },
    ];
    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        p_depth_stencil_attachment: &depth_ref,
        ..Default::default()
    };
    // Orders our attachment writes after the acquire wait and the previous frame's depth use.
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        src_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ..Default::default()
    };
    let info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    unsafe { device.create_render_pass(&info, None) }.call("vkCreateRenderPass")
}
