// SPDX-License-Identifier: CEPL-1.0
use crate::debug::{name_object, ObjectNamer};
use crate::device::{
    create_logical_device, get_queues, select_device, DeviceQueues, PhysicalDeviceCandidate,
};
use crate::error::{VkError, VkResultExt};
use crate::frame::{
    create_camera_set_layout, create_descriptor_pool, FrameOutcome, FrameRing, FrameSlot,
    FrameTarget,
};
use crate::instance::InstanceContext;
use crate::memory::Allocator;
use crate::pipeline::{create_pipeline_layout, create_shader_module, load_spirv, shader_paths, PipelineBuilder};
use crate::scene::{
    plan_draws, CameraUniform, DrawCommand, Material, MaterialId, Mesh, MeshId, ObjectPush,
    RenderObject, Scene, Vertex,
};
use crate::swapchain::{SwapchainManager, SwapchainStatus};
use anyhow::Result;
use ash::vk;
use glam::Mat4;
use raven_render::{RenderSettings, RenderSize, Renderer};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::mem::ManuallyDrop;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

pub struct VkRenderer {
    ctx: InstanceContext,
    candidate: PhysicalDeviceCandidate,
    device: ash::Device,
    queues: DeviceQueues,
    namer: Option<ObjectNamer>,
    allocator: Allocator,
    swapchain: SwapchainManager,
    camera_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
    frames: ManuallyDrop<FrameRing<FrameSlot>>,
    scene: Scene,

    clear: [f32; 4],
    view_proj: Mat4,
    fence_timeout: Duration,
    shader_dir: PathBuf,
    size: RenderSize,
    paused: bool,
}

/// Owns whatever startup built so far and releases it if startup bails.
struct Partial {
    ctx: Option<InstanceContext>,
    device: Option<ash::Device>,
    swapchain: Option<SwapchainManager>,
    camera_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
}

impl Drop for Partial {
    fn drop(&mut self) {
        unsafe {
            if let Some(device) = &self.device {
                let _ = device.device_wait_idle();
                if let Some(sc) = &mut self.swapchain {
                    sc.destroy();
                }
                device.destroy_descriptor_pool(self.descriptor_pool, None);
                device.destroy_descriptor_set_layout(self.camera_layout, None);
                device.destroy_device(None);
            }
            if let Some(ctx) = &self.ctx {
                ctx.destroy();
            }
        }
    }
}

impl VkRenderer {
    // STRICT ORDER (startup):
    // instance -> surface -> physical device -> logical device -> queues
    // -> swapchain (views, depth, framebuffers) -> descriptor pool -> frame slots
    unsafe fn build(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self, VkError> {
        let mut partial = Partial {
            ctx: None,
            device: None,
            swapchain: None,
            camera_layout: vk::DescriptorSetLayout::null(),
            descriptor_pool: vk::DescriptorPool::null(),
        };

        let ctx = partial.ctx.insert(unsafe {
            InstanceContext::new(&settings.app_name, settings.validation, window, display)
        }?);
        let candidate = unsafe { select_device(&ctx.instance, &ctx.surface_loader, ctx.surface) }?;
        let device = partial
            .device
            .insert(unsafe { create_logical_device(&ctx.instance, &candidate) }?)
            .clone();
        debug!("logical device created");

        let namer = ctx
            .validation()
            .then(|| ObjectNamer::new(&ctx.instance, &device));
        let queues = unsafe { get_queues(&device, &candidate.assignment, namer.as_ref()) }?;
        let allocator = Allocator::new(device.clone(), candidate.memory);

        let swapchain = partial.swapchain.insert(unsafe {
            SwapchainManager::new(
                &ctx.instance,
                &device,
                &ctx.surface_loader,
                ctx.surface,
                &candidate,
            )
        }?);
        name_object(namer.as_ref(), swapchain.render_pass(), "Main Render Pass");
        if !size.is_empty() {
            unsafe { swapchain.create(size, &allocator, namer.as_ref()) }?;
        }

        partial.camera_layout = create_camera_set_layout(&device)?;
        let n = settings.frames_in_flight();
        partial.descriptor_pool = create_descriptor_pool(&device, n as u32)?;

        let graphics = candidate
            .assignment
            .graphics
            .ok_or(VkError::NoCompatibleDevice)?;
        let slots = (0..n)
            .map(|i| {
                FrameSlot::new(
                    &device,
                    &allocator,
                    graphics,
                    partial.descriptor_pool,
                    partial.camera_layout,
                    i,
                    namer.as_ref(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        info!("{n} frames in flight");

        // Startup succeeded; ownership moves out of the guard.
        let (Some(ctx), Some(swapchain)) = (partial.ctx.take(), partial.swapchain.take()) else {
            return Err(VkError::NoCompatibleDevice);
        };
        partial.device = None;
        let camera_layout = std::mem::take(&mut partial.camera_layout);
        let descriptor_pool = std::mem::take(&mut partial.descriptor_pool);

        Ok(Self {
            ctx,
            candidate,
            device,
            queues,
            namer,
            allocator,
            swapchain,
            camera_layout,
            descriptor_pool,
            frames: ManuallyDrop::new(FrameRing::new(slots)),
            scene: Scene::default(),
            clear: settings.clear_color,
            view_proj: Mat4::IDENTITY,
            fence_timeout: settings.fence_timeout,
            shader_dir: settings.shader_dir.clone(),
            size,
            paused: size.is_empty(),
        })
    }

    pub fn device_name(&self) -> String {
        self.candidate.name()
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.swapchain.extent()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Uploads `vertices` into a host-visible vertex buffer owned by the scene.
    pub fn create_mesh(&mut self, vertices: &[Vertex]) -> Result<MeshId, VkError> {
        let mesh = Mesh::upload(&self.allocator, vertices)?;
        let id = self.scene.add_mesh(mesh);
        name_object(
            self.namer.as_ref(),
            self.scene.mesh(id).vertices.handle(),
            &format!("Mesh {id:?}"),
        );
        Ok(id)
    }

    /// Builds a pipeline from `<shader_dir>/<name>.vert.spv` and `<name>.frag.spv`.
    pub fn create_material(&mut self, name: &str) -> Result<MaterialId, VkError> {
        let (vert_path, frag_path) = shader_paths(&self.shader_dir, name);
        let vert_code = load_spirv(&vert_path)?;
        let frag_code = load_spirv(&frag_path)?;

        let vert = create_shader_module(&self.device, &vert_code)?;
        let frag = match create_shader_module(&self.device, &frag_code) {
            Ok(m) => m,
            Err(e) => {
                unsafe { self.device.destroy_shader_module(vert, None) };
                return Err(e);
            }
        };

        let built = create_pipeline_layout(&self.device, self.camera_layout).and_then(|layout| {
            PipelineBuilder::new()
                .stage(vk::ShaderStageFlags::VERTEX, vert)
                .stage(vk::ShaderStageFlags::FRAGMENT, frag)
                .scene_vertex()
                .build(&self.device, self.swapchain.render_pass(), layout)
                .map(|pipeline| (pipeline, layout))
                .inspect_err(|_| unsafe { self.device.destroy_pipeline_layout(layout, None) })
        });
        // Modules are only needed until the pipeline exists.
        unsafe {
            self.device.destroy_shader_module(vert, None);
            self.device.destroy_shader_module(frag, None);
        }
        let (pipeline, layout) = built?;

        name_object(self.namer.as_ref(), pipeline, &format!("Material \"{name}\""));
        info!("material \"{name}\" ready");
        Ok(self
            .scene
            .add_material(Material::new(self.device.clone(), pipeline, layout)))
    }

    pub fn add_object(&mut self, mesh: MeshId, material: MaterialId, transform: Mat4) {
        self.scene.add_object(RenderObject {
            mesh,
            material,
            transform,
        });
    }

    /// Draws one frame; `false` when paused or the chain had to be rebuilt first.
    pub fn render_frame(&mut self) -> Result<bool, VkError> {
        if self.paused {
            return Ok(false);
        }
        unsafe { self.draw_frame() }
    }

    pub fn set_camera(&mut self, view_proj: Mat4) {
        self.view_proj = view_proj;
    }

    unsafe fn recreate_swapchain(&mut self) -> Result<(), VkError> {
        if self.size.is_empty() {
            self.paused = true;
            return Ok(());
        }
        unsafe {
            self.swapchain
                .recreate(self.size, &self.allocator, self.namer.as_ref())
        }
    }

    // STRICT PER-FRAME ORDER (see FrameRing::run_frame):
    // 1) wait on the slot's render-complete fence (finite timeout -> DeviceLost)
    // 2) acquire_next_image with the slot's image-available semaphore
    // 3) reset the fence only after a successful acquire
    // 4) write the slot's camera block, record against framebuffers[image_index]
    // 5) submit: wait image-available @ COLOR_ATTACHMENT_OUTPUT, signal render-finished + fence
    // 6) present on the present queue, waiting on render-finished
    // 7) advance the ring, then recreate if the chain went stale
    unsafe fn draw_frame(&mut self) -> Result<bool, VkError> {
        let Some(state) = self.swapchain.state() else {
            unsafe { self.recreate_swapchain() }?;
            return Ok(false);
        };
        let mut work = FrameWork {
            device: &self.device,
            swapchain: &self.swapchain,
            queues: self.queues,
            scene: &self.scene,
            camera: CameraUniform::new(self.view_proj),
            target: RenderTarget {
                render_pass: self.swapchain.render_pass(),
                framebuffer: vk::Framebuffer::null(),
                extent: state.extent,
                clear: self.clear,
            },
            framebuffers: &state.framebuffers,
        };
        let outcome = self.frames.run_frame(&mut work, self.fence_timeout)?;

        if outcome.needs_recreate() {
            debug!("swapchain stale ({outcome:?}); recreating");
            unsafe { self.recreate_swapchain() }?;
        }
        Ok(outcome != FrameOutcome::Skipped)
    }
}

/// Borrowed view of the renderer for one pass through the frame ring.
/// Every handle belongs to the live device and chain.
struct FrameWork<'a> {
    device: &'a ash::Device,
    swapchain: &'a SwapchainManager,
    queues: DeviceQueues,
    scene: &'a Scene,
    camera: CameraUniform,
    target: RenderTarget,
    framebuffers: &'a [vk::Framebuffer],
}

impl FrameTarget<FrameSlot> for FrameWork<'_> {
    fn acquire(&mut self, slot: &FrameSlot) -> Result<(Option<u32>, SwapchainStatus), VkError> {
        unsafe { self.swapchain.acquire_next_image(slot.image_available) }
    }

    fn submit(&mut self, slot: &FrameSlot, image: u32) -> Result<(), VkError> {
        slot.write_camera(&self.camera)?;
        self.target.framebuffer = self.framebuffers[image as usize];
        unsafe { record_frame(self.device, slot, &self.target, self.scene) }?;

        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &slot.image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &slot.command_buffer,
            signal_semaphore_count: 1,
            p_signal_semaphores: &slot.render_finished,
            ..Default::default()
        };
        unsafe {
            self.device.queue_submit(
                self.queues.graphics,
                std::slice::from_ref(&submit),
                slot.render_complete,
            )
        }
        .call("vkQueueSubmit")
    }

    fn present(&mut self, slot: &FrameSlot, image: u32) -> Result<SwapchainStatus, VkError> {
        unsafe {
            self.swapchain
                .present(self.queues.present, slot.render_finished, image)
        }
    }
}

struct RenderTarget {
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
    clear: [f32; 4],
}

unsafe fn record_frame(
    device: &ash::Device,
    slot: &FrameSlot,
    target: &RenderTarget,
    scene: &Scene,
) -> Result<(), VkError> {
    let cmd = slot.command_buffer;
    unsafe {
        device
            .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
            .call("vkResetCommandBuffer")?;
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        device
            .begin_command_buffer(cmd, &begin)
            .call("vkBeginCommandBuffer")?;

        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: target.clear,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: target.render_pass,
            framebuffer: target.framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: target.extent,
            },
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);

        // Flipped so +Y is up in clip space.
        let vp = vk::Viewport {
            x: 0.0,
            y: target.extent.height as f32,
            width: target.extent.width as f32,
            height: -(target.extent.height as f32),
            min_depth: 0.0,
            max_depth: 1.0,
        };
        device.cmd_set_viewport(cmd, 0, std::slice::from_ref(&vp));
        let sc = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: target.extent,
        };
        device.cmd_set_scissor(cmd, 0, std::slice::from_ref(&sc));

        let objects = scene.objects();
        let mut layout = vk::PipelineLayout::null();
        let mut vertex_count = 0;
        for command in plan_draws(objects) {
            match command {
                DrawCommand::BindMaterial(id) => {
                    let material = scene.material(id);
                    layout = material.layout;
                    device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, material.pipeline);
                    device.cmd_bind_descriptor_sets(
                        cmd,
                        vk::PipelineBindPoint::GRAPHICS,
                        layout,
                        0,
                        std::slice::from_ref(&slot.camera_set),
                        &[],
                    );
                }
                DrawCommand::BindMesh(id) => {
                    let mesh = scene.mesh(id);
                    vertex_count = mesh.vertex_count;
                    device.cmd_bind_vertex_buffers(cmd, 0, &[mesh.vertices.handle()], &[0]);
                }
                DrawCommand::Draw { object } => {
                    let push = ObjectPush::new(objects[object].transform);
                    device.cmd_push_constants(
                        cmd,
                        layout,
                        vk::ShaderStageFlags::VERTEX,
                        0,
                        bytemuck::bytes_of(&push),
                    );
                    device.cmd_draw(cmd, vertex_count, 1, 0, 0);
                }
            }
        }

        device.cmd_end_render_pass(cmd);
        device.end_command_buffer(cmd).call("vkEndCommandBuffer")?;
    }
    Ok(())
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self> {
        let r = unsafe { Self::build(window, display, size, settings) }?;
        if let Some(e) = r.extent() {
            info!(
                "Vulkan swapchain ready ({}x{}) on {}",
                e.width,
                e.height,
                r.device_name()
            );
        }
        Ok(r)
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        self.size = size;
        if size.is_empty() {
            if !self.paused {
                info!("vk: resize to 0x0 → paused=true");
            }
            self.paused = true;
            return Ok(());
        }
        if self.paused {
            info!("vk: resize to {}x{} → paused=false", size.width, size.height);
        }
        self.paused = false;
        unsafe { self.recreate_swapchain() }?;
        Ok(())
    }

    fn render(&mut self) -> Result<()> {
        self.render_frame()?;
        Ok(())
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = rgba;
    }
}

impl Drop for VkRenderer {
    // STRICT ORDER (teardown):
    // wait idle -> frame slots (sync, pools, camera blocks) -> scene
    // -> swapchain (framebuffers, views, depth, chain, render pass)
    // -> descriptor pool/layout -> device -> surface -> messenger -> instance
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            ManuallyDrop::drop(&mut self.frames);
            self.scene.clear();
            self.swapchain.destroy();
            self.device.destroy_descriptor_pool(self.descriptor_pool, None);
            self.device
                .destroy_descriptor_set_layout(self.camera_layout, None);
            self.device.destroy_device(None);
            self.ctx.destroy();
        }
        debug!("Vulkan renderer destroyed");
    }
}
