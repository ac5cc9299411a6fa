// SPDX-License-Identifier: CEPL-1.0
//! Frames in flight: a fixed ring of slots, each gated by its own fence.
use crate::debug::{name_object, ObjectNamer};
use crate::error::{VkError, VkResultExt};
use crate::memory::{Allocator, GpuBuffer, HOST_WRITE};
use crate::scene::CameraUniform;
use crate::swapchain::SwapchainStatus;
use ash::vk;
use std::time::Duration;
use tracing::debug;

/// Host side of a slot's "render complete" fence.
pub trait FrameFence {
    /// Blocks until the previous submission from this slot retired.
    fn wait(&self, timeout: Duration) -> Result<(), VkError>;
    fn reset(&self) -> Result<(), VkError>;
}

/// `slots[frame % N]` is current; the frame counter only moves on `advance`.
pub struct FrameRing<S> {
    slots: Vec<S>,
    frame: u64,
}

impl<S> FrameRing<S> {
    pub fn new(slots: Vec<S>) -> Self {
        assert!(!slots.is_empty(), "frame ring needs at least one slot");
        Self { slots, frame: 0 }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot_index(&self) -> usize {
        (self.frame % self.slots.len() as u64) as usize
    }

    pub fn frame_number(&self) -> u64 {
        self.frame
    }

    pub fn current(&self) -> &S {
        &self.slots[self.slot_index()]
    }

    pub fn acquire(&mut self) -> &mut S {
        let i = self.slot_index();
        &mut self.slots[i]
    }

    /// Called once the current slot's image was presented.
    pub fn advance(&mut self) {
        self.frame = self.frame.wrapping_add(1);
    }

    pub fn iter(&self) -> impl Iterator<Item = &S> {
        self.slots.iter()
    }
}

/// Swapchain and queue work of one frame, driven by [`FrameRing::run_frame`].
pub trait FrameTarget<S> {
    /// `None` means the chain is out of date and no image was taken.
    fn acquire(&mut self, slot: &S) -> Result<(Option<u32>, SwapchainStatus), VkError>;
    /// Records and submits the frame; the submission signals the slot's fence.
    fn submit(&mut self, slot: &S, image: u32) -> Result<(), VkError>;
    fn present(&mut self, slot: &S, image: u32) -> Result<SwapchainStatus, VkError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Acquire found the chain out of date. Nothing was submitted, the fence
    /// stays signaled and the ring did not move.
    Skipped,
    Presented {
        acquire: SwapchainStatus,
        present: SwapchainStatus,
    },
}

impl FrameOutcome {
    pub fn needs_recreate(self) -> bool {
        match self {
            FrameOutcome::Skipped => true,
            FrameOutcome::Presented { acquire, present } => {
                acquire.needs_recreate() || present.needs_recreate()
            }
        }
    }
}

impl<S: FrameFence> FrameRing<S> {
    /// Current slot, once its command buffer is free to re-record.
    pub fn wait_current(&mut self, timeout: Duration) -> Result<&mut S, VkError> {
        let slot = self.acquire();
        slot.wait(timeout)?;
        Ok(slot)
    }

    /// wait, acquire, reset, submit, present, advance.
    ///
    /// The fence is reset only once an image was acquired, so a skipped
    /// frame leaves it signaled and the retry does not block forever.
    pub fn run_frame<T: FrameTarget<S>>(
        &mut self,
        target: &mut T,
        timeout: Duration,
    ) -> Result<FrameOutcome, VkError> {
        let slot = self.wait_current(timeout)?;
        let (image, acquire) = target.acquire(slot)?;
        let Some(image) = image else {
            return Ok(FrameOutcome::Skipped);
        };
        slot.reset()?;
        target.submit(slot, image)?;
        let present = target.present(slot, image)?;
        self.advance();
        Ok(FrameOutcome::Presented { acquire, present })
    }
}

pub fn create_camera_set_layout(device: &ash::Device) -> Result<vk::DescriptorSetLayout, VkError> {
    let binding = vk::DescriptorSetLayoutBinding {
        binding: 0,
        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: 1,
        stage_flags: vk::ShaderStageFlags::VERTEX,
        ..Default::default()
    };
    let ci = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: 1,
        p_bindings: &binding,
        ..Default::default()
    };
    unsafe { device.create_descriptor_set_layout(&ci, None) }.call("vkCreateDescriptorSetLayout")
}

/// One uniform-buffer set per slot.
pub fn create_descriptor_pool(
    device: &ash::Device,
    slots: u32,
) -> Result<vk::DescriptorPool, VkError> {
    let pool_sizes = [vk::DescriptorPoolSize {
        ty: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: slots,
    }];
    let ci = vk::DescriptorPoolCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
        max_sets: slots,
        pool_size_count: pool_sizes.len() as u32,
        p_pool_sizes: pool_sizes.as_ptr(),
        ..Default::default()
    };
    unsafe { device.create_descriptor_pool(&ci, None) }.call("vkCreateDescriptorPool")
}

/// Everything one frame in flight records into and synchronizes on.
pub struct FrameSlot {
    device: ash::Device,
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub render_complete: vk::Fence,
    pub camera: GpuBuffer,
    /// Freed with the descriptor pool, not here.
    pub camera_set: vk::DescriptorSet,
}

impl FrameSlot {
    pub fn new(
        device: &ash::Device,
        allocator: &Allocator,
        graphics_family: u32,
        descriptor_pool: vk::DescriptorPool,
        set_layout: vk::DescriptorSetLayout,
        index: usize,
        namer: Option<&ObjectNamer>,
    ) -> Result<Self, VkError> {
        let ubo_size = std::mem::size_of::<CameraUniform>() as vk::DeviceSize;
        let camera =
            allocator.create_buffer(ubo_size, vk::BufferUsageFlags::UNIFORM_BUFFER, HOST_WRITE)?;

        // Null handles are valid to destroy, so a partially built slot cleans up on drop.
        let mut slot = Self {
            device: device.clone(),
            command_pool: vk::CommandPool::null(),
            command_buffer: vk::CommandBuffer::null(),
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            render_complete: vk::Fence::null(),
            camera,
            camera_set: vk::DescriptorSet::null(),
        };

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            queue_family_index: graphics_family,
            ..Default::default()
        };
        slot.command_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .call("vkCreateCommandPool")?;

        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: slot.command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
            .call("vkAllocateCommandBuffers")?;
        slot.command_buffer = buffers[0];

        let sem_ci = vk::SemaphoreCreateInfo::default();
        slot.image_available =
            unsafe { device.create_semaphore(&sem_ci, None) }.call("vkCreateSemaphore")?;
        slot.render_finished =
            unsafe { device.create_semaphore(&sem_ci, None) }.call("vkCreateSemaphore")?;

        // Signaled so the first wait on a fresh slot returns immediately.
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        slot.render_complete =
            unsafe { device.create_fence(&fence_ci, None) }.call("vkCreateFence")?;

        let alloc = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool,
            descriptor_set_count: 1,
            p_set_layouts: &set_layout,
            ..Default::default()
        };
        let sets = unsafe { device.allocate_descriptor_sets(&alloc) }
            .call("vkAllocateDescriptorSets")?;
        slot.camera_set = sets[0];

        let info = vk::DescriptorBufferInfo {
            buffer: slot.camera.handle(),
            offset: 0,
            range: ubo_size,
        };
        let write = vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: slot.camera_set,
            dst_binding: 0,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            p_buffer_info: &info,
            ..Default::default()
        };
        unsafe { device.update_descriptor_sets(std::slice::from_ref(&write), &[]) };

        name_object(namer, slot.command_buffer, &format!("Frame {index} Commands"));
        name_object(namer, slot.image_available, &format!("Frame {index} Image Available"));
        name_object(namer, slot.render_finished, &format!("Frame {index} Render Finished"));
        name_object(namer, slot.render_complete, &format!("Frame {index} Render Complete"));
        name_object(namer, slot.camera.handle(), &format!("Frame {index} Camera"));
        debug!("frame slot {index} ready");
        Ok(slot)
    }

    /// Scoped map/copy/unmap of this slot's camera block.
    pub fn write_camera(&self, camera: &CameraUniform) -> Result<(), VkError> {
        self.camera.write(std::slice::from_ref(camera))
    }
}

impl FrameFence for FrameSlot {
    fn wait(&self, timeout: Duration) -> Result<(), VkError> {
        let ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        unsafe {
            self.device
                .wait_for_fences(std::slice::from_ref(&self.render_complete), true, ns)
        }
        .call("vkWaitForFences")
    }

    fn reset(&self) -> Result<(), VkError> {
        unsafe {
            self.device
                .reset_fences(std::slice::from_ref(&self.render_complete))
        }
        .call("vkResetFences")
    }
}

impl Drop for FrameSlot {
    // Sync objects, then the pool (frees the command buffer). The camera buffer follows.
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.image_available, None);
            self.device.destroy_semaphore(self.render_finished, None);
            self.device.destroy_fence(self.render_complete, None);
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// A queue that retires submissions in order, only when someone waits.
    #[derive(Default)]
    struct MockGpu {
        pending: RefCell<VecDeque<Rc<Cell<bool>>>>,
        peak: Cell<usize>,
        waits_that_blocked: Cell<usize>,
    }

    impl MockGpu {
        fn submit(&self, fence: &Rc<Cell<bool>>) {
            assert!(!fence.get(), "submitted with a signaled fence");
            let mut p = self.pending.borrow_mut();
            p.push_back(fence.clone());
            self.peak.set(self.peak.get().max(p.len()));
        }

        fn retire_until(&self, fence: &Rc<Cell<bool>>) {
            while !fence.get() {
                let Some(done) = self.pending.borrow_mut().pop_front() else {
                    panic!("waiting on a fence that was never submitted");
                };
                done.set(true);
            }
        }

        fn in_flight(&self) -> usize {
            self.pending.borrow().len()
        }
    }

    struct MockSlot {
        gpu: Rc<MockGpu>,
        fence: Rc<Cell<bool>>,
        recorded: Cell<u32>,
    }

    impl FrameFence for MockSlot {
        fn wait(&self, _timeout: Duration) -> Result<(), VkError> {
            if !self.fence.get() {
                self.gpu.waits_that_blocked.set(self.gpu.waits_that_blocked.get() + 1);
            }
            self.gpu.retire_until(&self.fence);
            Ok(())
        }

        fn reset(&self) -> Result<(), VkError> {
            self.fence.set(false);
            Ok(())
        }
    }

    fn ring(gpu: &Rc<MockGpu>, n: usize) -> FrameRing<MockSlot> {
        FrameRing::new(
            (0..n)
                .map(|_| MockSlot {
                    gpu: gpu.clone(),
                    fence: Rc::new(Cell::new(true)),
                    recorded: Cell::new(0),
                })
                .collect(),
        )
    }

    /// Scripted swapchain: unscripted acquires return image 0, unscripted presents are optimal.
    #[derive(Default)]
    struct MockChain {
        acquires: VecDeque<Result<(Option<u32>, SwapchainStatus), VkError>>,
        presents: VecDeque<SwapchainStatus>,
        events: Vec<String>,
    }

    impl FrameTarget<MockSlot> for MockChain {
        fn acquire(&mut self, slot: &MockSlot) -> Result<(Option<u32>, SwapchainStatus), VkError> {
            assert!(slot.fence.get(), "fence reset before the image was acquired");
            self.events.push("acquire".to_owned());
            self.acquires
                .pop_front()
                .unwrap_or(Ok((Some(0), SwapchainStatus::Optimal)))
        }

        fn submit(&mut self, slot: &MockSlot, image: u32) -> Result<(), VkError> {
            slot.recorded.set(slot.recorded.get() + 1);
            slot.gpu.submit(&slot.fence);
            self.events.push(format!("submit {image}"));
            Ok(())
        }

        fn present(&mut self, _slot: &MockSlot, image: u32) -> Result<SwapchainStatus, VkError> {
            self.events.push(format!("present {image}"));
            Ok(self.presents.pop_front().unwrap_or(SwapchainStatus::Optimal))
        }
    }

    fn run_frames(ring: &mut FrameRing<MockSlot>, frames: usize) {
        let mut chain = MockChain::default();
        for _ in 0..frames {
            let outcome = ring.run_frame(&mut chain, Duration::from_secs(5)).unwrap();
            assert!(!outcome.needs_recreate());
        }
    }

    #[test]
    fn slots_cycle_by_frame_index() {
        let gpu = Rc::new(MockGpu::default());
        let mut r = ring(&gpu, 3);
        let seen: Vec<usize> = (0..7)
            .map(|_| {
                let i = r.slot_index();
                r.advance();
                i
            })
            .collect();
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(r.frame_number(), 7);
        assert_eq!(r.len(), 3);
    }

    #[test]
    fn at_most_n_submissions_in_flight() {
        for n in 1..=4 {
            let gpu = Rc::new(MockGpu::default());
            let mut r = ring(&gpu, n);
            run_frames(&mut r, 50);
            assert_eq!(gpu.peak.get(), n, "n={n}");
            assert!(gpu.in_flight() <= n);
            assert_eq!(gpu.waits_that_blocked.get(), 50 - n, "n={n}");
        }
    }

    #[test]
    fn every_slot_is_used_evenly() {
        let gpu = Rc::new(MockGpu::default());
        let mut r = ring(&gpu, 2);
        run_frames(&mut r, 10);
        assert!(r.iter().all(|s| s.recorded.get() == 5));
    }

    #[test]
    fn optimal_frame_runs_in_order_and_advances() {
        let gpu = Rc::new(MockGpu::default());
        let mut r = ring(&gpu, 2);
        let mut chain = MockChain::default();
        chain.acquires.push_back(Ok((Some(1), SwapchainStatus::Optimal)));

        let outcome = r.run_frame(&mut chain, Duration::from_secs(5)).unwrap();
        assert_eq!(
            outcome,
            FrameOutcome::Presented {
                acquire: SwapchainStatus::Optimal,
                present: SwapchainStatus::Optimal,
            }
        );
        assert!(!outcome.needs_recreate());
        assert_eq!(chain.events, ["acquire", "submit 1", "present 1"]);
        assert_eq!(r.frame_number(), 1);
        assert_eq!(gpu.in_flight(), 1);
    }

    #[test]
    fn out_of_date_acquire_skips_without_touching_the_fence() {
        let gpu = Rc::new(MockGpu::default());
        let mut r = ring(&gpu, 2);
        let mut chain = MockChain::default();
        chain
            .acquires
            .push_back(Ok((None, SwapchainStatus::OutOfDate)));

        let outcome = r.run_frame(&mut chain, Duration::from_secs(5)).unwrap();
        assert_eq!(outcome, FrameOutcome::Skipped);
        assert!(outcome.needs_recreate());
        assert_eq!(chain.events, ["acquire"]);
        assert_eq!(r.frame_number(), 0);
        assert!(r.current().fence.get());
        assert_eq!(gpu.in_flight(), 0);

        // The retry reuses the same slot and must not block on its fence.
        r.run_frame(&mut chain, Duration::from_secs(5)).unwrap();
        assert_eq!(gpu.waits_that_blocked.get(), 0);
        assert_eq!(r.frame_number(), 1);
    }

    #[test]
    fn failed_acquire_leaves_the_fence_signaled() {
        let gpu = Rc::new(MockGpu::default());
        let mut r = ring(&gpu, 1);
        let mut chain = MockChain::default();
        chain.acquires.push_back(Err(VkError::SurfaceLost));

        assert!(matches!(
            r.run_frame(&mut chain, Duration::from_secs(5)),
            Err(VkError::SurfaceLost)
        ));
        assert!(r.current().fence.get());
        assert_eq!(r.frame_number(), 0);
    }

    #[test]
    fn stale_acquire_or_present_requests_recreation_after_presenting() {
        use SwapchainStatus::*;
        for acquire in [Optimal, Suboptimal] {
            for present in [Optimal, Suboptimal, OutOfDate] {
                let gpu = Rc::new(MockGpu::default());
                let mut r = ring(&gpu, 2);
                let mut chain = MockChain::default();
                chain.acquires.push_back(Ok((Some(0), acquire)));
                chain.presents.push_back(present);

                let outcome = r.run_frame(&mut chain, Duration::from_secs(5)).unwrap();
                assert_eq!(outcome, FrameOutcome::Presented { acquire, present });
                assert_eq!(
                    outcome.needs_recreate(),
                    acquire != Optimal || present != Optimal,
                    "{acquire:?}/{present:?}"
                );
                assert_eq!(chain.events.last().map(String::as_str), Some("present 0"));
                assert_eq!(r.frame_number(), 1, "{acquire:?}/{present:?}");
            }
        }
    }

    #[test]
    #[should_panic(expected = "at least one slot")]
    fn empty_ring_is_rejected() {
        let _ = FrameRing::<MockSlot>::new(Vec::new());
    }
}
