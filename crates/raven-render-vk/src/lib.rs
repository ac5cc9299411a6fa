// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: device selection, swapchain, frames in flight and the render loop.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod debug;
pub mod device;
pub mod error;
pub mod frame;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod renderer;
pub mod scene;
pub mod swapchain;

pub use device::{PhysicalDeviceCandidate, QueueFamilyAssignment};
pub use error::{VkError, VkResultExt};
pub use frame::{FrameFence, FrameOutcome, FrameRing, FrameSlot, FrameTarget};
pub use memory::{find_memory_type, Allocator, GpuBuffer};
pub use renderer::VkRenderer;
pub use scene::{MaterialId, MeshId, Vertex};
pub use swapchain::{SwapchainPlan, SwapchainStatus};
