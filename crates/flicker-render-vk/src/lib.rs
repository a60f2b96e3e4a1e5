// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: device bring-up, swapchain negotiation and a two-slot
//! frame scheduler drawing one static mesh.

mod debug;
pub mod device;
mod engine;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod resource;
pub mod shader;
pub mod swapchain;

pub use device::{select_queue_family, PhysicalDeviceInfo};
pub use engine::VkEngine;
pub use error::GfxError;
pub use frame::{FrameOps, FrameScheduler, FRAMES_IN_FLIGHT};
pub use resource::{find_memory_type, GfxResource};
pub use swapchain::{choose_extent, choose_present_mode, choose_surface_format, SwapchainPrefs};
