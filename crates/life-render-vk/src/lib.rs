// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: device and queue setup, one shared memory arena for every
//! buffer, the swapchain chain and the per-frame submit/present plumbing.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod arena;
pub mod commands;
pub mod debug;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod instance;
pub mod pipeline;
pub mod renderer;
pub mod swapchain;
pub mod sync;

pub use error::SetupError;
pub use pipeline::default_shader_dir;
pub use renderer::{RendererSettings, VkRenderer};
