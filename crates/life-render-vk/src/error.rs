// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use thiserror::Error;

use crate::device::QueueRole;

/// Unrecoverable startup failures. None of these are retried.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("no Vulkan physical device available")]
    NoPhysicalDevice,
    #[error("no queue family supports {0}")]
    MissingQueueFamily(QueueRole),
    #[error("no memory type is both host-visible and host-coherent")]
    NoHostVisibleMemory,
    #[error("{resource} cannot live in memory type {type_index} (compatible types 0b{type_bits:b})")]
    MemoryTypeMismatch {
        resource: String,
        type_index: u32,
        type_bits: u32,
    },
    #[error("shader binary missing: {}", path.display())]
    ShaderMissing { path: PathBuf },
    #[error("grid size must be at least 1")]
    ZeroGrid,
    #[error("a {size}x{size} grid has more cells than one draw can instance")]
    GridTooLarge { size: u32 },
}
