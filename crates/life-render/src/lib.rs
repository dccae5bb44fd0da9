// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic pieces of the Game of Life viewer: the binary schema
//! shared by buffers and pipelines, the camera, grid seeding and the
//! bounded in-flight frame loop.

pub mod camera;
pub mod frame;
pub mod grid;
pub mod schema;

pub use camera::{Camera, CameraInput, CameraSettings, PanDirection};
pub use frame::{
    AcquireOutcome, EventSource, Flow, FrameDevice, FrameLoop, FrameStats, PresentOutcome,
    FRAMES_IN_FLIGHT,
};
pub use grid::GridSeed;
pub use schema::{CameraUniform, Cell, Vertex};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports a zero-sized surface; nothing can be built against it.
    pub const fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}
