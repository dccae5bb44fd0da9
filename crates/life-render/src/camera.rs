// SPDX-License-Identifier: CEPL-1.0
use glam::Vec2;

use crate::schema::CameraUniform;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraSettings {
    /// Cells moved per key press at zoom 1.
    pub pan_step: f32,
    /// Multiplicative zoom factor per step.
    pub zoom_step: f32,
    pub min_zoom: f32,
    pub max_zoom: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            pan_step: 10.0,
            zoom_step: 1.25,
            min_zoom: 1.0,
            max_zoom: 256.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PanDirection {
    Left,
    Right,
    Up,
    Down,
}

/// Input intent queued by the window collaborator and applied by the frame loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CameraInput {
    Pan(PanDirection),
    /// Positive zooms in, negative zooms out; one unit is one `zoom_step`.
    Zoom(f32),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    center: Vec2,
    zoom: f32,
    grid_extent: f32,
    settings: CameraSettings,
}

impl Camera {
    /// Centered on a `grid_size`² grid, showing all of it.
    pub fn new(grid_size: u32, settings: CameraSettings) -> Self {
        let extent = grid_size as f32;
        let mut cam = Self {
            center: Vec2::splat(extent * 0.5),
            zoom: 1.0,
            grid_extent: extent,
            settings,
        };
        cam.zoom = cam.clamp_zoom(1.0);
        cam
    }

    pub fn center(&self) -> Vec2 {
        self.center
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn apply(&mut self, input: CameraInput) {
        match input {
            CameraInput::Pan(dir) => {
                let step = self.settings.pan_step / self.zoom;
                let delta = match dir {
                    PanDirection::Left => Vec2::new(-step, 0.0),
                    PanDirection::Right => Vec2::new(step, 0.0),
                    PanDirection::Up => Vec2::new(0.0, step),
                    PanDirection::Down => Vec2::new(0.0, -step),
                };
                self.set_center(self.center + delta);
            }
            CameraInput::Zoom(steps) => {
                let z = self.zoom * self.settings.zoom_step.powf(steps);
                self.zoom = self.clamp_zoom(z);
            }
        }
    }

    /// Position stays inside `[0, grid]` on both axes.
    pub fn set_center(&mut self, center: Vec2) {
        self.center = center.clamp(Vec2::ZERO, Vec2::splat(self.grid_extent));
    }

    pub fn uniform(&self) -> CameraUniform {
        CameraUniform {
            center: self.center.to_array(),
            zoom: self.zoom,
        }
    }

    fn clamp_zoom(&self, z: f32) -> f32 {
        let lo = self.settings.min_zoom.min(self.settings.max_zoom);
        let hi = self.settings.max_zoom.max(lo);
        z.clamp(lo, hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cam(size: u32) -> Camera {
        Camera::new(size, CameraSettings::default())
    }

    #[test]
    fn starts_centered() {
        let c = cam(100);
        assert_eq!(c.center(), Vec2::new(50.0, 50.0));
        assert_eq!(c.zoom(), 1.0);
    }

    #[test]
    fn pan_clamps_to_grid_edges() {
        let mut c = cam(20);
        for _ in 0..10 {
            c.apply(CameraInput::Pan(PanDirection::Right));
            c.apply(CameraInput::Pan(PanDirection::Down));
        }
        assert_eq!(c.center(), Vec2::new(20.0, 0.0));

        for _ in 0..10 {
            c.apply(CameraInput::Pan(PanDirection::Left));
            c.apply(CameraInput::Pan(PanDirection::Up));
        }
        assert_eq!(c.center(), Vec2::new(0.0, 20.0));
    }

    #[test]
    fn pan_step_shrinks_with_zoom() {
        let mut c = cam(1000);
        c.apply(CameraInput::Zoom(1.0));
        let z = c.zoom();
        c.apply(CameraInput::Pan(PanDirection::Right));
        assert!((c.center().x - (500.0 + 10.0 / z)).abs() < 1e-3);
    }

    #[test]
    fn zoom_is_bounded() {
        let mut c = cam(10);
        c.apply(CameraInput::Zoom(-50.0));
        assert_eq!(c.zoom(), 1.0);
        c.apply(CameraInput::Zoom(500.0));
        assert_eq!(c.zoom(), 256.0);
    }

    #[test]
    fn uniform_mirrors_state() {
        let c = cam(4);
        let u = c.uniform();
        assert_eq!(u.center, [2.0, 2.0]);
        assert_eq!(u.zoom, 1.0);
    }
}
