// SPDX-License-Identifier: CEPL-1.0
//! winit window and input, driven explicitly by the frame loop.
//!
//! The loop is pumped rather than handed to winit: `poll` drains pending
//! events without blocking, `wait_for_extent` blocks while the window is
//! minimized.

pub use winit;

use anyhow::{anyhow, bail, Result};
use life_render::{Camera, CameraInput, EventSource, PanDirection, RenderSize};
use std::time::Duration;
use tracing::{debug, info};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, KeyEvent, MouseScrollDelta, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{Key, NamedKey},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowId},
};

/// Pixel scroll distance treated as one wheel notch.
const PIXELS_PER_LINE: f64 = 40.0;

#[derive(Clone, Debug, PartialEq)]
pub struct WindowSettings {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            width: 800,
            height: 800,
            title: "Game of Life".into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum KeyAction {
    Close,
    Camera(CameraInput),
}

/// Escape closes, arrows pan, `+`/`=` and `-` zoom.
pub fn key_action(key: &Key) -> Option<KeyAction> {
    match key {
        Key::Named(NamedKey::Escape) => Some(KeyAction::Close),
        Key::Named(NamedKey::ArrowLeft) => Some(KeyAction::Camera(CameraInput::Pan(PanDirection::Left))),
        Key::Named(NamedKey::ArrowRight) => Some(KeyAction::Camera(CameraInput::Pan(PanDirection::Right))),
        Key::Named(NamedKey::ArrowUp) => Some(KeyAction::Camera(CameraInput::Pan(PanDirection::Up))),
        Key::Named(NamedKey::ArrowDown) => Some(KeyAction::Camera(CameraInput::Pan(PanDirection::Down))),
        Key::Character(c) => match c.as_str() {
            "+" | "=" => Some(KeyAction::Camera(CameraInput::Zoom(1.0))),
            "-" => Some(KeyAction::Camera(CameraInput::Zoom(-1.0))),
            _ => None,
        },
        _ => None,
    }
}

/// Scrolling up zooms in.
pub fn wheel_zoom(delta: MouseScrollDelta) -> Option<CameraInput> {
    let steps = match delta {
        MouseScrollDelta::LineDelta(_, y) => y,
        MouseScrollDelta::PixelDelta(p) => (p.y / PIXELS_PER_LINE) as f32,
    };
    (steps != 0.0).then_some(CameraInput::Zoom(steps))
}

struct Handler {
    settings: WindowSettings,
    window: Option<Window>,
    size: RenderSize,
    pending: Vec<CameraInput>,
    close: bool,
    resized: bool,
    error: Option<anyhow::Error>,
}

impl Handler {
    fn key(&mut self, event: &KeyEvent) {
        if event.state != ElementState::Pressed {
            return;
        }
        match key_action(&event.logical_key) {
            Some(KeyAction::Close) => self.close = true,
            Some(KeyAction::Camera(input)) => self.pending.push(input),
            None => {}
        }
    }
}

impl ApplicationHandler for Handler {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title(self.settings.title.clone())
            .with_inner_size(PhysicalSize::new(self.settings.width, self.settings.height));
        match event_loop.create_window(attrs) {
            Ok(window) => {
                let size = window.inner_size();
                self.size = RenderSize::new(size.width, size.height);
                info!("window created ({}x{})", size.width, size.height);
                self.window = Some(window);
            }
            Err(e) => {
                self.error = Some(anyhow!("create_window: {e}"));
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if self.window.as_ref().is_some_and(|w| w.id() != window_id) {
            return;
        }
        match event {
            WindowEvent::CloseRequested => {
                info!("close requested");
                self.close = true;
            }
            WindowEvent::Resized(size) => {
                debug!("resized to {}x{}", size.width, size.height);
                self.size = RenderSize::new(size.width, size.height);
                self.resized = true;
            }
            WindowEvent::KeyboardInput { event, .. } => self.key(&event),
            WindowEvent::MouseWheel { delta, .. } => {
                if let Some(input) = wheel_zoom(delta) {
                    self.pending.push(input);
                }
            }
            _ => {}
        }
    }
}

/// Owns the event loop and the window. Must outlive any surface created on the window.
pub struct WinitEvents {
    event_loop: EventLoop<()>,
    handler: Handler,
}

impl WinitEvents {
    /// Pumps until the platform hands out a window.
    pub fn new(settings: WindowSettings) -> Result<Self> {
        let mut event_loop = EventLoop::new()?;
        let mut handler = Handler {
            size: RenderSize::new(settings.width, settings.height),
            settings,
            window: None,
            pending: Vec::new(),
            close: false,
            resized: false,
            error: None,
        };
        while handler.window.is_none() {
            let status = event_loop.pump_app_events(Some(Duration::from_millis(10)), &mut handler);
            if let Some(e) = handler.error.take() {
                return Err(e);
            }
            if let PumpStatus::Exit(code) = status {
                bail!("event loop exited with {code} before a window was created");
            }
        }
        Ok(Self { event_loop, handler })
    }

    pub fn window(&self) -> Result<&Window> {
        self.handler.window.as_ref().ok_or_else(|| anyhow!("no window"))
    }

    pub fn size(&self) -> RenderSize {
        self.handler.size
    }

    fn pump(&mut self, timeout: Option<Duration>, camera: &mut Camera) {
        if let PumpStatus::Exit(_) = self.event_loop.pump_app_events(timeout, &mut self.handler) {
            self.handler.close = true;
        }
        for input in self.handler.pending.drain(..) {
            camera.apply(input);
        }
    }
}

impl EventSource for WinitEvents {
    fn poll(&mut self, camera: &mut Camera) {
        self.pump(Some(Duration::ZERO), camera);
    }

    fn close_requested(&self) -> bool {
        self.handler.close
    }

    fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.handler.resized)
    }

    fn wait_for_extent(&mut self, camera: &mut Camera) -> Option<RenderSize> {
        if self.handler.size.is_zero() {
            info!("window minimized; waiting");
        }
        loop {
            if self.handler.close {
                return None;
            }
            if !self.handler.size.is_zero() {
                // The rebuild about to happen covers any pending resize.
                self.handler.resized = false;
                return Some(self.handler.size);
            }
            self.pump(None, camera);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::dpi::PhysicalPosition;

    #[test]
    fn escape_closes() {
        assert_eq!(key_action(&Key::Named(NamedKey::Escape)), Some(KeyAction::Close));
    }

    #[test]
    fn arrows_pan() {
        assert_eq!(
            key_action(&Key::Named(NamedKey::ArrowUp)),
            Some(KeyAction::Camera(CameraInput::Pan(PanDirection::Up)))
        );
        assert_eq!(
            key_action(&Key::Named(NamedKey::ArrowLeft)),
            Some(KeyAction::Camera(CameraInput::Pan(PanDirection::Left)))
        );
    }

    #[test]
    fn plus_and_minus_zoom() {
        assert_eq!(
            key_action(&Key::Character("+".into())),
            Some(KeyAction::Camera(CameraInput::Zoom(1.0)))
        );
        assert_eq!(
            key_action(&Key::Character("=".into())),
            Some(KeyAction::Camera(CameraInput::Zoom(1.0)))
        );
        assert_eq!(
            key_action(&Key::Character("-".into())),
            Some(KeyAction::Camera(CameraInput::Zoom(-1.0)))
        );
        assert_eq!(key_action(&Key::Character("q".into())), None);
        assert_eq!(key_action(&Key::Named(NamedKey::Space)), None);
    }

    #[test]
    fn wheel_lines_and_pixels() {
        assert_eq!(
            wheel_zoom(MouseScrollDelta::LineDelta(0.0, 2.0)),
            Some(CameraInput::Zoom(2.0))
        );
        assert_eq!(
            wheel_zoom(MouseScrollDelta::PixelDelta(PhysicalPosition::new(0.0, -80.0))),
            Some(CameraInput::Zoom(-2.0))
        );
        assert_eq!(wheel_zoom(MouseScrollDelta::LineDelta(3.0, 0.0)), None);
    }
}
