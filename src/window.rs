//! Window management using winit

use std::sync::Arc;

use glam::Vec2;
use winit::{
    dpi::PhysicalSize,
    error::{EventLoopError, OsError},
    event::{ElementState, Event, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window as WinitWindow, WindowBuilder},
};

use crate::scene::CameraInput;

/// Wrapper around winit window with additional state
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
    resized: bool,
    close_requested: bool,
    input: CameraInput,
    cursor: Option<Vec2>,
}

impl Window {
    /// Create a new window with the given title and dimensions
    pub fn new(
        event_loop: &EventLoop<()>,
        title: &str,
        width: u32,
        height: u32,
    ) -> Result<Self, OsError> {
        let window = Arc::new(
            WindowBuilder::new()
                .with_title(title)
                .with_inner_size(PhysicalSize::new(width, height))
                .build(event_loop)?,
        );
        let size = window.inner_size();

        Ok(Self {
            window,
            width: size.width,
            height: size.height,
            resized: false,
            close_requested: false,
            input: CameraInput::new(),
            cursor: None,
        })
    }

    /// Get the raw window for backend initialization
    pub fn window(&self) -> &WinitWindow {
        &self.window
    }

    /// Get arc reference to window
    pub fn window_arc(&self) -> Arc<WinitWindow> {
        Arc::clone(&self.window)
    }

    /// Get current window dimensions
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Check if window was resized since last frame
    pub fn was_resized(&self) -> bool {
        self.resized
    }

    /// Clear the resize flag
    pub fn clear_resize_flag(&mut self) {
        self.resized = false;
    }

    /// Check if close was requested
    pub fn should_close(&self) -> bool {
        self.close_requested
    }

    /// Camera input gathered since the last `end_input_frame`
    pub fn input(&self) -> &CameraInput {
        &self.input
    }

    /// Drop per-frame deltas once controllers have consumed them
    pub fn end_input_frame(&mut self) {
        self.input.reset_deltas();
    }

    /// Handle window events
    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::Resized(size) => {
                self.width = size.width;
                self.height = size.height;
                self.resized = true;
            }
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(code) = event.physical_key {
                    self.key(code, event.state == ElementState::Pressed);
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor_moved(position.x as f32, position.y as f32);
            }
            WindowEvent::CursorLeft { .. } => {
                self.cursor = None;
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => {
                self.input.dragging = *state == ElementState::Pressed;
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let amount = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(p) => p.y as f32,
                };
                self.input.scroll_delta += amount;
            }
            _ => {}
        }
    }

    fn key(&mut self, code: KeyCode, pressed: bool) {
        let input = &mut self.input;
        match code {
            KeyCode::KeyW | KeyCode::ArrowUp => input.forward = pressed,
            KeyCode::KeyS | KeyCode::ArrowDown => input.backward = pressed,
            KeyCode::KeyA | KeyCode::ArrowLeft => input.left = pressed,
            KeyCode::KeyD | KeyCode::ArrowRight => input.right = pressed,
            KeyCode::KeyE | KeyCode::Space => input.up = pressed,
            KeyCode::KeyQ => input.down = pressed,
            KeyCode::ShiftLeft | KeyCode::ShiftRight => input.sprint = pressed,
            _ => {}
        }
    }

    fn cursor_moved(&mut self, x: f32, y: f32) {
        let position = Vec2::new(x, y);
        if let Some(previous) = self.cursor {
            self.input.pointer_delta += position - previous;
        }
        self.cursor = Some(position);
        self.input.pointer_ndc = to_ndc(position, self.width, self.height);
    }

    /// Request a redraw
    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

/// Pixel position to normalized device coordinates, y up
fn to_ndc(position: Vec2, width: u32, height: u32) -> Vec2 {
    let size = Vec2::new(width.max(1) as f32, height.max(1) as f32);
    Vec2::new(
        position.x / size.x * 2.0 - 1.0,
        1.0 - position.y / size.y * 2.0,
    )
}

/// Run the application with a callback
///
/// `setup` runs once with the created window; its result is handed to
/// `callback` every frame. The loop exits when close is requested or the
/// callback returns `false`.
pub fn run<S, T, F>(
    title: &str,
    width: u32,
    height: u32,
    setup: S,
    mut callback: F,
) -> Result<(), EventLoopError>
where
    S: FnOnce(&Window) -> T,
    F: FnMut(&mut Window, &mut T) -> bool + 'static,
    T: 'static,
{
    let event_loop = EventLoop::new()?;
    let mut window = Window::new(&event_loop, title, width, height).map_err(EventLoopError::Os)?;
    let mut state = setup(&window);

    event_loop.run(move |event, elwt: &EventLoopWindowTarget<()>| {
        elwt.set_control_flow(ControlFlow::Poll);

        match event {
            Event::WindowEvent { event, .. } => {
                window.handle_event(&event);

                if let WindowEvent::CloseRequested = event {
                    elwt.exit();
                }
            }
            Event::AboutToWait => {
                if !callback(&mut window, &mut state) {
                    elwt.exit();
                }
                window.end_input_frame();
                window.request_redraw();
            }
            _ => {}
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_ndc_corners() {
        assert_eq!(to_ndc(Vec2::new(0.0, 0.0), 200, 100), Vec2::new(-1.0, 1.0));
        assert_eq!(to_ndc(Vec2::new(200.0, 100.0), 200, 100), Vec2::new(1.0, -1.0));
        assert_eq!(to_ndc(Vec2::new(100.0, 50.0), 200, 100), Vec2::ZERO);
    }
}
