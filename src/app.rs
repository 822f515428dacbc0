//! Minimal winit shell: one window, one engine, one frame callback.

use std::sync::Arc;

use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowId},
};

use crate::{EngineConfig, GarnetEngine};

pub struct WindowConfig {
    pub title: String,
    pub engine: EngineConfig,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "garnet2d".to_string(),
            engine: EngineConfig::default(),
        }
    }
}

pub struct FrameContext {
    pub pressed_keys: Vec<winit::keyboard::Key>,
    pub mouse_position: Option<crate::utils::Position>,
    pub delta_time: f32,
}

pub struct GarnetApp {
    config: WindowConfig,
    engine: Option<GarnetEngine>,
    window: Option<Arc<Window>>,
    last_frame: std::time::Instant,
    frame_callback: Box<dyn FnMut(&mut GarnetEngine, &FrameContext)>,
    frame_context: FrameContext,
}

impl GarnetApp {
    pub fn new<F>(config: WindowConfig, frame_callback: F) -> Self
    where
        F: FnMut(&mut GarnetEngine, &FrameContext) + 'static,
    {
        Self {
            config,
            engine: None,
            window: None,
            last_frame: std::time::Instant::now(),
            frame_callback: Box::new(frame_callback),
            frame_context: FrameContext {
                pressed_keys: Vec::new(),
                mouse_position: None,
                delta_time: 0.0,
            },
        }
    }

    pub fn engine(&mut self) -> Option<&mut GarnetEngine> {
        self.engine.as_mut()
    }

    pub fn window(&self) -> Option<&Window> {
        self.window.as_ref().map(|w| w.as_ref())
    }
}

impl ApplicationHandler<()> for GarnetApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let window_attributes = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.engine.width,
                self.config.engine.height,
            ));

        if let Ok(window) = event_loop.create_window(window_attributes) {
            let window = Arc::new(window);
            match GarnetEngine::for_window(&self.config.engine, window.clone()) {
                Ok(engine) => {
                    self.engine = Some(engine);
                    self.window = Some(window);
                }
                Err(err) => {
                    log::error!("engine initialization failed: {err:#}");
                    event_loop.exit();
                }
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed() {
                    self.frame_context.pressed_keys.push(event.logical_key);
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.frame_context.mouse_position = Some(crate::utils::Position {
                    x: position.x as f32,
                    y: position.y as f32,
                });
            }
            WindowEvent::RedrawRequested => {
                let now = std::time::Instant::now();
                self.frame_context.delta_time = (now - self.last_frame).as_secs_f32();
                self.last_frame = now;

                if let Some(engine) = &mut self.engine {
                    (self.frame_callback)(engine, &self.frame_context);

                    if let Some(window) = &self.window {
                        window.request_redraw();
                    }

                    self.frame_context.pressed_keys.clear();
                }
            }
            WindowEvent::Resized(new_size) => {
                if let Some(engine) = &mut self.engine {
                    engine.resize(new_size.width, new_size.height);
                }
            }
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            _ => (),
        }
    }
}

pub fn run_app<F>(config: WindowConfig, frame_callback: F) -> Result<(), Box<dyn std::error::Error>>
where
    F: FnMut(&mut GarnetEngine, &FrameContext) + 'static,
{
    let event_loop = EventLoop::new()?;
    let mut app = GarnetApp::new(config, frame_callback);

    event_loop.run_app(&mut app)?;
    Ok(())
}
