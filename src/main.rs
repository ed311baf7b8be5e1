// =============================================================================
// VULKAN PRESENTER DEMO - winit host for the presentation engine
// =============================================================================
//
// The library owns device, swap chain and frame pacing. This binary is the
// host: it creates the window, forwards input to the renderer strategy and
// calls the presenter's lifecycle methods.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  App (winit ApplicationHandler, config, FPS title)              │
// │    └── Presenter (device, swapchain, frame slots)               │
// │          └── ClearRenderer (FrameRenderer strategy)             │
// │                └── OrbitCamera (pointer drag / scroll)          │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW (inside Presenter::render_frame):
// 1. Acquire swapchain image
// 2. Wait for the frame slot's fence
// 3. Renderer records into the slot's command buffer
// 4. Submit to the graphics queue
// 5. Present on the present queue
//
// =============================================================================

mod camera;

use anyhow::{Context, Result};
use camera::OrbitCamera;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use vk_presenter::config::{Config, ConfigWatcher, ControlsConfig, DEFAULT_CONFIG_PATH};
use vk_presenter::host::{FrameContext, FrameRenderer, SwapchainInfo};
use vk_presenter::presenter::{FrameStatus, Presenter, PresenterDesc};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalPosition,
    event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    // Initialize logging
    init_logging(&config);
    log::info!("Starting Vulkan presenter");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!(
        "VSync: {}, MSAA: {} ({}x requested)",
        config.graphics.vsync,
        config.graphics.msaa,
        config.graphics.msaa_samples
    );

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Initialize logging with optional file output for validation errors
fn init_logging(config: &Config) {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::from_default_env();
    builder.filter_level(LevelFilter::Info);
    if let Ok(filter) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filter);
    }
    builder.init();

    // Create/clear log file if enabled
    if config.debug.log_to_file {
        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            let _ = writeln!(file, "=== Vulkan Presenter Log ===");
            let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
            let _ = writeln!(file);
        }
    }
}

// =============================================================================
// KEY BINDINGS
// =============================================================================

/// Map a config key name ("F11", "Escape", "M", ...) to a physical key.
fn parse_key(name: &str) -> Option<KeyCode> {
    let key = match name.trim().to_ascii_lowercase().as_str() {
        "escape" | "esc" => KeyCode::Escape,
        "space" => KeyCode::Space,
        "enter" | "return" => KeyCode::Enter,
        "tab" => KeyCode::Tab,
        "f1" => KeyCode::F1,
        "f2" => KeyCode::F2,
        "f3" => KeyCode::F3,
        "f4" => KeyCode::F4,
        "f5" => KeyCode::F5,
        "f6" => KeyCode::F6,
        "f7" => KeyCode::F7,
        "f8" => KeyCode::F8,
        "f9" => KeyCode::F9,
        "f10" => KeyCode::F10,
        "f11" => KeyCode::F11,
        "f12" => KeyCode::F12,
        "m" => KeyCode::KeyM,
        "v" => KeyCode::KeyV,
        "f" => KeyCode::KeyF,
        "q" => KeyCode::KeyQ,
        _ => return None,
    };
    Some(key)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct KeyBindings {
    fullscreen: Option<KeyCode>,
    msaa: Option<KeyCode>,
    vsync: Option<KeyCode>,
    quit: Option<KeyCode>,
}

impl KeyBindings {
    fn from_config(controls: &ControlsConfig) -> Self {
        let bind = |action: &str, name: &str| {
            let key = parse_key(name);
            if key.is_none() {
                log::warn!("Unknown key '{}' for {}, action unbound", name, action);
            }
            key
        };
        Self {
            fullscreen: bind("fullscreen", &controls.fullscreen_key),
            msaa: bind("msaa", &controls.msaa_key),
            vsync: bind("vsync", &controls.vsync_key),
            quit: bind("quit", &controls.quit_key),
        }
    }
}

// =============================================================================
// RENDERER
// =============================================================================

/// Clears the screen with a colour shaded by the camera orientation.
struct ClearRenderer {
    camera: OrbitCamera,
    clear_color: [f32; 4],
}

impl ClearRenderer {
    fn shaded_clear(&self) -> [f32; 4] {
        let dir = self.camera.forward();
        let fade = 1.0 - 0.5 * self.camera.zoom_fraction();
        let [r, g, b, a] = self.clear_color;
        [
            (r * fade + 0.15 * dir.x.abs()).min(1.0),
            (g * fade + 0.15 * dir.y.abs()).min(1.0),
            (b * fade + 0.15 * dir.z.abs()).min(1.0),
            a,
        ]
    }
}

impl FrameRenderer for ClearRenderer {
    fn record(&mut self, frame: &FrameContext<'_>) -> vk_presenter::Result<()> {
        frame.begin_render_pass(self.shaded_clear());
        frame.end_render_pass();
        Ok(())
    }

    fn on_swapchain_rebuilt(&mut self, info: &SwapchainInfo) {
        log::debug!(
            "Renderer sees {}x{} ({:.2}), {} images, {:?}",
            info.extent.width,
            info.extent.height,
            info.aspect_ratio(),
            info.image_count,
            info.samples
        );
    }

    fn on_pointer_moved(&mut self, dx: f32, dy: f32) {
        self.camera.rotate(dx, dy);
    }

    fn on_scroll(&mut self, _dx: f32, dy: f32) {
        self.camera.zoom(dy);
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// IMPORTANT: Field order matters for Drop! The presenter owns the surface
/// and must go before the window it was created from.
struct App {
    config: Config,
    keys: KeyBindings,
    watcher: Option<ConfigWatcher>,

    presenter: Option<Presenter>,
    renderer: ClearRenderer,
    window: Option<Arc<Window>>,
    is_fullscreen: bool,

    // ─────────────────────────────────────────────────────────────────────────
    // INPUT
    // ─────────────────────────────────────────────────────────────────────────
    dragging: bool,
    last_cursor: Option<PhysicalPosition<f64>>,

    // ─────────────────────────────────────────────────────────────────────────
    // STATE FLAGS
    // ─────────────────────────────────────────────────────────────────────────
    /// Set when the window is resized - applied before the next frame
    needs_resize: bool,

    // ─────────────────────────────────────────────────────────────────────────
    // FPS TRACKING
    // ─────────────────────────────────────────────────────────────────────────
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();
        let watcher = match ConfigWatcher::new(DEFAULT_CONFIG_PATH) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                log::warn!("Config hot reload disabled: {:#}", e);
                None
            }
        };
        Self {
            keys: KeyBindings::from_config(&config.controls),
            is_fullscreen: config.window.fullscreen,
            renderer: ClearRenderer {
                camera: OrbitCamera::default(),
                clear_color: config.graphics.clear_color,
            },
            config,
            watcher,
            presenter: None,
            window: None,
            dragging: false,
            last_cursor: None,
            needs_resize: false,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    fn init_presenter(&mut self, window: &Window) -> Result<()> {
        let desc = PresenterDesc {
            app_name: self.config.window.title.clone(),
            enable_validation: self.config.debug.validation_layers,
            device_policy: self.config.graphics.device_policy,
            features: self.config.feature_config(),
        };
        let presenter = Presenter::initialize(&desc, window).context("Failed to initialize presenter")?;
        if let Some(info) = presenter.swapchain_info() {
            log::info!(
                "Presenting {}x{} via {:?}",
                info.extent.width,
                info.extent.height,
                info.present_mode
            );
        }
        self.presenter = Some(presenter);
        Ok(())
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    /// Returns true if a frame reached the screen.
    fn render_frame(&mut self) -> Result<bool> {
        self.apply_config_changes()?;

        let (Some(window), Some(presenter)) = (self.window.as_ref(), self.presenter.as_mut()) else {
            return Ok(false);
        };

        if self.needs_resize {
            let size = window.inner_size();
            presenter.resize(size.width, size.height)?;
            self.needs_resize = false;
        }

        let status = presenter.render_frame(&mut self.renderer)?;
        Ok(matches!(status, FrameStatus::Presented { .. }))
    }

    /// Pick up edits to config.toml made while running.
    fn apply_config_changes(&mut self) -> Result<()> {
        let Some(new) = self.watcher.as_ref().and_then(|w| w.poll()) else {
            return Ok(());
        };
        log::info!("Config file changed, applying");

        if let Some(presenter) = self.presenter.as_mut() {
            presenter.set_vsync_enabled(new.graphics.vsync)?;
            presenter.set_msaa_enabled(new.graphics.msaa)?;
        }
        if new.graphics.msaa_samples != self.config.graphics.msaa_samples
            || new.graphics.device_policy != self.config.graphics.device_policy
            || new.debug.validation_layers != self.config.debug.validation_layers
        {
            log::info!("Sample count, device policy and validation changes apply on restart");
        }

        self.renderer.clear_color = new.graphics.clear_color;
        self.keys = KeyBindings::from_config(&new.controls);
        self.config = new;
        Ok(())
    }

    // =========================================================================
    // TOGGLES
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                // Enter fullscreen (use current monitor)
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }

            self.needs_resize = true;
        }
    }

    fn toggle_msaa(&mut self) -> Result<()> {
        if let Some(presenter) = self.presenter.as_mut() {
            let enable = !presenter.features().msaa_enabled;
            presenter.set_msaa_enabled(enable)?;
            if enable && !presenter.is_msaa_enabled() {
                log::warn!("MSAA requested but the GPU offers a single sample only");
            }
        }
        Ok(())
    }

    fn toggle_vsync(&mut self) -> Result<()> {
        if let Some(presenter) = self.presenter.as_mut() {
            let enable = !presenter.is_vsync_enabled();
            presenter.set_vsync_enabled(enable)?;
        }
        Ok(())
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let (Some(window), Some(presenter)) = (&self.window, &self.presenter) {
                let msaa = if presenter.is_msaa_enabled() {
                    format!("MSAA {}x", presenter.features().effective_msaa_level())
                } else {
                    "MSAA off".to_string()
                };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{} | VSync {}]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    msaa,
                    if presenter.is_vsync_enabled() { "on" } else { "off" }
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut presenter) = self.presenter.take() {
            if let Err(e) = presenter.destroy() {
                log::error!("Shutdown error: {:?}", e);
            }
        }
        event_loop.exit();
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // Create window with settings from config
        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_presenter(&window) {
            log::error!("Failed to initialize Vulkan: {:?}", e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    /// Handle window events.
    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.needs_resize = true;
            }

            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(true) => self.update_fps(),
                Ok(false) => {}
                Err(e) => {
                    log::error!("Render error: {:?}", e);
                    self.shutdown(event_loop);
                }
            },

            // ─────────────────────────────────────────────────────────────────
            // KEYBOARD INPUT
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::KeyboardInput { event, .. } => {
                if !event.state.is_pressed() || event.repeat {
                    return;
                }
                let PhysicalKey::Code(key) = event.physical_key else {
                    return;
                };
                let key = Some(key);

                let result = if key == self.keys.quit {
                    log::info!("Quit key pressed, exiting...");
                    self.shutdown(event_loop);
                    Ok(())
                } else if key == self.keys.fullscreen {
                    self.toggle_fullscreen();
                    Ok(())
                } else if key == self.keys.msaa {
                    self.toggle_msaa()
                } else if key == self.keys.vsync {
                    self.toggle_vsync()
                } else {
                    Ok(())
                };

                if let Err(e) = result {
                    log::error!("Toggle failed: {:?}", e);
                    self.shutdown(event_loop);
                }
            }

            // ─────────────────────────────────────────────────────────────────
            // POINTER INPUT (camera hooks)
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => {
                self.dragging = state == ElementState::Pressed;
            }

            WindowEvent::CursorMoved { position, .. } => {
                if let (true, Some(last)) = (self.dragging, self.last_cursor) {
                    self.renderer
                        .on_pointer_moved((position.x - last.x) as f32, (position.y - last.y) as f32);
                }
                self.last_cursor = Some(position);
            }

            WindowEvent::CursorLeft { .. } => {
                self.last_cursor = None;
            }

            WindowEvent::MouseWheel { delta, .. } => {
                let (dx, dy) = match delta {
                    MouseScrollDelta::LineDelta(x, y) => (x, y),
                    MouseScrollDelta::PixelDelta(p) => ((p.x / 40.0) as f32, (p.y / 40.0) as f32),
                };
                self.renderer.on_scroll(dx, dy);
            }

            _ => {}
        }
    }

    /// Request continuous redraws.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        if let Some(mut presenter) = self.presenter.take() {
            if let Err(e) = presenter.destroy() {
                log::error!("Cleanup error: {:?}", e);
            }
        }
        log::info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_controls_bind_every_action() {
        let keys = KeyBindings::from_config(&ControlsConfig::default());
        assert_eq!(keys.fullscreen, Some(KeyCode::F11));
        assert_eq!(keys.msaa, Some(KeyCode::F2));
        assert_eq!(keys.vsync, Some(KeyCode::F3));
        assert_eq!(keys.quit, Some(KeyCode::Escape));
    }

    #[test]
    fn key_names_are_case_insensitive() {
        assert_eq!(parse_key("escape"), Some(KeyCode::Escape));
        assert_eq!(parse_key(" f2 "), Some(KeyCode::F2));
        assert_eq!(parse_key("Hyper"), None);
    }

    #[test]
    fn shaded_clear_stays_in_range() {
        let mut renderer = ClearRenderer {
            camera: OrbitCamera::default(),
            clear_color: [1.0, 1.0, 1.0, 1.0],
        };
        renderer.on_pointer_moved(300.0, -120.0);
        renderer.on_scroll(0.0, 3.0);
        let color = renderer.shaded_clear();
        assert!(color.iter().all(|c| (0.0..=1.0).contains(c)));
        assert_eq!(color[3], 1.0);
    }
}
