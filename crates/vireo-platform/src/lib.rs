//! Platform abstraction for the Vireo rendering runtime.
//!
//! Provides window creation via winit and the [`PresentTarget`] the GPU
//! layer builds its presentation surface from.

use std::sync::Arc;

use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use thiserror::Error;
use tracing::info;
use vireo_gpu::PresentTarget;
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Fullscreen, Window, WindowAttributes};

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Window creation failed: {0}")]
    WindowCreation(String),
    #[error("Event loop error: {0}")]
    EventLoop(String),
}

pub type Result<T> = std::result::Result<T, PlatformError>;

/// Platform configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
    /// Borderless fullscreen on the current monitor.
    pub fullscreen: bool,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            title: "Vireo".to_string(),
            width: 1280,
            height: 720,
            resizable: true,
            fullscreen: false,
        }
    }
}

impl PlatformConfig {
    /// winit attributes for a window matching this configuration.
    pub fn window_attributes(&self) -> WindowAttributes {
        let attributes = Window::default_attributes()
            .with_title(&self.title)
            .with_inner_size(PhysicalSize::new(self.width.max(1), self.height.max(1)))
            .with_resizable(self.resizable);
        if self.fullscreen {
            attributes.with_fullscreen(Some(Fullscreen::Borderless(None)))
        } else {
            attributes
        }
    }
}

/// A winit window the runtime presents into.
#[derive(Debug, Clone)]
pub struct PlatformWindow {
    window: Arc<Window>,
}

impl PlatformWindow {
    /// Open a window on a running event loop.
    pub fn create(event_loop: &ActiveEventLoop, config: &PlatformConfig) -> Result<Self> {
        let window = event_loop
            .create_window(config.window_attributes())
            .map_err(|e| PlatformError::WindowCreation(e.to_string()))?;
        let size = window.inner_size();
        info!(
            "Window '{}' created: {}x{}{}",
            config.title,
            size.width,
            size.height,
            if config.fullscreen { " (fullscreen)" } else { "" }
        );
        Ok(Self {
            window: Arc::new(window),
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

impl HasDisplayHandle for PlatformWindow {
    fn display_handle(&self) -> std::result::Result<DisplayHandle<'_>, HandleError> {
        self.window.display_handle()
    }
}

impl HasWindowHandle for PlatformWindow {
    fn window_handle(&self) -> std::result::Result<WindowHandle<'_>, HandleError> {
        self.window.window_handle()
    }
}

impl PresentTarget for PlatformWindow {
    fn drawable_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::dpi::Size;

    #[test]
    fn windowed_attributes() {
        let config = PlatformConfig {
            title: "T".into(),
            width: 800,
            height: 600,
            ..PlatformConfig::default()
        };
        let attributes = config.window_attributes();
        assert_eq!(attributes.title, "T");
        assert_eq!(
            attributes.inner_size,
            Some(Size::Physical(PhysicalSize::new(800, 600)))
        );
        assert!(attributes.resizable);
        assert!(attributes.fullscreen.is_none());
    }

    #[test]
    fn fullscreen_is_borderless() {
        let config = PlatformConfig {
            fullscreen: true,
            ..PlatformConfig::default()
        };
        assert_eq!(
            config.window_attributes().fullscreen,
            Some(Fullscreen::Borderless(None))
        );
    }

    #[test]
    fn zero_size_request_is_clamped() {
        let config = PlatformConfig {
            width: 0,
            height: 0,
            ..PlatformConfig::default()
        };
        assert_eq!(
            config.window_attributes().inner_size,
            Some(Size::Physical(PhysicalSize::new(1, 1)))
        );
    }
}
