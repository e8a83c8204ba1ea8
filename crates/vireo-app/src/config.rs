//! Session configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use vireo_core::constants::{DEFAULT_FRAMES_IN_FLIGHT, MAX_FRAMES_IN_FLIGHT};
use vireo_core::{BackendKind, Error, Result};
use vireo_platform::PlatformConfig;

/// Application configuration.
///
/// Every field has a default, so a TOML file only needs the keys it
/// changes:
///
/// ```toml
/// title = "Viewer"
/// width = 800
/// height = 600
/// vsync = false
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Borderless fullscreen on the current monitor.
    pub fullscreen: bool,
    /// Enable vsync.
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Frames the CPU may record ahead of the GPU.
    pub frames_in_flight: usize,
    /// Root directory the application loads its assets from.
    pub asset_root: PathBuf,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
    /// Clear color of the swap images.
    pub clear_color: [f32; 4],
    /// Lower bound on the descriptor pool size.
    pub max_descriptor_sets: u32,
    /// Compile a wireframe pipeline next to the filled one.
    pub wireframe: bool,
    /// Graphics backend.
    pub backend: BackendKind,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Vireo".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
            vsync: true,
            validation: cfg!(debug_assertions),
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            asset_root: PathBuf::from("assets"),
            target_fps: None,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            max_descriptor_sets: 16,
            wireframe: false,
            backend: BackendKind::default(),
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Parse a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Reject values no session can run with.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            return Err(Error::Config(format!(
                "frames_in_flight must be between 1 and {MAX_FRAMES_IN_FLIGHT}, got {}",
                self.frames_in_flight
            )));
        }
        if self.max_descriptor_sets == 0 {
            return Err(Error::Config("max_descriptor_sets must be positive".into()));
        }
        if self.target_fps == Some(0) {
            return Err(Error::Config("target_fps must be positive".into()));
        }
        Ok(())
    }

    /// Window settings for the platform layer.
    pub fn platform(&self) -> PlatformConfig {
        PlatformConfig {
            title: self.title.clone(),
            width: self.width,
            height: self.height,
            resizable: true,
            fullscreen: self.fullscreen,
        }
    }

    /// Set the window dimensions.
    #[must_use]
    pub const fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    #[must_use]
    pub const fn with_fullscreen(mut self, fullscreen: bool) -> Self {
        self.fullscreen = fullscreen;
        self
    }

    /// Set the target FPS.
    #[must_use]
    pub const fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    /// Enable or disable vsync.
    #[must_use]
    pub const fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub const fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    #[must_use]
    pub const fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    #[must_use]
    pub fn with_asset_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.asset_root = root.into();
        self
    }

    #[must_use]
    pub const fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    #[must_use]
    pub const fn with_max_descriptor_sets(mut self, sets: u32) -> Self {
        self.max_descriptor_sets = sets;
        self
    }

    #[must_use]
    pub const fn with_wireframe(mut self, wireframe: bool) -> Self {
        self.wireframe = wireframe;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_document_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            title = "T"
            width = 800
            height = 600
            clear_color = [0.1, 0.2, 0.3, 1.0]
            "#,
        )
        .unwrap();
        assert_eq!(config.title, "T");
        assert_eq!((config.width, config.height), (800, 600));
        assert_eq!(config.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(config.frames_in_flight, DEFAULT_FRAMES_IN_FLIGHT);
        assert_eq!(config.backend, BackendKind::Vulkan);
        assert!(!config.fullscreen);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let err = AppConfig::from_toml_str(r#"backend = "opengl""#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(AppConfig::from_toml_str("widht = 3").is_err());
    }

    #[test]
    fn frames_in_flight_is_bounded() {
        assert!(AppConfig::from_toml_str("frames_in_flight = 0").is_err());
        assert!(AppConfig::from_toml_str("frames_in_flight = 9").is_err());
        assert!(AppConfig::from_toml_str("frames_in_flight = 3").is_ok());
    }

    #[test]
    fn builder_and_platform_settings() {
        let config = AppConfig::new("T")
            .with_size(800, 600)
            .with_fullscreen(true)
            .with_target_fps(60)
            .with_wireframe(true);
        assert_eq!(config.target_fps, Some(60));
        let platform = config.platform();
        assert_eq!(platform.title, "T");
        assert_eq!((platform.width, platform.height), (800, 600));
        assert!(platform.fullscreen);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = AppConfig::load("does/not/exist.toml").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
