// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.
// A file watcher lets the host pick up vsync / MSAA edits while running.

use crate::backend::device::{DeviceFeatureConfig, DevicePolicy};
use anyhow::{Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub controls: ControlsConfig,
}

/// Window settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Presenter".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraphicsConfig {
    pub vsync: bool,
    pub msaa: bool,
    /// Requested samples per pixel; clamped to what the GPU supports.
    pub msaa_samples: u32,
    pub clear_color: [f32; 4],
    pub device_policy: DevicePolicy,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            vsync: true,
            msaa: false,
            msaa_samples: 4,
            clear_color: [0.1, 0.2, 0.8, 1.0],
            device_policy: DevicePolicy::PreferDiscrete,
        }
    }
}

/// Debug settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: cfg!(debug_assertions),
            log_to_file: false,
            log_file: "vulkan_debug.log".to_string(),
            show_fps: true,
        }
    }
}

/// Control key bindings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControlsConfig {
    pub fullscreen_key: String,
    pub msaa_key: String,
    pub vsync_key: String,
    pub quit_key: String,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            fullscreen_key: "F11".to_string(),
            msaa_key: "F2".to_string(),
            vsync_key: "F3".to_string(),
            quit_key: "Escape".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path(DEFAULT_CONFIG_PATH).unwrap_or_else(|e| {
            log::warn!("Failed to load {}: {:#}. Using defaults.", DEFAULT_CONFIG_PATH, e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Feature request handed to the presenter. The MSAA ceiling is filled in
    /// once a device has been selected.
    pub fn feature_config(&self) -> DeviceFeatureConfig {
        DeviceFeatureConfig {
            vsync: self.graphics.vsync,
            msaa_enabled: self.graphics.msaa,
            msaa_requested: self.graphics.msaa_samples.max(1),
            msaa_max_supported: 1,
        }
    }
}

/// Watches the config file and yields a fresh `Config` after each edit.
pub struct ConfigWatcher {
    path: PathBuf,
    events: Receiver<notify::Result<notify::Event>>,
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Watch the directory containing `path` so editors that replace the file
    /// on save are still seen.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, events) = channel();
        let mut watcher = notify::recommended_watcher(tx).context("Failed to create file watcher")?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {:?}", dir))?;

        log::info!("Watching {:?} for changes", path);
        Ok(Self {
            path,
            events,
            _watcher: watcher,
        })
    }

    /// Non-blocking: reloads once if any pending event touched the config file.
    pub fn poll(&self) -> Option<Config> {
        let mut touched = false;
        for event in self.events.try_iter() {
            match event {
                Ok(event) => touched |= self.concerns(&event),
                Err(e) => log::warn!("Config watcher error: {}", e),
            }
        }
        if !touched {
            return None;
        }

        match Config::load_from_path(&self.path) {
            Ok(config) => Some(config),
            Err(e) => {
                log::warn!("Ignoring config change: {:#}", e);
                None
            }
        }
    }

    fn concerns(&self, event: &notify::Event) -> bool {
        matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
            && event
                .paths
                .iter()
                .any(|p| p.file_name() == self.path.file_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [graphics]
            vsync = false
            msaa = true
            msaa_samples = 8

            [window]
            width = 800
            "#,
        )
        .unwrap();

        assert!(!config.graphics.vsync);
        assert!(config.graphics.msaa);
        assert_eq!(config.graphics.msaa_samples, 8);
        assert_eq!(config.graphics.clear_color, GraphicsConfig::default().clear_color);
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.controls, ControlsConfig::default());
    }

    #[test]
    fn device_policy_parses_kebab_case() {
        let config = Config::parse("[graphics]\ndevice_policy = \"require-discrete\"").unwrap();
        assert_eq!(config.graphics.device_policy, DevicePolicy::RequireDiscrete);
        assert!(Config::parse("[graphics]\ndevice_policy = \"fastest\"").is_err());
    }

    #[test]
    fn feature_config_mirrors_graphics_table() {
        let config = Config::parse("[graphics]\nvsync = true\nmsaa = true\nmsaa_samples = 0").unwrap();
        let features = config.feature_config();
        assert!(features.vsync);
        assert!(features.msaa_enabled);
        assert_eq!(features.msaa_requested, 1);
        assert_eq!(features.msaa_max_supported, 1);
        // No device yet, so MSAA cannot be active.
        assert!(!features.msaa_active());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = Config::load_from_path("definitely/not/here.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn invalid_toml_is_reported() {
        assert!(Config::parse("[graphics\nvsync = ").is_err());
    }
}
