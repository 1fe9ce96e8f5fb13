// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub device: DeviceConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
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
            title: "Aurora".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub clear_color: [f32; 4],
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.2, 1.0],
        }
    }
}

/// GPU selection requirements
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub require_discrete_gpu: bool,
    pub sampler_anisotropy: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            require_discrete_gpu: false,
            sampler_anisotropy: true,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            show_fps: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {}. Using defaults.", e);
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

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_all_defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.window.title, "Aurora");
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 720);
        assert!(!config.window.fullscreen);
        assert_eq!(config.graphics.clear_color, [0.0, 0.0, 0.2, 1.0]);
        assert!(!config.device.require_discrete_gpu);
        assert!(config.device.sampler_anisotropy);
        assert!(config.debug.validation_layers);
        assert!(config.debug.show_fps);
    }

    #[test]
    fn partial_sections_fall_back_per_field() {
        let config: Config = toml::from_str("[window]\nwidth = 1920\n").unwrap();

        assert_eq!(config.window.width, 1920);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.window.title, "Aurora");
    }

    #[test]
    fn full_configuration_parses() {
        let text = r#"
            [window]
            title = "Demo"
            width = 800
            height = 600
            fullscreen = true

            [graphics]
            clear_color = [0.1, 0.1, 0.1, 1.0]

            [device]
            require_discrete_gpu = true
            sampler_anisotropy = false

            [debug]
            validation_layers = false
            show_fps = false
        "#;
        let config: Config = toml::from_str(text).unwrap();

        assert_eq!(config.window.title, "Demo");
        assert_eq!((config.window.width, config.window.height), (800, 600));
        assert!(config.window.fullscreen);
        assert_eq!(config.graphics.clear_color, [0.1, 0.1, 0.1, 1.0]);
        assert!(config.device.require_discrete_gpu);
        assert!(!config.device.sampler_anisotropy);
        assert!(!config.debug.validation_layers);
        assert!(!config.debug.show_fps);
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(toml::from_str::<Config>("window = \"nope\"").is_err());
    }
}
