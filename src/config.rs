//! Persistent viewport settings

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::render::camera::Camera;
use crate::render::mode::{ConstantTable, Mode, ShaderDefines};
use crate::util::{Error, Result};

/// Settings of one render session. Every field is optional in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
    // Canvas
    pub width: u32,
    pub height: u32,
    pub device_pixel_ratio: f32,

    // Tiling
    pub tile_rendering: bool,
    pub tile_size: [u32; 2],

    // Accumulation
    pub max_passes: Option<u32>,  // None or 0 = unbounded
    pub paused: bool,
    pub temporal_frames: u32,

    // Mode
    pub animated: bool,
    pub defines: ShaderDefines,
    pub constants: ConstantTable,
    pub animated_constants: ConstantTable,

    pub camera: Camera,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            width: 600,
            height: 600,
            device_pixel_ratio: 1.0,
            tile_rendering: false,
            tile_size: [32, 32],
            max_passes: None,
            paused: false,
            temporal_frames: 8,
            animated: false,
            defines: ShaderDefines::default(),
            constants: ConstantTable::STATIC,
            animated_constants: ConstantTable::ANIMATED,
            camera: Camera::default(),
        }
    }
}

impl ViewportConfig {
    /// Settings file in the user config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("restir-viewport");
            p.push("viewport.json");
            p
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from [`Self::default_path`], falling back to defaults when the
    /// file is missing or unreadable.
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring invalid viewport config");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::config(format!("canvas size {}x{} is empty", self.width, self.height)));
        }
        if self.tile_size[0] == 0 || self.tile_size[1] == 0 {
            return Err(Error::config("tile size must be non-zero"));
        }
        if self.temporal_frames == 0 {
            return Err(Error::config("temporal_frames must be at least 1"));
        }
        if !(self.device_pixel_ratio.is_finite() && self.device_pixel_ratio > 0.0) {
            return Err(Error::config(format!("invalid device pixel ratio {}", self.device_pixel_ratio)));
        }
        Ok(())
    }

    pub fn mode(&self) -> Mode {
        Mode::from_animated(self.animated)
    }
}

/// Discrete canvas size presets offered to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeClass {
    S256,
    S512,
    S1024,
    S2048,
    S4096,
    S8192,
}

impl SizeClass {
    pub const ALL: [SizeClass; 6] =
        [Self::S256, Self::S512, Self::S1024, Self::S2048, Self::S4096, Self::S8192];

    /// Edge length in CSS pixels.
    pub fn edge(self) -> u32 {
        256 << (self as u32)
    }

    /// Square canvas size in device pixels.
    pub fn dimensions(self, device_pixel_ratio: f32) -> (u32, u32) {
        let edge = (self.edge() as f32 * device_pixel_ratio).round().max(1.0) as u32;
        (edge, edge)
    }
}

impl TryFrom<u8> for SizeClass {
    type Error = Error;

    fn try_from(index: u8) -> Result<Self> {
        Self::ALL
            .get(index as usize)
            .copied()
            .ok_or(Error::InvalidSizeClass(index))
    }
}
