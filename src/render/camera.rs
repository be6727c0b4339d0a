//! Thin-lens camera parameters fed to the trace program.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Camera as seen by the trace program. The session only forwards it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Camera {
    pub origin: Vec3,
    pub look_at: Vec3,
    /// Vertical field of view in degrees
    pub fov: f32,
    pub aperture: f32,
    pub focal_length: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            origin: Vec3::new(0.0, 0.0, 3.0),
            look_at: Vec3::new(0.0, 0.0, -1.0),
            fov: 90.0,
            aperture: 0.01,
            focal_length: 10.0,
        }
    }
}

impl Camera {
    /// Packed `u_camParams` value.
    pub fn params(&self) -> Vec3 {
        Vec3::new(self.fov, self.aperture, self.focal_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cam = Camera::default();
        assert_eq!(cam.params(), Vec3::new(90.0, 0.01, 10.0));
        assert_eq!(cam.look_at, Vec3::new(0.0, 0.0, -1.0));
    }

    #[test]
    fn test_partial_json() {
        let cam: Camera = serde_json::from_str(r#"{ "fov": 45.0 }"#).unwrap();
        assert_eq!(cam.fov, 45.0);
        assert_eq!(cam.origin, Vec3::new(0.0, 0.0, 3.0));
    }
}
