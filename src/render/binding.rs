//! Trace program interface: uniform names, sampler slots, and their
//! resolved locations.
//!
//! Locations are looked up once after the program is compiled. Scalar
//! values that only change with the canvas (resolution, camera, temporal
//! window, sampler units) are re-issued on resize; time and frame index are
//! issued every frame.

use glam::Vec2;

use crate::device::{RenderDevice, UniformLocation, UniformValue};
use super::camera::Camera;

/// Sampler slot of the trace program. The discriminant is the texture unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum SamplerSlot {
    /// Previous accumulation result (`back_target`)
    Backbuffer = 0,
    Tex0 = 1,
    Tex1 = 2,
    Tex2 = 3,
    Tex3 = 4,
    /// RGBA noise texture
    Noise = 5,
    Cubemap = 6,
    /// Current-generation reservoir (back copy)
    Restir = 7,
    /// Current-generation reservoir aux (back copy)
    RestirAux = 8,
    RestirHistory1 = 9,
    RestirAuxHistory1 = 10,
    RestirHistory2 = 11,
    RestirAuxHistory2 = 12,
}

impl SamplerSlot {
    pub const COUNT: usize = 13;

    pub const ALL: [SamplerSlot; Self::COUNT] = [
        Self::Backbuffer,
        Self::Tex0,
        Self::Tex1,
        Self::Tex2,
        Self::Tex3,
        Self::Noise,
        Self::Cubemap,
        Self::Restir,
        Self::RestirAux,
        Self::RestirHistory1,
        Self::RestirAuxHistory1,
        Self::RestirHistory2,
        Self::RestirAuxHistory2,
    ];

    /// Slots filled by externally loaded images.
    pub const EXTERNAL: [SamplerSlot; 6] =
        [Self::Tex0, Self::Tex1, Self::Tex2, Self::Tex3, Self::Noise, Self::Cubemap];

    #[inline]
    pub fn unit(self) -> u32 {
        self as u32
    }

    pub fn uniform_name(self) -> &'static str {
        match self {
            Self::Backbuffer => "u_bufferA",
            Self::Tex0 => "u_tex0",
            Self::Tex1 => "u_tex1",
            Self::Tex2 => "u_tex2",
            Self::Tex3 => "u_tex3",
            Self::Noise => "u_rnd_tex",
            Self::Cubemap => "u_cubemap",
            Self::Restir => "u_restir",
            Self::RestirAux => "u_restirAux",
            Self::RestirHistory1 => "u_restirHistory1",
            Self::RestirAuxHistory1 => "u_restirAuxHistory1",
            Self::RestirHistory2 => "u_restirHistory2",
            Self::RestirAuxHistory2 => "u_restirAuxHistory2",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.uniform_name() == name)
    }

    pub fn is_external(self) -> bool {
        Self::EXTERNAL.contains(&self)
    }

    pub fn is_cube(self) -> bool {
        self == Self::Cubemap
    }
}

/// Scalar uniforms of the trace program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Uniform {
    CamPos,
    CamLookAt,
    /// (fov, aperture, focal length)
    CamParams,
    Resolution,
    /// Milliseconds since session start
    Time,
    /// Pass counter after increment
    Frame,
    TemporalFrames,
}

impl Uniform {
    pub const COUNT: usize = 7;

    pub const ALL: [Uniform; Self::COUNT] = [
        Self::CamPos,
        Self::CamLookAt,
        Self::CamParams,
        Self::Resolution,
        Self::Time,
        Self::Frame,
        Self::TemporalFrames,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::CamPos => "u_camPos",
            Self::CamLookAt => "u_camLookAt",
            Self::CamParams => "u_camParams",
            Self::Resolution => "u_resolution",
            Self::Time => "u_time",
            Self::Frame => "u_frame",
            Self::TemporalFrames => "u_temporalFrames",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|u| u.name() == name)
    }
}

/// Resolved locations for one compiled program.
#[derive(Clone, Debug, Default)]
pub struct ProgramBinding {
    scalars: [Option<UniformLocation>; Uniform::COUNT],
    samplers: [Option<UniformLocation>; SamplerSlot::COUNT],
}

impl ProgramBinding {
    /// Look up every declared name. Names the program does not use stay unbound.
    pub fn resolve<D: RenderDevice>(device: &D, program: &D::Program) -> Self {
        let mut binding = Self::default();
        for u in Uniform::ALL {
            binding.scalars[u as usize] = device.uniform_location(program, u.name());
        }
        for s in SamplerSlot::ALL {
            binding.samplers[s as usize] = device.uniform_location(program, s.uniform_name());
        }

        let unbound: Vec<&str> = Uniform::ALL
            .into_iter()
            .zip(binding.scalars.iter())
            .filter(|(_, loc)| loc.is_none())
            .map(|(u, _)| u.name())
            .chain(
                SamplerSlot::ALL
                    .into_iter()
                    .zip(binding.samplers.iter())
                    .filter(|(_, loc)| loc.is_none())
                    .map(|(s, _)| s.uniform_name()),
            )
            .collect();
        if !unbound.is_empty() {
            tracing::debug!(?unbound, "program does not use some uniforms");
        }
        binding
    }

    pub fn location(&self, uniform: Uniform) -> Option<UniformLocation> {
        self.scalars[uniform as usize]
    }

    pub fn sampler_location(&self, slot: SamplerSlot) -> Option<UniformLocation> {
        self.samplers[slot as usize]
    }

    /// Number of names that resolved to a location.
    pub fn bound_count(&self) -> usize {
        self.scalars.iter().chain(self.samplers.iter()).filter(|l| l.is_some()).count()
    }

    /// Issue the values that only change with the canvas or the camera.
    pub fn upload_static<D: RenderDevice>(
        &self,
        device: &mut D,
        program: &mut D::Program,
        resolution: (u32, u32),
        camera: &Camera,
        temporal_frames: u32,
    ) {
        let resolution = Vec2::new(resolution.0 as f32, resolution.1 as f32);
        let scalars = [
            (Uniform::Resolution, UniformValue::Vec2(resolution.to_array())),
            (Uniform::CamPos, UniformValue::Vec3(camera.origin.to_array())),
            (Uniform::CamLookAt, UniformValue::Vec3(camera.look_at.to_array())),
            (Uniform::CamParams, UniformValue::Vec3(camera.params().to_array())),
            (Uniform::TemporalFrames, UniformValue::U32(temporal_frames)),
        ];
        for (uniform, value) in scalars {
            if let Some(loc) = self.location(uniform) {
                device.set_uniform(program, loc, value);
            }
        }
        for slot in SamplerSlot::ALL {
            if let Some(loc) = self.sampler_location(slot) {
                device.set_uniform(program, loc, UniformValue::Sampler(slot.unit()));
            }
        }
    }

    /// Issue the per-frame values.
    pub fn upload_frame<D: RenderDevice>(
        &self,
        device: &mut D,
        program: &mut D::Program,
        time_ms: f32,
        frame: u32,
    ) {
        if let Some(loc) = self.location(Uniform::Time) {
            device.set_uniform(program, loc, UniformValue::F32(time_ms));
        }
        if let Some(loc) = self.location(Uniform::Frame) {
            device.set_uniform(program, loc, UniformValue::U32(frame));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::HeadlessDevice;
    use crate::device::ProgramSource;

    #[test]
    fn test_slot_units_are_dense() {
        for (i, slot) in SamplerSlot::ALL.into_iter().enumerate() {
            assert_eq!(slot.unit() as usize, i);
            assert_eq!(SamplerSlot::from_name(slot.uniform_name()), Some(slot));
        }
        assert!(SamplerSlot::Cubemap.is_external());
        assert!(!SamplerSlot::RestirHistory2.is_external());
        assert_eq!(Uniform::from_name("u_frame"), Some(Uniform::Frame));
        assert_eq!(Uniform::from_name("u_mouse"), None);
    }

    #[test]
    fn test_resolve_skips_unused_names() {
        let mut device = HeadlessDevice::new();
        let source = "uniform uint u_frame; uniform float u_time; uniform sampler2D u_bufferA;";
        let program = device
            .compile_program(&ProgramSource { label: "trace", fragment: source })
            .unwrap();
        let binding = ProgramBinding::resolve(&device, &program);

        assert!(binding.location(Uniform::Frame).is_some());
        assert!(binding.location(Uniform::Time).is_some());
        assert!(binding.location(Uniform::CamPos).is_none());
        assert!(binding.sampler_location(SamplerSlot::Backbuffer).is_some());
        assert!(binding.sampler_location(SamplerSlot::Cubemap).is_none());
        assert_eq!(binding.bound_count(), 3);
    }

    #[test]
    fn test_upload_frame_values() {
        let mut device = HeadlessDevice::new();
        let source = "u_frame u_time u_resolution u_bufferA";
        let mut program = device
            .compile_program(&ProgramSource { label: "trace", fragment: source })
            .unwrap();
        let binding = ProgramBinding::resolve(&device, &program);

        binding.upload_static(&mut device, &mut program, (64, 32), &Camera::default(), 8);
        binding.upload_frame(&mut device, &mut program, 16.0, 3);

        assert_eq!(program.uniform("u_frame"), Some(UniformValue::U32(3)));
        assert_eq!(program.uniform("u_time"), Some(UniformValue::F32(16.0)));
        assert_eq!(program.uniform("u_resolution"), Some(UniformValue::Vec2([64.0, 32.0])));
        assert_eq!(program.uniform("u_bufferA"), Some(UniformValue::Sampler(0)));
        assert_eq!(program.uniform("u_camPos"), None);
    }
}
