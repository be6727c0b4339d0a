//! The GPU seam.
//!
//! The render core never talks to a graphics API directly; it drives a
//! [`RenderDevice`]. Two backends exist:
//!
//! - [`gpu::WgpuDevice`] (feature `gpu`) - wgpu render targets, GLSL trace
//!   program, WGSL display pass.
//! - [`headless::HeadlessDevice`] - CPU images; records every draw and
//!   present. Used by the test suite and for running without a GPU.
//!
//! ## Frame shape
//! ```text
//! inputs (sampler slots) ──► trace program ──► [color, reservoir, aux] (MRT)
//!                                                  │
//!                                   present(color × weight) or split panels
//! ```

use crate::render::binding::{SamplerSlot, Uniform};
use crate::util::{Rect, Result};

#[cfg(feature = "gpu")]
pub mod gpu;
pub mod headless;

/// Channel layout and numeric type of a surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4 x f32, used for every accumulation and reservoir target
    Rgba32Float,
    /// 4 x u8 normalized
    Rgba8Unorm,
}

impl PixelFormat {
    #[inline]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba32Float => 16,
            Self::Rgba8Unorm => 4,
        }
    }

    /// Whether values outside [0, 1] survive a round trip.
    pub fn is_float(self) -> bool {
        matches!(self, Self::Rgba32Float)
    }
}

/// Creation parameters for a render surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceDesc {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Opaque uniform location returned by [`RenderDevice::uniform_location`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UniformLocation(pub u32);

/// Value written to a uniform location.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    F32(f32),
    U32(u32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    /// Texture unit for a sampler uniform
    Sampler(u32),
}

/// Fragment program text after assembly.
#[derive(Clone, Copy, Debug)]
pub struct ProgramSource<'a> {
    pub label: &'a str,
    pub fragment: &'a str,
}

/// Sampler uniforms are located at this base plus their texture unit.
pub const SAMPLER_LOCATION_BASE: u32 = 100;

/// Location every backend assigns to a trace-program uniform or sampler name.
/// Scalars map to their [`Uniform`] index, samplers to the base plus their unit.
pub fn fixed_location(name: &str) -> Option<UniformLocation> {
    if let Some(u) = Uniform::from_name(name) {
        return Some(UniformLocation(u as u32));
    }
    SamplerSlot::from_name(name).map(|s| UniformLocation(SAMPLER_LOCATION_BASE + s.unit()))
}

/// Inverse of [`fixed_location`].
pub fn fixed_name(location: UniformLocation) -> Option<&'static str> {
    if location.0 >= SAMPLER_LOCATION_BASE {
        let unit = location.0 - SAMPLER_LOCATION_BASE;
        return SamplerSlot::ALL.get(unit as usize).map(|s| s.uniform_name());
    }
    Uniform::ALL.get(location.0 as usize).map(|u| u.name())
}

/// Sorted, deduplicated identifier tokens of a program text, comments excluded.
pub(crate) fn identifiers(source: &str) -> Vec<String> {
    let mut idents: Vec<String> = strip_comments(source)
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    idents.sort();
    idents.dedup();
    idents
}

/// Replace `//` and `/* */` comments with a single space each.
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    loop {
        let line = rest.find("//");
        let block = rest.find("/*");
        let (start, end_marker) = match (line, block) {
            (Some(l), Some(b)) if b < l => (b, "*/"),
            (Some(l), _) => (l, "\n"),
            (None, Some(b)) => (b, "*/"),
            (None, None) => break,
        };
        out.push_str(&rest[..start]);
        out.push(' ');
        let body = &rest[start + 2..];
        match body.find(end_marker) {
            // the newline ends the line comment but stays in the text
            Some(end) if end_marker == "\n" => rest = &body[end..],
            Some(end) => rest = &body[end + end_marker.len()..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// One trace draw: the sampler inputs, the three MRT targets and the viewport.
///
/// The caller guarantees that no surface appears both in `inputs` and in
/// `targets`.
pub struct DrawCall<'a, D: RenderDevice + ?Sized> {
    pub program: &'a D::Program,
    pub inputs: Vec<(SamplerSlot, &'a D::Surface)>,
    /// External images; slots without one sample a zero placeholder.
    pub textures: Vec<(SamplerSlot, &'a D::Texture)>,
    /// color, reservoir, aux
    pub targets: [&'a D::Surface; 3],
    pub viewport: Rect,
}

/// What to show on screen after a trace draw.
pub enum Present<'a, D: RenderDevice + ?Sized> {
    /// The accumulated color scaled by the contribution weight.
    Composite { surface: &'a D::Surface, weight: f32 },
    /// Every raw buffer in its own panel, unweighted.
    Split { panels: Vec<(&'a D::Surface, Rect)> },
}

/// Graphics backend driven by the render session.
///
/// All calls happen on the render thread, strictly between frames.
pub trait RenderDevice {
    /// 2D render target (sampled and attached)
    type Surface;
    /// Externally loaded image or cubemap
    type Texture;
    /// Compiled trace program with its uniform state
    type Program;

    fn backend_name(&self) -> &'static str;

    /// Allocate a zero-initialized surface.
    fn create_surface(&mut self, desc: &SurfaceDesc) -> Result<Self::Surface>;

    /// Return a surface's storage. Default: drop it.
    fn release_surface(&mut self, surface: Self::Surface) {
        drop(surface);
    }

    fn surface_size(&self, surface: &Self::Surface) -> (u32, u32);

    /// Overwrite every texel with zero.
    fn clear_surface(&mut self, surface: &Self::Surface) -> Result<()>;

    /// Read back all texels as RGBA f32, row-major from the top-left.
    fn read_surface(&mut self, surface: &Self::Surface) -> Result<Vec<[f32; 4]>>;

    /// Compile and link the trace program.
    fn compile_program(&mut self, source: &ProgramSource<'_>) -> Result<Self::Program>;

    /// Location of a uniform or sampler by name; `None` if the program does not use it.
    fn uniform_location(&self, program: &Self::Program, name: &str) -> Option<UniformLocation>;

    fn set_uniform(&mut self, program: &mut Self::Program, location: UniformLocation, value: UniformValue);

    fn draw(&mut self, call: &DrawCall<'_, Self>) -> Result<()>;

    fn present(&mut self, present: &Present<'_, Self>) -> Result<()>;

    /// Whether the context was lost. Loss is permanent for this device.
    fn is_lost(&self) -> bool;

    fn lost_reason(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_locations_roundtrip() {
        for name in ["u_frame", "u_camParams", "u_bufferA", "u_cubemap", "u_restirAuxHistory2"] {
            let loc = fixed_location(name).unwrap();
            assert_eq!(fixed_name(loc), Some(name));
        }
        assert_eq!(fixed_location("u_bufferA"), Some(UniformLocation(SAMPLER_LOCATION_BASE)));
        assert_eq!(fixed_location("u_mouse"), None);
    }

    #[test]
    fn test_identifiers() {
        let ids = identifiers("uniform uint u_frame; // u_frame again\nvec3 u_camPos;");
        assert_eq!(ids, ["u_camPos", "u_frame", "uint", "uniform", "vec3"]);

        let ids = identifiers("float a; /* u_time\n spans lines */ float/**/b; // u_mouse");
        assert_eq!(ids, ["a", "b", "float"]);
        assert_eq!(identifiers("x; /* unterminated u_frame"), ["x"]);
    }

    #[test]
    fn test_pixel_format_sizes() {
        assert_eq!(PixelFormat::Rgba32Float.bytes_per_pixel(), 16);
        assert_eq!(PixelFormat::Rgba8Unorm.bytes_per_pixel(), 4);
        assert!(!PixelFormat::Rgba8Unorm.is_float());
    }
}
