//! # restir-viewport
//!
//! Render-loop core of a progressive GPU path-tracing viewport.
//!
//! A host compiles an opaque trace program once and then calls
//! [`RenderSession::render`] every display refresh. The session owns the
//! accumulation buffers, the ReSTIR history chain, the tile cursor and the
//! static/animated mode, and keeps them consistent across resizes, mode
//! switches and clears.
//!
//! ## Modules
//!
//! - [`util`] - Error type, pixel rectangles
//! - [`config`] - Persisted settings and canvas size presets
//! - [`logging`] - Tracing subscriber setup
//! - [`device`] - The GPU seam: wgpu and headless backends
//! - [`render`] - Buffer pool, program binding, accumulation, history chain,
//!   tile scheduler, mode controller and the session itself
//!
//! ## Example
//!
//! ```ignore
//! use restir_viewport::{RenderSession, ShaderSources, SceneDescription, ViewportConfig};
//! use restir_viewport::device::headless::HeadlessDevice;
//! use shader_assembly::FsIncludes;
//!
//! let sources = ShaderSources {
//!     trace: std::fs::read_to_string("shaders/raytracing.glsl")?,
//!     includes: Box::new(FsIncludes::new("shaders")),
//! };
//! let mut session = RenderSession::new(
//!     HeadlessDevice::new(),
//!     ViewportConfig::default(),
//!     sources,
//!     SceneDescription::default(),
//! )?;
//! session.render()?;
//! ```

pub mod util;
pub mod config;
pub mod logging;
pub mod device;
pub mod render;

// Re-export commonly used types
pub use config::{SizeClass, ViewportConfig};
pub use device::RenderDevice;
pub use render::mode::Mode;
pub use render::{FrameStatus, RenderSession, SceneDescription, ShaderSources};
pub use util::{Error, Result};
