//! Utility types shared across the viewport.
//!
//! - [`Error`] / [`Result`] - Error handling
//! - [`Rect`] - Pixel rectangles for viewports and panels

mod error;
mod rect;

pub use error::*;
pub use rect::*;
