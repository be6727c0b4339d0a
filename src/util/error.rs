//! Error types for the viewport.

use thiserror::Error;

/// Main error type for viewport operations.
#[derive(Error, Debug)]
pub enum Error {
    /// GPU context could not be created or configured
    #[error("GPU context creation failed: {0}")]
    ContextCreation(String),

    /// GPU context went away mid-session; no automatic recovery
    #[error("GPU context lost: {0}")]
    ContextLost(String),

    /// Fragment program failed to compile
    #[error("Could not compile shader:\n{0}")]
    ShaderCompile(String),

    /// Compiled stages failed to link into a pipeline
    #[error("Unable to initialize the shader program:\n{0}")]
    ProgramLink(String),

    /// Render target set is not renderable
    #[error("Framebuffer incomplete: {0}")]
    FramebufferIncomplete(String),

    /// Buffer requested without a size
    #[error("Can't create buffer '{name}' without a size ({width}x{height})")]
    ZeroSizedBuffer { name: String, width: u32, height: u32 },

    /// A buffer is both sampled and written by the same draw
    #[error("Buffer '{0}' is bound as both draw target and sampler input")]
    BindingAlias(String),

    /// Resize preset index out of range
    #[error("Unknown size class: {0}")]
    InvalidSizeClass(u8),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Shader text assembly failed
    #[error("Shader assembly failed: {0}")]
    Assembly(#[from] shader_assembly::AssemblyError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Errors that abort initialization. There is no degraded startup mode.
    pub fn is_fatal_setup(&self) -> bool {
        matches!(
            self,
            Self::ContextCreation(_)
                | Self::ShaderCompile(_)
                | Self::ProgramLink(_)
                | Self::FramebufferIncomplete(_)
                | Self::ZeroSizedBuffer { .. }
                | Self::Assembly(_)
                | Self::Config(_)
        )
    }
}

/// Result type alias for viewport operations.
pub type Result<T> = std::result::Result<T, Error>;
