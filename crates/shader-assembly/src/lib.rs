//! Directive-based shader text assembly.
//!
//! Expands a small set of line directives in shader source text. The caller
//! supplies the replacement text; nothing here interprets it.
//!
//! | Directive            | Replaced with                              |
//! |----------------------|--------------------------------------------|
//! | `#include "file"`    | the assembled contents of `file`           |
//! | `#constants`         | define lines, then constant lines          |
//! | `#scene`             | the scene description text                 |
//! | `#sdf_meshes`        | the SDF evaluation snippets, one per line  |
//!
//! Any other line starting with `#` (`#version`, `#define`, ...) is kept as is.
//!
//! ## Usage
//!
//! ```ignore
//! use shader_assembly::{assemble, AssemblyInputs, FsIncludes};
//!
//! let inputs = AssemblyInputs {
//!     defines: &defines,
//!     constants: &constants,
//!     scene: &scene,
//!     sdf_meshes: &sdf_meshes,
//! };
//! let source = assemble(&template, &inputs, &FsIncludes::new("shaders"))?;
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Nested include limit.
pub const MAX_INCLUDE_DEPTH: usize = 16;

/// Errors produced while assembling shader text.
#[derive(Error, Debug)]
pub enum AssemblyError {
    /// `#include` line without a quoted path
    #[error("Malformed include directive at line {line}: {text}")]
    MalformedInclude { line: usize, text: String },

    /// Include target could not be resolved
    #[error("Include not found: {0}")]
    IncludeNotFound(String),

    /// File includes itself, directly or through other files
    #[error("Include cycle: {0}")]
    IncludeCycle(String),

    /// Include chain deeper than [`MAX_INCLUDE_DEPTH`]
    #[error("Include depth exceeds {MAX_INCLUDE_DEPTH} at {0}")]
    IncludeDepth(String),

    /// I/O error while reading an include
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Text spliced into the template by the directives.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssemblyInputs<'a> {
    pub defines: &'a [String],
    pub constants: &'a [String],
    pub scene: &'a str,
    pub sdf_meshes: &'a [String],
}

/// Source of `#include` targets.
pub trait IncludeResolver {
    fn resolve(&self, path: &str) -> Result<String, AssemblyError>;
}

/// Resolves includes relative to a root directory.
#[derive(Debug, Clone)]
pub struct FsIncludes {
    root: PathBuf,
}

impl FsIncludes {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
}

impl IncludeResolver for FsIncludes {
    fn resolve(&self, path: &str) -> Result<String, AssemblyError> {
        let full = self.root.join(path);
        if !full.is_file() {
            return Err(AssemblyError::IncludeNotFound(full.display().to_string()));
        }
        std::fs::read_to_string(&full).map_err(|source| AssemblyError::Io { path: full, source })
    }
}

/// In-memory include table (embedded shaders, tests).
#[derive(Debug, Clone, Default)]
pub struct MapIncludes {
    files: HashMap<String, String>,
}

impl MapIncludes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(path, text);
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, text: impl Into<String>) {
        self.files.insert(path.into(), text.into());
    }
}

impl IncludeResolver for MapIncludes {
    fn resolve(&self, path: &str) -> Result<String, AssemblyError> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| AssemblyError::IncludeNotFound(path.to_string()))
    }
}

/// A recognised directive line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive<'a> {
    Include(&'a str),
    Constants,
    Scene,
    SdfMeshes,
}

/// Classify a source line. `Ok(None)` means the line is copied verbatim.
pub fn parse_directive(line: &str, line_no: usize) -> Result<Option<Directive<'_>>, AssemblyError> {
    if !line.starts_with('#') {
        return Ok(None);
    }

    if line.starts_with("#include") {
        let rest = &line["#include".len()..];
        let open = rest.find(['"', '\'']);
        let path = open.and_then(|start| {
            let quote = rest[start..].chars().next()?;
            let body = &rest[start + 1..];
            body.find(quote).map(|end| &body[..end])
        });
        return match path {
            Some(p) if !p.is_empty() => Ok(Some(Directive::Include(p))),
            _ => Err(AssemblyError::MalformedInclude {
                line: line_no,
                text: line.to_string(),
            }),
        };
    }

    Ok(if line.starts_with("#constants") {
        Some(Directive::Constants)
    } else if line.starts_with("#sdf_meshes") {
        Some(Directive::SdfMeshes)
    } else if line.starts_with("#scene") {
        Some(Directive::Scene)
    } else {
        None
    })
}

/// Expand every directive in `source`, following includes recursively.
pub fn assemble(
    source: &str,
    inputs: &AssemblyInputs<'_>,
    includes: &dyn IncludeResolver,
) -> Result<String, AssemblyError> {
    let mut stack = Vec::new();
    assemble_nested(source, inputs, includes, &mut stack)
}

fn assemble_nested(
    source: &str,
    inputs: &AssemblyInputs<'_>,
    includes: &dyn IncludeResolver,
    stack: &mut Vec<String>,
) -> Result<String, AssemblyError> {
    let mut out = Vec::with_capacity(source.lines().count());

    for (i, line) in source.lines().enumerate() {
        match parse_directive(line, i + 1)? {
            None => out.push(line.to_string()),
            Some(Directive::Constants) => {
                out.extend(inputs.defines.iter().cloned());
                out.extend(inputs.constants.iter().cloned());
            }
            Some(Directive::Scene) => out.push(inputs.scene.to_string()),
            Some(Directive::SdfMeshes) => out.extend(inputs.sdf_meshes.iter().cloned()),
            Some(Directive::Include(path)) => {
                if stack.iter().any(|p| p == path) {
                    let mut chain = stack.clone();
                    chain.push(path.to_string());
                    return Err(AssemblyError::IncludeCycle(chain.join(" -> ")));
                }
                if stack.len() >= MAX_INCLUDE_DEPTH {
                    return Err(AssemblyError::IncludeDepth(path.to_string()));
                }
                let text = includes.resolve(path)?;
                stack.push(path.to_string());
                let nested = assemble_nested(&text, inputs, includes, stack)?;
                stack.pop();
                out.push(nested);
            }
        }
    }

    Ok(out.join("\n"))
}
