//! Shared fixtures for session tests.

#![allow(dead_code)]

use restir_viewport::device::headless::HeadlessDevice;
use restir_viewport::{RenderSession, Result, SceneDescription, ShaderSources, ViewportConfig};
use shader_assembly::MapIncludes;

/// Trace template declaring every uniform and sampler the session binds.
pub const TRACE: &str = r#"#version 450
#constants
#include "uniforms.glsl"
#scene
#sdf_meshes
layout(location = 0) out vec4 o_color;
layout(location = 1) out vec4 o_restir;
layout(location = 2) out vec4 o_restirAux;
void main() {}
"#;

pub const UNIFORMS: &str = r#"layout(set = 0, binding = 0) uniform FrameUniforms {
    vec3 u_camPos;
    vec3 u_camLookAt;
    vec3 u_camParams;
    vec2 u_resolution;
    float u_time;
    uint u_frame;
    uint u_temporalFrames;
};
layout(set = 0, binding = 2) uniform texture2D u_bufferA;
layout(set = 0, binding = 3) uniform texture2D u_tex0;
layout(set = 0, binding = 7) uniform texture2D u_rnd_tex;
layout(set = 0, binding = 8) uniform textureCube u_cubemap;
layout(set = 0, binding = 9) uniform texture2D u_restir;
layout(set = 0, binding = 10) uniform texture2D u_restirAux;
layout(set = 0, binding = 11) uniform texture2D u_restirHistory1;
layout(set = 0, binding = 12) uniform texture2D u_restirAuxHistory1;
layout(set = 0, binding = 13) uniform texture2D u_restirHistory2;
layout(set = 0, binding = 14) uniform texture2D u_restirAuxHistory2;"#;

pub fn sources() -> ShaderSources {
    ShaderSources {
        trace: TRACE.to_string(),
        includes: Box::new(MapIncludes::new().with("uniforms.glsl", UNIFORMS)),
    }
}

pub fn scene() -> SceneDescription {
    SceneDescription {
        scene: "const int NUM_SDFS = 2;".to_string(),
        sdf_meshes: vec!["d = min(d, sdSphere(p, 1.0));".to_string()],
    }
}

/// Small canvas so kernels stay cheap.
pub fn small_config() -> ViewportConfig {
    ViewportConfig { width: 8, height: 8, ..Default::default() }
}

pub fn try_session(config: ViewportConfig) -> Result<RenderSession<HeadlessDevice>> {
    RenderSession::new(HeadlessDevice::new(), config, sources(), scene())
}

pub fn session(config: ViewportConfig) -> RenderSession<HeadlessDevice> {
    try_session(config).unwrap()
}
