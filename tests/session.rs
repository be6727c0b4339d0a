//! Render loop behaviour driven through the headless device.

mod common;

use std::cell::Cell;

use common::{session, small_config, try_session};
use restir_viewport::device::headless::{HeadlessDevice, Image, PresentRecord};
use restir_viewport::device::{RenderDevice, UniformValue};
use restir_viewport::render::binding::SamplerSlot;
use restir_viewport::render::camera::Camera;
use restir_viewport::render::pool::BufferName;
use restir_viewport::{
    Error, FrameStatus, Mode, RenderSession, SceneDescription, ShaderSources, SizeClass, ViewportConfig,
};
use shader_assembly::{AssemblyError, IncludeResolver};

#[test]
fn test_static_weight_is_one_over_n() {
    let mut s = session(small_config());
    for n in 1..=16u32 {
        let status = s.render().unwrap();
        assert_eq!(status, FrameStatus::Rendered { passes: n, weight: 1.0 / n as f32 });
        assert_eq!(s.passes(), n);
    }

    let presents = s.device().presents();
    assert_eq!(presents.len(), 16);
    for (i, present) in presents.iter().enumerate() {
        match present {
            PresentRecord::Composite { weight, .. } => assert_eq!(*weight, 1.0 / (i + 1) as f32),
            other => panic!("unexpected present {other:?}"),
        }
    }
    // u_frame carries passes after the increment
    let frames: Vec<_> = s.device().draws().iter().map(|d| d.frame()).collect();
    assert_eq!(frames, (1..=16).map(Some).collect::<Vec<_>>());
}

#[test]
fn test_animated_weight_and_wrap() {
    let config = ViewportConfig { animated: true, temporal_frames: 3, ..small_config() };
    let mut s = session(config);
    let mut passes = Vec::new();
    for _ in 0..10 {
        match s.render().unwrap() {
            FrameStatus::Rendered { passes: p, weight } => {
                assert_eq!(weight, 1.0);
                passes.push(p);
            }
            other => panic!("unexpected status {other:?}"),
        }
    }
    assert_eq!(passes, [1, 2, 3, 4, 5, 6, 3, 4, 5, 6]);
}

#[test]
fn test_progressive_average_through_back_buffer() {
    let mut s = session(small_config());
    // Every frame adds one unit of radiance on top of the history.
    s.device_mut().set_kernel(|frag| {
        let prev = frag.sample(SamplerSlot::Backbuffer);
        [[prev[0] + 1.0, prev[1] + 0.5, 0.0, 1.0], [0.0; 4], [0.0; 4]]
    });

    let mut last = None;
    for _ in 0..6 {
        last = Some(s.render().unwrap());
    }
    let Some(FrameStatus::Rendered { passes, weight }) = last else {
        panic!("frame not rendered");
    };
    // The frame just written is now the back buffer.
    let sum = s.read_buffer(BufferName::BackTarget).unwrap();
    assert!(sum.iter().all(|t| t[0] == 6.0 && t[1] == 3.0));
    assert!((sum[0][0] * weight - 1.0).abs() < 1e-6);
    assert_eq!(passes, 6);
}

#[test]
fn test_back_buffer_is_previous_front() {
    let mut s = session(small_config());
    for _ in 0..4 {
        s.render().unwrap();
    }
    let draws = s.device().draws();
    for pair in draws.windows(2) {
        let written = pair[0].targets[0];
        assert_eq!(pair[1].input(SamplerSlot::Backbuffer), Some(written));
        assert_ne!(pair[1].targets[0], written);
    }
}

#[test]
fn test_no_draw_reads_its_own_target() {
    for animated in [false, true] {
        let mut s = session(ViewportConfig { animated, ..small_config() });
        for _ in 0..12 {
            s.render().unwrap();
        }
        for draw in s.device().draws() {
            for (_, input) in &draw.inputs {
                assert!(!draw.targets.contains(input), "{draw:?}");
            }
        }
        assert!(s.pool().is_bijective());
    }
}

#[test]
fn test_set_mode_resets_and_swaps_constants() {
    let mut s = session(small_config());
    for _ in 0..5 {
        s.render().unwrap();
    }
    assert_eq!(s.modes().active_constants().max_bounces, 12);

    s.set_mode(true).unwrap();
    assert_eq!(s.passes(), 0);
    assert_eq!(s.mode(), Mode::Animated);
    assert_eq!(s.modes().active_constants().max_bounces, 6);
    assert!(s.history().enabled());
    assert_eq!(s.render().unwrap(), FrameStatus::Rendered { passes: 1, weight: 1.0 });

    s.set_mode(false).unwrap();
    assert_eq!(s.passes(), 0);
    assert_eq!(s.modes().active_constants().max_bounces, 12);
    assert!(!s.history().enabled());
}

#[test]
fn test_set_mode_clears_buffers() {
    let mut s = session(small_config());
    s.device_mut().set_kernel(|_| [[1.0; 4], [2.0; 4], [3.0; 4]]);
    s.render().unwrap();
    s.set_mode(true).unwrap();
    for name in BufferName::ALL {
        let texels = s.read_buffer(name).unwrap();
        assert!(texels.iter().all(|t| *t == [0.0; 4]), "{name} not cleared");
    }
}

/// Serves the include once, then a broken one.
struct BreaksAfterFirst {
    calls: Cell<u32>,
}

impl IncludeResolver for BreaksAfterFirst {
    fn resolve(&self, path: &str) -> Result<String, AssemblyError> {
        let n = self.calls.get();
        self.calls.set(n + 1);
        match (path, n) {
            ("uniforms.glsl", 0) => Ok(common::UNIFORMS.to_string()),
            ("uniforms.glsl", _) => Ok("#error animated variant does not compile".to_string()),
            _ => Err(AssemblyError::IncludeNotFound(path.to_string())),
        }
    }
}

#[test]
fn test_failed_mode_switch_keeps_previous_state() {
    let sources = ShaderSources {
        trace: common::TRACE.to_string(),
        includes: Box::new(BreaksAfterFirst { calls: Cell::new(0) }),
    };
    let mut s = RenderSession::new(HeadlessDevice::new(), small_config(), sources, SceneDescription::default())
        .unwrap();
    s.render().unwrap();
    s.render().unwrap();

    let err = s.set_mode(true).unwrap_err();
    assert!(matches!(err, Error::ShaderCompile(_)), "{err}");
    assert_eq!(s.mode(), Mode::Static);
    assert_eq!(s.passes(), 2);
    assert_eq!(s.render().unwrap(), FrameStatus::Rendered { passes: 3, weight: 1.0 / 3.0 });
}

#[test]
fn test_compile_failure_is_fatal() {
    let sources = ShaderSources {
        trace: "#version 450\n#error missing scene\nvoid main() {}".to_string(),
        includes: Box::new(shader_assembly::MapIncludes::new()),
    };
    let err = RenderSession::new(HeadlessDevice::new(), small_config(), sources, SceneDescription::default())
        .err()
        .unwrap();
    assert!(err.is_fatal_setup());
    match err {
        Error::ShaderCompile(msg) => assert!(msg.contains("#error missing scene")),
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn test_missing_include_is_fatal() {
    let sources = ShaderSources {
        trace: "#include \"nowhere.glsl\"".to_string(),
        includes: Box::new(shader_assembly::MapIncludes::new()),
    };
    let err = RenderSession::new(HeadlessDevice::new(), small_config(), sources, SceneDescription::default())
        .err()
        .unwrap();
    assert!(matches!(err, Error::Assembly(AssemblyError::IncludeNotFound(_))));
    assert!(err.is_fatal_setup());
}

#[test]
fn test_zero_sized_canvas_is_rejected() {
    let err = try_session(ViewportConfig { width: 0, ..small_config() }).err().unwrap();
    assert!(err.is_fatal_setup());

    let mut s = session(small_config());
    let err = s.resize_to(0, 32).unwrap_err();
    assert!(matches!(err, Error::ZeroSizedBuffer { .. }));
    assert_eq!(s.size(), (8, 8));
}

#[test]
fn test_resize_then_render() {
    let mut s = session(ViewportConfig { device_pixel_ratio: 0.125, ..small_config() });
    s.render().unwrap();
    s.resize(SizeClass::S256).unwrap();
    assert_eq!(s.size(), (32, 32));
    assert_eq!(s.passes(), 0);

    assert_eq!(s.render().unwrap(), FrameStatus::Rendered { passes: 1, weight: 1.0 });
    for name in BufferName::ALL {
        let surface = s.pool().get(name).unwrap();
        assert_eq!(s.device().surface_size(surface), (32, 32));
    }
    let draw = s.device().draws().last().unwrap();
    assert_eq!(draw.viewport.width, 32);
    assert_eq!(draw.uniforms.get("u_resolution"), Some(&UniformValue::Vec2([32.0, 32.0])));
    // Old surfaces were released.
    assert_eq!(s.device().live_surfaces(), BufferName::COUNT);
}

#[test]
fn test_debug_view_presents_every_buffer() {
    let mut s = session(ViewportConfig { width: 40, height: 40, ..small_config() });
    assert!(s.toggle_debug_view());
    s.render().unwrap();
    match s.device().presents().last().unwrap() {
        PresentRecord::Split { panels } => {
            assert_eq!(panels.len(), BufferName::COUNT);
            let mut ids: Vec<_> = panels.iter().map(|(id, _)| *id).collect();
            ids.sort();
            ids.dedup();
            assert_eq!(ids.len(), BufferName::COUNT);
            assert!(panels.iter().all(|(_, r)| r.right() <= 40 && r.bottom() <= 40));
        }
        other => panic!("unexpected present {other:?}"),
    }

    assert!(!s.toggle_debug_view());
    s.render().unwrap();
    assert!(matches!(s.device().presents().last(), Some(PresentRecord::Composite { .. })));
}

#[test]
fn test_clear_zeroes_everything() {
    let mut s = session(ViewportConfig { animated: true, ..small_config() });
    s.device_mut().set_kernel(|_| [[0.5; 4], [0.25; 4], [0.125; 4]]);
    for _ in 0..3 {
        s.render().unwrap();
    }
    assert!(s.read_buffer(BufferName::BackTarget).unwrap().iter().all(|t| *t == [0.5; 4]));

    s.clear().unwrap();
    assert_eq!(s.passes(), 0);
    assert_eq!(s.mode(), Mode::Animated);
    for name in BufferName::ALL {
        assert!(s.read_buffer(name).unwrap().iter().all(|t| *t == [0.0; 4]));
    }
}

#[test]
fn test_context_loss_is_unrecoverable() {
    let mut s = session(small_config());
    s.render().unwrap();
    s.device_mut().lose_context("adapter removed");

    for _ in 0..3 {
        match s.render() {
            Err(Error::ContextLost(reason)) => assert_eq!(reason, "adapter removed"),
            other => panic!("unexpected result {other:?}"),
        }
    }
    assert!(matches!(s.resize(SizeClass::S512), Err(Error::ContextLost(_))));
    assert!(matches!(s.clear(), Err(Error::ContextLost(_))));
    assert_eq!(s.device().draws().len(), 1);
}

#[test]
fn test_failed_present_commits_nothing() {
    let mut s = session(ViewportConfig { animated: true, ..small_config() });
    s.render().unwrap();
    let before: Vec<_> = BufferName::ALL.iter().map(|n| s.pool().storage_of(*n)).collect();

    s.device_mut().fail_next_present("swapchain outdated");
    assert!(matches!(s.render(), Err(Error::Other(_))));
    assert_eq!(s.passes(), 1);
    assert_eq!(s.history().rotations(), 1);
    let after: Vec<_> = BufferName::ALL.iter().map(|n| s.pool().storage_of(*n)).collect();
    assert_eq!(before, after);

    // The retried frame reuses the same pass number and targets.
    assert_eq!(s.render().unwrap(), FrameStatus::Rendered { passes: 2, weight: 1.0 });
    let draws = s.device().draws();
    assert_eq!(draws[1].targets, draws[2].targets);
    assert_eq!(draws[1].frame(), Some(2));
}

#[test]
fn test_set_camera_after_loss_keeps_camera() {
    let mut s = session(small_config());
    s.render().unwrap();
    s.device_mut().lose_context("driver reset");

    let moved = Camera { fov: 30.0, ..Camera::default() };
    assert!(matches!(s.set_camera(moved), Err(Error::ContextLost(_))));
    assert_eq!(*s.camera(), Camera::default());
    assert_eq!(s.config().camera, Camera::default());
    assert_eq!(s.passes(), 1);
}

#[test]
fn test_max_passes_converges() {
    let mut s = session(ViewportConfig { max_passes: Some(3), ..small_config() });
    for _ in 0..3 {
        assert!(s.render().unwrap().is_rendered());
    }
    assert_eq!(s.render().unwrap(), FrameStatus::Converged);
    assert_eq!(s.device().draws().len(), 3);

    s.clear().unwrap();
    assert!(s.render().unwrap().is_rendered());

    // The temporal window never converges.
    s.set_mode(true).unwrap();
    for _ in 0..10 {
        assert!(s.render().unwrap().is_rendered());
    }
}

#[test]
fn test_zero_max_passes_is_unbounded() {
    let mut s = session(ViewportConfig { max_passes: Some(0), ..small_config() });
    for n in 1..=5 {
        assert_eq!(s.render().unwrap(), FrameStatus::Rendered { passes: n, weight: 1.0 / n as f32 });
    }
}

#[test]
fn test_pause_skips_frames() {
    let mut s = session(ViewportConfig { paused: true, ..small_config() });
    assert_eq!(s.render().unwrap(), FrameStatus::Paused);
    assert!(s.device().draws().is_empty());
    s.set_paused(false);
    assert!(s.render().unwrap().is_rendered());
}

#[test]
fn test_textures_attach_late() {
    let mut s = session(small_config());
    s.device_mut().set_kernel(|frag| [frag.sample(SamplerSlot::Tex0), [0.0; 4], [0.0; 4]]);
    s.render().unwrap();
    assert!(s.device().draws()[0].textures.is_empty());
    assert!(s.read_buffer(BufferName::BackTarget).unwrap().iter().all(|t| *t == [0.0; 4]));

    s.attach_texture(SamplerSlot::Tex0, Image::filled(8, 8, [0.2, 0.4, 0.6, 1.0])).unwrap();
    assert!(s.has_texture(SamplerSlot::Tex0));
    s.render().unwrap();
    assert_eq!(s.device().draws()[1].textures, [SamplerSlot::Tex0]);
    assert!(s
        .read_buffer(BufferName::BackTarget)
        .unwrap()
        .iter()
        .all(|t| *t == [0.2, 0.4, 0.6, 1.0]));

    let err = s.attach_texture(SamplerSlot::Restir, Image::filled(1, 1, [0.0; 4])).unwrap_err();
    assert!(matches!(err, Error::Other(_)));
}

#[test]
fn test_camera_update_restarts_accumulation() {
    let mut s = session(small_config());
    s.render().unwrap();
    s.render().unwrap();

    let camera = Camera { fov: 45.0, ..Camera::default() };
    s.set_camera(camera).unwrap();
    assert_eq!(s.passes(), 0);
    assert_eq!(s.program().uniform("u_camParams"), Some(UniformValue::Vec3([45.0, 0.01, 10.0])));
    assert_eq!(s.program().uniform("u_camPos"), Some(UniformValue::Vec3([0.0, 0.0, 3.0])));
    assert_eq!(s.program().uniform("u_temporalFrames"), Some(UniformValue::U32(8)));
}

#[test]
fn test_time_uniform_advances() {
    let mut s = session(small_config());
    s.render().unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    s.render().unwrap();
    let times: Vec<f32> = s
        .device()
        .draws()
        .iter()
        .map(|d| match d.uniforms.get("u_time") {
            Some(UniformValue::F32(t)) => *t,
            other => panic!("u_time missing: {other:?}"),
        })
        .collect();
    assert!(times[1] > times[0]);
}
