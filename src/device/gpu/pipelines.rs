//! Trace and display pipelines, their layouts and uniform blocks.
//!
//! Trace program interface (GLSL, set 0):
//!
//! | binding      | contents                                        |
//! |--------------|-------------------------------------------------|
//! | 0            | `FrameUniforms` block (std140)                  |
//! | 1            | `u_sampler`, non-filtering                      |
//! | 2 + unit     | one `texture2D` per sampler slot (`textureCube` for `u_cubemap`) |
//!
//! Outputs: `location = 0` color, `1` reservoir, `2` reservoir aux.

use bytemuck::{Pod, Zeroable};

use crate::device::UniformValue;
use crate::render::binding::{SamplerSlot, Uniform};

const TRACE_VERTEX_WGSL: &str = include_str!("fullscreen.wgsl");
const DISPLAY_WGSL: &str = include_str!("display.wgsl");

/// Format of every accumulation and reservoir target.
pub const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

/// Number of MRT outputs of the trace program.
pub const TARGET_COUNT: u32 = 3;

pub const UNIFORM_BINDING: u32 = 0;
pub const SAMPLER_BINDING: u32 = 1;
const FIRST_TEXTURE_BINDING: u32 = 2;

/// Binding index of a sampler slot's texture.
pub fn texture_binding(slot: SamplerSlot) -> u32 {
    FIRST_TEXTURE_BINDING + slot.unit()
}

/// Per-program uniform block, std140 layout of `FrameUniforms` in GLSL:
///
/// ```glsl
/// layout(set = 0, binding = 0) uniform FrameUniforms {
///     vec3 u_camPos;
///     vec3 u_camLookAt;
///     vec3 u_camParams;
///     vec2 u_resolution;
///     float u_time;
///     uint u_frame;
///     uint u_temporalFrames;
/// };
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    pub cam_pos: [f32; 3],
    pub _pad0: f32,
    pub cam_look_at: [f32; 3],
    pub _pad1: f32,
    pub cam_params: [f32; 3],
    pub _pad2: f32,
    pub resolution: [f32; 2],
    pub time: f32,
    pub frame: u32,
    pub temporal_frames: u32,
    pub _pad3: [u32; 3],
}

impl FrameUniforms {
    /// Store a value. Returns `false` if the value type does not match the uniform.
    pub fn set(&mut self, uniform: Uniform, value: UniformValue) -> bool {
        match (uniform, value) {
            (Uniform::CamPos, UniformValue::Vec3(v)) => self.cam_pos = v,
            (Uniform::CamLookAt, UniformValue::Vec3(v)) => self.cam_look_at = v,
            (Uniform::CamParams, UniformValue::Vec3(v)) => self.cam_params = v,
            (Uniform::Resolution, UniformValue::Vec2(v)) => self.resolution = v,
            (Uniform::Time, UniformValue::F32(v)) => self.time = v,
            (Uniform::Frame, UniformValue::U32(v)) => self.frame = v,
            (Uniform::TemporalFrames, UniformValue::U32(v)) => self.temporal_frames = v,
            _ => return false,
        }
        true
    }
}

/// Display pass parameters.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DisplayParams {
    pub weight: [f32; 4],
}

impl DisplayParams {
    pub fn new(weight: f32) -> Self {
        Self { weight: [weight, 0.0, 0.0, 0.0] }
    }
}

/// Shared pieces of every trace pipeline.
pub struct TraceLayout {
    pub bind_group_layout: wgpu::BindGroupLayout,
    pub pipeline_layout: wgpu::PipelineLayout,
    pub vertex: wgpu::ShaderModule,
    pub sampler: wgpu::Sampler,
}

pub fn create_trace_layout(device: &wgpu::Device) -> TraceLayout {
    let mut entries = vec![
        wgpu::BindGroupLayoutEntry {
            binding: UNIFORM_BINDING,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<FrameUniforms>() as u64),
            },
            count: None,
        },
        wgpu::BindGroupLayoutEntry {
            binding: SAMPLER_BINDING,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
            count: None,
        },
    ];
    entries.extend(SamplerSlot::ALL.iter().map(|slot| wgpu::BindGroupLayoutEntry {
        binding: texture_binding(*slot),
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            multisampled: false,
            view_dimension: if slot.is_cube() {
                wgpu::TextureViewDimension::Cube
            } else {
                wgpu::TextureViewDimension::D2
            },
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
        },
        count: None,
    }));

    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("trace_bind_group_layout"),
        entries: &entries,
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("trace_pipeline_layout"),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });
    let vertex = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("trace_vertex_shader"),
        source: wgpu::ShaderSource::Wgsl(TRACE_VERTEX_WGSL.into()),
    });
    let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("trace_sampler"),
        address_mode_u: wgpu::AddressMode::Repeat,
        address_mode_v: wgpu::AddressMode::Repeat,
        address_mode_w: wgpu::AddressMode::Repeat,
        mag_filter: wgpu::FilterMode::Nearest,
        min_filter: wgpu::FilterMode::Nearest,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    });

    TraceLayout { bind_group_layout, pipeline_layout, vertex, sampler }
}

/// Link the shared vertex stage with a compiled trace fragment module.
pub fn create_trace_pipeline(
    device: &wgpu::Device,
    layout: &TraceLayout,
    fragment: &wgpu::ShaderModule,
    label: &str,
) -> wgpu::RenderPipeline {
    let target = Some(wgpu::ColorTargetState {
        format: TARGET_FORMAT,
        blend: None,
        write_mask: wgpu::ColorWrites::ALL,
    });
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&layout.pipeline_layout),
        vertex: wgpu::VertexState {
            module: &layout.vertex,
            entry_point: Some("vs_fullscreen"),
            compilation_options: Default::default(),
            buffers: &[],
        },
        fragment: Some(wgpu::FragmentState {
            module: fragment,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            targets: &[target.clone(), target.clone(), target],
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

pub struct DisplayPipeline {
    pub pipeline: wgpu::RenderPipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
    pub params: wgpu::Buffer,
}

pub fn create_display_pipeline(device: &wgpu::Device, format: wgpu::TextureFormat) -> DisplayPipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("display_shader"),
        source: wgpu::ShaderSource::Wgsl(DISPLAY_WGSL.into()),
    });
    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("display_bind_group_layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("display_pipeline_layout"),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });
    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("display_pipeline"),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs_display"),
            compilation_options: Default::default(),
            buffers: &[],
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs_display"),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });
    let params = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("display_params"),
        size: std::mem::size_of::<DisplayParams>() as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    DisplayPipeline { pipeline, bind_group_layout, params }
}
