//! wgpu backend.
//!
//! The host owns adapter and device creation and hands the device and queue
//! to [`WgpuDevice::new`]. Request them with [`required_limits`]: three
//! `Rgba32Float` color attachments exceed the default per-sample budget.
//!
//! ## Usage
//! ```ignore
//! let (device, queue) = adapter
//!     .request_device(&wgpu::DeviceDescriptor {
//!         required_limits: required_limits(adapter.limits()),
//!         ..Default::default()
//!     })
//!     .await?;
//! let mut gpu = WgpuDevice::new(device, queue, surface_format)?;
//! gpu.set_target(Some(DisplayTarget { view, width, height }));
//! let session = RenderSession::new(gpu, config, sources, scene)?;
//! ```

mod pipelines;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use wgpu::util::DeviceExt;

use super::{
    fixed_location, identifiers, DrawCall, PixelFormat, Present, ProgramSource, RenderDevice,
    SurfaceDesc, UniformLocation, UniformValue, SAMPLER_LOCATION_BASE,
};
use crate::render::binding::{SamplerSlot, Uniform};
use crate::util::{Error, Rect, Result};

pub use pipelines::{DisplayParams, FrameUniforms, TARGET_FORMAT};
use pipelines::{DisplayPipeline, TraceLayout};

/// Color attachment bytes per sample needed by the trace pass.
const MRT_BYTES_PER_SAMPLE: u32 = pipelines::TARGET_COUNT * 16;

/// `base` with the limits the trace pass needs raised.
pub fn required_limits(base: wgpu::Limits) -> wgpu::Limits {
    wgpu::Limits {
        max_color_attachment_bytes_per_sample: base.max_color_attachment_bytes_per_sample.max(64),
        ..base
    }
}

/// Render target surface.
#[derive(Debug)]
pub struct GpuSurface {
    id: u64,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl GpuSurface {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }
}

/// Externally loaded image or cubemap.
#[derive(Debug, Clone)]
pub struct GpuTexture {
    view: wgpu::TextureView,
    cube: bool,
}

impl GpuTexture {
    pub fn is_cube(&self) -> bool {
        self.cube
    }
}

/// Compiled trace pipeline plus its uniform block.
pub struct GpuProgram {
    label: String,
    pipeline: wgpu::RenderPipeline,
    identifiers: Vec<String>,
    uniforms: FrameUniforms,
    buffer: wgpu::Buffer,
}

impl GpuProgram {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn uniforms(&self) -> &FrameUniforms {
        &self.uniforms
    }
}

/// Where presents are drawn, usually the current swapchain view.
pub struct DisplayTarget {
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    trace_layout: TraceLayout,
    display: DisplayPipeline,
    placeholder_2d: wgpu::TextureView,
    placeholder_cube: wgpu::TextureView,
    target: Option<DisplayTarget>,
    next_surface: u64,
    lost: Arc<AtomicBool>,
    lost_reason: Arc<Mutex<Option<String>>>,
}

impl WgpuDevice {
    /// Build layouts and fixed pipelines on a host-created device.
    /// `display_format` is the format of the views passed to [`Self::set_target`].
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, display_format: wgpu::TextureFormat) -> Result<Self> {
        let budget = device.limits().max_color_attachment_bytes_per_sample;
        if budget < MRT_BYTES_PER_SAMPLE {
            return Err(Error::FramebufferIncomplete(format!(
                "3 x Rgba32Float targets need {MRT_BYTES_PER_SAMPLE} bytes per sample, device allows {budget}"
            )));
        }

        let lost = Arc::new(AtomicBool::new(false));
        let lost_reason = Arc::new(Mutex::new(None));
        {
            let lost = lost.clone();
            let lost_reason = lost_reason.clone();
            device.set_device_lost_callback(move |reason, message| {
                *lost_reason.lock() = Some(format!("{reason:?}: {message}"));
                lost.store(true, Ordering::Release);
            });
        }

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let trace_layout = pipelines::create_trace_layout(&device);
        let display = pipelines::create_display_pipeline(&device, display_format);
        let placeholder_2d = placeholder(&device, false);
        let placeholder_cube = placeholder(&device, true);
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(Error::ContextCreation(err.to_string()));
        }

        let info = device.limits();
        tracing::info!(
            max_texture_2d = info.max_texture_dimension_2d,
            attachment_bytes = info.max_color_attachment_bytes_per_sample,
            "wgpu device ready"
        );

        Ok(Self {
            device,
            queue,
            trace_layout,
            display,
            placeholder_2d,
            placeholder_cube,
            target: None,
            next_surface: 0,
            lost,
            lost_reason,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Set the view presents draw into. With `None`, presents are skipped.
    pub fn set_target(&mut self, target: Option<DisplayTarget>) {
        self.target = target;
    }

    /// Upload an RGBA8 image for one of the external sampler slots.
    pub fn upload_texture(&self, label: &str, width: u32, height: u32, rgba: &[u8]) -> Result<GpuTexture> {
        check_len(label, rgba.len(), width, height)?;
        let texture = self.external_texture(label, width, height, 1);
        self.write_layer(&texture, 0, width, height, rgba);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(GpuTexture { view, cube: false })
    }

    /// Upload six square RGBA8 faces in wgpu layer order (+X, -X, +Y, -Y, +Z, -Z).
    pub fn upload_cubemap(&self, label: &str, size: u32, faces: [&[u8]; 6]) -> Result<GpuTexture> {
        for face in faces {
            check_len(label, face.len(), size, size)?;
        }
        let texture = self.external_texture(label, size, size, 6);
        for (layer, face) in faces.iter().enumerate() {
            self.write_layer(&texture, layer as u32, size, size, face);
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(label),
            dimension: Some(wgpu::TextureViewDimension::Cube),
            ..Default::default()
        });
        Ok(GpuTexture { view, cube: true })
    }

    fn external_texture(&self, label: &str, width: u32, height: u32, layers: u32) -> wgpu::Texture {
        self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: layers },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        })
    }

    fn write_layer(&self, texture: &wgpu::Texture, layer: u32, width: u32, height: u32, rgba: &[u8]) {
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.lost.load(Ordering::Acquire) {
            return Err(Error::ContextLost(self.lost_reason().unwrap_or_default()));
        }
        Ok(())
    }

    fn encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }
}

fn check_len(label: &str, len: usize, width: u32, height: u32) -> Result<()> {
    let expected = width as usize * height as usize * 4;
    if len != expected || expected == 0 {
        return Err(Error::other(format!(
            "texture '{label}': expected {expected} RGBA8 bytes for {width}x{height}, got {len}"
        )));
    }
    Ok(())
}

/// 1x1 zero texture bound to slots nothing was attached to.
fn placeholder(device: &wgpu::Device, cube: bool) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(if cube { "placeholder_cube" } else { "placeholder_2d" }),
        size: wgpu::Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: if cube { 6 } else { 1 },
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor {
        dimension: Some(if cube {
            wgpu::TextureViewDimension::Cube
        } else {
            wgpu::TextureViewDimension::D2
        }),
        ..Default::default()
    })
}

/// Attachment that keeps texels outside the viewport (other tiles).
fn keep_attachment(view: &wgpu::TextureView) -> Option<wgpu::RenderPassColorAttachment<'_>> {
    Some(wgpu::RenderPassColorAttachment {
        view,
        depth_slice: None,
        resolve_target: None,
        ops: wgpu::Operations { load: wgpu::LoadOp::Load, store: wgpu::StoreOp::Store },
    })
}

fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        PixelFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
    }
}

fn decode_texel(format: PixelFormat, bytes: &[u8]) -> [f32; 4] {
    match format {
        PixelFormat::Rgba32Float => bytemuck::pod_read_unaligned(bytes),
        PixelFormat::Rgba8Unorm => [
            bytes[0] as f32 / 255.0,
            bytes[1] as f32 / 255.0,
            bytes[2] as f32 / 255.0,
            bytes[3] as f32 / 255.0,
        ],
    }
}

impl RenderDevice for WgpuDevice {
    type Surface = GpuSurface;
    type Texture = GpuTexture;
    type Program = GpuProgram;

    fn backend_name(&self) -> &'static str {
        "wgpu"
    }

    fn create_surface(&mut self, desc: &SurfaceDesc) -> Result<GpuSurface> {
        if desc.width == 0 || desc.height == 0 {
            return Err(Error::ZeroSizedBuffer {
                name: desc.label.to_string(),
                width: desc.width,
                height: desc.height,
            });
        }
        self.ensure_alive()?;
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: wgpu::Extent3d { width: desc.width, height: desc.height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(desc.format),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = self.next_surface;
        self.next_surface += 1;
        Ok(GpuSurface { id, texture, view, width: desc.width, height: desc.height, format: desc.format })
    }

    fn release_surface(&mut self, surface: GpuSurface) {
        surface.texture.destroy();
    }

    fn surface_size(&self, surface: &GpuSurface) -> (u32, u32) {
        (surface.width, surface.height)
    }

    fn clear_surface(&mut self, surface: &GpuSurface) -> Result<()> {
        self.ensure_alive()?;
        let mut encoder = self.encoder("clear_surface");
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear_surface"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &surface.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                ..Default::default()
            });
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn read_surface(&mut self, surface: &GpuSurface) -> Result<Vec<[f32; 4]>> {
        self.ensure_alive()?;
        let bytes_per_pixel = surface.format.bytes_per_pixel() as u32;
        let unpadded = surface.width * bytes_per_pixel;
        // bytes_per_row must be aligned to 256 (COPY_BYTES_PER_ROW_ALIGNMENT)
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("surface_readback"),
            size: padded as u64 * surface.height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self.encoder("surface_readback");
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &surface.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(surface.height),
                },
            },
            wgpu::Extent3d { width: surface.width, height: surface.height, depth_or_array_layers: 1 },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| Error::other(format!("readback poll failed: {e}")))?;
        rx.recv()
            .map_err(|_| Error::other("readback callback dropped"))?
            .map_err(|e| Error::other(format!("readback map failed: {e}")))?;

        let mut texels = Vec::with_capacity(surface.width as usize * surface.height as usize);
        {
            let data = slice.get_mapped_range();
            for row in data.chunks_exact(padded as usize) {
                texels.extend(
                    row[..unpadded as usize]
                        .chunks_exact(bytes_per_pixel as usize)
                        .map(|px| decode_texel(surface.format, px)),
                );
            }
        }
        buffer.unmap();
        Ok(texels)
    }

    #[tracing::instrument(skip_all, fields(label = source.label))]
    fn compile_program(&mut self, source: &ProgramSource<'_>) -> Result<GpuProgram> {
        self.ensure_alive()?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(source.label),
            source: wgpu::ShaderSource::Glsl {
                shader: source.fragment.into(),
                stage: wgpu::naga::ShaderStage::Fragment,
                defines: Default::default(),
            },
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(Error::ShaderCompile(format!("{}: {err}", source.label)));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = pipelines::create_trace_pipeline(&self.device, &self.trace_layout, &module, source.label);
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(Error::ProgramLink(format!("{}: {err}", source.label)));
        }

        let uniforms = FrameUniforms::default();
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("frame_uniforms"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        tracing::debug!("trace program compiled");

        Ok(GpuProgram {
            label: source.label.to_string(),
            pipeline,
            identifiers: identifiers(source.fragment),
            uniforms,
            buffer,
        })
    }

    fn uniform_location(&self, program: &GpuProgram, name: &str) -> Option<UniformLocation> {
        if program.identifiers.binary_search_by(|i| i.as_str().cmp(name)).is_err() {
            return None;
        }
        fixed_location(name)
    }

    fn set_uniform(&mut self, program: &mut GpuProgram, location: UniformLocation, value: UniformValue) {
        // Sampler units are fixed by the bind group layout.
        if location.0 >= SAMPLER_LOCATION_BASE {
            return;
        }
        let Some(uniform) = Uniform::ALL.get(location.0 as usize) else {
            return;
        };
        if !program.uniforms.set(*uniform, value) {
            tracing::warn!(uniform = uniform.name(), ?value, "uniform type mismatch");
        }
    }

    fn draw(&mut self, call: &DrawCall<'_, Self>) -> Result<()> {
        self.ensure_alive()?;
        for target in call.targets {
            if call.inputs.iter().any(|(_, s)| s.id == target.id) {
                return Err(Error::BindingAlias(format!("surface #{}", target.id)));
            }
        }

        let mut views: [&wgpu::TextureView; SamplerSlot::COUNT] = std::array::from_fn(|i| {
            if SamplerSlot::ALL[i].is_cube() {
                &self.placeholder_cube
            } else {
                &self.placeholder_2d
            }
        });
        for (slot, texture) in &call.textures {
            if texture.cube != slot.is_cube() {
                return Err(Error::other(format!(
                    "{} expects a {} texture",
                    slot.uniform_name(),
                    if slot.is_cube() { "cube" } else { "2D" }
                )));
            }
            views[*slot as usize] = &texture.view;
        }
        for (slot, surface) in &call.inputs {
            views[*slot as usize] = &surface.view;
        }

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: pipelines::UNIFORM_BINDING,
                resource: call.program.buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: pipelines::SAMPLER_BINDING,
                resource: wgpu::BindingResource::Sampler(&self.trace_layout.sampler),
            },
        ];
        entries.extend(SamplerSlot::ALL.iter().map(|slot| wgpu::BindGroupEntry {
            binding: pipelines::texture_binding(*slot),
            resource: wgpu::BindingResource::TextureView(views[*slot as usize]),
        }));
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("trace_bind_group"),
            layout: &self.trace_layout.bind_group_layout,
            entries: &entries,
        });
        self.queue
            .write_buffer(&call.program.buffer, 0, bytemuck::bytes_of(&call.program.uniforms));

        let [color, reservoir, aux] = call.targets;
        let viewport = call.viewport.clamp_to(Rect::full(color.width, color.height));
        if viewport.is_empty() {
            return Ok(());
        }

        let attachments = [
            keep_attachment(&color.view),
            keep_attachment(&reservoir.view),
            keep_attachment(&aux.view),
        ];

        let mut encoder = self.encoder("trace");
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(call.program.label.as_str()),
                color_attachments: &attachments,
                ..Default::default()
            });
            pass.set_pipeline(&call.program.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_viewport(
                viewport.x as f32,
                viewport.y as f32,
                viewport.width as f32,
                viewport.height as f32,
                0.0,
                1.0,
            );
            pass.set_scissor_rect(viewport.x, viewport.y, viewport.width, viewport.height);
            pass.draw(0..3, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn present(&mut self, present: &Present<'_, Self>) -> Result<()> {
        self.ensure_alive()?;
        let Some(target) = self.target.as_ref() else {
            tracing::trace!("no display target, present skipped");
            return Ok(());
        };

        let (panels, weight): (Vec<(&GpuSurface, Option<Rect>)>, f32) = match present {
            Present::Composite { surface, weight } => (vec![(*surface, None)], *weight),
            Present::Split { panels } => (panels.iter().map(|(s, r)| (*s, Some(*r))).collect(), 1.0),
        };
        self.queue
            .write_buffer(&self.display.params, 0, bytemuck::bytes_of(&DisplayParams::new(weight)));

        let bounds = Rect::full(target.width, target.height);
        let draws: Vec<(wgpu::BindGroup, Rect)> = panels
            .into_iter()
            .map(|(surface, rect)| {
                let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("display_bind_group"),
                    layout: &self.display.bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(&surface.view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: self.display.params.as_entire_binding(),
                        },
                    ],
                });
                (bind_group, rect.unwrap_or(bounds).clamp_to(bounds))
            })
            .collect();

        let mut encoder = self.encoder("display");
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("display"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                ..Default::default()
            });
            pass.set_pipeline(&self.display.pipeline);
            for (bind_group, rect) in draws.iter().filter(|(_, r)| !r.is_empty()) {
                pass.set_viewport(rect.x as f32, rect.y as f32, rect.width as f32, rect.height as f32, 0.0, 1.0);
                pass.set_bind_group(0, bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    fn lost_reason(&self) -> Option<String> {
        self.lost_reason.lock().clone()
    }
}
