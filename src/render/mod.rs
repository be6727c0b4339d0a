//! Render loop: one explicit session owning every buffer and counter.
//!
//! ```text
//! render()
//!   ├─ next passes (accumulation policy), upload u_time / u_frame
//!   ├─ draw: inputs  = back_target, restir back copies, history 1 & 2, textures
//!   │        targets = front_target, restir front, restir aux front
//!   ├─ present front_target × weight   (or every raw buffer in debug view)
//!   ├─ commit passes, swap front_target / back_target
//!   └─ rotate the ReSTIR chain (animated mode only)
//! ```

pub mod accumulation;
pub mod binding;
pub mod camera;
pub mod history;
pub mod mode;
pub mod pool;
pub mod tiles;

use std::time::Instant;

use glam::UVec2;
use shader_assembly::{assemble, AssemblyInputs, IncludeResolver};

use crate::config::{SizeClass, ViewportConfig};
use crate::device::{DrawCall, PixelFormat, Present, ProgramSource, RenderDevice};
use crate::util::{Error, Rect, Result};

use accumulation::{Accumulator, FrameWeight};
use binding::{ProgramBinding, SamplerSlot};
use camera::Camera;
use history::HistoryChain;
use mode::{Mode, ModeController};
use pool::{BufferName, BufferPool};
use tiles::TileScheduler;

/// Label of the trace program in diagnostics.
pub const TRACE_PROGRAM: &str = "raytracing_shader";

/// Trace program template and where its includes come from.
pub struct ShaderSources {
    pub trace: String,
    pub includes: Box<dyn IncludeResolver>,
}

/// Opaque scene text spliced into the trace program.
#[derive(Debug, Clone, Default)]
pub struct SceneDescription {
    pub scene: String,
    pub sdf_meshes: Vec<String>,
}

/// Outcome of one [`RenderSession::render`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameStatus {
    /// A frame was drawn and presented.
    Rendered { passes: u32, weight: f32 },
    /// Paused by the host or by the tile scheduler; nothing was drawn.
    Paused,
    /// Static accumulation reached `max_passes`; nothing was drawn.
    Converged,
}

impl FrameStatus {
    pub fn is_rendered(&self) -> bool {
        matches!(self, Self::Rendered { .. })
    }
}

pub struct RenderSession<D: RenderDevice> {
    device: D,
    config: ViewportConfig,
    sources: ShaderSources,
    scene: SceneDescription,

    program: D::Program,
    binding: ProgramBinding,
    pool: BufferPool<D::Surface>,
    textures: [Option<D::Texture>; SamplerSlot::COUNT],

    accumulator: Accumulator,
    history: HistoryChain,
    tiles: TileScheduler,
    modes: ModeController,
    camera: Camera,

    debug_view: bool,
    paused: bool,
    started: Instant,
    lost_reported: bool,
}

impl<D: RenderDevice> RenderSession<D> {
    /// Allocate every buffer, assemble and compile the trace program.
    /// Any failure here is fatal; there is no partially initialized session.
    pub fn new(
        mut device: D,
        config: ViewportConfig,
        sources: ShaderSources,
        scene: SceneDescription,
    ) -> Result<Self> {
        let _span = tracing::info_span!("session_init", backend = device.backend_name()).entered();
        tracing::info!(
            "restir-viewport {} (built {} {})",
            env!("CARGO_PKG_VERSION"),
            env!("VIEWPORT_BUILD_DATE"),
            env!("VIEWPORT_BUILD_TIME")
        );

        if device.is_lost() {
            return Err(Error::ContextCreation(
                device.lost_reason().unwrap_or_else(|| "device unavailable".into()),
            ));
        }
        config.validate()?;

        let (width, height) = (config.width, config.height);
        let mut pool = BufferPool::new();
        for name in [BufferName::FrontTarget, BufferName::BackTarget] {
            pool.create(&mut device, name, width, height, PixelFormat::Rgba32Float)?;
        }

        let mode = config.mode();
        let modes = ModeController::new(
            mode,
            config.defines.clone(),
            config.constants.clone(),
            config.animated_constants.clone(),
            config.temporal_frames,
        );
        let history = HistoryChain::new(modes.restir_enabled());
        history.allocate(&mut device, &mut pool, width, height)?;

        let mut program = compile_trace(&mut device, &sources, &scene, &modes, mode)?;
        let binding = ProgramBinding::resolve(&device, &program);
        let camera = config.camera;
        binding.upload_static(&mut device, &mut program, (width, height), &camera, config.temporal_frames);

        let tile_size = UVec2::from_array(config.tile_size);
        tracing::info!(
            width,
            height,
            mode = mode.name(),
            buffers = pool.len(),
            "session ready on {}",
            device.backend_name()
        );

        Ok(Self {
            device,
            sources,
            scene,
            program,
            binding,
            pool,
            textures: std::array::from_fn(|_| None),
            accumulator: Accumulator::new(modes.accumulation_policy()),
            history,
            tiles: TileScheduler::new(UVec2::new(width, height), tile_size),
            modes,
            camera,
            debug_view: false,
            paused: config.paused,
            started: Instant::now(),
            lost_reported: false,
            config,
        })
    }

    /// Advance one frame.
    pub fn render(&mut self) -> Result<FrameStatus> {
        self.check_lost()?;
        if self.paused {
            return Ok(FrameStatus::Paused);
        }
        if self.accumulator.is_converged(self.config.max_passes) {
            return Ok(FrameStatus::Converged);
        }

        let frame = self.accumulator.next_frame();
        let FrameWeight { passes, weight } = frame;
        let time_ms = self.started.elapsed().as_secs_f32() * 1000.0;
        self.binding.upload_frame(&mut self.device, &mut self.program, time_ms, passes);

        let viewport = if self.config.tile_rendering {
            self.tiles.viewport()
        } else {
            Rect::full(self.config.width, self.config.height)
        };

        let mut inputs = vec![(SamplerSlot::Backbuffer, self.pool.get(BufferName::BackTarget)?)];
        inputs.extend(self.history.sampler_inputs(&self.pool)?);
        let textures = SamplerSlot::EXTERNAL
            .into_iter()
            .filter_map(|slot| self.textures[slot as usize].as_ref().map(|t| (slot, t)))
            .collect();
        let (restir, restir_aux) = self.history.targets(&self.pool)?;
        let call = DrawCall {
            program: &self.program,
            inputs,
            textures,
            targets: [self.pool.get(BufferName::FrontTarget)?, restir, restir_aux],
            viewport,
        };
        self.device.draw(&call)?;

        let present = if self.debug_view {
            let canvas = Rect::full(self.config.width, self.config.height);
            let cells = Rect::grid(canvas, BufferName::COUNT);
            let panels = BufferName::ALL
                .into_iter()
                .zip(cells)
                .map(|(name, cell)| self.pool.get(name).map(|surface| (surface, cell)))
                .collect::<Result<Vec<_>>>()?;
            Present::Split { panels }
        } else {
            Present::Composite { surface: self.pool.get(BufferName::FrontTarget)?, weight }
        };
        self.device.present(&present)?;

        self.accumulator.commit(frame);
        self.accumulator.swap_targets(&mut self.pool);
        self.history.rotate(&mut self.pool);

        tracing::trace!(passes, weight, %viewport, "frame");
        Ok(FrameStatus::Rendered { passes, weight })
    }

    /// Resize to a preset scaled by the device pixel ratio.
    pub fn resize(&mut self, size: SizeClass) -> Result<()> {
        let (width, height) = size.dimensions(self.config.device_pixel_ratio);
        self.resize_to(width, height)
    }

    /// Reallocate every buffer at `width` x `height`. Contents are discarded.
    pub fn resize_to(&mut self, width: u32, height: u32) -> Result<()> {
        self.check_lost()?;
        self.pool.resize(&mut self.device, width, height)?;
        self.config.width = width;
        self.config.height = height;
        self.tiles.resize(UVec2::new(width, height));
        self.accumulator.reset();
        self.upload_static();
        tracing::debug!(width, height, "resized");
        Ok(())
    }

    /// Switch between static and animated rendering.
    ///
    /// A different mode re-assembles and recompiles the trace program; if that
    /// fails the session keeps its previous mode and program. Accumulation and
    /// history are cleared either way.
    pub fn set_mode(&mut self, animated: bool) -> Result<()> {
        self.check_lost()?;
        let mode = Mode::from_animated(animated);
        if mode != self.modes.mode() {
            let mut program = compile_trace(&mut self.device, &self.sources, &self.scene, &self.modes, mode)?;
            let binding = ProgramBinding::resolve(&self.device, &program);
            binding.upload_static(
                &mut self.device,
                &mut program,
                self.pool.size(),
                &self.camera,
                self.modes.temporal_frames(),
            );
            self.program = program;
            self.binding = binding;
            self.modes.set_mode(mode);
            self.accumulator.set_policy(self.modes.accumulation_policy());
            self.history.set_enabled(self.modes.restir_enabled());
            tracing::info!(
                mode = mode.name(),
                max_bounces = self.modes.active_constants().max_bounces,
                "mode switched"
            );
        }
        self.config.animated = animated;
        self.clear()
    }

    /// Toggle between the composited output and a grid of every raw buffer.
    pub fn toggle_debug_view(&mut self) -> bool {
        self.debug_view = !self.debug_view;
        self.debug_view
    }

    /// Move to the next tile and restart its accumulation. No-op unless tiled
    /// rendering is on. Returns `true` when the scheduler wrapped; the session
    /// is then paused until [`Self::set_paused`] resumes it.
    pub fn update_tile(&mut self) -> bool {
        if !self.config.tile_rendering {
            return false;
        }
        self.accumulator.reset();
        let wrapped = self.tiles.advance();
        if wrapped {
            self.paused = true;
            tracing::info!("all tiles rendered, pausing");
        }
        wrapped
    }

    /// Zero every buffer and restart accumulation without changing mode.
    pub fn clear(&mut self) -> Result<()> {
        self.check_lost()?;
        self.pool.clear_all(&mut self.device)?;
        self.accumulator.reset();
        self.tiles.reset();
        Ok(())
    }

    /// Pause or resume drawing. Resuming also restarts a wrapped tile pass.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        if !paused {
            self.tiles.resume();
        }
    }

    pub fn set_max_passes(&mut self, max_passes: Option<u32>) {
        self.config.max_passes = max_passes;
    }

    /// Enable or disable tiled rendering; restarts accumulation.
    pub fn set_tile_rendering(&mut self, enabled: bool) {
        self.config.tile_rendering = enabled;
        self.tiles.reset();
        self.accumulator.reset();
    }

    /// Bind an externally loaded image. Frames drawn before this sample zero.
    pub fn attach_texture(&mut self, slot: SamplerSlot, texture: D::Texture) -> Result<()> {
        if !slot.is_external() {
            return Err(Error::other(format!("{} is not an external texture slot", slot.uniform_name())));
        }
        tracing::debug!(slot = slot.uniform_name(), "texture attached");
        self.textures[slot as usize] = Some(texture);
        Ok(())
    }

    /// Replace the camera and restart accumulation.
    pub fn set_camera(&mut self, camera: Camera) -> Result<()> {
        self.clear()?;
        self.camera = camera;
        self.config.camera = camera;
        self.upload_static();
        Ok(())
    }

    /// Read back the surface currently bound to `name`.
    pub fn read_buffer(&mut self, name: BufferName) -> Result<Vec<[f32; 4]>> {
        self.check_lost()?;
        self.device.read_surface(self.pool.get(name)?)
    }

    fn upload_static(&mut self) {
        self.binding.upload_static(
            &mut self.device,
            &mut self.program,
            self.pool.size(),
            &self.camera,
            self.modes.temporal_frames(),
        );
    }

    fn check_lost(&mut self) -> Result<()> {
        if !self.device.is_lost() {
            return Ok(());
        }
        let reason = self.device.lost_reason().unwrap_or_else(|| "unknown".into());
        if !self.lost_reported {
            tracing::error!(%reason, "GPU context lost; the viewport cannot continue");
            self.lost_reported = true;
        }
        Err(Error::ContextLost(reason))
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn pool(&self) -> &BufferPool<D::Surface> {
        &self.pool
    }

    pub fn program(&self) -> &D::Program {
        &self.program
    }

    pub fn binding(&self) -> &ProgramBinding {
        &self.binding
    }

    pub fn passes(&self) -> u32 {
        self.accumulator.passes()
    }

    pub fn weight(&self) -> f32 {
        self.accumulator.weight()
    }

    pub fn mode(&self) -> Mode {
        self.modes.mode()
    }

    pub fn modes(&self) -> &ModeController {
        &self.modes
    }

    pub fn history(&self) -> &HistoryChain {
        &self.history
    }

    pub fn tiles(&self) -> &TileScheduler {
        &self.tiles
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn config(&self) -> &ViewportConfig {
        &self.config
    }

    pub fn size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    pub fn debug_view(&self) -> bool {
        self.debug_view
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn has_texture(&self, slot: SamplerSlot) -> bool {
        self.textures[slot as usize].is_some()
    }
}

/// Assemble the trace template for `mode` and compile it.
fn compile_trace<D: RenderDevice>(
    device: &mut D,
    sources: &ShaderSources,
    scene: &SceneDescription,
    modes: &ModeController,
    mode: Mode,
) -> Result<D::Program> {
    let defines = modes.define_lines(mode);
    let constants = modes.constant_lines(mode);
    let inputs = AssemblyInputs {
        defines: &defines,
        constants: &constants,
        scene: &scene.scene,
        sdf_meshes: &scene.sdf_meshes,
    };
    let text = assemble(&sources.trace, &inputs, sources.includes.as_ref())?;
    device
        .compile_program(&ProgramSource { label: TRACE_PROGRAM, fragment: &text })
        .inspect_err(|e| tracing::error!(mode = mode.name(), "{e}"))
}
