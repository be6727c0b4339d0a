//! CPU-side device: zero-initialized images, recorded draws.
//!
//! Nothing is rasterized unless a kernel is installed with
//! [`HeadlessDevice::set_kernel`]; then every pixel of the draw viewport is
//! shaded by calling the kernel with the bound inputs and uniforms.
//!
//! ```ignore
//! let mut device = HeadlessDevice::new();
//! device.set_kernel(|frag| {
//!     let prev = frag.sample(SamplerSlot::Backbuffer);
//!     [[prev[0] + 1.0, 0.0, 0.0, 1.0], [0.0; 4], [0.0; 4]]
//! });
//! ```

use std::collections::BTreeMap;

use super::{
    fixed_location, fixed_name, identifiers, DrawCall, PixelFormat, Present, ProgramSource,
    RenderDevice, SurfaceDesc, UniformLocation, UniformValue,
};
use crate::render::binding::{SamplerSlot, Uniform};
use crate::util::{Error, Rect, Result};

/// Handle to a headless surface.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct HeadlessSurface {
    id: usize,
    width: u32,
    height: u32,
}

impl HeadlessSurface {
    /// Storage identity; stable for the lifetime of the surface.
    pub fn id(&self) -> usize {
        self.id
    }
}

/// CPU image used for both surfaces and external textures.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub texels: Vec<[f32; 4]>,
}

impl Image {
    pub fn zeroed(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            texels: vec![[0.0; 4]; width as usize * height as usize],
        }
    }

    /// Single-color image.
    pub fn filled(width: u32, height: u32, value: [f32; 4]) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Rgba32Float,
            texels: vec![value; width as usize * height as usize],
        }
    }

    /// Texel lookup with clamp-to-edge addressing.
    pub fn texel(&self, x: u32, y: u32) -> [f32; 4] {
        if self.width == 0 || self.height == 0 {
            return [0.0; 4];
        }
        let x = x.min(self.width - 1) as usize;
        let y = y.min(self.height - 1) as usize;
        self.texels[y * self.width as usize + x]
    }

    fn store(&mut self, x: u32, y: u32, value: [f32; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let value = if self.format.is_float() {
            value
        } else {
            value.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() / 255.0)
        };
        self.texels[y as usize * self.width as usize + x as usize] = value;
    }
}

/// Compiled headless program: its source and current uniform values.
#[derive(Debug, Clone)]
pub struct HeadlessProgram {
    label: String,
    identifiers: Vec<String>,
    uniforms: BTreeMap<UniformLocation, UniformValue>,
}

impl HeadlessProgram {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current value of a uniform by name.
    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        fixed_location(name).and_then(|loc| self.uniforms.get(&loc).copied())
    }
}

/// Per-pixel view handed to the kernel.
pub struct Fragment<'a> {
    pub x: u32,
    pub y: u32,
    inputs: &'a [(SamplerSlot, Image)],
    uniforms: &'a BTreeMap<UniformLocation, UniformValue>,
}

impl Fragment<'_> {
    /// Texel of the surface bound to `slot` at this fragment; zero if unbound.
    pub fn sample(&self, slot: SamplerSlot) -> [f32; 4] {
        self.inputs
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, img)| img.texel(self.x, self.y))
            .unwrap_or([0.0; 4])
    }

    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        fixed_location(name).and_then(|loc| self.uniforms.get(&loc).copied())
    }

    /// `u_frame`, or 0 if the program does not use it.
    pub fn frame(&self) -> u32 {
        match self.uniform(Uniform::Frame.name()) {
            Some(UniformValue::U32(f)) => f,
            _ => 0,
        }
    }
}

/// Shades one fragment into (color, reservoir, aux).
pub type Kernel = Box<dyn FnMut(&Fragment<'_>) -> [[f32; 4]; 3]>;

/// One recorded trace draw.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub program: String,
    /// (slot, surface id)
    pub inputs: Vec<(SamplerSlot, usize)>,
    pub textures: Vec<SamplerSlot>,
    /// color, reservoir, aux surface ids
    pub targets: [usize; 3],
    pub viewport: Rect,
    pub uniforms: BTreeMap<&'static str, UniformValue>,
}

impl DrawRecord {
    pub fn input(&self, slot: SamplerSlot) -> Option<usize> {
        self.inputs.iter().find(|(s, _)| *s == slot).map(|(_, id)| *id)
    }

    pub fn frame(&self) -> Option<u32> {
        match self.uniforms.get(Uniform::Frame.name()) {
            Some(UniformValue::U32(f)) => Some(*f),
            _ => None,
        }
    }
}

/// One recorded present.
#[derive(Debug, Clone, PartialEq)]
pub enum PresentRecord {
    Composite { surface: usize, weight: f32 },
    Split { panels: Vec<(usize, Rect)> },
}

/// CPU device with inspectable history.
pub struct HeadlessDevice {
    images: Vec<Option<Image>>,
    surfaces_created: usize,
    kernel: Option<Kernel>,
    draws: Vec<DrawRecord>,
    presents: Vec<PresentRecord>,
    lost: Option<String>,
    fail_next_present: Option<String>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self {
            images: Vec::new(),
            surfaces_created: 0,
            kernel: None,
            draws: Vec::new(),
            presents: Vec::new(),
            lost: None,
            fail_next_present: None,
        }
    }

    /// Install the per-pixel program body used by `draw`.
    pub fn set_kernel(&mut self, kernel: impl FnMut(&Fragment<'_>) -> [[f32; 4]; 3] + 'static) {
        self.kernel = Some(Box::new(kernel));
    }

    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    pub fn presents(&self) -> &[PresentRecord] {
        &self.presents
    }

    /// Total surfaces ever allocated.
    pub fn surfaces_created(&self) -> usize {
        self.surfaces_created
    }

    /// Surfaces currently holding storage.
    pub fn live_surfaces(&self) -> usize {
        self.images.iter().filter(|i| i.is_some()).count()
    }

    /// Image behind a surface id, if still alive.
    pub fn image(&self, id: usize) -> Option<&Image> {
        self.images.get(id).and_then(|i| i.as_ref())
    }

    /// Simulate losing the context.
    pub fn lose_context(&mut self, reason: impl Into<String>) {
        self.lost = Some(reason.into());
    }

    /// Make the next `present` fail once with `message`.
    pub fn fail_next_present(&mut self, message: impl Into<String>) {
        self.fail_next_present = Some(message.into());
    }

    fn image_of(&self, surface: &HeadlessSurface) -> Result<&Image> {
        self.image(surface.id)
            .ok_or_else(|| Error::other(format!("surface #{} was released", surface.id)))
    }
}

impl RenderDevice for HeadlessDevice {
    type Surface = HeadlessSurface;
    type Texture = Image;
    type Program = HeadlessProgram;

    fn backend_name(&self) -> &'static str {
        "headless"
    }

    fn create_surface(&mut self, desc: &SurfaceDesc) -> Result<HeadlessSurface> {
        if desc.width == 0 || desc.height == 0 {
            return Err(Error::ZeroSizedBuffer {
                name: desc.label.to_string(),
                width: desc.width,
                height: desc.height,
            });
        }
        let id = self.images.len();
        self.images.push(Some(Image::zeroed(desc.width, desc.height, desc.format)));
        self.surfaces_created += 1;
        Ok(HeadlessSurface { id, width: desc.width, height: desc.height })
    }

    fn release_surface(&mut self, surface: HeadlessSurface) {
        if let Some(slot) = self.images.get_mut(surface.id) {
            *slot = None;
        }
    }

    fn surface_size(&self, surface: &HeadlessSurface) -> (u32, u32) {
        (surface.width, surface.height)
    }

    fn clear_surface(&mut self, surface: &HeadlessSurface) -> Result<()> {
        let image = self
            .images
            .get_mut(surface.id)
            .and_then(|i| i.as_mut())
            .ok_or_else(|| Error::other(format!("surface #{} was released", surface.id)))?;
        image.texels.fill([0.0; 4]);
        Ok(())
    }

    fn read_surface(&mut self, surface: &HeadlessSurface) -> Result<Vec<[f32; 4]>> {
        Ok(self.image_of(surface)?.texels.clone())
    }

    fn compile_program(&mut self, source: &ProgramSource<'_>) -> Result<HeadlessProgram> {
        if let Some((i, line)) = source
            .fragment
            .lines()
            .enumerate()
            .find(|(_, l)| l.trim_start().starts_with("#error"))
        {
            return Err(Error::ShaderCompile(format!("{}:{}: {}", source.label, i + 1, line.trim())));
        }
        if source.fragment.trim().is_empty() {
            return Err(Error::ProgramLink(format!("{}: no fragment stage", source.label)));
        }
        Ok(HeadlessProgram {
            label: source.label.to_string(),
            identifiers: identifiers(source.fragment),
            uniforms: BTreeMap::new(),
        })
    }

    fn uniform_location(&self, program: &HeadlessProgram, name: &str) -> Option<UniformLocation> {
        if program.identifiers.binary_search_by(|i| i.as_str().cmp(name)).is_err() {
            return None;
        }
        fixed_location(name)
    }

    fn set_uniform(&mut self, program: &mut HeadlessProgram, location: UniformLocation, value: UniformValue) {
        program.uniforms.insert(location, value);
    }

    fn draw(&mut self, call: &DrawCall<'_, Self>) -> Result<()> {
        for target in call.targets {
            if call.inputs.iter().any(|(_, s)| s.id == target.id) {
                return Err(Error::BindingAlias(format!("surface #{}", target.id)));
            }
        }

        let record = DrawRecord {
            program: call.program.label.clone(),
            inputs: call.inputs.iter().map(|(slot, s)| (*slot, s.id)).collect(),
            textures: call.textures.iter().map(|(slot, _)| *slot).collect(),
            targets: call.targets.map(|s| s.id),
            viewport: call.viewport,
            uniforms: call
                .program
                .uniforms
                .iter()
                .filter_map(|(loc, v)| fixed_name(*loc).map(|n| (n, *v)))
                .collect(),
        };
        self.draws.push(record);

        let Some(kernel) = self.kernel.as_mut() else {
            return Ok(());
        };

        // Inputs never alias targets, so snapshots read the pre-draw state.
        let mut inputs = Vec::with_capacity(call.inputs.len() + call.textures.len());
        for (slot, surface) in &call.inputs {
            let image = self.images[surface.id]
                .as_ref()
                .ok_or_else(|| Error::other(format!("surface #{} was released", surface.id)))?;
            inputs.push((*slot, image.clone()));
        }
        for (slot, texture) in &call.textures {
            inputs.push((*slot, (*texture).clone()));
        }

        let bounds = Rect::full(call.targets[0].width, call.targets[0].height);
        let viewport = call.viewport.clamp_to(bounds);
        let mut shaded = Vec::with_capacity(viewport.area() as usize);
        for (x, y) in viewport.pixels() {
            let frag = Fragment { x, y, inputs: &inputs, uniforms: &call.program.uniforms };
            shaded.push((x, y, kernel(&frag)));
        }

        for (i, target) in call.targets.iter().enumerate() {
            let image = self.images[target.id]
                .as_mut()
                .ok_or_else(|| Error::other(format!("surface #{} was released", target.id)))?;
            for (x, y, out) in &shaded {
                image.store(*x, *y, out[i]);
            }
        }
        Ok(())
    }

    fn present(&mut self, present: &Present<'_, Self>) -> Result<()> {
        if let Some(message) = self.fail_next_present.take() {
            return Err(Error::Other(message));
        }
        let record = match present {
            Present::Composite { surface, weight } => {
                self.image_of(surface)?;
                PresentRecord::Composite { surface: surface.id, weight: *weight }
            }
            Present::Split { panels } => PresentRecord::Split {
                panels: panels.iter().map(|(s, r)| (s.id, *r)).collect(),
            },
        };
        self.presents.push(record);
        Ok(())
    }

    fn is_lost(&self) -> bool {
        self.lost.is_some()
    }

    fn lost_reason(&self) -> Option<String> {
        self.lost.clone()
    }
}
