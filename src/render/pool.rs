//! Buffer pool: a fixed arena of render surfaces addressed by logical name.
//!
//! Every logical [`BufferName`] points at one arena slot ([`StorageId`]).
//! Front/back swaps and history rotation only permute that table; the
//! surfaces themselves are allocated once and replaced only on resize.

use std::fmt;

use crate::device::{PixelFormat, RenderDevice, SurfaceDesc};
use crate::util::{Error, Result};

/// Logical buffer names used by the render loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum BufferName {
    FrontTarget,
    BackTarget,
    Restir,
    RestirBack,
    RestirAux,
    RestirAuxBack,
    RestirHistory1,
    RestirHistory2,
    RestirAuxHistory1,
    RestirAuxHistory2,
}

impl BufferName {
    pub const COUNT: usize = 10;

    pub const ALL: [BufferName; Self::COUNT] = [
        Self::FrontTarget,
        Self::BackTarget,
        Self::Restir,
        Self::RestirBack,
        Self::RestirAux,
        Self::RestirAuxBack,
        Self::RestirHistory1,
        Self::RestirHistory2,
        Self::RestirAuxHistory1,
        Self::RestirAuxHistory2,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::FrontTarget => "front_target",
            Self::BackTarget => "back_target",
            Self::Restir => "restir_buffer",
            Self::RestirBack => "restir_buffer_back",
            Self::RestirAux => "restir_aux",
            Self::RestirAuxBack => "restir_aux_back",
            Self::RestirHistory1 => "restir_history_1",
            Self::RestirHistory2 => "restir_history_2",
            Self::RestirAuxHistory1 => "restir_aux_history_1",
            Self::RestirAuxHistory2 => "restir_aux_history_2",
        }
    }
}

impl fmt::Display for BufferName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Index of a surface in the pool arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageId(pub u8);

struct Slot<S> {
    surface: S,
    label: &'static str,
    format: PixelFormat,
}

/// Named render surfaces of one session.
pub struct BufferPool<S> {
    slots: Vec<Slot<S>>,
    names: [Option<StorageId>; BufferName::COUNT],
    width: u32,
    height: u32,
}

impl<S> BufferPool<S> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            names: [None; BufferName::COUNT],
            width: 0,
            height: 0,
        }
    }

    /// Allocate a surface for `name`. Re-creating a name replaces its storage.
    pub fn create<D>(
        &mut self,
        device: &mut D,
        name: BufferName,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<StorageId>
    where
        D: RenderDevice<Surface = S>,
    {
        if width == 0 || height == 0 {
            return Err(Error::ZeroSizedBuffer {
                name: name.label().to_string(),
                width,
                height,
            });
        }
        let desc = SurfaceDesc { label: name.label(), width, height, format };
        let surface = device.create_surface(&desc)?;
        let slot = Slot { surface, label: name.label(), format };

        let id = match self.names[name as usize] {
            Some(id) => {
                let old = std::mem::replace(&mut self.slots[id.0 as usize], slot);
                device.release_surface(old.surface);
                id
            }
            None => {
                let id = StorageId(self.slots.len() as u8);
                self.slots.push(slot);
                self.names[name as usize] = Some(id);
                id
            }
        };
        self.width = width;
        self.height = height;
        tracing::debug!(buffer = %name, storage = id.0, width, height, "created buffer");
        Ok(id)
    }

    /// Reallocate every tracked surface at the new size. Contents are not preserved.
    pub fn resize<D>(&mut self, device: &mut D, width: u32, height: u32) -> Result<()>
    where
        D: RenderDevice<Surface = S>,
    {
        if width == 0 || height == 0 {
            return Err(Error::ZeroSizedBuffer {
                name: "<all buffers>".to_string(),
                width,
                height,
            });
        }
        for slot in &mut self.slots {
            let desc = SurfaceDesc { label: slot.label, width, height, format: slot.format };
            let fresh = device.create_surface(&desc)?;
            let old = std::mem::replace(&mut slot.surface, fresh);
            device.release_surface(old);
        }
        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Zero the surface currently bound to `name`.
    pub fn clear<D>(&self, device: &mut D, name: BufferName) -> Result<()>
    where
        D: RenderDevice<Surface = S>,
    {
        device.clear_surface(self.get(name)?)
    }

    /// Zero every surface in the arena.
    pub fn clear_all<D>(&self, device: &mut D) -> Result<()>
    where
        D: RenderDevice<Surface = S>,
    {
        for slot in &self.slots {
            device.clear_surface(&slot.surface)?;
        }
        Ok(())
    }

    pub fn contains(&self, name: BufferName) -> bool {
        self.names[name as usize].is_some()
    }

    pub fn storage_of(&self, name: BufferName) -> Option<StorageId> {
        self.names[name as usize]
    }

    /// Surface currently bound to `name`.
    pub fn get(&self, name: BufferName) -> Result<&S> {
        self.storage_of(name)
            .map(|id| &self.slots[id.0 as usize].surface)
            .ok_or_else(|| Error::other(format!("buffer '{}' was never created", name)))
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of allocated surfaces.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Named buffers in declaration order with their current storage.
    pub fn bindings(&self) -> impl Iterator<Item = (BufferName, StorageId)> + '_ {
        BufferName::ALL
            .into_iter()
            .filter_map(|n| self.storage_of(n).map(|id| (n, id)))
    }

    /// Exchange the storage of two names.
    pub fn swap(&mut self, a: BufferName, b: BufferName) {
        self.names.swap(a as usize, b as usize);
    }

    /// Relabel atomically: each `(dst, src)` makes `dst` point at the storage
    /// `src` had before the call. The moves must form a permutation.
    pub fn permute(&mut self, moves: &[(BufferName, BufferName)]) {
        let before = self.names;
        for &(dst, src) in moves {
            self.names[dst as usize] = before[src as usize];
        }
        debug_assert!(self.is_bijective(), "permutation aliased two buffer names");
    }

    /// No two names share storage.
    pub fn is_bijective(&self) -> bool {
        let mut seen: Vec<StorageId> = self.names.iter().flatten().copied().collect();
        let total = seen.len();
        seen.sort();
        seen.dedup();
        seen.len() == total
    }
}

impl<S> Default for BufferPool<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::HeadlessDevice;

    fn pool_with(names: &[BufferName], dev: &mut HeadlessDevice) -> BufferPool<<HeadlessDevice as RenderDevice>::Surface> {
        let mut pool = BufferPool::new();
        for &n in names {
            pool.create(dev, n, 8, 4, PixelFormat::Rgba32Float).unwrap();
        }
        pool
    }

    #[test]
    fn test_zero_size_is_fatal() {
        let mut dev = HeadlessDevice::new();
        let mut pool = BufferPool::new();
        let err = pool
            .create(&mut dev, BufferName::FrontTarget, 0, 600, PixelFormat::Rgba32Float)
            .unwrap_err();
        assert!(err.is_fatal_setup());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_swap_keeps_storage_set() {
        let mut dev = HeadlessDevice::new();
        let mut pool = pool_with(&[BufferName::FrontTarget, BufferName::BackTarget], &mut dev);
        let front = pool.storage_of(BufferName::FrontTarget).unwrap();
        let back = pool.storage_of(BufferName::BackTarget).unwrap();

        pool.swap(BufferName::FrontTarget, BufferName::BackTarget);
        assert_eq!(pool.storage_of(BufferName::FrontTarget), Some(back));
        assert_eq!(pool.storage_of(BufferName::BackTarget), Some(front));
        assert_eq!(pool.len(), 2);
        assert_eq!(dev.surfaces_created(), 2);
    }

    #[test]
    fn test_permute_is_atomic() {
        let mut dev = HeadlessDevice::new();
        let names = [BufferName::Restir, BufferName::RestirBack, BufferName::RestirHistory1];
        let mut pool = pool_with(&names, &mut dev);
        let ids: Vec<_> = names.iter().map(|n| pool.storage_of(*n).unwrap()).collect();

        pool.permute(&[
            (BufferName::Restir, BufferName::RestirHistory1),
            (BufferName::RestirBack, BufferName::Restir),
            (BufferName::RestirHistory1, BufferName::RestirBack),
        ]);
        assert_eq!(pool.storage_of(BufferName::Restir), Some(ids[2]));
        assert_eq!(pool.storage_of(BufferName::RestirBack), Some(ids[0]));
        assert_eq!(pool.storage_of(BufferName::RestirHistory1), Some(ids[1]));
        assert!(pool.is_bijective());
    }

    #[test]
    fn test_resize_reallocates_everything() {
        let mut dev = HeadlessDevice::new();
        let mut pool = pool_with(&BufferName::ALL, &mut dev);
        pool.resize(&mut dev, 16, 16).unwrap();

        assert_eq!(pool.size(), (16, 16));
        for name in BufferName::ALL {
            assert_eq!(dev.surface_size(pool.get(name).unwrap()), (16, 16));
        }
        assert_eq!(dev.live_surfaces(), BufferName::COUNT);
        assert_eq!(dev.surfaces_created(), 2 * BufferName::COUNT);
    }

    #[test]
    fn test_clear_zeroes_texels() {
        let mut dev = HeadlessDevice::new();
        let pool = pool_with(&[BufferName::FrontTarget, BufferName::BackTarget, BufferName::Restir], &mut dev);
        let program = dev
            .compile_program(&crate::device::ProgramSource { label: "fill", fragment: "main" })
            .unwrap();
        dev.set_kernel(|_| [[0.5; 4], [0.25; 4], [0.0; 4]]);
        dev.draw(&crate::device::DrawCall {
            program: &program,
            inputs: Vec::new(),
            textures: Vec::new(),
            targets: [
                pool.get(BufferName::FrontTarget).unwrap(),
                pool.get(BufferName::Restir).unwrap(),
                pool.get(BufferName::BackTarget).unwrap(),
            ],
            viewport: crate::util::Rect::full(8, 4),
        })
        .unwrap();
        let front = pool.get(BufferName::FrontTarget).unwrap();
        assert!(dev.read_surface(front).unwrap().iter().all(|t| *t == [0.5; 4]));

        pool.clear(&mut dev, BufferName::FrontTarget).unwrap();
        assert!(dev.read_surface(front).unwrap().iter().all(|t| *t == [0.0; 4]));
        let restir = pool.get(BufferName::Restir).unwrap();
        assert!(dev.read_surface(restir).unwrap().iter().all(|t| *t == [0.25; 4]));
    }

    #[test]
    fn test_unknown_name() {
        let pool: BufferPool<()> = BufferPool::new();
        assert!(pool.get(BufferName::RestirHistory2).is_err());
        assert!(!pool.contains(BufferName::RestirHistory2));
    }
}
