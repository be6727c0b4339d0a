//! ReSTIR history chain.
//!
//! Each channel (reservoir, aux) owns four surfaces: the current generation
//! as a front/back pair plus two history generations. The draw writes the
//! front copy; the back copy and both histories are read. After the draw the
//! chain rotates by relabeling only:
//!
//! ```text
//! front    <- history2   (oldest storage is recycled as the next write target)
//! back     <- front      (fresh result)
//! history1 <- back
//! history2 <- history1
//! ```

use crate::device::{PixelFormat, RenderDevice};
use crate::util::Result;

use super::binding::SamplerSlot;
use super::pool::{BufferName, BufferPool};

/// Buffer names of one ReSTIR channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Channel {
    pub front: BufferName,
    pub back: BufferName,
    pub history1: BufferName,
    pub history2: BufferName,
}

impl Channel {
    pub const RESERVOIR: Channel = Channel {
        front: BufferName::Restir,
        back: BufferName::RestirBack,
        history1: BufferName::RestirHistory1,
        history2: BufferName::RestirHistory2,
    };

    pub const AUX: Channel = Channel {
        front: BufferName::RestirAux,
        back: BufferName::RestirAuxBack,
        history1: BufferName::RestirAuxHistory1,
        history2: BufferName::RestirAuxHistory2,
    };

    pub fn names(&self) -> [BufferName; 4] {
        [self.front, self.back, self.history1, self.history2]
    }

    /// `(dst, src)` moves of one rotation.
    fn rotation(&self) -> [(BufferName, BufferName); 4] {
        [
            (self.front, self.history2),
            (self.back, self.front),
            (self.history1, self.back),
            (self.history2, self.history1),
        ]
    }
}

/// Rotation state of both channels.
#[derive(Clone, Debug, Default)]
pub struct HistoryChain {
    enabled: bool,
    rotations: u64,
}

impl HistoryChain {
    pub const CHANNELS: [Channel; 2] = [Channel::RESERVOIR, Channel::AUX];

    pub fn new(enabled: bool) -> Self {
        Self { enabled, rotations: 0 }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Rotations performed since creation.
    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    /// Create all eight chain surfaces, zero-initialized.
    pub fn allocate<D: RenderDevice>(
        &self,
        device: &mut D,
        pool: &mut BufferPool<D::Surface>,
        width: u32,
        height: u32,
    ) -> Result<()> {
        for channel in Self::CHANNELS {
            for name in channel.names() {
                pool.create(device, name, width, height, PixelFormat::Rgba32Float)?;
            }
        }
        Ok(())
    }

    /// Read-only inputs of a draw: the back copies and both histories.
    pub fn sampler_inputs<'p, S>(&self, pool: &'p BufferPool<S>) -> Result<Vec<(SamplerSlot, &'p S)>> {
        Ok(vec![
            (SamplerSlot::Restir, pool.get(Channel::RESERVOIR.back)?),
            (SamplerSlot::RestirAux, pool.get(Channel::AUX.back)?),
            (SamplerSlot::RestirHistory1, pool.get(Channel::RESERVOIR.history1)?),
            (SamplerSlot::RestirAuxHistory1, pool.get(Channel::AUX.history1)?),
            (SamplerSlot::RestirHistory2, pool.get(Channel::RESERVOIR.history2)?),
            (SamplerSlot::RestirAuxHistory2, pool.get(Channel::AUX.history2)?),
        ])
    }

    /// MRT targets of a draw: (reservoir front, aux front).
    pub fn targets<'p, S>(&self, pool: &'p BufferPool<S>) -> Result<(&'p S, &'p S)> {
        Ok((pool.get(Channel::RESERVOIR.front)?, pool.get(Channel::AUX.front)?))
    }

    /// Rotate both channels. Returns `false` and does nothing when disabled.
    pub fn rotate<S>(&mut self, pool: &mut BufferPool<S>) -> bool {
        if !self.enabled {
            return false;
        }
        for channel in Self::CHANNELS {
            pool.permute(&channel.rotation());
        }
        self.rotations += 1;
        true
    }
}
