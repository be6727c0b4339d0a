//! Accumulation engine: pass counting and per-frame contribution weight.

use super::pool::{BufferName, BufferPool};

/// How successive frames are combined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccumulationPolicy {
    /// Running average: the displayed weight is `1 / passes`, passes unbounded.
    Progressive,
    /// The trace program blends temporally itself; weight stays 1.
    /// `passes` wraps into `[1, 2 * temporal_frames]`.
    FixedWindow { temporal_frames: u32 },
}

/// Values for one frame: `passes` after increment and the display weight.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameWeight {
    pub passes: u32,
    pub weight: f32,
}

#[derive(Clone, Debug)]
pub struct Accumulator {
    policy: AccumulationPolicy,
    passes: u32,
}

impl Accumulator {
    pub fn new(policy: AccumulationPolicy) -> Self {
        Self { policy, passes: 0 }
    }

    pub fn policy(&self) -> AccumulationPolicy {
        self.policy
    }

    /// Change policy. Always restarts accumulation.
    pub fn set_policy(&mut self, policy: AccumulationPolicy) {
        self.policy = policy;
        self.passes = 0;
    }

    pub fn passes(&self) -> u32 {
        self.passes
    }

    pub fn reset(&mut self) {
        self.passes = 0;
    }

    /// Advance the pass counter and return the values for the frame about to be drawn.
    pub fn begin_frame(&mut self) -> FrameWeight {
        let frame = self.next_frame();
        self.commit(frame);
        frame
    }

    /// Values the next frame would use, without advancing.
    pub fn next_frame(&self) -> FrameWeight {
        let passes = match self.policy {
            AccumulationPolicy::Progressive => self.passes.saturating_add(1),
            AccumulationPolicy::FixedWindow { temporal_frames } => {
                let next = self.passes.saturating_add(1);
                if next > temporal_frames.saturating_mul(2) {
                    temporal_frames
                } else {
                    next
                }
            }
        };
        FrameWeight { passes, weight: self.weight_for(passes) }
    }

    /// Record a frame from [`Self::next_frame`] as drawn.
    pub fn commit(&mut self, frame: FrameWeight) {
        self.passes = frame.passes;
    }

    /// Display weight for the current pass count.
    pub fn weight(&self) -> f32 {
        self.weight_for(self.passes)
    }

    fn weight_for(&self, passes: u32) -> f32 {
        match self.policy {
            AccumulationPolicy::Progressive if passes > 0 => 1.0 / passes as f32,
            _ => 1.0,
        }
    }

    /// Progressive accumulation has reached its pass limit. A limit of 0 means unbounded.
    pub fn is_converged(&self, max_passes: Option<u32>) -> bool {
        match (self.policy, max_passes) {
            (AccumulationPolicy::Progressive, Some(max)) if max > 0 => self.passes >= max,
            _ => false,
        }
    }

    /// Make this frame's result the next frame's history.
    pub fn swap_targets<S>(&self, pool: &mut BufferPool<S>) {
        pool.swap(BufferName::FrontTarget, BufferName::BackTarget);
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new(AccumulationPolicy::Progressive)
    }
}
