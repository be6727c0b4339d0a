//! Tile scheduler for progressive high-resolution rendering.
//!
//! The canvas is cut into `tile_size` cells; one cell is drawn per
//! [`TileScheduler::advance`]. Wrapping past the last cell pauses the
//! scheduler until it is reset.

use glam::UVec2;

use crate::util::Rect;

#[derive(Clone, Debug)]
pub struct TileScheduler {
    canvas: UVec2,
    tile_size: UVec2,
    /// Index of the last column/row
    total: UVec2,
    cursor: UVec2,
    paused: bool,
}

impl TileScheduler {
    pub fn new(canvas: UVec2, tile_size: UVec2) -> Self {
        let tile_size = tile_size.max(UVec2::ONE);
        Self {
            canvas,
            tile_size,
            total: last_index(canvas, tile_size),
            cursor: UVec2::ZERO,
            paused: false,
        }
    }

    /// New canvas size; rewinds to the first tile.
    pub fn resize(&mut self, canvas: UVec2) {
        self.canvas = canvas;
        self.total = last_index(canvas, self.tile_size);
        self.reset();
    }

    pub fn reset(&mut self) {
        self.cursor = UVec2::ZERO;
        self.paused = false;
    }

    /// Clear the wrap pause, keeping the cursor.
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Step to the next tile, row-major. Returns `true` when this step wrapped
    /// past the last tile and paused the scheduler.
    pub fn advance(&mut self) -> bool {
        if self.cursor.x < self.total.x {
            self.cursor.x += 1;
            return false;
        }
        self.cursor.x = 0;
        if self.cursor.y < self.total.y {
            self.cursor.y += 1;
            return false;
        }
        self.cursor.y = 0;
        self.paused = true;
        true
    }

    /// Pixel rectangle of the current tile, clipped to the canvas.
    pub fn viewport(&self) -> Rect {
        let origin = self.cursor * self.tile_size;
        Rect::new(origin.x, origin.y, self.tile_size.x, self.tile_size.y)
            .clamp_to(Rect::full(self.canvas.x, self.canvas.y))
    }

    pub fn cursor(&self) -> UVec2 {
        self.cursor
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Index of the last column and row: `ceil(canvas / tile) - 1`.
    pub fn total_tiles(&self) -> UVec2 {
        self.total
    }

    /// Number of tiles per axis.
    pub fn tile_count(&self) -> UVec2 {
        self.total + UVec2::ONE
    }

    pub fn tile_size(&self) -> UVec2 {
        self.tile_size
    }
}

fn last_index(canvas: UVec2, tile: UVec2) -> UVec2 {
    let cells = UVec2::new(canvas.x.div_ceil(tile.x), canvas.y.div_ceil(tile.y));
    cells.saturating_sub(UVec2::ONE)
}
