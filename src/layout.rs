//! Tile partitioning into bounded grids.
//!
//! Grids hold at most [`GRID_CAPACITY`] tiles. The engine owns the structure
//! and tells a [`GridRenderer`] what to show; it never touches pixels.

use std::fmt;

use serde::Serialize;

use crate::registry::TileId;

pub const GRID_CAPACITY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GridId(pub u32);

impl fmt::Display for GridId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grid-{}", self.0)
    }
}

/// Presentation mode of the viewport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Orientation {
    Vertical,
    #[default]
    Horizontal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GridLayout {
    pub rows: u8,
    pub columns: u8,
}

impl GridLayout {
    pub const fn new(rows: u8, columns: u8) -> Self {
        Self { rows, columns }
    }

    /// Fixed table lookup. Counts outside 1..=4 fall back to 2x2.
    pub fn for_count(count: usize, orientation: Orientation) -> Self {
        match (orientation, count) {
            (_, 1) => Self::new(1, 1),
            (Orientation::Vertical, 2) => Self::new(2, 1),
            (Orientation::Vertical, 3) => Self::new(3, 1),
            (Orientation::Horizontal, 2) => Self::new(1, 2),
            (Orientation::Horizontal, 3) => Self::new(1, 3),
            _ => Self::new(2, 2),
        }
    }
}

/// Rendering widget (a carousel of grids) behind a narrow interface.
pub trait GridRenderer: Send {
    /// Current presentation mode, read once per recompute.
    fn orientation(&self) -> Orientation;

    fn add_grid(&mut self, grid: GridId, tiles: &[TileId]);

    fn remove_grid(&mut self, grid: GridId);

    fn focus_grid(&mut self, grid: GridId);

    /// Applies rows/columns to a grid holding `tiles`.
    fn arrange(&mut self, grid: GridId, tiles: &[TileId], layout: GridLayout);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GridView {
    pub id: GridId,
    pub tiles: Vec<TileId>,
    pub layout: GridLayout,
}

#[derive(Debug)]
struct Grid {
    id: GridId,
    tiles: Vec<TileId>,
}

pub struct GridLayoutEngine {
    grids: Vec<Grid>,
    next_id: u32,
    orientation: Orientation,
    renderer: Box<dyn GridRenderer>,
}

impl GridLayoutEngine {
    /// Starts with one empty grid, like a freshly loaded page.
    pub fn new(mut renderer: Box<dyn GridRenderer>) -> Self {
        let first = GridId(1);
        renderer.add_grid(first, &[]);
        let orientation = renderer.orientation();
        Self {
            grids: vec![Grid {
                id: first,
                tiles: Vec::new(),
            }],
            next_id: 2,
            orientation,
            renderer,
        }
    }

    /// Appends a tile to the last grid. Call [`GridLayoutEngine::recompute`] afterwards.
    pub fn place_tile(&mut self, tile: TileId) {
        if self.contains(tile) {
            return;
        }
        if self.grids.is_empty() {
            let id = self.allocate_id();
            self.renderer.add_grid(id, &[]);
            self.grids.push(Grid {
                id,
                tiles: Vec::new(),
            });
        }
        if let Some(last) = self.grids.last_mut() {
            last.tiles.push(tile);
        }
    }

    /// Removes a tile wherever it is. Returns false when it was not placed.
    pub fn remove_tile(&mut self, tile: TileId) -> bool {
        for grid in &mut self.grids {
            if let Some(pos) = grid.tiles.iter().position(|t| *t == tile) {
                grid.tiles.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn contains(&self, tile: TileId) -> bool {
        self.grids.iter().any(|g| g.tiles.contains(&tile))
    }

    /// One rebalancing pass. Empty grids are dropped, an overflowing grid
    /// hands its first tile to a new grid right after it, every other grid
    /// gets its rows/columns from the lookup table.
    ///
    /// Returns the number of grids afterwards.
    pub fn recompute(&mut self) -> usize {
        self.orientation = self.renderer.orientation();

        let mut index = 0;
        while index < self.grids.len() {
            let count = self.grids[index].tiles.len();

            if count == 0 {
                let grid = self.grids.remove(index);
                log::debug!("removing empty {}", grid.id);
                self.renderer.remove_grid(grid.id);
                continue;
            }

            if count > GRID_CAPACITY {
                let tile = self.grids[index].tiles.remove(0);
                let id = self.allocate_id();
                log::debug!("{} overflowed, moving {tile} to {id}", self.grids[index].id);
                self.grids.insert(index + 1, Grid { id, tiles: vec![tile] });
                self.renderer.add_grid(id, &[tile]);
                self.renderer.focus_grid(id);
            }

            // a grid still over capacity waits for the next pass
            let grid = &self.grids[index];
            if grid.tiles.len() <= GRID_CAPACITY {
                let layout = GridLayout::for_count(grid.tiles.len(), self.orientation);
                self.renderer.arrange(grid.id, &grid.tiles, layout);
            }
            index += 1;
        }

        self.grids.len()
    }

    pub fn tile_count(&self) -> usize {
        self.grids.iter().map(|g| g.tiles.len()).sum()
    }

    /// Current structure with layouts for the last seen orientation.
    pub fn grids(&self) -> Vec<GridView> {
        self.grids
            .iter()
            .map(|g| GridView {
                id: g.id,
                tiles: g.tiles.clone(),
                layout: GridLayout::for_count(g.tiles.len(), self.orientation),
            })
            .collect()
    }

    fn allocate_id(&mut self) -> GridId {
        let id = GridId(self.next_id);
        self.next_id += 1;
        id
    }
}
