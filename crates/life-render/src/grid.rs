// SPDX-License-Identifier: CEPL-1.0
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::schema::Cell;

/// Everything needed to reproduce the initial board.
///
/// Cells are written straight into mapped memory, so there is no host copy;
/// re-populating with the same seed yields the same board.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridSeed {
    pub size: u32,
    pub seed: u64,
    /// Probability in `[0, 1]` that a cell starts alive.
    pub density: f64,
}

impl GridSeed {
    pub fn cell_count(&self) -> usize {
        self.size as usize * self.size as usize
    }

    /// Fills `out` in row-major order. `out` must hold exactly `cell_count()` cells.
    pub fn populate(&self, out: &mut [Cell]) {
        debug_assert_eq!(out.len(), self.cell_count());
        let density = self.density.clamp(0.0, 1.0);
        let mut rng = StdRng::seed_from_u64(self.seed);
        let n = self.size as usize;
        for (i, cell) in out.iter_mut().enumerate() {
            let (x, y) = (i % n, i / n);
            *cell = Cell {
                pos: [x as f32, y as f32],
                alive: rng.gen_bool(density) as u32,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board(seed: GridSeed) -> Vec<Cell> {
        let mut cells = vec![Cell::default(); seed.cell_count()];
        seed.populate(&mut cells);
        cells
    }

    #[test]
    fn row_major_coordinates() {
        let cells = board(GridSeed { size: 4, seed: 1, density: 0.5 });
        assert_eq!(cells.len(), 16);
        assert_eq!(cells[0].pos, [0.0, 0.0]);
        assert_eq!(cells[3].pos, [3.0, 0.0]);
        assert_eq!(cells[4].pos, [0.0, 1.0]);
        assert_eq!(cells[15].pos, [3.0, 3.0]);
    }

    #[test]
    fn same_seed_same_board() {
        let s = GridSeed { size: 32, seed: 7, density: 0.3 };
        assert_eq!(board(s), board(s));
    }

    #[test]
    fn density_extremes() {
        let dead = board(GridSeed { size: 8, seed: 3, density: 0.0 });
        assert!(dead.iter().all(|c| c.alive == 0));
        let alive = board(GridSeed { size: 8, seed: 3, density: 1.0 });
        assert!(alive.iter().all(|c| c.alive == 1));
    }
}
