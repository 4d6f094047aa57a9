// src/blocks/tile.rs

use crate::blocks::copy::{can_load_completely, can_load_partially, copy_block};
use crate::blocks::grid::ChunkSource;
use crate::cache::{CacheSpec, Voxel};
use crate::error::Result;

/// Padded block access for one resolution level.
pub struct TileAccess<'a, T> {
    spec: &'a CacheSpec,
    source: &'a dyn ChunkSource<T>,
}

impl<'a, T: Voxel> TileAccess<'a, T> {
    pub fn new(spec: &'a CacheSpec, source: &'a dyn ChunkSource<T>) -> Self {
        Self { spec, source }
    }

    pub fn can_load_completely(&self, grid_pos: [i32; 3], fail_fast: bool) -> bool {
        can_load_completely(self.spec.padded_min(grid_pos), self.spec.padded_dims(), self.source, fail_fast)
    }

    pub fn can_load_partially(&self, grid_pos: [i32; 3]) -> bool {
        can_load_partially(self.spec.padded_min(grid_pos), self.spec.padded_dims(), self.source)
    }

    /// Extract the padded block at `grid_pos` into `dst` (`padded_voxels` long).
    pub fn load_tile(&self, grid_pos: [i32; 3], dst: &mut [T]) -> Result<bool> {
        copy_block(self.spec.padded_min(grid_pos), self.spec.padded_dims(), self.source, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::grid::ArrayChunkSource;
    use crate::cache::PixelFormat;

    #[test]
    fn tile_includes_one_voxel_border() {
        let src = ArrayChunkSource::<u8>::from_fn([16, 16, 16], [8, 8, 8], |p| (p[0] + 1) as u8).unwrap();
        let spec = CacheSpec::new(PixelFormat::R8, [4, 4, 4], 1).unwrap();
        let tiles = TileAccess::new(&spec, &src);

        let mut dst = vec![0u8; spec.padded_voxels()];
        assert!(tiles.load_tile([1, 1, 1], &mut dst).unwrap());
        // first row starts at x = 3
        assert_eq!(&dst[..6], &[4, 5, 6, 7, 8, 9]);

        assert!(tiles.load_tile([0, 0, 0], &mut dst).unwrap());
        // x = -1 lies outside
        assert_eq!(dst[0], 0);
        let inner = 1 + 6 * (1 + 6);
        assert_eq!(&dst[inner..inner + 5], &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn padding_reaches_into_neighbouring_chunks() {
        let src = ArrayChunkSource::<u8>::from_fn([16, 16, 16], [8, 8, 8], |_| 1).unwrap();
        let spec = CacheSpec::new(PixelFormat::R8, [8, 8, 8], 1).unwrap();
        let tiles = TileAccess::new(&spec, &src);

        src.set_available([1, 0, 0], false);
        assert!(!tiles.can_load_completely([0, 0, 0], true));
        assert!(tiles.can_load_partially([0, 0, 0]));
        src.set_available([1, 0, 0], true);
        assert!(tiles.can_load_completely([0, 0, 0], false));
        assert_eq!(src.loads(), 0);
    }
}
