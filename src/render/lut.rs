// src/render/lut.rs
// -----------------
// CPU side of a volume's lookup texture: one RGBA8UI cell per block grid
// position, holding the slot grid position and a block-scale index.

use crate::config::NUM_BLOCK_SCALES;

/// Decoded lookup cell. `scale_index == 0` means unmapped (sample the sentinel).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LutEntry {
    pub slot_grid: [u32; 3],
    pub scale_index: u8,
}

impl LutEntry {
    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.scale_index != 0
    }
}

#[derive(Clone, Debug)]
pub struct LookupTable {
    size: [u32; 3],
    offset: [i32; 3],
    texels: Vec<u8>,
    block_scales: [[f32; 4]; NUM_BLOCK_SCALES],
}

impl Default for LookupTable {
    fn default() -> Self {
        Self {
            size: [1, 1, 1],
            offset: [0; 3],
            texels: vec![0; 4],
            block_scales: [[0.0; 4]; NUM_BLOCK_SCALES],
        }
    }
}

impl LookupTable {
    /// Cover grid cells `min..=max` plus `pad` cells on each side; all unmapped.
    pub fn reset(&mut self, min: [i32; 3], max: [i32; 3], pad: i32) {
        let size: [u32; 3] = std::array::from_fn(|d| ((max[d] - min[d] + 1).max(0) + 2 * pad) as u32);
        self.size = size.map(|s| s.max(1));
        self.offset = std::array::from_fn(|d| pad - min[d]);
        let cells = self.size.iter().map(|&s| s as usize).product::<usize>();
        self.texels.clear();
        self.texels.resize(cells * 4, 0);
    }

    #[inline] pub fn size(&self) -> [u32; 3] { self.size }
    #[inline] pub fn offset(&self) -> [i32; 3] { self.offset }
    #[inline] pub fn texels(&self) -> &[u8] { &self.texels }
    #[inline] pub fn block_scales(&self) -> &[[f32; 4]; NUM_BLOCK_SCALES] { &self.block_scales }

    fn index(&self, cell: [i32; 3]) -> Option<usize> {
        let mut p = [0usize; 3];
        for d in 0..3 {
            let c = cell[d] + self.offset[d];
            if c < 0 || c >= self.size[d] as i32 {
                return None;
            }
            p[d] = c as usize;
        }
        let [sx, sy, _] = self.size.map(|s| s as usize);
        Some(p[0] + sx * (p[1] + sy * p[2]))
    }

    pub fn set(&mut self, cell: [i32; 3], slot_grid: [u32; 3], scale_index: u8) {
        if let Some(i) = self.index(cell) {
            // slot grid axes are capped at 255 by the atlas
            self.texels[i * 4..i * 4 + 4].copy_from_slice(&[
                slot_grid[0] as u8,
                slot_grid[1] as u8,
                slot_grid[2] as u8,
                scale_index,
            ]);
        }
    }

    pub fn entry(&self, cell: [i32; 3]) -> Option<LutEntry> {
        let i = self.index(cell)?;
        let t = &self.texels[i * 4..i * 4 + 4];
        Some(LutEntry { slot_grid: [t[0] as u32, t[1] as u32, t[2] as u32], scale_index: t[3] })
    }

    /// Entry 0 stays zero; entry `i + 1` is `base / (base + i)` per axis.
    pub fn set_block_scales(&mut self, scales: &[[u32; 3]], base: usize) {
        self.block_scales = [[0.0; 4]; NUM_BLOCK_SCALES];
        let rb = scales[base];
        for (i, r) in scales[base..].iter().take(NUM_BLOCK_SCALES - 1).enumerate() {
            self.block_scales[i + 1] = [
                rb[0] as f32 / r[0] as f32,
                rb[1] as f32 / r[1] as f32,
                rb[2] as f32 / r[2] as f32,
                0.0,
            ];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_border_stays_unmapped() {
        let mut lut = LookupTable::default();
        lut.reset([2, 3, 4], [3, 3, 5], 1);
        assert_eq!(lut.size(), [4, 3, 4]);
        assert_eq!(lut.offset(), [-1, -2, -3]);

        lut.set([2, 3, 4], [7, 8, 9], 1);
        assert_eq!(lut.entry([2, 3, 4]), Some(LutEntry { slot_grid: [7, 8, 9], scale_index: 1 }));
        assert!(!lut.entry([1, 3, 4]).unwrap().is_mapped());
        assert!(lut.entry([5, 3, 4]).is_none());
    }

    #[test]
    fn block_scales_relative_to_base() {
        let mut lut = LookupTable::default();
        lut.set_block_scales(&[[1, 1, 1], [2, 2, 1], [4, 4, 2]], 1);
        let s = lut.block_scales();
        assert_eq!(s[0], [0.0; 4]);
        assert_eq!(s[1], [1.0, 1.0, 1.0, 0.0]);
        assert_eq!(s[2], [0.5, 0.5, 0.5, 0.0]);
        assert_eq!(s[3], [0.0; 4]);
    }
}
