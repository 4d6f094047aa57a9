// src/cache/spec.rs
// -----------------
// Voxel element types and the block geometry shared by extractor, atlas and LUT.

use crate::error::{CacheError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    R8,
    R16,
}

impl PixelFormat {
    pub const fn bytes_per_element(self) -> usize {
        match self {
            PixelFormat::R8 => 1,
            PixelFormat::R16 => 2,
        }
    }

    pub fn texture_format(self) -> wgpu::TextureFormat {
        match self {
            PixelFormat::R8 => wgpu::TextureFormat::R8Unorm,
            PixelFormat::R16 => wgpu::TextureFormat::R16Unorm,
        }
    }

    /// Device features needed to create and filter an atlas of this format.
    pub fn required_features(self) -> wgpu::Features {
        match self {
            PixelFormat::R8 => wgpu::Features::empty(),
            PixelFormat::R16 => wgpu::Features::TEXTURE_FORMAT_16BIT_NORM,
        }
    }
}

/// Scalar voxel element that can be streamed into the atlas.
pub trait Voxel: bytemuck::Pod + Send + Sync + 'static {
    const FORMAT: PixelFormat;
}

impl Voxel for u8 {
    const FORMAT: PixelFormat = PixelFormat::R8;
}

impl Voxel for u16 {
    const FORMAT: PixelFormat = PixelFormat::R16;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheSpec {
    format: PixelFormat,
    block_size: [u32; 3],
    padded_block_size: [u32; 3],
    pad_offset: [u32; 3],
}

impl CacheSpec {
    /// Blocks padded by `pad` voxels on every side.
    pub fn new(format: PixelFormat, block_size: [u32; 3], pad: u32) -> Result<Self> {
        let padded = [
            block_size[0] + 2 * pad,
            block_size[1] + 2 * pad,
            block_size[2] + 2 * pad,
        ];
        Self::with_padding(format, block_size, padded, [pad; 3])
    }

    pub fn with_padding(
        format: PixelFormat,
        block_size: [u32; 3],
        padded_block_size: [u32; 3],
        pad_offset: [u32; 3],
    ) -> Result<Self> {
        for d in 0..3 {
            if block_size[d] == 0 {
                return Err(CacheError::InvalidCacheSpec(format!(
                    "block size {block_size:?} has a zero axis"
                )));
            }
            // border on both sides, for seam-free trilinear sampling
            if padded_block_size[d] < block_size[d] + 2 * pad_offset[d] {
                return Err(CacheError::InvalidCacheSpec(format!(
                    "padded size {padded_block_size:?} leaves no {pad_offset:?} border around block {block_size:?}"
                )));
            }
        }
        Ok(Self { format, block_size, padded_block_size, pad_offset })
    }

    #[inline] pub fn format(&self) -> PixelFormat { self.format }
    #[inline] pub fn block_size(&self) -> [u32; 3] { self.block_size }
    #[inline] pub fn padded_block_size(&self) -> [u32; 3] { self.padded_block_size }
    #[inline] pub fn pad_offset(&self) -> [u32; 3] { self.pad_offset }

    pub fn padded_voxels(&self) -> usize {
        self.padded_block_size.iter().map(|&s| s as usize).product()
    }

    pub fn padded_bytes(&self) -> usize {
        self.padded_voxels() * self.format.bytes_per_element()
    }

    /// Min corner (in level voxels) of the padded block at `grid_pos`.
    pub fn padded_min(&self, grid_pos: [i32; 3]) -> [i32; 3] {
        std::array::from_fn(|d| {
            grid_pos[d] * self.block_size[d] as i32 - self.pad_offset[d] as i32
        })
    }

    pub fn padded_dims(&self) -> [i32; 3] {
        self.padded_block_size.map(|s| s as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_padding_is_one_voxel_each_side() {
        let spec = CacheSpec::new(PixelFormat::R16, [32, 32, 32], 1).unwrap();
        assert_eq!(spec.padded_block_size(), [34, 34, 34]);
        assert_eq!(spec.pad_offset(), [1, 1, 1]);
        assert_eq!(spec.padded_bytes(), 34 * 34 * 34 * 2);
        assert_eq!(spec.padded_min([2, 0, 1]), [63, -1, 31]);
    }

    #[test]
    fn rejects_degenerate_geometry() {
        assert!(matches!(
            CacheSpec::new(PixelFormat::R8, [0, 8, 8], 1),
            Err(CacheError::InvalidCacheSpec(_))
        ));
        assert!(matches!(
            CacheSpec::with_padding(PixelFormat::R8, [8, 8, 8], [9, 10, 10], [1, 1, 1]),
            Err(CacheError::InvalidCacheSpec(_))
        ));
        // max side border missing
        assert!(matches!(
            CacheSpec::with_padding(PixelFormat::R8, [8, 8, 8], [10, 10, 9], [1, 1, 1]),
            Err(CacheError::InvalidCacheSpec(_))
        ));
        let wide = CacheSpec::with_padding(PixelFormat::R8, [8, 8, 8], [12, 10, 10], [2, 1, 1]).unwrap();
        assert_eq!(wide.padded_min([1, 1, 1]), [6, 7, 7]);
    }
}
