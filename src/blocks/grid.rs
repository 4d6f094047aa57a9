// src/blocks/grid.rs
// ------------------
// Chunked source images: the read-per-chunk trait the extractor consumes, and
// an in-memory implementation.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::cache::Voxel;
use crate::error::{CacheError, Result};

/// One resolution level of a volume, stored as a grid of equally sized chunks
/// (truncated at the max border).
pub trait ChunkSource<T>: Send + Sync {
    /// Level dimensions in voxels.
    fn image_size(&self) -> [i32; 3];

    /// Nominal chunk dimensions.
    fn chunk_size(&self) -> [i32; 3];

    /// Actual dimensions of `chunk`, truncated at the image border.
    fn chunk_dims(&self, chunk: [i32; 3]) -> [i32; 3] {
        let img = self.image_size();
        let cs = self.chunk_size();
        std::array::from_fn(|d| cs[d].min(img[d] - chunk[d] * cs[d]).max(0))
    }

    /// Whether `load` would return data right now. Must not block.
    fn is_available(&self, chunk: [i32; 3]) -> bool;

    /// Chunk voxels in X-fastest order, or `None` while not yet decodable.
    fn load(&self, chunk: [i32; 3]) -> Result<Option<Arc<[T]>>>;

    fn chunk_grid(&self) -> [i32; 3] {
        let img = self.image_size();
        let cs = self.chunk_size();
        std::array::from_fn(|d| (img[d] + cs[d] - 1) / cs[d])
    }
}

/// Fully materialised chunked image with per-chunk availability switches.
pub struct ArrayChunkSource<T> {
    image_size: [i32; 3],
    chunk_size: [i32; 3],
    grid: [i32; 3],
    chunks: Vec<Arc<[T]>>,
    available: Vec<AtomicBool>,
    failing: Vec<AtomicBool>,
    loads: AtomicUsize,
}

impl<T: Voxel> ArrayChunkSource<T> {
    pub fn from_fn(
        image_size: [i32; 3],
        chunk_size: [i32; 3],
        f: impl Fn([i32; 3]) -> T,
    ) -> Result<Self> {
        if image_size.iter().any(|&s| s <= 0) || chunk_size.iter().any(|&s| s <= 0) {
            return Err(CacheError::InvalidCacheSpec(format!(
                "image {image_size:?} / chunk {chunk_size:?} must be positive"
            )));
        }

        let grid: [i32; 3] = std::array::from_fn(|d| (image_size[d] + chunk_size[d] - 1) / chunk_size[d]);
        let count = grid.iter().map(|&g| g as usize).product::<usize>();
        let mut chunks = Vec::with_capacity(count);

        for cz in 0..grid[2] {
            for cy in 0..grid[1] {
                for cx in 0..grid[0] {
                    let origin = [cx * chunk_size[0], cy * chunk_size[1], cz * chunk_size[2]];
                    let dims: [i32; 3] =
                        std::array::from_fn(|d| chunk_size[d].min(image_size[d] - origin[d]));
                    let mut data = Vec::with_capacity(dims.iter().map(|&s| s as usize).product());
                    for z in 0..dims[2] {
                        for y in 0..dims[1] {
                            for x in 0..dims[0] {
                                data.push(f([origin[0] + x, origin[1] + y, origin[2] + z]));
                            }
                        }
                    }
                    chunks.push(Arc::from(data));
                }
            }
        }

        Ok(Self {
            image_size,
            chunk_size,
            grid,
            chunks,
            available: (0..count).map(|_| AtomicBool::new(true)).collect(),
            failing: (0..count).map(|_| AtomicBool::new(false)).collect(),
            loads: AtomicUsize::new(0),
        })
    }
}

impl<T> ArrayChunkSource<T> {
    fn index(&self, chunk: [i32; 3]) -> Option<usize> {
        if (0..3).any(|d| chunk[d] < 0 || chunk[d] >= self.grid[d]) {
            return None;
        }
        let [x, y, z] = chunk.map(|c| c as usize);
        let [gx, gy, _] = self.grid.map(|g| g as usize);
        Some(x + gx * (y + gy * z))
    }

    pub fn set_available(&self, chunk: [i32; 3], available: bool) {
        if let Some(i) = self.index(chunk) {
            self.available[i].store(available, Ordering::Relaxed);
        }
    }

    pub fn set_all_available(&self, available: bool) {
        for a in &self.available {
            a.store(available, Ordering::Relaxed);
        }
    }

    /// Make `load` of `chunk` fail with an I/O error.
    pub fn set_failing(&self, chunk: [i32; 3], failing: bool) {
        if let Some(i) = self.index(chunk) {
            self.failing[i].store(failing, Ordering::Relaxed);
        }
    }

    /// Number of `load` calls so far.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}

impl<T: Voxel> ChunkSource<T> for ArrayChunkSource<T> {
    fn image_size(&self) -> [i32; 3] {
        self.image_size
    }

    fn chunk_size(&self) -> [i32; 3] {
        self.chunk_size
    }

    fn is_available(&self, chunk: [i32; 3]) -> bool {
        self.index(chunk)
            .map(|i| self.available[i].load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    fn load(&self, chunk: [i32; 3]) -> Result<Option<Arc<[T]>>> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        let Some(i) = self.index(chunk) else {
            return Err(CacheError::SourceIo { chunk, message: "chunk outside the image".into() });
        };
        if self.failing[i].load(Ordering::Relaxed) {
            return Err(CacheError::SourceIo { chunk, message: "simulated read failure".into() });
        }
        if !self.available[i].load(Ordering::Relaxed) {
            return Ok(None);
        }
        Ok(Some(self.chunks[i].clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn border_chunks_are_truncated() {
        let src = ArrayChunkSource::<u8>::from_fn([10, 7, 5], [4, 4, 4], |_| 1).unwrap();
        assert_eq!(src.chunk_grid(), [3, 2, 2]);
        assert_eq!(src.chunk_dims([2, 1, 1]), [2, 3, 1]);
        assert_eq!(src.load([2, 1, 1]).unwrap().unwrap().len(), 6);
    }

    #[test]
    fn availability_and_failure_switches() {
        let src = ArrayChunkSource::<u16>::from_fn([8, 8, 8], [4, 4, 4], |p| p[0] as u16).unwrap();
        src.set_available([1, 0, 0], false);
        assert!(!src.is_available([1, 0, 0]));
        assert!(src.load([1, 0, 0]).unwrap().is_none());

        src.set_failing([0, 1, 0], true);
        assert!(matches!(src.load([0, 1, 0]), Err(CacheError::SourceIo { chunk: [0, 1, 0], .. })));
        assert_eq!(src.loads(), 2);
    }
}
