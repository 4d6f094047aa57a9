// src/error.rs
// ------------
// Configuration and source errors for the block streaming cache.
//
// Out-of-range reads, partially available blocks and atlas overflow are not
// errors; they surface as `complete = false` on the frame instead.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("atlas grid {grid:?} leaves no slots besides the out-of-bounds sentinel")]
    ZeroCapacity { grid: [u32; 3] },

    #[error("unsupported pixel format: {0}")]
    UnsupportedPixelFormat(String),

    #[error("invalid cache spec: {0}")]
    InvalidCacheSpec(String),

    #[error("volume (setup {setup}) has no resolution levels")]
    EmptyVolume { setup: u32 },

    #[error("chunk {chunk:?} failed to load: {message}")]
    SourceIo { chunk: [i32; 3], message: String },

    #[error("gpu: {0}")]
    Gpu(String),

    #[error("fill worker pool: {0}")]
    WorkerPool(String),
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
