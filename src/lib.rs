//! Streams blocks of chunked multi-resolution volumes into a fixed-size GPU
//! texture atlas, with one lookup texture per volume mapping block grid
//! positions to atlas slots.

pub mod blocks;
pub mod cache;
pub mod config;
pub mod error;
pub mod render;
pub mod streaming;

pub use blocks::{ArrayChunkSource, ChunkSource};
pub use cache::{BlockKey, CacheSpec, PixelFormat, Voxel};
pub use config::StreamConfig;
pub use error::{CacheError, Result};
pub use render::{GpuContext, RecordingContext, WgpuContext};
pub use streaming::{BlockStreamer, MultiResolutionVolume, ResolutionLevel, StreamStats, ViewTransform};
