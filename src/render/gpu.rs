// src/render/gpu.rs
// -----------------
// The GPU operations the streaming cache needs. `WgpuContext` implements them
// on a real device, `RecordingContext` mirrors them in memory.

use crate::cache::PixelFormat;
use crate::error::Result;
use crate::render::gpu_types::VolumeBlocksGpu;

/// One staging buffer -> atlas region copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AtlasCopy {
    pub buffer: usize,
    pub offset: u64,
    pub bytes_per_row: u32,
    pub rows_per_image: u32,
    pub origin: [u32; 3],
    pub extent: [u32; 3],
}

pub trait GpuContext {
    /// Whatever the draw call needs to sample atlas + lookup textures.
    type Binding;

    fn create_atlas(&mut self, format: PixelFormat, extent: [u32; 3]) -> Result<()>;

    fn create_staging(&mut self, count: usize, size_bytes: u64) -> Result<()>;

    fn write_staging(&mut self, buffer: usize, offset: u64, bytes: &[u8]);

    /// Recorded now, executed on the next `submit`.
    fn copy_staging_to_atlas(&mut self, copy: &AtlasCopy);

    fn submit(&mut self);

    /// RGBA8UI texels, `size` cells; (re)creates the texture when the size changes.
    fn write_lut(&mut self, volume: usize, size: [u32; 3], texels: &[u8]) -> Result<()>;

    fn write_volume_uniforms(&mut self, volume: usize, uniforms: &VolumeBlocksGpu);

    fn bind_for_sampling(&mut self, volumes: usize) -> Result<Self::Binding>;
}
