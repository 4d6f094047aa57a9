// src/config.rs
// -------------
// Global config knobs for the block streaming cache.

use std::time::Duration;

/// Unpadded block edge length in voxels. Source levels are cut into blocks of this size.
pub const BLOCK_SIZE: [u32; 3] = [32, 32, 32];

/// Interpolation padding on each side of a block (voxels).
pub const BLOCK_PAD: u32 = 1;

/// GPU memory budget for the atlas texture.
pub const ATLAS_BUDGET_MB: u32 = 300;

// Slot coordinates are stored as u8 in the lookup texture.
pub const MAX_ATLAS_GRID: u32 = 255;

/// wgpu's default `max_texture_dimension_3d`.
pub const MAX_ATLAS_EXTENT: u32 = 2048;

pub const STAGING_BUFFERS: usize = 5;
pub const BLOCKS_PER_STAGING_BUFFER: usize = 100;

/// wgpu requires buffer->texture copies to use 256-byte aligned rows.
pub const COPY_ROW_ALIGN: usize = 256;

/// Border of sentinel cells around each volume's lookup texture.
pub const LUT_PAD: i32 = 1;

/// Entry 0 is the out-of-bounds scale, entries 1.. are base level, base+1, ...
pub const NUM_BLOCK_SCALES: usize = 10;

pub const FRAME_BUDGET_MS: u64 = 30;

/// Half the hardware threads, at least one.
pub fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .max(1)
}

#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub block_size: [u32; 3],
    pub block_pad: u32,
    pub atlas_budget_mb: u32,
    pub staging_buffers: usize,
    pub blocks_per_staging_buffer: usize,
    pub worker_threads: usize,
    pub frame_budget: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            block_pad: BLOCK_PAD,
            atlas_budget_mb: ATLAS_BUDGET_MB,
            staging_buffers: STAGING_BUFFERS,
            blocks_per_staging_buffer: BLOCKS_PER_STAGING_BUFFER,
            worker_threads: default_worker_threads(),
            frame_budget: Duration::from_millis(FRAME_BUDGET_MS),
        }
    }
}
