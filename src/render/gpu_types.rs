// src/render/gpu_types.rs
use bytemuck::{Pod, Zeroable};

use crate::config::NUM_BLOCK_SCALES;

/// Per-volume uniforms for sampling the atlas through the lookup texture.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
pub struct VolumeBlocksGpu {
    pub im: [[f32; 4]; 4],          // world -> base level voxel coords
    pub block_size: [f32; 4],
    pub padded_block_size: [f32; 4],
    pub pad_offset: [f32; 4],
    pub cache_size: [f32; 4],       // atlas extent in texels
    pub lut_size: [f32; 4],
    pub lut_offset: [f32; 4],
    pub source_min: [f32; 4],
    pub source_max: [f32; 4],
    pub block_scales: [[f32; 4]; NUM_BLOCK_SCALES],
}

#[inline]
pub fn vec4(v: [f32; 3]) -> [f32; 4] {
    [v[0], v[1], v[2], 0.0]
}
