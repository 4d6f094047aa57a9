// src/render/atlas.rs
// -------------------
// Fixed-size 3D texture atlas of padded blocks.
//
// The atlas owns its geometry, the slot cache and the upload ring. Texture and
// staging buffers are created lazily through the GpuContext; slot 0 is zeroed
// once, before anything samples it.

use crate::cache::{BlockKey, CacheSpec, SlotCache, SlotId, Voxel, SENTINEL_SLOT};
use crate::config::{MAX_ATLAS_EXTENT, MAX_ATLAS_GRID};
use crate::error::{CacheError, Result};
use crate::render::gpu::GpuContext;
use crate::render::staging::{StagedUpload, UploadRing};

/// Roughly cubic grid of padded blocks that fits in `max_mb` megabytes.
pub fn find_suitable_grid_size(spec: &CacheSpec, max_mb: u32) -> [u32; 3] {
    let bpe = spec.format().bytes_per_element() as f64;
    let voxels = max_mb as f64 * 1024.0 * 1024.0 / bpe;
    let side = voxels.cbrt();
    let padded = spec.padded_block_size();
    std::array::from_fn(|d| {
        let by_budget = (side / padded[d] as f64).floor() as u32;
        let by_extent = MAX_ATLAS_EXTENT / padded[d];
        by_budget.min(by_extent).clamp(1, MAX_ATLAS_GRID)
    })
}

pub struct Atlas {
    spec: CacheSpec,
    grid_size: [u32; 3],
    extent: [u32; 3],
    slots: SlotCache,
    ring: UploadRing,
    created: bool,
    sentinel_ready: bool,
}

impl Atlas {
    pub fn new(spec: CacheSpec, max_mb: u32, staging_buffers: usize, blocks_per_buffer: usize) -> Result<Self> {
        let grid = find_suitable_grid_size(&spec, max_mb);
        Self::with_grid_size(spec, grid, staging_buffers, blocks_per_buffer)
    }

    pub fn with_grid_size(
        spec: CacheSpec,
        grid_size: [u32; 3],
        staging_buffers: usize,
        blocks_per_buffer: usize,
    ) -> Result<Self> {
        if grid_size.iter().any(|&g| g > MAX_ATLAS_GRID) {
            return Err(CacheError::InvalidCacheSpec(format!(
                "atlas grid {grid_size:?} exceeds {MAX_ATLAS_GRID} slots per axis"
            )));
        }
        let padded = spec.padded_block_size();
        let extent: [u32; 3] = std::array::from_fn(|d| grid_size[d] * padded[d]);
        let slots = SlotCache::new(grid_size)?;
        let ring = UploadRing::new(padded, spec.format().bytes_per_element(), staging_buffers, blocks_per_buffer)?;

        log::info!(
            "atlas: {:?} slots of {:?} voxels, {:?} texels, capacity {} blocks, {:.1} MB",
            grid_size,
            padded,
            extent,
            slots.capacity(),
            (extent.iter().map(|&e| e as f64).product::<f64>() * spec.format().bytes_per_element() as f64)
                / (1024.0 * 1024.0),
        );

        Ok(Self { spec, grid_size, extent, slots, ring, created: false, sentinel_ready: false })
    }

    #[inline] pub fn spec(&self) -> &CacheSpec { &self.spec }
    #[inline] pub fn grid_size(&self) -> [u32; 3] { self.grid_size }
    #[inline] pub fn extent(&self) -> [u32; 3] { self.extent }
    #[inline] pub fn slots(&self) -> &SlotCache { &self.slots }
    #[inline] pub fn slots_mut(&mut self) -> &mut SlotCache { &mut self.slots }
    #[inline] pub fn ring(&self) -> &UploadRing { &self.ring }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// First texel of `slot` in the atlas.
    pub fn texel_offset(&self, slot: SlotId) -> [u32; 3] {
        let g = self.slots.slot(slot).grid_pos();
        let padded = self.spec.padded_block_size();
        std::array::from_fn(|d| g[d] * padded[d])
    }

    pub fn ensure_created<C: GpuContext>(&mut self, ctx: &mut C) -> Result<()> {
        if self.created {
            return Ok(());
        }
        ctx.create_atlas(self.spec.format(), self.extent)?;
        ctx.create_staging(self.ring.buffers(), self.ring.buffer_size())?;
        self.created = true;
        Ok(())
    }

    pub fn ensure_sentinel<C: GpuContext>(&mut self, ctx: &mut C) -> Result<()> {
        self.ensure_created(ctx)?;
        if self.sentinel_ready {
            return Ok(());
        }
        let zeros = vec![0u8; self.spec.padded_bytes()];
        let grid = self.slots.slot(SENTINEL_SLOT).grid_pos();
        let sentinel = StagedUpload { slot: SENTINEL_SLOT, key: None, complete: true };
        let done = self.ring.push(ctx, sentinel, grid, &zeros);
        self.apply(done);
        let done = self.ring.flush(ctx);
        self.apply(done);
        self.sentinel_ready = true;
        log::debug!("atlas: sentinel slot zeroed");
        Ok(())
    }

    /// Stage one extracted block for `slot`. Returns how many slots became loaded.
    ///
    /// Incomplete blocks are uploaded too, so the renderer sees whatever data
    /// is there, but their slot stays `needs_loading`.
    pub fn upload<C: GpuContext, T: Voxel>(
        &mut self,
        ctx: &mut C,
        slot: SlotId,
        key: BlockKey,
        data: &[T],
        complete: bool,
    ) -> usize {
        let grid = self.slots.slot(slot).grid_pos();
        let upload = StagedUpload { slot, key: Some(key), complete };
        let done = self.ring.push(ctx, upload, grid, bytemuck::cast_slice(data));
        self.apply(done)
    }

    pub fn finish_uploads<C: GpuContext>(&mut self, ctx: &mut C) -> usize {
        let done = self.ring.flush(ctx);
        self.apply(done)
    }

    fn apply(&mut self, done: Vec<StagedUpload>) -> usize {
        let mut loaded = 0;
        for u in done {
            let Some(key) = u.key else { continue };
            if u.complete {
                if self.slots.mark_loaded(u.slot, key) {
                    loaded += 1;
                }
            } else {
                self.slots.mark_incomplete(u.slot, key);
            }
        }
        loaded
    }
}
