// src/streaming/volume.rs
// -----------------------
// Multi-resolution volumes and the per-frame block state of each one.

use std::sync::Arc;

use glam::{Mat4, Vec3};
use rustc_hash::FxHashMap as HashMap;

use crate::blocks::{ChunkSource, TileAccess};
use crate::cache::{BlockKey, CacheSpec, SlotCache, Voxel};
use crate::config::{LUT_PAD, NUM_BLOCK_SCALES};
use crate::error::{CacheError, Result};
use crate::render::gpu_types::{vec4, VolumeBlocksGpu};
use crate::render::lut::LookupTable;
use crate::streaming::levels::LevelSelector;
use crate::streaming::required::{frustum_bounds, required_blocks, RequiredBlocks};

pub struct ResolutionLevel<T> {
    /// Downsampling factor relative to level 0, per axis.
    pub scale: [u32; 3],
    pub source: Arc<dyn ChunkSource<T>>,
}

pub struct MultiResolutionVolume<T> {
    pub setup: u32,
    pub timepoint: u32,
    /// Level-0 voxel coords -> world.
    pub source_transform: Mat4,
    pub levels: Vec<ResolutionLevel<T>>,
}

impl<T: Voxel> MultiResolutionVolume<T> {
    pub fn new(setup: u32, timepoint: u32, source_transform: Mat4, levels: Vec<ResolutionLevel<T>>) -> Result<Self> {
        if levels.is_empty() {
            return Err(CacheError::EmptyVolume { setup });
        }
        if let Some(bad) = levels.iter().find(|l| l.scale.contains(&0)) {
            return Err(CacheError::InvalidCacheSpec(format!("level scale {:?} has a zero axis", bad.scale)));
        }
        Ok(Self { setup, timepoint, source_transform, levels })
    }

    pub fn max_level(&self) -> usize {
        self.levels.len() - 1
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ViewTransform {
    /// World -> clip, wgpu depth range.
    pub projection_view: Mat4,
    pub viewport_width: u32,
}

/// One block to extract and upload this frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FillTask {
    pub key: BlockKey,
    pub volume: usize,
}

/// Level `l` voxel coords -> level 0 voxel coords (voxel centres at integers).
fn upscale(r: [u32; 3]) -> Mat4 {
    let r = Vec3::new(r[0] as f32, r[1] as f32, r[2] as f32);
    Mat4::from_translation(0.5 * (r - Vec3::ONE)) * Mat4::from_scale(r)
}

#[derive(Default)]
pub struct VolumeBlocks {
    volume: usize,
    setup: u32,
    timepoint: u32,
    block_size: [u32; 3],
    scales: Vec<[u32; 3]>,
    level_sizes: Vec<[i32; 3]>,
    source_transform: Mat4,
    source_to_ndc: Mat4,
    selector: Option<LevelSelector>,

    base_level: usize,
    required: RequiredBlocks,
    lut: LookupTable,
    complete: bool,
}

impl VolumeBlocks {
    pub fn new(volume: usize) -> Self {
        Self { volume, ..Default::default() }
    }

    #[inline] pub fn volume(&self) -> usize { self.volume }
    #[inline] pub fn base_level(&self) -> usize { self.base_level }
    #[inline] pub fn required(&self) -> &RequiredBlocks { &self.required }
    #[inline] pub fn lut(&self) -> &LookupTable { &self.lut }
    #[inline] pub fn is_complete(&self) -> bool { self.complete }

    pub fn max_level(&self) -> usize {
        self.scales.len().saturating_sub(1)
    }

    /// Coarsest level the block-scale table can still encode from the base level.
    pub fn coarsest_usable(&self) -> usize {
        self.max_level().min(self.base_level + NUM_BLOCK_SCALES - 2)
    }

    /// Recompute view dependent state and pick the base level for this frame.
    pub fn init<T: Voxel>(&mut self, volume: &MultiResolutionVolume<T>, view: &ViewTransform, spec: &CacheSpec) {
        self.setup = volume.setup;
        self.timepoint = volume.timepoint;
        self.block_size = spec.block_size();
        self.scales = volume.levels.iter().map(|l| l.scale).collect();
        self.level_sizes = volume.levels.iter().map(|l| l.source.image_size()).collect();
        self.source_transform = volume.source_transform;
        self.source_to_ndc = view.projection_view * volume.source_transform;

        let selector = LevelSelector::new(self.source_to_ndc, view.viewport_width, &self.scales);

        let (fmin, fmax) = frustum_bounds(self.source_to_ndc);
        let s0 = self.level_sizes[0];
        let hi = Vec3::new((s0[0] - 1) as f32, (s0[1] - 1) as f32, (s0[2] - 1) as f32);
        let lo = fmin.max(Vec3::ZERO);
        let hi = fmax.min(hi);
        let base = if lo.cmple(hi).all() && lo.is_finite() && hi.is_finite() {
            selector.finest_level_in(lo, hi)
        } else {
            0
        };

        self.selector = Some(selector);
        self.set_base_level(base);
    }

    pub fn set_base_level(&mut self, level: usize) {
        self.base_level = level.min(self.max_level());
        let to_ndc = self.source_to_ndc * upscale(self.scales[self.base_level]);
        self.required = required_blocks(to_ndc, self.block_size, self.level_sizes[self.base_level]);
    }

    fn key_at(&self, g0: [i32; 3], level: usize) -> BlockKey {
        let rb = self.scales[self.base_level];
        let rl = self.scales[level];
        let grid_pos = std::array::from_fn(|d| (g0[d] * rb[d] as i32).div_euclid(rl[d] as i32));
        BlockKey::new(grid_pos, level as u32, self.timepoint, self.setup)
    }

    /// Finest level the selector wants for base-level cell `g0`.
    fn best_level_at(&self, g0: [i32; 3]) -> usize {
        let bs = self.block_size;
        let centre = Vec3::new(
            g0[0] as f32 * bs[0] as f32 + 0.5 * bs[0] as f32 - 0.5,
            g0[1] as f32 * bs[1] as f32 + 0.5 * bs[1] as f32 - 0.5,
            g0[2] as f32 * bs[2] as f32 + 0.5 * bs[2] as f32 - 0.5,
        );
        let p = upscale(self.scales[self.base_level]).transform_point3(centre);
        let preferred = self.selector.as_ref().map(|s| s.best_level(p)).unwrap_or(0);
        preferred.max(self.base_level).min(self.coarsest_usable())
    }

    /// Blocks to keep or make resident for this frame.
    ///
    /// Per cell, walk from its best level towards coarser ones and take the
    /// first block that is already cached, fully loadable right now, or at the
    /// coarsest usable level.
    pub fn fill_tasks<T: Voxel>(
        &self,
        volume: &MultiResolutionVolume<T>,
        cache: &SlotCache,
        spec: &CacheSpec,
    ) -> Vec<FillTask> {
        let coarsest = self.coarsest_usable();
        let mut decided: HashMap<BlockKey, bool> = HashMap::default();
        let mut tasks = Vec::new();

        for &g0 in &self.required.positions {
            for level in self.best_level_at(g0)..=coarsest {
                let key = self.key_at(g0, level);
                match decided.get(&key) {
                    Some(true) => break,
                    Some(false) => continue,
                    None => {}
                }
                let take = level == coarsest
                    || cache.is_present_or_completable(&key, || {
                        TileAccess::new(spec, volume.levels[level].source.as_ref())
                            .can_load_completely(key.grid_pos, true)
                    });
                decided.insert(key, take);
                if take {
                    tasks.push(FillTask { key, volume: self.volume });
                    break;
                }
            }
        }
        tasks
    }

    /// Fill the lookup table from loaded slots. Returns whether every cell got
    /// its best level.
    pub fn make_lut(&mut self, cache: &mut SlotCache) -> bool {
        let mut lut = std::mem::take(&mut self.lut);
        lut.reset(self.required.min, self.required.max, LUT_PAD);
        lut.set_block_scales(&self.scales, self.base_level);

        let coarsest = self.coarsest_usable();
        let mut complete = true;
        for &g0 in &self.required.positions {
            let best = self.best_level_at(g0);
            let mut found = false;
            for level in best..=coarsest {
                let key = self.key_at(g0, level);
                let Some(id) = cache.get(&key) else { continue };
                let slot = cache.slot(id);
                if slot.needs_loading() {
                    continue;
                }
                lut.set(g0, slot.grid_pos(), (level - self.base_level + 1) as u8);
                if level != best {
                    complete = false;
                }
                found = true;
                break;
            }
            if !found {
                complete = false;
            }
        }

        self.lut = lut;
        self.complete = complete;
        complete
    }

    pub fn uniforms(&self, spec: &CacheSpec, atlas_extent: [u32; 3]) -> VolumeBlocksGpu {
        let f = |v: [u32; 3]| vec4(v.map(|x| x as f32));
        let im = (self.source_transform * upscale(self.scales[self.base_level])).inverse();
        let size = self.level_sizes[self.base_level];
        VolumeBlocksGpu {
            im: im.to_cols_array_2d(),
            block_size: f(spec.block_size()),
            padded_block_size: f(spec.padded_block_size()),
            pad_offset: f(spec.pad_offset()),
            cache_size: f(atlas_extent),
            lut_size: f(self.lut.size()),
            lut_offset: vec4(self.lut.offset().map(|x| x as f32)),
            source_min: [0.0; 4],
            source_max: vec4(size.map(|x| (x - 1) as f32)),
            block_scales: *self.lut.block_scales(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::ArrayChunkSource;
    use crate::cache::PixelFormat;

    fn volume(sizes: &[[i32; 3]]) -> (MultiResolutionVolume<u8>, Vec<Arc<ArrayChunkSource<u8>>>) {
        let mut levels = Vec::new();
        let mut sources = Vec::new();
        for (l, &size) in sizes.iter().enumerate() {
            let src = Arc::new(ArrayChunkSource::from_fn(size, [8, 8, 8], |_| l as u8 + 1).unwrap());
            sources.push(src.clone());
            let r = 1u32 << l;
            levels.push(ResolutionLevel { scale: [r; 3], source: src as Arc<dyn ChunkSource<u8>> });
        }
        (MultiResolutionVolume::new(3, 0, Mat4::IDENTITY, levels).unwrap(), sources)
    }

    fn overview() -> ViewTransform {
        ViewTransform {
            projection_view: Mat4::perspective_rh(50f32.to_radians(), 1.0, 1.0, 1000.0)
                * Mat4::look_at_rh(Vec3::new(8.0, 8.0, 60.0), Vec3::new(8.0, 8.0, 8.0), Vec3::Y),
            viewport_width: 64,
        }
    }

    #[test]
    fn empty_volume_is_rejected() {
        assert!(matches!(
            MultiResolutionVolume::<u8>::new(9, 0, Mat4::IDENTITY, Vec::new()),
            Err(CacheError::EmptyVolume { setup: 9 })
        ));
    }

    #[test]
    fn coarse_key_covers_fine_cell() {
        let (vol, _) = volume(&[[16, 16, 16], [8, 8, 8]]);
        let spec = CacheSpec::new(PixelFormat::R8, [4, 4, 4], 1).unwrap();
        let mut vb = VolumeBlocks::new(0);
        vb.init(&vol, &overview(), &spec);
        vb.set_base_level(0);
        let k = vb.key_at([3, 2, 1], 1);
        assert_eq!(k.grid_pos, [1, 1, 0]);
        assert_eq!((k.level, k.setup), (1, 3));
    }

    #[test]
    fn unavailable_fine_blocks_fall_back_to_coarsest() {
        let (vol, sources) = volume(&[[16, 16, 16], [8, 8, 8]]);
        let spec = CacheSpec::new(PixelFormat::R8, [8, 8, 8], 1).unwrap();
        let cache = SlotCache::new([2, 2, 4]).unwrap();
        let mut vb = VolumeBlocks::new(0);
        vb.init(&vol, &overview(), &spec);
        vb.set_base_level(0);
        assert_eq!(vb.required().positions.len(), 8);

        let tasks = vb.fill_tasks(&vol, &cache, &spec);
        assert!(tasks.iter().all(|t| t.key.level == 0));
        assert_eq!(tasks.len(), 8);

        sources[0].set_all_available(false);
        let tasks = vb.fill_tasks(&vol, &cache, &spec);
        // all eight fine cells share the one coarse block
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].key, BlockKey::new([0, 0, 0], 1, 0, 3));
    }

    #[test]
    fn resident_fine_block_is_kept_while_its_chunks_are_gone() {
        let (vol, sources) = volume(&[[16, 16, 16], [8, 8, 8]]);
        let spec = CacheSpec::new(PixelFormat::R8, [8, 8, 8], 1).unwrap();
        let mut cache = SlotCache::new([2, 2, 4]).unwrap();
        let mut vb = VolumeBlocks::new(0);
        vb.init(&vol, &overview(), &spec);
        vb.set_base_level(0);

        let resident = BlockKey::new([0, 0, 0], 0, 0, 3);
        cache.get_or_allocate(resident).unwrap();
        sources[0].set_all_available(false);

        let tasks = vb.fill_tasks(&vol, &cache, &spec);
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().any(|t| t.key == resident));
        assert!(tasks.iter().any(|t| t.key == BlockKey::new([0, 0, 0], 1, 0, 3)));
    }

    #[test]
    fn lut_skips_loading_slots() {
        let (vol, _) = volume(&[[8, 8, 8]]);
        let spec = CacheSpec::new(PixelFormat::R8, [8, 8, 8], 1).unwrap();
        let mut cache = SlotCache::new([1, 1, 2]).unwrap();
        let mut vb = VolumeBlocks::new(0);
        vb.init(&vol, &overview(), &spec);

        let key = BlockKey::new([0, 0, 0], 0, 0, 3);
        let id = cache.get_or_allocate(key).unwrap();
        assert!(!vb.make_lut(&mut cache));
        assert!(!vb.lut().entry([0, 0, 0]).unwrap().is_mapped());

        cache.mark_loaded(id, key);
        assert!(vb.make_lut(&mut cache));
        let e = vb.lut().entry([0, 0, 0]).unwrap();
        assert_eq!((e.slot_grid, e.scale_index), ([0, 0, 1], 1));
        assert_eq!(vb.lut().size(), [3, 3, 3]);
    }
}
