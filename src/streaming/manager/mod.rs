// src/streaming/manager/mod.rs
// ----------------------------
// Per-frame driver of the block cache.
//
// Frame:
// 1) per volume: base level from the view, required blocks, fill tasks
// 2) coarsen the most demanding volumes until the tasks fit the atlas, then truncate
// 3) stage all tasks in the slot cache (the only place slots are bound or evicted)
// 4) extract on the fill pool, upload on this thread through the staging ring
// 5) rebuild each volume's lookup texture from loaded slots

mod stats;

use std::marker::PhantomData;
use std::time::{Duration, Instant};

use crate::cache::{BlockKey, CacheSpec, SlotCache, StageDecision, Voxel};
use crate::config::StreamConfig;
use crate::error::Result;
use crate::render::atlas::Atlas;
use crate::render::gpu::GpuContext;
use crate::streaming::budget::{fit_to_capacity, BudgetOutcome, Degradable};
use crate::streaming::fill::{FillOutcome, StagedFill};
use crate::streaming::stats::{StreamStats, StreamTimingWindow};
use crate::streaming::volume::{FillTask, MultiResolutionVolume, ViewTransform, VolumeBlocks};
use crate::streaming::workers::{FillPool, FillReport};

/// Budget view of one volume for this frame.
struct VolumeCandidate<'a, T> {
    blocks: &'a mut VolumeBlocks,
    volume: &'a MultiResolutionVolume<T>,
    cache: &'a SlotCache,
    spec: &'a CacheSpec,
    tasks: Vec<FillTask>,
}

impl<T: Voxel> Degradable for VolumeCandidate<'_, T> {
    fn base_level(&self) -> usize {
        self.blocks.base_level()
    }

    fn max_level(&self) -> usize {
        self.blocks.max_level()
    }

    fn tasks(&self) -> &[FillTask] {
        &self.tasks
    }

    fn coarsen(&mut self) {
        self.blocks.set_base_level(self.blocks.base_level() + 1);
        self.tasks = self.blocks.fill_tasks(self.volume, self.cache, self.spec);
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct StageCounts {
    pub staged: usize,
    pub resident: usize,
    pub deferred: usize,
}

pub struct BlockStreamer<T: Voxel> {
    pub(crate) config: StreamConfig,
    pub(crate) atlas: Atlas,
    pub(crate) pool: FillPool,
    pub(crate) volumes: Vec<VolumeBlocks>,
    pub(crate) frame: u64,
    pub(crate) stats: StreamStats,

    // drained by the caller on its own cadence
    pub timing: StreamTimingWindow,

    _voxel: PhantomData<fn() -> T>,
}

impl<T: Voxel> BlockStreamer<T> {
    pub fn new(config: StreamConfig) -> Result<Self> {
        let spec = CacheSpec::new(T::FORMAT, config.block_size, config.block_pad)?;
        let atlas = Atlas::new(
            spec,
            config.atlas_budget_mb,
            config.staging_buffers,
            config.blocks_per_staging_buffer,
        )?;
        Self::with_atlas(config, atlas)
    }

    /// Explicit atlas grid instead of one derived from the memory budget.
    pub fn with_atlas_grid(config: StreamConfig, grid_size: [u32; 3]) -> Result<Self> {
        let spec = CacheSpec::new(T::FORMAT, config.block_size, config.block_pad)?;
        let atlas = Atlas::with_grid_size(
            spec,
            grid_size,
            config.staging_buffers,
            config.blocks_per_staging_buffer,
        )?;
        Self::with_atlas(config, atlas)
    }

    fn with_atlas(config: StreamConfig, atlas: Atlas) -> Result<Self> {
        let pool = FillPool::new(config.worker_threads)?;
        log::info!(
            "block streamer: {:?} voxels, {:?} blocks, {} fill threads, ring {}x{}",
            T::FORMAT,
            config.block_size,
            pool.threads(),
            config.staging_buffers,
            config.blocks_per_staging_buffer,
        );
        Ok(Self {
            config,
            atlas,
            pool,
            volumes: Vec::new(),
            frame: 0,
            stats: StreamStats::default(),
            timing: StreamTimingWindow::default(),
            _voxel: PhantomData,
        })
    }

    #[inline] pub fn config(&self) -> &StreamConfig { &self.config }
    #[inline] pub fn atlas(&self) -> &Atlas { &self.atlas }
    #[inline] pub fn stats(&self) -> &StreamStats { &self.stats }

    pub fn volume_blocks(&self, volume: usize) -> Option<&VolumeBlocks> {
        self.volumes.get(volume)
    }

    /// Stream the blocks `volumes` need for `view`. Returns `true` when every
    /// visible cell is served at its preferred level; `false` asks for another
    /// frame.
    pub fn update<C: GpuContext>(
        &mut self,
        ctx: &mut C,
        volumes: &[MultiResolutionVolume<T>],
        view: &ViewTransform,
        time_budget: Duration,
    ) -> Result<bool> {
        let t_frame = Instant::now();
        // None when the budget reaches past what Instant can represent
        let deadline = t_frame.checked_add(time_budget);
        self.frame += 1;

        self.atlas.ensure_sentinel(ctx)?;
        let spec = *self.atlas.spec();

        // 1) view dependent state
        self.volumes.truncate(volumes.len());
        while self.volumes.len() < volumes.len() {
            self.volumes.push(VolumeBlocks::new(self.volumes.len()));
        }
        for (blocks, volume) in self.volumes.iter_mut().zip(volumes) {
            blocks.init(volume, view, &spec);
        }

        // 2) fit to capacity
        let budget = self.plan(volumes, &spec);

        // 3) slots
        let keys: Vec<BlockKey> = budget.tasks.iter().map(|t| t.key).collect();
        let decisions = self.atlas.slots_mut().stage(&keys);
        let mut counts = StageCounts::default();
        let mut staged = Vec::with_capacity(decisions.len());
        for (task, decision) in budget.tasks.iter().zip(&decisions) {
            match *decision {
                StageDecision::Fill(slot) => {
                    staged.push(StagedFill { key: task.key, slot, volume: task.volume });
                }
                StageDecision::Resident(_) => counts.resident += 1,
                StageDecision::Deferred => counts.deferred += 1,
                StageDecision::Duplicate => {}
            }
        }
        counts.staged = staged.len();
        let plan_ms = t_frame.elapsed().as_secs_f64() * 1000.0;

        // 4) fill + upload
        let t_fill = Instant::now();
        let (report, loaded) = self.fill(ctx, &staged, volumes, &spec, deadline);
        let fill_ms = t_fill.elapsed().as_secs_f64() * 1000.0;

        // 5) lookup textures
        let t_lut = Instant::now();
        let extent = self.atlas.extent();
        let mut complete = true;
        for (i, blocks) in self.volumes.iter_mut().enumerate() {
            complete &= blocks.make_lut(self.atlas.slots_mut());
            ctx.write_lut(i, blocks.lut().size(), blocks.lut().texels())?;
            ctx.write_volume_uniforms(i, &blocks.uniforms(&spec, extent));
        }
        let lut_ms = t_lut.elapsed().as_secs_f64() * 1000.0;

        #[cfg(debug_assertions)]
        self.atlas.slots().assert_invariants();

        self.stats = stats::snapshot(self, &budget, &counts, &report, loaded, complete, [plan_ms, fill_ms, lut_ms]);
        self.timing.record_frame(t_frame.elapsed().as_secs_f64() * 1000.0, complete);

        log::debug!(
            "frame {}: {} tasks ({} lod steps, {} truncated), {} filled, {} partial, {} failed, {} deferred, complete={}",
            self.frame,
            budget.requested,
            budget.lod_steps,
            budget.truncated,
            report.complete,
            report.partial,
            report.failed,
            report.deferred + counts.deferred,
            complete,
        );

        Ok(complete)
    }

    /// Atlas, lookup textures and uniforms of the last `update`, ready to draw.
    pub fn bind_for_sampling<C: GpuContext>(&mut self, ctx: &mut C) -> Result<C::Binding> {
        self.atlas.ensure_sentinel(ctx)?;
        ctx.bind_for_sampling(self.volumes.len())
    }

    fn plan(&mut self, volumes: &[MultiResolutionVolume<T>], spec: &CacheSpec) -> BudgetOutcome {
        let cache = self.atlas.slots();
        let mut candidates: Vec<VolumeCandidate<'_, T>> = self
            .volumes
            .iter_mut()
            .zip(volumes)
            .map(|(blocks, volume)| {
                let tasks = blocks.fill_tasks(volume, cache, spec);
                VolumeCandidate { blocks, volume, cache, spec, tasks }
            })
            .collect();
        fit_to_capacity(&mut candidates, cache.capacity())
    }

    fn fill<C: GpuContext>(
        &mut self,
        ctx: &mut C,
        staged: &[StagedFill],
        volumes: &[MultiResolutionVolume<T>],
        spec: &CacheSpec,
        deadline: Option<Instant>,
    ) -> (FillReport, usize) {
        let channel_capacity = self.atlas.ring().capacity_blocks();
        let atlas = &mut self.atlas;
        let timing = &mut self.timing;
        let mut loaded = 0;

        let report = self.pool.run(staged, volumes, spec, deadline, channel_capacity, |filled| {
            match &filled.outcome {
                FillOutcome::Complete | FillOutcome::Partial => {
                    timing.record_block(filled.fill_ms);
                    let complete = filled.outcome == FillOutcome::Complete;
                    loaded += atlas.upload(ctx, filled.fill.slot, filled.fill.key, &filled.data, complete);
                }
                FillOutcome::Failed(e) => {
                    log::warn!(
                        "fill {:?} level {} of volume {} failed: {}",
                        filled.fill.key.grid_pos,
                        filled.fill.key.level,
                        filled.fill.volume,
                        e
                    );
                }
                FillOutcome::Deferred => {}
            }
            filled.data
        });
        loaded += self.atlas.finish_uploads(ctx);

        (report, loaded)
    }
}
