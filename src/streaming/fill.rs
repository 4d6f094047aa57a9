// src/streaming/fill.rs

use bytemuck::Zeroable;

use crate::blocks::TileAccess;
use crate::cache::{BlockKey, CacheSpec, SlotId, Voxel};
use crate::error::CacheError;
use crate::streaming::volume::MultiResolutionVolume;

/// A fill task with its slot assigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StagedFill {
    pub key: BlockKey,
    pub slot: SlotId,
    pub volume: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FillOutcome {
    Complete,
    /// Some chunks were not decodable yet; their voxels are zero.
    Partial,
    Failed(CacheError),
    /// The frame budget ran out before the task started.
    Deferred,
}

/// Worker -> render thread hand-off. `data` is the worker's scratch buffer and
/// goes back through the recycle channel.
pub struct FilledBlock<T> {
    pub fill: StagedFill,
    pub outcome: FillOutcome,
    pub data: Vec<T>,
    pub fill_ms: f64,
}

impl<T> FilledBlock<T> {
    pub fn uploadable(&self) -> bool {
        matches!(self.outcome, FillOutcome::Complete | FillOutcome::Partial)
    }
}

pub fn extract_block<T: Voxel>(
    fill: &StagedFill,
    volumes: &[MultiResolutionVolume<T>],
    spec: &CacheSpec,
    scratch: &mut Vec<T>,
) -> FillOutcome {
    scratch.clear();
    scratch.resize(spec.padded_voxels(), T::zeroed());

    let Some(level) = volumes
        .get(fill.volume)
        .and_then(|v| v.levels.get(fill.key.level as usize))
    else {
        return FillOutcome::Failed(CacheError::InvalidCacheSpec(format!(
            "no level {} in volume {}",
            fill.key.level, fill.volume
        )));
    };

    match TileAccess::new(spec, level.source.as_ref()).load_tile(fill.key.grid_pos, scratch) {
        Ok(true) => FillOutcome::Complete,
        Ok(false) => FillOutcome::Partial,
        Err(e) => FillOutcome::Failed(e),
    }
}
