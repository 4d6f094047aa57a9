// src/streaming/manager/stats.rs
use crate::cache::Voxel;
use crate::streaming::budget::BudgetOutcome;
use crate::streaming::stats::StreamStats;
use crate::streaming::workers::FillReport;

use super::{BlockStreamer, StageCounts};

pub(super) fn snapshot<T: Voxel>(
    s: &BlockStreamer<T>,
    budget: &BudgetOutcome,
    counts: &StageCounts,
    report: &FillReport,
    loaded: usize,
    complete: bool,
    [plan_ms, fill_ms, lut_ms]: [f64; 3],
) -> StreamStats {
    let slots = s.atlas.slots();
    let ring = s.atlas.ring();

    StreamStats {
        frame: s.frame,
        volumes: s.volumes.len() as u32,
        complete,

        slots_total: slots.capacity() as u32,
        slots_resident: slots.resident_count() as u32,
        slots_loading: slots.loading_count() as u32,
        evictions: slots.evictions(),

        tasks_requested: budget.requested as u32,
        tasks_truncated: budget.truncated as u32,
        lod_steps: budget.lod_steps as u32,

        staged_fills: counts.staged as u32,
        skipped_resident: counts.resident as u32,
        deferred_by_cache: counts.deferred as u32,

        filled_complete: report.complete as u32,
        filled_partial: report.partial as u32,
        failed: report.failed as u32,
        deferred: report.deferred as u32,
        marked_loaded: loaded as u32,

        upload_submits: ring.submits(),
        upload_bytes: ring.bytes_uploaded(),

        plan_ms,
        fill_ms,
        lut_ms,
    }
}
