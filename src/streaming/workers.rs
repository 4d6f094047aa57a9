// src/streaming/workers.rs
// ------------------------
// Block fill pool: extracts staged blocks in parallel and hands them to the
// render thread, which stays the only thread touching the GPU and the cache.

use std::time::Instant;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::cache::{CacheSpec, Voxel};
use crate::error::{CacheError, Result};
use crate::streaming::fill::{extract_block, FillOutcome, FilledBlock, StagedFill};
use crate::streaming::volume::MultiResolutionVolume;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FillReport {
    pub complete: usize,
    pub partial: usize,
    pub failed: usize,
    pub deferred: usize,
}

impl FillReport {
    fn record(&mut self, outcome: &FillOutcome) {
        match outcome {
            FillOutcome::Complete => self.complete += 1,
            FillOutcome::Partial => self.partial += 1,
            FillOutcome::Failed(_) => self.failed += 1,
            FillOutcome::Deferred => self.deferred += 1,
        }
    }

    pub fn all_complete(&self) -> bool {
        self.partial == 0 && self.failed == 0 && self.deferred == 0
    }
}

pub struct FillPool {
    pool: ThreadPool,
    threads: usize,
}

impl FillPool {
    pub fn new(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("block-fill-{}", i))
            .build()
            .map_err(|e| CacheError::WorkerPool(e.to_string()))?;
        Ok(Self { pool, threads })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Extract every task and feed the results to `on_filled` on the calling
    /// thread, in arrival order. Blocks until all tasks were handled.
    ///
    /// Tasks that start after `deadline` come back `Deferred` without touching
    /// the source; `None` means no deadline. `on_filled` returns the scratch
    /// buffer for reuse.
    pub fn run<T, F>(
        &self,
        tasks: &[StagedFill],
        volumes: &[MultiResolutionVolume<T>],
        spec: &CacheSpec,
        deadline: Option<Instant>,
        channel_capacity: usize,
        mut on_filled: F,
    ) -> FillReport
    where
        T: Voxel,
        F: FnMut(FilledBlock<T>) -> Vec<T>,
    {
        let mut report = FillReport::default();
        if tasks.is_empty() {
            return report;
        }

        let (tx_done, rx_done): (Sender<FilledBlock<T>>, Receiver<FilledBlock<T>>) =
            bounded(channel_capacity.max(1));
        let (tx_free, rx_free) = unbounded::<Vec<T>>();

        std::thread::scope(|s| {
            s.spawn(move || {
                self.pool.install(|| {
                    tasks.par_iter().for_each_with((tx_done, rx_free), |(tx, free), fill| {
                        let mut data = free.try_recv().unwrap_or_default();
                        let t0 = Instant::now();
                        let outcome = if deadline.is_some_and(|d| t0 >= d) {
                            FillOutcome::Deferred
                        } else {
                            extract_block(fill, volumes, spec, &mut data)
                        };
                        let fill_ms = t0.elapsed().as_secs_f64() * 1000.0;
                        let _ = tx.send(FilledBlock { fill: *fill, outcome, data, fill_ms });
                    });
                });
            });

            for filled in rx_done.iter() {
                report.record(&filled.outcome);
                let data = on_filled(filled);
                let _ = tx_free.send(data);
            }
        });

        report
    }
}
