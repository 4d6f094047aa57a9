// src/streaming/budget.rs
// -----------------------
// Fit the frame's fill tasks into the atlas by coarsening the base level of
// the most demanding volumes first, then truncating.

use crate::streaming::volume::FillTask;

/// A volume whose demand can be lowered one level at a time.
pub trait Degradable {
    fn base_level(&self) -> usize;
    fn max_level(&self) -> usize;
    fn tasks(&self) -> &[FillTask];
    /// Move one level coarser and recompute the tasks.
    fn coarsen(&mut self);
}

#[derive(Clone, Debug, Default)]
pub struct BudgetOutcome {
    /// All volumes' tasks in volume order, at most `capacity` long.
    pub tasks: Vec<FillTask>,
    pub requested: usize,
    pub lod_steps: usize,
    pub truncated: usize,
}

pub fn fit_to_capacity<D: Degradable>(volumes: &mut [D], capacity: usize) -> BudgetOutcome {
    let requested = volumes.iter().map(|v| v.tasks().len()).sum::<usize>();
    let mut total = requested;
    let mut lod_steps = 0;

    let mut order: Vec<usize> = (0..volumes.len()).collect();
    while total > capacity {
        order.sort_by_key(|&i| std::cmp::Reverse(volumes[i].tasks().len()));
        let Some(&i) = order.iter().find(|&&i| volumes[i].base_level() < volumes[i].max_level()) else {
            break;
        };
        let v = &mut volumes[i];
        total -= v.tasks().len();
        v.coarsen();
        total += v.tasks().len();
        lod_steps += 1;
    }

    let mut tasks: Vec<FillTask> = volumes.iter().flat_map(|v| v.tasks().iter().copied()).collect();
    let truncated = tasks.len().saturating_sub(capacity);
    if truncated > 0 {
        log::warn!(
            "budget: {} blocks over atlas capacity {} after {} LoD steps, truncating",
            truncated,
            capacity,
            lod_steps
        );
        tasks.truncate(capacity);
    }

    BudgetOutcome { tasks, requested, lod_steps, truncated }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BlockKey;

    /// Task count shrinks 8x per level, like an isotropic pyramid.
    struct Fake {
        id: usize,
        level: usize,
        max: usize,
        base_count: usize,
        tasks: Vec<FillTask>,
    }

    impl Fake {
        fn new(id: usize, base_count: usize, max: usize) -> Self {
            let mut f = Self { id, level: 0, max, base_count, tasks: Vec::new() };
            f.rebuild();
            f
        }

        fn rebuild(&mut self) {
            let n = (self.base_count >> (3 * self.level)).max(1);
            self.tasks = (0..n as i32)
                .map(|i| FillTask { key: BlockKey::new([i, 0, 0], self.level as u32, 0, self.id as u32), volume: self.id })
                .collect();
        }
    }

    impl Degradable for Fake {
        fn base_level(&self) -> usize { self.level }
        fn max_level(&self) -> usize { self.max }
        fn tasks(&self) -> &[FillTask] { &self.tasks }
        fn coarsen(&mut self) {
            self.level += 1;
            self.rebuild();
        }
    }

    #[test]
    fn under_capacity_is_untouched() {
        let mut v = [Fake::new(0, 10, 3), Fake::new(1, 20, 3)];
        let out = fit_to_capacity(&mut v, 100);
        assert_eq!(out.tasks.len(), 30);
        assert_eq!((out.lod_steps, out.truncated), (0, 0));
    }

    #[test]
    fn largest_volume_is_coarsened_first() {
        let mut v = [Fake::new(0, 64, 3), Fake::new(1, 512, 3)];
        let out = fit_to_capacity(&mut v, 200);
        assert_eq!(v[1].level, 1);
        assert_eq!(v[0].level, 0);
        assert_eq!(out.tasks.len(), 64 + 64);
        assert_eq!(out.lod_steps, 1);
        assert_eq!(out.requested, 576);
    }

    #[test]
    fn terminates_at_max_level_and_truncates() {
        let mut v = [Fake::new(0, 4096, 2), Fake::new(1, 4096, 1)];
        let bound = (2 - 0) + (1 - 0);
        let out = fit_to_capacity(&mut v, 3);
        assert!(out.lod_steps <= bound);
        assert!(v.iter().all(|f| f.level == f.max));
        assert_eq!(out.tasks.len(), 3);
        assert_eq!(out.truncated, 64 + 512 - 3);
    }
}
