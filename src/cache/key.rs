// src/cache/key.rs

/// Identity of one block: grid position within a resolution level of one
/// (setup, timepoint) source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockKey {
    pub grid_pos: [i32; 3],
    pub level: u32,
    pub timepoint: u32,
    pub setup: u32,
}

impl BlockKey {
    #[inline]
    pub const fn new(grid_pos: [i32; 3], level: u32, timepoint: u32, setup: u32) -> Self {
        Self { grid_pos, level, timepoint, setup }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet as HashSet;

    #[test]
    fn keys_differing_in_any_field_are_distinct() {
        let base = BlockKey::new([1, 2, 3], 0, 0, 0);
        let mut set = HashSet::default();
        set.insert(base);
        set.insert(BlockKey { level: 1, ..base });
        set.insert(BlockKey { timepoint: 1, ..base });
        set.insert(BlockKey { setup: 1, ..base });
        set.insert(BlockKey { grid_pos: [1, 2, 4], ..base });
        assert_eq!(set.len(), 5);
        assert!(set.contains(&BlockKey::new([1, 2, 3], 0, 0, 0)));
    }
}
