// src/cache/slots.rs
// ------------------
// LRU mapping from block identity to atlas slots.
//
// Slot 0 is the out-of-bounds sentinel and never holds a block. Stamps are
// monotonic per cache; a slot stamped at or after `frame_start` was touched in
// the current frame and is not eligible for eviction.

use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};

use crate::cache::key::BlockKey;
use crate::error::{CacheError, Result};

pub type SlotId = u32;

pub const SENTINEL_SLOT: SlotId = 0;

#[derive(Clone, Debug)]
pub struct Slot {
    grid_pos: [u32; 3],
    content: Option<BlockKey>,
    needs_loading: bool,
    stamp: u64,
}

impl Slot {
    #[inline] pub fn grid_pos(&self) -> [u32; 3] { self.grid_pos }
    #[inline] pub fn content(&self) -> Option<BlockKey> { self.content }
    #[inline] pub fn needs_loading(&self) -> bool { self.needs_loading }
    #[inline] pub fn stamp(&self) -> u64 { self.stamp }
}

/// Result of staging one requested key for this frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageDecision {
    /// Already resident and loaded; nothing to do.
    Resident(SlotId),
    /// Bound to the slot but its data still has to be extracted and uploaded.
    Fill(SlotId),
    /// Appeared earlier in the same batch.
    Duplicate,
    /// No evictable slot left this frame.
    Deferred,
}

pub struct SlotCache {
    grid_size: [u32; 3],
    slots: Vec<Slot>,
    map: HashMap<BlockKey, SlotId>,
    stamp: u64,
    frame_start: u64,
    evictions: u64,
}

impl SlotCache {
    /// Slots are enumerated x outer, z inner so consecutive ids are z-adjacent.
    pub fn new(grid_size: [u32; 3]) -> Result<Self> {
        let count = grid_size.iter().map(|&s| s as usize).product::<usize>();
        if count < 2 {
            return Err(CacheError::ZeroCapacity { grid: grid_size });
        }

        let mut slots = Vec::with_capacity(count);
        for x in 0..grid_size[0] {
            for y in 0..grid_size[1] {
                for z in 0..grid_size[2] {
                    slots.push(Slot { grid_pos: [x, y, z], content: None, needs_loading: false, stamp: 0 });
                }
            }
        }

        Ok(Self {
            grid_size,
            slots,
            map: HashMap::default(),
            stamp: 0,
            frame_start: u64::MAX,
            evictions: 0,
        })
    }

    #[inline] pub fn grid_size(&self) -> [u32; 3] { self.grid_size }
    #[inline] pub fn slot_count(&self) -> usize { self.slots.len() }
    #[inline] pub fn evictions(&self) -> u64 { self.evictions }

    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    pub fn slot(&self, id: SlotId) -> &Slot {
        &self.slots[id as usize]
    }

    pub fn resident_count(&self) -> usize {
        self.map.len()
    }

    pub fn loading_count(&self) -> usize {
        self.map.values().filter(|&&id| self.slots[id as usize].needs_loading).count()
    }

    fn next_stamp(&mut self) -> u64 {
        self.stamp += 1;
        self.stamp
    }

    /// Slots touched from now on are protected from eviction until the next call.
    pub fn begin_frame(&mut self) {
        self.frame_start = self.stamp + 1;
    }

    pub fn contains(&self, key: &BlockKey) -> bool {
        self.map.contains_key(key)
    }

    /// Lookup without touching.
    pub fn peek(&self, key: &BlockKey) -> Option<SlotId> {
        self.map.get(key).copied()
    }

    pub fn get(&mut self, key: &BlockKey) -> Option<SlotId> {
        let id = self.peek(key)?;
        let stamp = self.next_stamp();
        self.slots[id as usize].stamp = stamp;
        Some(id)
    }

    /// `None` only when every slot was already touched this frame.
    pub fn get_or_allocate(&mut self, key: BlockKey) -> Option<SlotId> {
        if let Some(id) = self.get(&key) {
            return Some(id);
        }
        let id = self.oldest_evictable()?;
        let stamp = self.next_stamp();
        self.bind(id, key, stamp);
        Some(id)
    }

    /// Whether `key` is worth a slot: already resident, or `can_complete`
    /// says its data can be filled in full now. Does not touch.
    pub fn is_present_or_completable(&self, key: &BlockKey, can_complete: impl FnOnce() -> bool) -> bool {
        self.contains(key) || can_complete()
    }

    pub fn get_if_present_or_completable(
        &mut self,
        key: BlockKey,
        can_complete: impl FnOnce() -> bool,
    ) -> Option<SlotId> {
        if self.is_present_or_completable(&key, can_complete) {
            self.get_or_allocate(key)
        } else {
            None
        }
    }

    /// Assign slots for one frame's batch of keys, in request order.
    ///
    /// Starts a new frame. Resident keys keep their slot; new keys take the least
    /// recently used slots not touched this frame, in (stamp, id) order.
    pub fn stage(&mut self, keys: &[BlockKey]) -> Vec<StageDecision> {
        self.begin_frame();
        let mark = self.next_stamp();

        let mut seen: HashSet<BlockKey> = HashSet::default();
        let mut decisions = Vec::with_capacity(keys.len());
        let mut fresh = Vec::new();

        for (i, key) in keys.iter().enumerate() {
            if !seen.insert(*key) {
                decisions.push(StageDecision::Duplicate);
                continue;
            }
            match self.map.get(key).copied() {
                Some(id) => {
                    let slot = &mut self.slots[id as usize];
                    slot.stamp = mark;
                    decisions.push(if slot.needs_loading {
                        StageDecision::Fill(id)
                    } else {
                        StageDecision::Resident(id)
                    });
                }
                None => {
                    fresh.push(i);
                    decisions.push(StageDecision::Deferred);
                }
            }
        }

        if fresh.is_empty() {
            return decisions;
        }

        let mut order: Vec<SlotId> = (1..self.slots.len() as SlotId)
            .filter(|&id| self.slots[id as usize].stamp < self.frame_start)
            .collect();
        order.sort_unstable_by_key(|&id| (self.slots[id as usize].stamp, id));

        let wanted = fresh.len();
        let available = order.len();
        for (i, id) in fresh.into_iter().zip(order) {
            self.bind(id, keys[i], mark);
            decisions[i] = StageDecision::Fill(id);
        }
        if wanted > available {
            log::warn!(
                "slot cache: {} of {} new blocks deferred, no evictable slot left this frame",
                wanted - available,
                wanted
            );
        }

        decisions
    }

    /// Clear `needs_loading` if `slot` still holds `key`.
    pub fn mark_loaded(&mut self, id: SlotId, key: BlockKey) -> bool {
        let slot = &mut self.slots[id as usize];
        if slot.content == Some(key) {
            slot.needs_loading = false;
            true
        } else {
            false
        }
    }

    /// Keep the binding but flag the data as stale.
    pub fn mark_incomplete(&mut self, id: SlotId, key: BlockKey) {
        let slot = &mut self.slots[id as usize];
        if slot.content == Some(key) {
            slot.needs_loading = true;
        }
    }

    fn oldest_evictable(&self) -> Option<SlotId> {
        (1..self.slots.len() as SlotId)
            .filter(|&id| self.slots[id as usize].stamp < self.frame_start)
            .min_by_key(|&id| (self.slots[id as usize].stamp, id))
    }

    fn bind(&mut self, id: SlotId, key: BlockKey, stamp: u64) {
        debug_assert_ne!(id, SENTINEL_SLOT);
        let slot = &mut self.slots[id as usize];
        if let Some(old) = slot.content.take() {
            self.map.remove(&old);
            self.evictions += 1;
        }
        slot.content = Some(key);
        slot.needs_loading = true;
        slot.stamp = stamp;
        self.map.insert(key, id);
    }

    #[cfg(debug_assertions)]
    pub fn assert_invariants(&self) {
        assert!(self.slots[SENTINEL_SLOT as usize].content.is_none());
        for (key, &id) in self.map.iter() {
            assert_eq!(self.slots[id as usize].content, Some(*key));
        }
        let bound = self.slots.iter().filter(|s| s.content.is_some()).count();
        assert_eq!(bound, self.map.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: i32) -> BlockKey {
        BlockKey::new([i, 0, 0], 0, 0, 0)
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(SlotCache::new([1, 1, 1]), Err(CacheError::ZeroCapacity { .. })));
        assert!(matches!(SlotCache::new([0, 4, 4]), Err(CacheError::ZeroCapacity { .. })));
        assert_eq!(SlotCache::new([1, 1, 2]).unwrap().capacity(), 1);
    }

    #[test]
    fn slot_order_is_x_major_z_minor() {
        let cache = SlotCache::new([2, 2, 2]).unwrap();
        assert_eq!(cache.slot(1).grid_pos(), [0, 0, 1]);
        assert_eq!(cache.slot(2).grid_pos(), [0, 1, 0]);
        assert_eq!(cache.slot(4).grid_pos(), [1, 0, 0]);
    }

    #[test]
    fn overflow_evicts_least_recently_touched() {
        let mut cache = SlotCache::new([1, 1, 5]).unwrap();
        let n = cache.capacity() as i32;
        for i in 0..n {
            cache.get_or_allocate(key(i)).unwrap();
        }
        // Touch key 0 so key 1 becomes the oldest.
        assert!(cache.get(&key(0)).is_some());

        cache.get_or_allocate(key(n)).unwrap();
        assert_eq!(cache.evictions(), 1);
        assert!(cache.get(&key(1)).is_none());
        for i in [0, 2, 3, n] {
            assert!(cache.contains(&key(i)), "key {i} should still be resident");
        }
        cache.assert_invariants();
    }

    #[test]
    fn sentinel_is_never_bound() {
        let mut cache = SlotCache::new([1, 2, 2]).unwrap();
        for round in 0..50 {
            let id = cache.get_or_allocate(key(round)).unwrap();
            assert_ne!(id, SENTINEL_SLOT);
            if round % 3 == 0 {
                cache.get(&key(round / 2));
            }
        }
        assert!(cache.slot(SENTINEL_SLOT).content().is_none());
        cache.assert_invariants();
    }

    #[test]
    fn fresh_allocation_is_loading_until_marked() {
        let mut cache = SlotCache::new([1, 1, 3]).unwrap();
        let id = cache.get_or_allocate(key(7)).unwrap();
        assert!(cache.slot(id).needs_loading());
        assert!(cache.mark_loaded(id, key(7)));
        assert!(!cache.slot(id).needs_loading());
        assert!(!cache.mark_loaded(id, key(8)));
        cache.mark_incomplete(id, key(7));
        assert!(cache.slot(id).needs_loading());
    }

    #[test]
    fn completable_gate_controls_allocation() {
        let mut cache = SlotCache::new([1, 1, 3]).unwrap();
        assert!(cache.get_if_present_or_completable(key(1), || false).is_none());
        assert_eq!(cache.resident_count(), 0);
        let id = cache.get_if_present_or_completable(key(1), || true).unwrap();
        // resident keys ignore the gate
        assert_eq!(cache.get_if_present_or_completable(key(1), || false), Some(id));
    }

    #[test]
    fn read_only_gate_short_circuits_for_resident_keys() {
        let mut cache = SlotCache::new([1, 1, 3]).unwrap();
        let id = cache.get_or_allocate(key(1)).unwrap();
        let stamp = cache.slot(id).stamp();

        assert!(cache.is_present_or_completable(&key(1), || panic!("gate consulted for a resident key")));
        assert!(!cache.is_present_or_completable(&key(2), || false));
        assert!(cache.is_present_or_completable(&key(2), || true));
        assert_eq!(cache.slot(id).stamp(), stamp);
        assert_eq!(cache.resident_count(), 1);
    }

    #[test]
    fn stage_skips_loaded_retries_loading_and_defers_surplus() {
        let mut cache = SlotCache::new([1, 1, 4]).unwrap();
        let first = cache.stage(&[key(0), key(1)]);
        let (StageDecision::Fill(a), StageDecision::Fill(b)) = (first[0], first[1]) else {
            panic!("expected two fills, got {first:?}");
        };
        // fresh slots are taken in enumeration order
        assert_eq!((a, b), (1, 2));
        cache.mark_loaded(a, key(0));

        let second = cache.stage(&[key(0), key(1), key(2), key(3), key(2)]);
        assert_eq!(second[0], StageDecision::Resident(a));
        assert_eq!(second[1], StageDecision::Fill(b));
        assert_eq!(second[2], StageDecision::Fill(3));
        // every slot was touched this frame
        assert_eq!(second[3], StageDecision::Deferred);
        assert_eq!(second[4], StageDecision::Duplicate);
        assert_eq!(cache.evictions(), 0);
        cache.assert_invariants();
    }

    #[test]
    fn stage_evicts_slots_untouched_this_frame() {
        let mut cache = SlotCache::new([1, 1, 3]).unwrap();
        cache.stage(&[key(0), key(1)]);
        let next = cache.stage(&[key(1), key(5)]);
        assert_eq!(next[1], StageDecision::Fill(1));
        assert!(!cache.contains(&key(0)));
        assert_eq!(cache.evictions(), 1);
    }

    #[test]
    fn frame_protection_limits_get_or_allocate() {
        let mut cache = SlotCache::new([1, 1, 3]).unwrap();
        cache.begin_frame();
        cache.get_or_allocate(key(0)).unwrap();
        cache.get_or_allocate(key(1)).unwrap();
        assert!(cache.get_or_allocate(key(2)).is_none());
        cache.begin_frame();
        assert!(cache.get_or_allocate(key(2)).is_some());
    }
}
