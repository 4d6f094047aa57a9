// src/cache/mod.rs

pub mod key;
pub mod slots;
pub mod spec;

pub use key::BlockKey;
pub use slots::{Slot, SlotCache, SlotId, StageDecision, SENTINEL_SLOT};
pub use spec::{CacheSpec, PixelFormat, Voxel};
