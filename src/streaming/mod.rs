// src/streaming/mod.rs
// Frame planning, block fill workers and the streamer front end.

pub mod budget;
pub mod fill;
pub mod levels;
pub mod manager;
pub mod required;
pub mod stats;
pub mod volume;
pub mod workers;

pub use fill::{FillOutcome, FilledBlock, StagedFill};
pub use manager::BlockStreamer;
pub use stats::{StreamStats, StreamTimingWindow};
pub use volume::{FillTask, MultiResolutionVolume, ResolutionLevel, ViewTransform, VolumeBlocks};
pub use workers::{FillPool, FillReport};
