// src/blocks/mod.rs

pub mod copy;
pub mod grid;
pub mod tile;

pub use copy::{can_load_completely, can_load_partially, copy_block};
pub use grid::{ArrayChunkSource, ChunkSource};
pub use tile::TileAccess;
