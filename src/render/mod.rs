// src/render/mod.rs

pub mod atlas;
pub mod gpu;
pub mod gpu_types;
pub mod lut;
pub mod recording;
pub mod staging;
pub mod wgpu_context;

pub use atlas::{find_suitable_grid_size, Atlas};
pub use gpu::{AtlasCopy, GpuContext};
pub use gpu_types::VolumeBlocksGpu;
pub use lut::{LookupTable, LutEntry};
pub use recording::RecordingContext;
pub use staging::{StagedUpload, UploadRing};
pub use wgpu_context::WgpuContext;
