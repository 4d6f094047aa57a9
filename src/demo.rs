// src/demo.rs
// -----------
// Procedural multi-resolution volume and a dolly camera for the demo binary.

use std::sync::Arc;

use glam::{Mat4, Vec3};
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};

use volume_block_cache::{ArrayChunkSource, MultiResolutionVolume, ResolutionLevel, Result, ViewTransform};

pub const CHUNK: [i32; 3] = [32, 32, 32];

pub struct DemoVolume {
    pub volume: MultiResolutionVolume<u16>,
    /// Level sources, finest first, for toggling chunk availability.
    pub sources: Vec<Arc<ArrayChunkSource<u16>>>,
}

/// Noise blobs, downsampled by 2 per level.
pub fn noise_volume(setup: u32, size: [i32; 3], levels: usize, seed: u32) -> Result<DemoVolume> {
    let density = Fbm::<Perlin>::new(seed).set_octaves(4).set_frequency(0.03);

    let mut pyramid: Vec<ResolutionLevel<u16>> = Vec::with_capacity(levels);
    let mut sources = Vec::with_capacity(levels);
    for l in 0..levels {
        let r = 1i32 << l;
        let dims = size.map(|s| ((s + r - 1) / r).max(1));
        let src = Arc::new(ArrayChunkSource::from_fn(dims, CHUNK, |p| {
            // level-l voxel centre in level-0 coords
            let c = |d: usize| (p[d] * r) as f64 + 0.5 * (r - 1) as f64;
            let v = density.get([c(0), c(1), c(2)]);
            ((v.max(0.0) * 2.0).min(1.0) * u16::MAX as f64) as u16
        })?);
        sources.push(src.clone());
        pyramid.push(ResolutionLevel { scale: [r as u32; 3], source: src });
    }

    let volume = MultiResolutionVolume::new(setup, 0, Mat4::IDENTITY, pyramid)?;
    Ok(DemoVolume { volume, sources })
}

/// Orbit around the volume while moving in, so later frames want finer levels.
pub fn orbit_view(frame: usize, frames: usize, size: [f32; 3], viewport_width: u32) -> ViewTransform {
    let centre = Vec3::from(size) * 0.5;
    let t = frame as f32 / frames.max(1) as f32;
    let angle = t * std::f32::consts::TAU;
    let radius = size[0] * (3.0 - 2.2 * t);
    let eye = centre + Vec3::new(angle.cos() * radius, 0.35 * radius, angle.sin() * radius);

    let proj = Mat4::perspective_rh(45f32.to_radians(), 16.0 / 9.0, 0.5, 4.0 * radius + 4.0 * size[0]);
    ViewTransform {
        projection_view: proj * Mat4::look_at_rh(eye, centre, Vec3::Y),
        viewport_width,
    }
}
