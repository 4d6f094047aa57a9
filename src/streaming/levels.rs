// src/streaming/levels.rs
// -----------------------
// Preferred resolution level per source position: the level whose voxel size
// is closest to the on-screen pixel footprint there.

use glam::{Mat4, Vec3};

#[derive(Clone, Debug)]
pub struct LevelSelector {
    source_to_ndc: Mat4,
    ndc_to_source: Mat4,
    pixel_ndc: f32,
    level_sizes: Vec<f32>,
}

impl LevelSelector {
    /// `scales[l]` is the per-axis downsampling factor of level `l` relative to level 0.
    pub fn new(source_to_ndc: Mat4, viewport_width: u32, scales: &[[u32; 3]]) -> Self {
        Self {
            source_to_ndc,
            ndc_to_source: source_to_ndc.inverse(),
            pixel_ndc: 2.0 / viewport_width.max(1) as f32,
            level_sizes: scales
                .iter()
                .map(|s| s.iter().copied().max().unwrap_or(1) as f32)
                .collect(),
        }
    }

    /// Width of one screen pixel at level-0 position `p`, in level-0 voxels.
    /// `None` behind the eye.
    pub fn pixel_footprint(&self, p: Vec3) -> Option<f32> {
        let clip = self.source_to_ndc * p.extend(1.0);
        if clip.w <= f32::EPSILON {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        // Unproject both ends so depth round-off cancels.
        let a = self.ndc_to_source.project_point3(ndc);
        let b = self.ndc_to_source.project_point3(ndc + Vec3::new(self.pixel_ndc, 0.0, 0.0));
        Some(a.distance(b))
    }

    pub fn best_level(&self, p: Vec3) -> usize {
        let Some(size) = self.pixel_footprint(p) else {
            return 0;
        };
        let mut best = 0;
        let mut best_diff = f32::INFINITY;
        for (l, &s) in self.level_sizes.iter().enumerate() {
            let diff = (s - size).abs();
            if diff < best_diff {
                best = l;
                best_diff = diff;
            }
        }
        best
    }

    /// Finest level wanted anywhere in the box `min..max` (level-0 coords).
    ///
    /// Evaluated at the box corners in front of the eye and at the box point
    /// nearest to the near-plane centre.
    pub fn finest_level_in(&self, min: Vec3, max: Vec3) -> usize {
        let near = self.ndc_to_source.project_point3(Vec3::ZERO);
        let mut samples = vec![near.clamp(min, max)];
        for z in [min.z, max.z] {
            for y in [min.y, max.y] {
                for x in [min.x, max.x] {
                    samples.push(Vec3::new(x, y, z));
                }
            }
        }
        samples
            .into_iter()
            .filter(|p| self.pixel_footprint(*p).is_some())
            .map(|p| self.best_level(p))
            .min()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCALES: [[u32; 3]; 4] = [[1, 1, 1], [2, 2, 2], [4, 4, 4], [8, 8, 8]];

    fn selector(eye_z: f32) -> LevelSelector {
        let pv = Mat4::perspective_rh(60f32.to_radians(), 1.0, 1.0, 10_000.0)
            * Mat4::look_at_rh(Vec3::new(0.0, 0.0, eye_z), Vec3::ZERO, Vec3::Y);
        LevelSelector::new(pv, 512, &SCALES)
    }

    #[test]
    fn footprint_grows_with_distance() {
        let s = selector(100.0);
        let near = s.pixel_footprint(Vec3::new(0.0, 0.0, 50.0)).unwrap();
        let far = s.pixel_footprint(Vec3::new(0.0, 0.0, -500.0)).unwrap();
        assert!(far > near * 5.0);
        assert!(s.pixel_footprint(Vec3::new(0.0, 0.0, 200.0)).is_none());
    }

    #[test]
    fn farther_points_prefer_coarser_levels() {
        let s = selector(100.0);
        let mut last = 0;
        for z in [90.0, 0.0, -500.0, -2000.0, -5000.0] {
            let l = s.best_level(Vec3::new(0.0, 0.0, z));
            assert!(l >= last, "level went finer at z={z}");
            last = l;
        }
        assert_eq!(s.best_level(Vec3::new(0.0, 0.0, 99.0)), 0);
        assert_eq!(last, 3);
    }

    #[test]
    fn finest_level_ignores_points_behind_eye() {
        let s = selector(3000.0);
        let l = s.finest_level_in(Vec3::splat(-50.0), Vec3::splat(50.0));
        assert!(l > 0);
        assert_eq!(s.finest_level_in(Vec3::new(-50.0, -50.0, 2990.0), Vec3::new(50.0, 50.0, 3100.0)), 0);
    }
}
