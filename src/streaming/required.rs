// src/streaming/required.rs
// -------------------------
// Which blocks of one resolution level intersect the view frustum.

use glam::{Mat4, Vec3, Vec4};

/// Six clip planes, inside where `dot(n, p) + w >= 0`. wgpu depth range [0, 1].
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    /// Planes of the volume `m` maps into clip space.
    pub fn from_matrix(m: Mat4) -> Self {
        let (r0, r1, r2, r3) = (m.row(0), m.row(1), m.row(2), m.row(3));
        Self {
            planes: [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2],
        }
    }

    /// Conservative box test against the positive vertex of each plane.
    pub fn intersects_box(&self, min: Vec3, max: Vec3) -> bool {
        self.planes.iter().all(|p| {
            let v = Vec3::new(
                if p.x >= 0.0 { max.x } else { min.x },
                if p.y >= 0.0 { max.y } else { min.y },
                if p.z >= 0.0 { max.z } else { min.z },
            );
            p.truncate().dot(v) + p.w >= 0.0
        })
    }
}

/// Axis-aligned bounds of the frustum in the space `to_ndc` maps from.
pub fn frustum_bounds(to_ndc: Mat4) -> (Vec3, Vec3) {
    let inv = to_ndc.inverse();
    let mut min = Vec3::splat(f32::INFINITY);
    let mut max = Vec3::splat(f32::NEG_INFINITY);
    for z in [0.0, 1.0] {
        for y in [-1.0, 1.0] {
            for x in [-1.0, 1.0] {
                let p = inv.project_point3(Vec3::new(x, y, z));
                min = min.min(p);
                max = max.max(p);
            }
        }
    }
    (min, max)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequiredBlocks {
    pub positions: Vec<[i32; 3]>,
    /// Grid range of the clipped frustum bounds, inclusive. Meaningless when empty.
    pub min: [i32; 3],
    pub max: [i32; 3],
}

impl RequiredBlocks {
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Grid positions of `block_size` blocks of a `level_size` image that the
/// frustum of `level_to_ndc` touches. Voxel centres sit at integer coordinates.
pub fn required_blocks(level_to_ndc: Mat4, block_size: [u32; 3], level_size: [i32; 3]) -> RequiredBlocks {
    let (fmin, fmax) = frustum_bounds(level_to_ndc);
    if !fmin.is_finite() || !fmax.is_finite() {
        return RequiredBlocks::default();
    }

    let mut gmin = [0i32; 3];
    let mut gmax = [0i32; 3];
    for d in 0..3 {
        let lo = fmin[d].max(0.0);
        let hi = fmax[d].min((level_size[d] - 1) as f32);
        if hi < lo {
            return RequiredBlocks::default();
        }
        let bs = block_size[d] as f32;
        gmin[d] = (lo / bs).floor() as i32;
        gmax[d] = (hi / bs).floor() as i32;
    }

    let frustum = Frustum::from_matrix(level_to_ndc);
    let bs = Vec3::new(block_size[0] as f32, block_size[1] as f32, block_size[2] as f32);
    let mut positions = Vec::new();
    for z in gmin[2]..=gmax[2] {
        for y in gmin[1]..=gmax[1] {
            for x in gmin[0]..=gmax[0] {
                let g = Vec3::new(x as f32, y as f32, z as f32);
                let lo = g * bs - Vec3::splat(0.5);
                let hi = (g + Vec3::ONE) * bs - Vec3::splat(0.5);
                if frustum.intersects_box(lo, hi) {
                    positions.push([x, y, z]);
                }
            }
        }
    }

    RequiredBlocks { positions, min: gmin, max: gmax }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(eye: Vec3, target: Vec3) -> Mat4 {
        Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.5, 500.0) * Mat4::look_at_rh(eye, target, Vec3::Y)
    }

    #[test]
    fn whole_volume_in_view_requires_every_block() {
        let pv = camera(Vec3::new(32.0, 32.0, 200.0), Vec3::new(32.0, 32.0, 32.0));
        let req = required_blocks(pv, [16, 16, 16], [64, 64, 64]);
        assert_eq!(req.positions.len(), 64);
        assert_eq!(req.min, [0, 0, 0]);
        assert_eq!(req.max, [3, 3, 3]);
    }

    #[test]
    fn looking_away_requires_nothing() {
        let pv = camera(Vec3::new(32.0, 32.0, 200.0), Vec3::new(32.0, 32.0, 400.0));
        assert!(required_blocks(pv, [16, 16, 16], [64, 64, 64]).is_empty());
    }

    #[test]
    fn narrow_view_culls_side_blocks() {
        let pv = Mat4::perspective_rh(10f32.to_radians(), 1.0, 0.5, 500.0)
            * Mat4::look_at_rh(Vec3::new(8.0, 8.0, 100.0), Vec3::new(8.0, 8.0, 0.0), Vec3::Y);
        let req = required_blocks(pv, [16, 16, 16], [128, 128, 64]);
        assert!(req.positions.contains(&[0, 0, 0]));
        assert!(!req.positions.contains(&[7, 7, 0]));
        assert!(req.positions.len() < 8 * 8 * 4);
    }

    #[test]
    fn box_test_is_conservative() {
        let f = Frustum::from_matrix(camera(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO));
        assert!(f.intersects_box(Vec3::splat(-1.0), Vec3::splat(1.0)));
        assert!(!f.intersects_box(Vec3::new(-1.0, -1.0, 20.0), Vec3::new(1.0, 1.0, 30.0)));
    }
}
