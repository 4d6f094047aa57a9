// src/blocks/copy.rs
// ------------------
// Copy an axis-aligned box out of a chunked source into a flat X-fastest buffer.
//
// The box may extend past the image on any side; the outside part is written
// as zeros, one slab per axis so no voxel is cleared twice and no inside voxel
// is cleared at all.

use bytemuck::Zeroable;

use crate::blocks::grid::ChunkSource;
use crate::cache::Voxel;
use crate::error::{CacheError, Result};

/// Part of one axis that falls into one chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Span {
    chunk: i32,
    offset: i32,
    len: i32,
}

fn spans(min: i32, len: i32, chunk: i32) -> Vec<Span> {
    let mut out = Vec::new();
    let end = min + len;
    let mut p = min;
    while p < end {
        let c = p.div_euclid(chunk);
        let offset = p - c * chunk;
        let n = (chunk - offset).min(end - p);
        out.push(Span { chunk: c, offset, len: n });
        p += n;
    }
    out
}

/// Intersection of the box with the image, as (min, dims, offset into the box).
fn clip(min: [i32; 3], dim: [i32; 3], image: [i32; 3]) -> Option<([i32; 3], [i32; 3], [i32; 3])> {
    let mut cmin = [0; 3];
    let mut cdim = [0; 3];
    let mut off = [0; 3];
    for d in 0..3 {
        let lo = min[d].max(0);
        let hi = (min[d] + dim[d]).min(image[d]);
        if hi <= lo {
            return None;
        }
        cmin[d] = lo;
        cdim[d] = hi - lo;
        off[d] = lo - min[d];
    }
    Some((cmin, cdim, off))
}

fn for_each_chunk(
    cmin: [i32; 3],
    cdim: [i32; 3],
    chunk_size: [i32; 3],
    mut f: impl FnMut([i32; 3], [i32; 3], [i32; 3], [i32; 3]) -> bool,
) {
    let sx = spans(cmin[0], cdim[0], chunk_size[0]);
    let sy = spans(cmin[1], cdim[1], chunk_size[1]);
    let sz = spans(cmin[2], cdim[2], chunk_size[2]);

    let mut dz = 0;
    for z in &sz {
        let mut dy = 0;
        for y in &sy {
            let mut dx = 0;
            for x in &sx {
                let go_on = f(
                    [x.chunk, y.chunk, z.chunk],
                    [x.offset, y.offset, z.offset],
                    [dx, dy, dz],
                    [x.len, y.len, z.len],
                );
                if !go_on {
                    return;
                }
                dx += x.len;
            }
            dy += y.len;
        }
        dz += z.len;
    }
}

#[inline]
fn idx(p: [i32; 3], dims: [i32; 3]) -> usize {
    (p[0] + dims[0] * (p[1] + dims[1] * p[2])) as usize
}

fn copy_region<T: Copy>(
    src: &[T],
    src_dims: [i32; 3],
    src_off: [i32; 3],
    dst: &mut [T],
    dst_dims: [i32; 3],
    dst_off: [i32; 3],
    ext: [i32; 3],
) {
    let w = ext[0] as usize;
    for z in 0..ext[2] {
        for y in 0..ext[1] {
            let s = idx([src_off[0], src_off[1] + y, src_off[2] + z], src_dims);
            let d = idx([dst_off[0], dst_off[1] + y, dst_off[2] + z], dst_dims);
            dst[d..d + w].copy_from_slice(&src[s..s + w]);
        }
    }
}

fn fill_region<T: Copy>(dst: &mut [T], dims: [i32; 3], off: [i32; 3], ext: [i32; 3], value: T) {
    if ext.iter().any(|&e| e <= 0) {
        return;
    }
    let w = ext[0] as usize;
    for z in 0..ext[2] {
        for y in 0..ext[1] {
            let d = idx([off[0], off[1] + y, off[2] + z], dims);
            dst[d..d + w].fill(value);
        }
    }
}

/// Zero everything in the `dim` box outside the inner box `[off, off + inner)`.
///
/// z slabs span the full xy extent, y slabs the inner z range, x slabs the
/// inner yz range.
fn clear_outside<T: Voxel>(dst: &mut [T], dim: [i32; 3], off: [i32; 3], inner: [i32; 3]) {
    let zero = T::zeroed();
    let end: [i32; 3] = std::array::from_fn(|d| off[d] + inner[d]);

    fill_region(dst, dim, [0, 0, 0], [dim[0], dim[1], off[2]], zero);
    fill_region(dst, dim, [0, 0, end[2]], [dim[0], dim[1], dim[2] - end[2]], zero);

    fill_region(dst, dim, [0, 0, off[2]], [dim[0], off[1], inner[2]], zero);
    fill_region(dst, dim, [0, end[1], off[2]], [dim[0], dim[1] - end[1], inner[2]], zero);

    fill_region(dst, dim, [0, off[1], off[2]], [off[0], inner[1], inner[2]], zero);
    fill_region(dst, dim, [end[0], off[1], off[2]], [dim[0] - end[0], inner[1], inner[2]], zero);
}

/// Copy the `dim` box at `min` into `dst` (X-fastest, `dim` sized).
///
/// Returns `Ok(false)` when some overlapped chunk was not available yet; its
/// region is zero-filled. A box entirely outside the image is all zeros and
/// complete.
pub fn copy_block<T: Voxel>(
    min: [i32; 3],
    dim: [i32; 3],
    source: &dyn ChunkSource<T>,
    dst: &mut [T],
) -> Result<bool> {
    let total = dim.iter().map(|&d| d.max(0) as usize).product::<usize>();
    if dst.len() < total {
        return Err(CacheError::InvalidCacheSpec(format!(
            "destination holds {} voxels, block {dim:?} needs {total}",
            dst.len()
        )));
    }
    if total == 0 {
        return Ok(true);
    }

    let Some((cmin, cdim, off)) = clip(min, dim, source.image_size()) else {
        dst[..total].fill(T::zeroed());
        return Ok(true);
    };
    clear_outside(dst, dim, off, cdim);

    let chunk_size = source.chunk_size();
    let mut complete = true;
    let mut failure = None;
    for_each_chunk(cmin, cdim, chunk_size, |chunk, src_off, rel, ext| {
        let dst_off = [off[0] + rel[0], off[1] + rel[1], off[2] + rel[2]];
        match source.load(chunk) {
            Ok(Some(data)) => {
                let dims = source.chunk_dims(chunk);
                let need = dims.iter().map(|&d| d as usize).product::<usize>();
                if data.len() < need {
                    failure = Some(CacheError::SourceIo {
                        chunk,
                        message: format!("chunk has {} voxels, expected {need}", data.len()),
                    });
                    return false;
                }
                copy_region(&data, dims, src_off, dst, dim, dst_off, ext);
            }
            Ok(None) => {
                complete = false;
                fill_region(dst, dim, dst_off, ext, T::zeroed());
            }
            Err(e) => {
                failure = Some(e);
                return false;
            }
        }
        true
    });

    match failure {
        Some(e) => Err(e),
        None => Ok(complete),
    }
}

/// Whether every chunk the box overlaps is available, without loading any.
pub fn can_load_completely<T>(
    min: [i32; 3],
    dim: [i32; 3],
    source: &dyn ChunkSource<T>,
    fail_fast: bool,
) -> bool {
    let Some((cmin, cdim, _)) = clip(min, dim, source.image_size()) else {
        return true;
    };
    let mut all = true;
    for_each_chunk(cmin, cdim, source.chunk_size(), |chunk, _, _, _| {
        if !source.is_available(chunk) {
            all = false;
            return !fail_fast;
        }
        true
    });
    all
}

/// Whether at least one chunk the box overlaps is available.
pub fn can_load_partially<T>(min: [i32; 3], dim: [i32; 3], source: &dyn ChunkSource<T>) -> bool {
    let Some((cmin, cdim, _)) = clip(min, dim, source.image_size()) else {
        return false;
    };
    let mut any = false;
    for_each_chunk(cmin, cdim, source.chunk_size(), |chunk, _, _, _| {
        any = source.is_available(chunk);
        !any
    });
    any
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::grid::ArrayChunkSource;

    fn value(p: [i32; 3]) -> u16 {
        (1 + p[0] + 13 * p[1] + 171 * p[2]) as u16
    }

    fn source() -> ArrayChunkSource<u16> {
        ArrayChunkSource::from_fn([23, 17, 11], [8, 5, 4], value).unwrap()
    }

    fn truth(min: [i32; 3], dim: [i32; 3], image: [i32; 3]) -> Vec<u16> {
        let mut out = Vec::new();
        for z in 0..dim[2] {
            for y in 0..dim[1] {
                for x in 0..dim[0] {
                    let p = [min[0] + x, min[1] + y, min[2] + z];
                    let inside = (0..3).all(|d| p[d] >= 0 && p[d] < image[d]);
                    out.push(if inside { value(p) } else { 0 });
                }
            }
        }
        out
    }

    #[test]
    fn spans_split_at_chunk_borders() {
        assert_eq!(
            spans(6, 12, 8),
            vec![
                Span { chunk: 0, offset: 6, len: 2 },
                Span { chunk: 1, offset: 0, len: 8 },
                Span { chunk: 2, offset: 0, len: 2 },
            ]
        );
        assert_eq!(spans(3, 2, 8), vec![Span { chunk: 0, offset: 3, len: 2 }]);
    }

    #[test]
    fn interior_block_matches_ground_truth() {
        let src = source();
        let (min, dim) = ([3, 2, 1], [12, 9, 7]);
        let mut dst = vec![0xffff; 12 * 9 * 7];
        assert!(copy_block(min, dim, &src, &mut dst).unwrap());
        assert_eq!(dst, truth(min, dim, [23, 17, 11]));
    }

    #[test]
    fn outside_parts_are_zero_and_inside_exact() {
        let src = source();
        for (min, dim) in [
            ([-3, -2, -1], [10, 10, 10]),
            ([18, 12, 8], [10, 10, 10]),
            ([-1, 5, -4], [30, 4, 20]),
        ] {
            let n = (dim[0] * dim[1] * dim[2]) as usize;
            let mut dst = vec![0xabcd; n];
            assert!(copy_block(min, dim, &src, &mut dst).unwrap());
            assert_eq!(dst, truth(min, dim, [23, 17, 11]), "box at {min:?}");
        }
    }

    #[test]
    fn fully_outside_block_is_zero_and_complete() {
        let src = source();
        let mut dst = vec![7u16; 64];
        assert!(copy_block([40, 0, 0], [4, 4, 4], &src, &mut dst).unwrap());
        assert!(dst.iter().all(|&v| v == 0));
        assert_eq!(src.loads(), 0);
    }

    #[test]
    fn unavailable_chunk_is_zeroed_and_reported() {
        let src = source();
        src.set_available([1, 0, 0], false);
        let (min, dim) = ([4, 0, 0], [8, 3, 2]);
        let mut dst = vec![1u16; 48];
        assert!(!copy_block(min, dim, &src, &mut dst).unwrap());

        let expected = truth(min, dim, [23, 17, 11]);
        for z in 0..2 {
            for y in 0..3 {
                for x in 0..8 {
                    let i = (x + 8 * (y + 3 * z)) as usize;
                    if x < 4 {
                        assert_eq!(dst[i], expected[i]);
                    } else {
                        assert_eq!(dst[i], 0);
                    }
                }
            }
        }
    }

    #[test]
    fn source_failure_propagates() {
        let src = source();
        src.set_failing([0, 0, 0], true);
        let mut dst = vec![0u16; 8];
        assert!(matches!(
            copy_block([0, 0, 0], [2, 2, 2], &src, &mut dst),
            Err(CacheError::SourceIo { .. })
        ));
    }

    #[test]
    fn failed_chunk_stops_the_walk() {
        let src = source();
        src.set_failing([0, 0, 0], true);
        // 2 x 2 x 2 chunks, the failing one visited first
        let mut dst = vec![0u16; 16 * 10 * 8];
        assert!(copy_block([0, 0, 0], [16, 10, 8], &src, &mut dst).is_err());
        assert_eq!(src.loads(), 1);
    }

    #[test]
    fn residency_queries_do_not_load() {
        let src = source();
        src.set_available([0, 0, 0], false);
        assert!(!can_load_completely([0, 0, 0], [10, 3, 3], &src, true));
        assert!(can_load_partially([0, 0, 0], [10, 3, 3], &src));
        assert!(can_load_completely([8, 0, 0], [8, 5, 4], &src, false));
        assert!(can_load_completely([100, 0, 0], [4, 4, 4], &src, true));
        assert!(!can_load_partially([100, 0, 0], [4, 4, 4], &src));
        assert_eq!(src.loads(), 0);
    }
}
