// src/render/staging.rs
// ---------------------
// Ring of staging buffers feeding the atlas.
//
// Blocks are packed into the active buffer with 256-byte aligned rows. When the
// buffer is full (or on flush) its copies are recorded and submitted and the
// ring moves on, so a buffer is not rewritten until N-1 other batches went out.

use crate::cache::{BlockKey, SlotId};
use crate::config::COPY_ROW_ALIGN;
use crate::error::{CacheError, Result};
use crate::render::gpu::{AtlasCopy, GpuContext};

fn align_up(v: usize, a: usize) -> usize {
    (v + (a - 1)) & !(a - 1)
}

/// A block that went out with a submitted batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StagedUpload {
    pub slot: SlotId,
    /// `None` for the sentinel.
    pub key: Option<BlockKey>,
    pub complete: bool,
}

struct Pending {
    upload: StagedUpload,
    slot_grid: [u32; 3],
    offset: u64,
}

pub struct UploadRing {
    buffers: usize,
    blocks_per_buffer: usize,
    block: [u32; 3],
    row_bytes: usize,
    padded_row: usize,
    block_stride: usize,

    active: usize,
    pending: Vec<Pending>,
    scratch: Vec<u8>,

    submits: u64,
    copies: u64,
    bytes: u64,
}

impl UploadRing {
    pub fn new(
        padded_block: [u32; 3],
        bytes_per_element: usize,
        buffers: usize,
        blocks_per_buffer: usize,
    ) -> Result<Self> {
        if buffers == 0 || blocks_per_buffer == 0 {
            return Err(CacheError::InvalidCacheSpec(format!(
                "upload ring needs at least one buffer and one block per buffer (got {buffers} x {blocks_per_buffer})"
            )));
        }
        let row_bytes = padded_block[0] as usize * bytes_per_element;
        let padded_row = align_up(row_bytes, COPY_ROW_ALIGN);
        let block_stride = padded_row * padded_block[1] as usize * padded_block[2] as usize;

        Ok(Self {
            buffers,
            blocks_per_buffer,
            block: padded_block,
            row_bytes,
            padded_row,
            block_stride,
            active: 0,
            pending: Vec::with_capacity(blocks_per_buffer),
            scratch: Vec::new(),
            submits: 0,
            copies: 0,
            bytes: 0,
        })
    }

    #[inline] pub fn buffers(&self) -> usize { self.buffers }
    #[inline] pub fn active(&self) -> usize { self.active }
    #[inline] pub fn pending(&self) -> usize { self.pending.len() }
    #[inline] pub fn submits(&self) -> u64 { self.submits }
    #[inline] pub fn copies(&self) -> u64 { self.copies }
    #[inline] pub fn bytes_uploaded(&self) -> u64 { self.bytes }

    pub fn buffer_size(&self) -> u64 {
        (self.block_stride * self.blocks_per_buffer) as u64
    }

    /// Blocks that can be in flight across the whole ring.
    pub fn capacity_blocks(&self) -> usize {
        self.buffers * self.blocks_per_buffer
    }

    /// Stage one tightly packed block bound for the slot at `slot_grid`.
    ///
    /// Returns the uploads of the batch this push submitted, if any.
    pub fn push<C: GpuContext>(
        &mut self,
        ctx: &mut C,
        upload: StagedUpload,
        slot_grid: [u32; 3],
        data: &[u8],
    ) -> Vec<StagedUpload> {
        let rows = self.block[1] as usize * self.block[2] as usize;
        debug_assert_eq!(data.len(), rows * self.row_bytes);

        self.scratch.clear();
        self.scratch.resize(self.block_stride, 0);
        for row in 0..rows {
            let s0 = row * self.row_bytes;
            let d0 = row * self.padded_row;
            self.scratch[d0..d0 + self.row_bytes].copy_from_slice(&data[s0..s0 + self.row_bytes]);
        }

        let offset = (self.pending.len() * self.block_stride) as u64;
        ctx.write_staging(self.active, offset, &self.scratch);
        self.bytes += data.len() as u64;
        self.pending.push(Pending { upload, slot_grid, offset });

        if self.pending.len() == self.blocks_per_buffer {
            self.flush(ctx)
        } else {
            Vec::new()
        }
    }

    /// Submit whatever the active buffer holds and advance the ring.
    pub fn flush<C: GpuContext>(&mut self, ctx: &mut C) -> Vec<StagedUpload> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        for copy in self.merged_copies() {
            ctx.copy_staging_to_atlas(&copy);
            self.copies += 1;
        }
        ctx.submit();
        self.submits += 1;
        self.active = (self.active + 1) % self.buffers;
        self.pending.drain(..).map(|p| p.upload).collect()
    }

    /// Runs of blocks going to z-consecutive slots become one copy.
    fn merged_copies(&self) -> Vec<AtlasCopy> {
        let [w, h, d] = self.block;
        let mut out = Vec::new();
        let mut i = 0;
        while i < self.pending.len() {
            let start = &self.pending[i];
            let g = start.slot_grid;
            let mut n = 1;
            while let Some(next) = self.pending.get(i + n) {
                let ng = next.slot_grid;
                if ng[0] == g[0] && ng[1] == g[1] && ng[2] == g[2] + n as u32 {
                    n += 1;
                } else {
                    break;
                }
            }
            out.push(AtlasCopy {
                buffer: self.active,
                offset: start.offset,
                bytes_per_row: self.padded_row as u32,
                rows_per_image: h,
                origin: [g[0] * w, g[1] * h, g[2] * d],
                extent: [w, h, d * n as u32],
            });
            i += n;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PixelFormat;
    use crate::render::recording::RecordingContext;

    fn upload(slot: SlotId) -> StagedUpload {
        StagedUpload { slot, key: None, complete: true }
    }

    #[test]
    fn rows_are_padded_to_copy_alignment() {
        let ring = UploadRing::new([6, 6, 6], 2, 3, 4).unwrap();
        assert_eq!(ring.buffer_size(), (256 * 36 * 4) as u64);
        assert_eq!(ring.capacity_blocks(), 12);
        assert!(UploadRing::new([6, 6, 6], 2, 0, 4).is_err());
    }

    #[test]
    fn full_buffer_submits_and_advances() {
        let mut ctx = RecordingContext::new();
        ctx.create_atlas(PixelFormat::R8, [4, 4, 12]).unwrap();
        let mut ring = UploadRing::new([2, 2, 2], 1, 2, 2).unwrap();
        ctx.create_staging(ring.buffers(), ring.buffer_size()).unwrap();

        let data = [9u8; 8];
        assert!(ring.push(&mut ctx, upload(1), [0, 0, 1], &data).is_empty());
        let done = ring.push(&mut ctx, upload(2), [1, 0, 0], &data);
        assert_eq!(done.len(), 2);
        assert_eq!(ring.active(), 1);
        assert_eq!(ctx.submits(), 1);

        ring.push(&mut ctx, upload(3), [0, 1, 0], &data);
        let done = ring.flush(&mut ctx);
        assert_eq!(done, vec![upload(3)]);
        assert_eq!(ring.active(), 0);
        assert!(ring.flush(&mut ctx).is_empty());
        assert_eq!(ctx.submits(), 2);
        assert_eq!(ctx.atlas_bytes([0, 2, 0], [2, 2, 2]), vec![9u8; 8]);
    }

    #[test]
    fn z_adjacent_slots_merge_into_one_copy() {
        let mut ctx = RecordingContext::new();
        ctx.create_atlas(PixelFormat::R8, [2, 2, 8]).unwrap();
        let mut ring = UploadRing::new([2, 2, 2], 1, 1, 8).unwrap();
        ctx.create_staging(ring.buffers(), ring.buffer_size()).unwrap();

        for z in 1..4u32 {
            let data = [z as u8; 8];
            ring.push(&mut ctx, upload(z), [0, 0, z], &data);
        }
        ring.flush(&mut ctx);
        assert_eq!(ring.copies(), 1);
        for z in 1..4u32 {
            assert_eq!(ctx.atlas_bytes([0, 0, 2 * z], [2, 2, 2]), vec![z as u8; 8]);
        }
    }
}
