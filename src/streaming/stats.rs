// src/streaming/stats.rs

/// Snapshot of the last `update`.
#[derive(Clone, Copy, Debug, Default)]
pub struct StreamStats {
    pub frame: u64,
    pub volumes: u32,
    pub complete: bool,

    pub slots_total: u32,
    pub slots_resident: u32,
    pub slots_loading: u32,
    pub evictions: u64,

    pub tasks_requested: u32,
    pub tasks_truncated: u32,
    pub lod_steps: u32,

    pub staged_fills: u32,
    pub skipped_resident: u32,
    pub deferred_by_cache: u32,

    pub filled_complete: u32,
    pub filled_partial: u32,
    pub failed: u32,
    pub deferred: u32,
    pub marked_loaded: u32,

    pub upload_submits: u64,
    pub upload_bytes: u64,

    pub plan_ms: f64,
    pub fill_ms: f64,
    pub lut_ms: f64,
}

/// Accumulates per-frame timings between two `drain` calls.
#[derive(Clone, Debug, Default)]
pub struct StreamTimingWindow {
    pub frames: u32,
    pub incomplete_frames: u32,

    pub blocks_filled: u32,
    pub block_fill_ms_sum: f64,
    pub block_fill_ms_max: f64,

    pub frame_ms_sum: f64,
    pub frame_ms_max: f64,
}

impl StreamTimingWindow {
    #[inline]
    pub fn record_block(&mut self, fill_ms: f64) {
        self.blocks_filled += 1;
        self.block_fill_ms_sum += fill_ms;
        self.block_fill_ms_max = self.block_fill_ms_max.max(fill_ms);
    }

    #[inline]
    pub fn record_frame(&mut self, frame_ms: f64, complete: bool) {
        self.frames += 1;
        if !complete {
            self.incomplete_frames += 1;
        }
        self.frame_ms_sum += frame_ms;
        self.frame_ms_max = self.frame_ms_max.max(frame_ms);
    }

    pub fn block_fill_ms_avg(&self) -> f64 {
        if self.blocks_filled == 0 { 0.0 } else { self.block_fill_ms_sum / self.blocks_filled as f64 }
    }

    pub fn frame_ms_avg(&self) -> f64 {
        if self.frames == 0 { 0.0 } else { self.frame_ms_sum / self.frames as f64 }
    }

    pub fn drain(&mut self) -> Self {
        std::mem::take(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_resets_window() {
        let mut w = StreamTimingWindow::default();
        w.record_block(2.0);
        w.record_block(4.0);
        w.record_frame(10.0, false);
        let d = w.drain();
        assert_eq!(d.block_fill_ms_avg(), 3.0);
        assert_eq!(d.block_fill_ms_max, 4.0);
        assert_eq!(d.incomplete_frames, 1);
        assert_eq!(w.frames, 0);
        assert_eq!(w.frame_ms_avg(), 0.0);
    }
}
