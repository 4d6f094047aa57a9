mod demo;

use volume_block_cache::{
    BlockStreamer, CacheError, GpuContext, PixelFormat, RecordingContext, StreamConfig, WgpuContext,
};

use crate::demo::DemoVolume;

const FRAMES: usize = 24;
const VIEWPORT_WIDTH: u32 = 1280;
// level 0 chunks "decode" after this many frames
const DECODE_DELAY: usize = 3;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = pollster::block_on(run()) {
        log::error!("{e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CacheError> {
    let config = StreamConfig {
        atlas_budget_mb: 8,
        blocks_per_staging_buffer: 16,
        ..StreamConfig::default()
    };

    let scene = demo::noise_volume(0, [128, 128, 128], 3, 0x5eed)?;

    match WgpuContext::new_headless(PixelFormat::R16).await {
        Ok(mut ctx) => drive(&mut ctx, config, &scene),
        Err(e) => {
            log::warn!("{e}; streaming into a recording context instead");
            drive(&mut RecordingContext::new(), config, &scene)
        }
    }
}

fn drive<C: GpuContext>(ctx: &mut C, config: StreamConfig, scene: &DemoVolume) -> Result<(), CacheError> {
    let budget = config.frame_budget;
    let mut streamer = BlockStreamer::<u16>::new(config)?;
    let volumes = std::slice::from_ref(&scene.volume);

    scene.sources[0].set_all_available(false);

    for frame in 0..FRAMES {
        if frame == DECODE_DELAY {
            scene.sources[0].set_all_available(true);
        }

        let view = demo::orbit_view(frame, FRAMES, [128.0; 3], VIEWPORT_WIDTH);
        let complete = streamer.update(ctx, volumes, &view, budget)?;
        let _binding = streamer.bind_for_sampling(ctx)?;

        let s = streamer.stats();
        let base = streamer.volume_blocks(0).map(|v| v.base_level()).unwrap_or(0);
        log::info!(
            "frame {:>2}: complete={} base={} resident={}/{} loading={} requested={} lod_steps={} truncated={} \
             filled={} partial={} failed={} deferred={} evictions={} ({:.1} ms fill, {:.1} ms lut)",
            frame,
            complete,
            base,
            s.slots_resident,
            s.slots_total,
            s.slots_loading,
            s.tasks_requested,
            s.lod_steps,
            s.tasks_truncated,
            s.filled_complete,
            s.filled_partial,
            s.failed,
            s.deferred + s.deferred_by_cache,
            s.evictions,
            s.fill_ms,
            s.lut_ms,
        );
    }

    let w = streamer.timing.drain();
    log::info!(
        "{} frames ({} incomplete), {:.2} ms/frame avg, {:.2} max; {} blocks, {:.3} ms avg fill ({:.3} max)",
        w.frames,
        w.incomplete_frames,
        w.frame_ms_avg(),
        w.frame_ms_max,
        w.blocks_filled,
        w.block_fill_ms_avg(),
        w.block_fill_ms_max,
    );
    Ok(())
}
