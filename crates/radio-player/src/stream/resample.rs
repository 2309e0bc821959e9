//! Sample-rate conversion stage (Rubato sinc resampler on its own thread).

use std::sync::Arc;
use std::thread;

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use super::queue::{PopStrategy, SharedAudio, capacity_for};

const SINC_LEN: usize = 128;

/// Resample `src` from `src_rate` to `dst_rate` into a new queue. The output
/// queue closes once `src` is closed and drained.
pub fn start_resampler(
    src: Arc<SharedAudio>,
    src_rate: u32,
    dst_rate: u32,
    chunk_frames: usize,
    buffer_seconds: f32,
) -> Result<Arc<SharedAudio>> {
    if src_rate == 0 || dst_rate == 0 {
        return Err(anyhow!("invalid resample rates {src_rate} -> {dst_rate}"));
    }
    let channels = src.channels();
    let chunk = chunk_frames.max(1);
    let dst = Arc::new(SharedAudio::new(
        channels,
        capacity_for(dst_rate, channels, buffer_seconds),
    ));

    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: calculate_cutoff(SINC_LEN, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window,
    };
    let ratio = dst_rate as f64 / src_rate as f64;

    let dst_thread = dst.clone();
    thread::spawn(move || {
        let mut resampler =
            match Async::<f32>::new_sinc(ratio, 1.1, &params, chunk, channels, FixedAsync::Input) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("resampler init failed: {e}");
                    dst_thread.close();
                    return;
                }
            };
        let mut out = vec![0.0f32; channels * chunk * 3];
        let mut partial = false;
        loop {
            let block = if partial {
                src.pop(PopStrategy::BlockingUpTo { max_frames: chunk })
            } else {
                src.pop(PopStrategy::BlockingExact { frames: chunk })
            };
            let block = match block {
                Some(b) => b,
                None if !partial => {
                    partial = true;
                    continue;
                }
                None => break,
            };
            let frames = block.len() / channels;
            let produced = match process_block(
                &mut resampler,
                &block,
                &mut out,
                channels,
                frames,
                partial,
            ) {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!("resampler stopped: {e:#}");
                    break;
                }
            };
            if produced > 0 && !dst_thread.push_blocking(&out[..produced * channels]) {
                break;
            }
        }
        dst_thread.close();
    });

    Ok(dst)
}

fn process_block(
    resampler: &mut Async<f32>,
    block: &[f32],
    out: &mut [f32],
    channels: usize,
    frames: usize,
    partial: bool,
) -> Result<usize> {
    let input = InterleavedSlice::new(block, channels, frames)
        .map_err(|e| anyhow!("input adapter: {e}"))?;
    let out_frames = out.len() / channels;
    let mut output = InterleavedSlice::new_mut(out, channels, out_frames)
        .map_err(|e| anyhow!("output adapter: {e}"))?;
    let indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len: partial.then_some(frames),
    };
    let (_consumed, produced) = resampler
        .process_into_buffer(&input, &mut output, Some(&indexing))
        .map_err(|e| anyhow!("process: {e}"))?;
    Ok(produced)
}
