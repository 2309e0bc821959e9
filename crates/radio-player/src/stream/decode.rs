//! Decode stage: Symphonia probe + a decoder thread feeding [`SharedAudio`].

use std::sync::Arc;
use std::thread;

use anyhow::{Result, anyhow};
use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::queue::{SharedAudio, capacity_for};

/// Decoded stream handed to the output stage.
pub struct DecodedStream {
    pub spec: SignalSpec,
    pub queue: Arc<SharedAudio>,
    pub codec: Option<&'static str>,
}

/// Probe `source` and start decoding it on a background thread.
///
/// The queue is closed when the source ends or fails, which the session treats
/// as the stream going away.
pub fn start_decode(
    source: Box<dyn MediaSource>,
    ext_hint: Option<&str>,
    buffer_seconds: f32,
) -> Result<DecodedStream> {
    let mut hint = Hint::new();
    if let Some(ext) = ext_hint {
        hint.with_extension(ext);
    }
    let mss = MediaSourceStream::new(source, Default::default());
    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("stream has no audio track"))?;
    let params = track.codec_params.clone();
    let spec = signal_spec(&params)?;
    let codec = codec_label(&params);

    let channels = spec.channels.count();
    let queue = Arc::new(SharedAudio::new(
        channels,
        capacity_for(spec.rate, channels, buffer_seconds),
    ));

    let queue_thread = queue.clone();
    thread::spawn(move || {
        if let Err(e) = decode_loop(format, &params, &queue_thread) {
            tracing::warn!("decoder stopped: {e:#}");
        }
        queue_thread.close();
    });

    Ok(DecodedStream { spec, queue, codec })
}

fn signal_spec(params: &CodecParameters) -> Result<SignalSpec> {
    let rate = params
        .sample_rate
        .ok_or_else(|| anyhow!("unknown sample rate"))?;
    let channels = params
        .channels
        .ok_or_else(|| anyhow!("unknown channel layout"))?;
    Ok(SignalSpec::new(rate, channels))
}

fn decode_loop(
    mut format: Box<dyn FormatReader>,
    params: &CodecParameters,
    queue: &SharedAudio,
) -> Result<()> {
    let mut decoder = symphonia::default::get_codecs().make(params, &DecoderOptions::default())?;
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!("skipping corrupt packet: {e}");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
        sample_buf.copy_interleaved_ref(decoded);
        if !queue.push_blocking(sample_buf.samples()) {
            return Ok(());
        }
    }
}

fn codec_label(params: &CodecParameters) -> Option<&'static str> {
    use symphonia::core::codecs::*;
    match params.codec {
        CODEC_TYPE_MP3 => Some("MP3"),
        CODEC_TYPE_AAC => Some("AAC"),
        CODEC_TYPE_VORBIS => Some("VORBIS"),
        CODEC_TYPE_FLAC => Some("FLAC"),
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => Some("PCM_S16"),
        _ => None,
    }
}
