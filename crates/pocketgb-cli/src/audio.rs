use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{info, warn};
use pocketgb_core::GameBoy;
use pocketgb_core::audio_queue::AudioConsumer;

/// Start playback of the APU output on the default device.
///
/// Audio is best-effort: every failure is logged and `None` is returned so
/// emulation carries on silently.
pub fn start_stream(gb: &mut GameBoy, requested_rate: Option<u32>) -> Option<cpal::Stream> {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        warn!("No audio output device; audio disabled");
        return None;
    };
    let supported = match device.default_output_config() {
        Ok(c) => c,
        Err(e) => {
            warn!("No supported output config: {e}; audio disabled");
            return None;
        }
    };
    let sample_format = supported.sample_format();
    let mut config: cpal::StreamConfig = supported.into();
    if let Some(rate) = requested_rate {
        config.sample_rate = cpal::SampleRate(rate);
    }
    let channels = config.channels as usize;
    let queue = gb.enable_audio(config.sample_rate.0);
    let err_fn = |err| warn!("cpal stream error: {err}");

    let stream = match sample_format {
        cpal::SampleFormat::I16 => device.build_output_stream(
            &config,
            move |data: &mut [i16], _| fill(data, channels, &queue, |s| s),
            err_fn,
            None,
        ),
        cpal::SampleFormat::U16 => device.build_output_stream(
            &config,
            move |data: &mut [u16], _| fill(data, channels, &queue, |s| (s as i32 + 32768) as u16),
            err_fn,
            None,
        ),
        cpal::SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _| fill(data, channels, &queue, |s| s as f32 / 32768.0),
            err_fn,
            None,
        ),
        other => {
            warn!("Unsupported sample format {other:?}; audio disabled");
            return None;
        }
    };

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            warn!("Failed to build audio stream: {e}; audio disabled");
            return None;
        }
    };
    if let Err(e) = stream.play() {
        warn!("Failed to start audio stream: {e}; audio disabled");
        return None;
    }
    info!("Audio output at {} Hz", config.sample_rate.0);
    Some(stream)
}

fn fill<T: Copy>(data: &mut [T], channels: usize, queue: &AudioConsumer, convert: impl Fn(i16) -> T) {
    for frame in data.chunks_mut(channels) {
        let (left, right) = queue.pop_stereo().unwrap_or((0, 0));
        frame[0] = convert(left);
        if channels > 1 {
            frame[1] = convert(right);
        }
    }
}
