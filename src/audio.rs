//! Audio device plumbing: 16 kHz mono microphone capture for the listener and
//! a mono sample-source output stream for the siren.

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use ringbuf::{traits::*, HeapRb};
use tracing::{debug, warn};

pub const CAPTURE_RATE: u32 = 16000;

/// Linear-interpolation resampler from the device rate to [`CAPTURE_RATE`].
struct Resampler {
    step: f64,
    pos: f64,
}

impl Resampler {
    fn new(source_rate: u32, target_rate: u32) -> Self {
        Self {
            step: source_rate as f64 / target_rate as f64,
            pos: 0.0,
        }
    }

    fn is_identity(&self) -> bool {
        (self.step - 1.0).abs() <= 0.001
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        out.clear();
        if input.is_empty() {
            return;
        }
        while (self.pos as usize) < input.len() {
            let idx = self.pos as usize;
            let frac = (self.pos - idx as f64) as f32;
            let current = input[idx];
            let next = input.get(idx + 1).copied().unwrap_or(current);
            out.push(current + (next - current) * frac);
            self.pos += self.step;
        }
        self.pos -= input.len() as f64;
    }
}

/// Live microphone capture. Samples are 16 kHz mono f32.
/// The stream stops when this is dropped.
pub struct InputCapture {
    _stream: Stream,
    consumer: ringbuf::HeapCons<f32>,
}

impl InputCapture {
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .context("No input device available. Check microphone permissions.")?;
        let supported = device
            .default_input_config()
            .context("Failed to get default input config")?;

        let format = supported.sample_format();
        let rate = supported.sample_rate();
        let channels = supported.channels();
        debug!(rate, channels, ?format, "opening microphone");

        let config: StreamConfig = supported.into();

        // Five seconds of headroom.
        let rb = HeapRb::<f32>::new(CAPTURE_RATE as usize * 5);
        let (producer, consumer) = rb.split();

        let stream = match format {
            SampleFormat::F32 => build_input::<f32>(&device, &config, rate, channels, producer, |s| s),
            SampleFormat::I16 => build_input::<i16>(&device, &config, rate, channels, producer, |s| {
                s as f32 / 32768.0
            }),
            SampleFormat::U16 => build_input::<u16>(&device, &config, rate, channels, producer, |s| {
                (s as f32 / 32768.0) - 1.0
            }),
            other => anyhow::bail!("Unsupported input sample format: {:?}", other),
        }?;
        stream.play().context("Failed to start input stream")?;

        Ok(Self {
            _stream: stream,
            consumer,
        })
    }

    /// Fill `window` if enough samples are buffered. Returns false otherwise.
    pub fn read_window(&mut self, window: &mut [f32]) -> bool {
        if self.consumer.occupied_len() < window.len() {
            return false;
        }
        self.consumer.pop_slice(window);
        true
    }

    /// Drop anything captured so far (e.g. our own speech tail).
    pub fn discard_buffered(&mut self) {
        self.consumer.clear();
    }
}

fn build_input<T: cpal::SizedSample + Send + 'static>(
    device: &cpal::Device,
    config: &StreamConfig,
    rate: u32,
    channels: u16,
    mut producer: ringbuf::HeapProd<f32>,
    to_f32: fn(T) -> f32,
) -> Result<Stream> {
    let mut mono: Vec<f32> = Vec::with_capacity(4096);
    let mut resampled: Vec<f32> = Vec::with_capacity(4096);
    let mut resampler = Resampler::new(rate, CAPTURE_RATE);
    let passthrough = resampler.is_identity();
    let ch = channels.max(1) as usize;

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _info: &cpal::InputCallbackInfo| {
            mono.clear();
            for frame in data.chunks(ch) {
                let sum: f32 = frame.iter().map(|&s| to_f32(s)).sum();
                mono.push(sum / ch as f32);
            }
            let samples = if passthrough {
                &mono
            } else {
                resampler.process(&mono, &mut resampled);
                &resampled
            };
            // Overflow drops samples; nothing useful to do from the callback.
            let _ = producer.push_slice(samples);
        },
        |err| warn!("input stream error: {}", err),
        None,
    )?;
    Ok(stream)
}

/// Open the default output device and play mono samples pulled from the
/// source built by `make_source` (which receives the device sample rate).
pub fn build_output_stream<F, S>(make_source: F) -> Result<Stream>
where
    F: FnOnce(u32) -> S,
    S: FnMut() -> f32 + Send + 'static,
{
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .context("No output device available")?;
    let supported = device
        .default_output_config()
        .context("Failed to get default output config")?;

    let format = supported.sample_format();
    let rate = supported.sample_rate();
    let channels = supported.channels();
    let config: StreamConfig = supported.into();
    let source = make_source(rate);

    let stream = match format {
        SampleFormat::F32 => build_output::<f32, S>(&device, &config, channels, source, |s| s),
        SampleFormat::I16 => build_output::<i16, S>(&device, &config, channels, source, |s| {
            (s * i16::MAX as f32) as i16
        }),
        SampleFormat::U16 => build_output::<u16, S>(&device, &config, channels, source, |s| {
            ((s + 1.0) * 0.5 * u16::MAX as f32) as u16
        }),
        other => anyhow::bail!("Unsupported output sample format: {:?}", other),
    }?;
    stream.play().context("Failed to start output stream")?;
    Ok(stream)
}

fn build_output<T, S>(
    device: &cpal::Device,
    config: &StreamConfig,
    channels: u16,
    mut source: S,
    from_f32: fn(f32) -> T,
) -> Result<Stream>
where
    T: cpal::SizedSample + Send + 'static,
    S: FnMut() -> f32 + Send + 'static,
{
    let ch = channels.max(1) as usize;
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
            for frame in data.chunks_mut(ch) {
                let value = from_f32(source().clamp(-1.0, 1.0));
                for out in frame.iter_mut() {
                    *out = value;
                }
            }
        },
        |err| warn!("output stream error: {}", err),
        None,
    )?;
    Ok(stream)
}

/// Root-mean-square level of a window.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downsamples_by_ratio() {
        let mut r = Resampler::new(48000, 16000);
        let input: Vec<f32> = (0..480).map(|i| i as f32).collect();
        let mut out = Vec::new();
        r.process(&input, &mut out);
        assert_eq!(out.len(), 160);
        assert_eq!(out[1], 3.0);
    }

    #[test]
    fn identity_rate_is_detected() {
        assert!(Resampler::new(16000, 16000).is_identity());
        assert!(!Resampler::new(44100, 16000).is_identity());
    }

    #[test]
    fn rms_levels() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
    }
}
