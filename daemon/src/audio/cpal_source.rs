//! Microphone capture through cpal
//!
//! The cpal callback runs on the audio backend's own thread. Its only work is
//! converting samples to 16 kHz mono i16, assembling `BLOCK_SIZE` chunks and
//! pushing them into the ingestion queue without blocking.
//!
//! `cpal::Stream` is not `Send` on every platform, so a `CpalCapture` must be
//! created on the thread that drives it.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    Device, FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
    StreamError, SupportedStreamConfig,
};
use tracing::{debug, info, warn};

use super::capture::{CaptureSource, DeviceError};
use super::chunk::{BlockAssembler, SAMPLE_RATE};
use super::queue::ChunkSink;

/// Capture from the default (or a named) input device
pub struct CpalCapture {
    device_name: Option<String>,
    stream: Option<Stream>,
}

impl CpalCapture {
    /// Create a capture source; the device is not touched until `open`
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            stream: None,
        }
    }

    fn find_device(&self) -> Result<Device, DeviceError> {
        let host = cpal::default_host();
        debug!(host = ?host.id(), "audio host");

        match &self.device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| DeviceError::Backend(e.to_string()))?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| DeviceError::DeviceNotFound(name.clone())),
            None => host.default_input_device().ok_or(DeviceError::NoDevice),
        }
    }
}

impl CaptureSource for CpalCapture {
    fn open(&mut self, sink: ChunkSink) -> Result<(), DeviceError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let device = self.find_device()?;
        let supported = choose_config(&device)?;
        let format = supported.sample_format();
        let source_rate = supported.sample_rate().0;
        let config: StreamConfig = supported.config();

        info!(
            device = device.name().unwrap_or_default(),
            sample_rate = source_rate,
            channels = config.channels,
            format = ?format,
            "opening input stream"
        );

        let stream = match format {
            SampleFormat::I16 => build_stream::<i16>(&device, &config, sink),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, sink),
            SampleFormat::I32 => build_stream::<i32>(&device, &config, sink),
            SampleFormat::F32 => build_stream::<f32>(&device, &config, sink),
            other => return Err(DeviceError::UnsupportedFormat(format!("{other:?}"))),
        }?;

        stream
            .play()
            .map_err(|e| DeviceError::Open(e.to_string()))?;

        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                debug!(error = %e, "pausing stream before close failed");
            }
            drop(stream);
            info!("input stream closed");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.close();
    }
}

/// Prefer a native 16 kHz config (mono first); otherwise use the device
/// default and resample in the callback
fn choose_config(device: &Device) -> Result<SupportedStreamConfig, DeviceError> {
    let target = SampleRate(SAMPLE_RATE);

    if let Ok(ranges) = device.supported_input_configs() {
        let mut native: Vec<_> = ranges
            .filter(|r| is_supported_format(r.sample_format()))
            .filter(|r| r.min_sample_rate() <= target && target <= r.max_sample_rate())
            .collect();
        native.sort_by_key(|r| r.channels());
        if let Some(range) = native.into_iter().next() {
            return Ok(range.with_sample_rate(target));
        }
    }

    device
        .default_input_config()
        .map_err(|e| DeviceError::UnsupportedFormat(e.to_string()))
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    sink: ChunkSink,
) -> Result<Stream, DeviceError>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    let mut resampler = Resampler::new(config.sample_rate.0, SAMPLE_RATE);
    let mut assembler = BlockAssembler::new();
    let mut mono: Vec<f32> = Vec::with_capacity(4096);
    let mut resampled: Vec<f32> = Vec::with_capacity(4096);
    let mut pcm: Vec<i16> = Vec::with_capacity(4096);

    let data_sink = sink.clone();
    let error_sink = sink;

    device
        .build_input_stream(
            config,
            move |data: &[T], _info: &cpal::InputCallbackInfo| {
                mono.clear();
                if channels == 1 {
                    mono.extend(data.iter().map(|&s| s.to_sample::<f32>()));
                } else {
                    for frame in data.chunks(channels) {
                        let sum: f32 = frame.iter().map(|&s| s.to_sample::<f32>()).sum();
                        mono.push(sum / frame.len() as f32);
                    }
                }

                let samples = if resampler.is_needed() {
                    resampler.process(&mono, &mut resampled);
                    &resampled
                } else {
                    &mono
                };

                pcm.clear();
                pcm.extend(samples.iter().map(|&s| to_i16(s)));
                assembler.push(&pcm, |chunk| {
                    data_sink.push(chunk);
                });
            },
            move |err: StreamError| match err {
                StreamError::DeviceNotAvailable => {
                    error_sink.report_fault(DeviceError::Disconnected(
                        "device is no longer available".to_string(),
                    ));
                }
                StreamError::BackendSpecific { err } => {
                    if is_xrun(&err.description) {
                        error_sink.note_glitch();
                    } else {
                        error_sink.report_fault(DeviceError::Backend(err.description));
                    }
                }
                #[allow(unreachable_patterns)]
                other => error_sink.report_fault(DeviceError::Backend(other.to_string())),
            },
            None,
        )
        .map_err(|e| {
            warn!(error = %e, "failed to build input stream");
            DeviceError::Open(e.to_string())
        })
}

fn is_supported_format(format: SampleFormat) -> bool {
    matches!(
        format,
        SampleFormat::I16 | SampleFormat::U16 | SampleFormat::I32 | SampleFormat::F32
    )
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

fn is_xrun(description: &str) -> bool {
    let lower = description.to_lowercase();
    lower.contains("xrun") || lower.contains("overrun") || lower.contains("underrun")
}

/// Linear-interpolating sample rate converter for mono f32 blocks
struct Resampler {
    ratio: f64,
    position: f64,
}

impl Resampler {
    fn new(source_rate: u32, target_rate: u32) -> Self {
        Self {
            ratio: source_rate as f64 / target_rate as f64,
            position: 0.0,
        }
    }

    fn is_needed(&self) -> bool {
        (self.ratio - 1.0).abs() > 0.001
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        out.clear();
        if input.is_empty() {
            return;
        }

        while (self.position as usize) < input.len() {
            let idx = self.position as usize;
            let frac = (self.position - idx as f64) as f32;
            let current = input[idx];
            let next = input.get(idx + 1).copied().unwrap_or(current);
            out.push(current + (next - current) * frac);
            self.position += self.ratio;
        }

        self.position -= input.len() as f64;
    }
}
