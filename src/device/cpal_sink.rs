//! CPAL audio output
//!
//! Opens the default output device at the fixed stereo 44.1 kHz format. The
//! native sample format is preferred as `i16`; `f32` and `u16` devices are
//! fed through a scratch buffer allocated up front.
//!
//! `cpal::Stream` is not `Send`, so a `CpalOutput` has to be opened on the
//! thread that will own it. The session worker does exactly that.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, SupportedStreamConfigRange};
use tracing::{debug, warn};

use super::{OutputCallback, OutputDevice};
use crate::error::StartError;
use crate::{OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE};

/// Samples converted per pass for non-`i16` devices.
const SCRATCH_SAMPLES: usize = 4096;

pub struct CpalOutput {
    stream: cpal::Stream,
}

impl CpalOutput {
    /// Register an output stream on the default device, paused.
    pub fn open(callback: OutputCallback) -> Result<Self, StartError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(StartError::NoOutputDevice)?;

        let ranges: Vec<SupportedStreamConfigRange> = device
            .supported_output_configs()
            .map_err(|e| StartError::Device(Box::new(e)))?
            .filter(|c| {
                c.channels() as usize == OUTPUT_CHANNELS
                    && c.min_sample_rate().0 <= OUTPUT_SAMPLE_RATE
                    && c.max_sample_rate().0 >= OUTPUT_SAMPLE_RATE
            })
            .collect();

        let range = [SampleFormat::I16, SampleFormat::F32, SampleFormat::U16]
            .iter()
            .find_map(|format| ranges.iter().find(|c| c.sample_format() == *format))
            .ok_or(StartError::NoOutputDevice)?;

        let config = range.clone().with_sample_rate(SampleRate(OUTPUT_SAMPLE_RATE));
        let sample_format = config.sample_format();
        let stream_config = config.config();
        debug!(
            device = %device.name().unwrap_or_else(|_| "unknown".into()),
            ?sample_format,
            "opening output"
        );

        let stream = build_stream(&device, sample_format, &stream_config, callback)
            .map_err(|e| StartError::Device(Box::new(e)))?;

        // some hosts start streams as soon as they are built
        if let Err(e) = stream.pause() {
            debug!(error = %e, "cannot pause fresh output stream");
        }

        Ok(Self { stream })
    }
}

impl OutputDevice for CpalOutput {
    fn start(&mut self) -> Result<(), StartError> {
        self.stream
            .play()
            .map_err(|e| StartError::Device(Box::new(e)))
    }

    fn stop(&mut self) {
        if let Err(e) = self.stream.pause() {
            warn!(error = %e, "cannot pause output stream");
        }
    }
}

fn build_stream(
    device: &cpal::Device,
    sample_format: SampleFormat,
    stream_config: &cpal::StreamConfig,
    mut callback: OutputCallback,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    let on_error = |err: cpal::StreamError| warn!("CPAL stream error: {:?}", err);

    match sample_format {
        SampleFormat::I16 => device.build_output_stream(
            stream_config,
            move |data: &mut [i16], _| {
                callback.render(data);
            },
            on_error,
            None,
        ),
        SampleFormat::F32 => {
            let mut scratch = vec![0i16; SCRATCH_SAMPLES];
            device.build_output_stream(
                stream_config,
                move |data: &mut [f32], _| {
                    for chunk in data.chunks_mut(SCRATCH_SAMPLES) {
                        let scratch = &mut scratch[..chunk.len()];
                        callback.render(scratch);
                        for (out, s) in chunk.iter_mut().zip(scratch.iter()) {
                            *out = *s as f32 / 32768.0;
                        }
                    }
                },
                on_error,
                None,
            )
        }
        SampleFormat::U16 => {
            let mut scratch = vec![0i16; SCRATCH_SAMPLES];
            device.build_output_stream(
                stream_config,
                move |data: &mut [u16], _| {
                    for chunk in data.chunks_mut(SCRATCH_SAMPLES) {
                        let scratch = &mut scratch[..chunk.len()];
                        callback.render(scratch);
                        for (out, s) in chunk.iter_mut().zip(scratch.iter()) {
                            *out = (*s as i32 + 32768) as u16;
                        }
                    }
                },
                on_error,
                None,
            )
        }
        _ => Err(cpal::BuildStreamError::StreamConfigNotSupported),
    }
}
