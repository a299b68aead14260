//! Conversion of decoded blocks to the fixed output format
//!
//! Whatever the decoder hands out is turned into interleaved stereo `i16` at
//! 44.1 kHz. Mono is duplicated to both channels and anything wider than
//! stereo keeps its first two channels. Rate conversion uses linear
//! interpolation, which is plenty for radio streams that are already lossy.

use crate::error::StartError;
use crate::stream::PcmBlock;
use crate::{OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE};

pub struct Resampler {
    input_rate: u32,
    channels: usize,
    /// input frames advanced per output frame, e.g. 48000/44100 ≈ 1.088
    rate_ratio: f64,

    /// Fractional position between `prev` and `curr`
    position: f64,
    prev: [f32; OUTPUT_CHANNELS],
    curr: [f32; OUTPUT_CHANNELS],
    primed: bool,

    output: Vec<i16>,
}

impl Resampler {
    pub fn new(input_rate: u32, channels: usize) -> Result<Self, StartError> {
        if input_rate == 0 || channels == 0 {
            return Err(StartError::Resampler {
                rate: input_rate,
                channels,
            });
        }

        Ok(Self {
            input_rate,
            channels,
            rate_ratio: input_rate as f64 / OUTPUT_SAMPLE_RATE as f64,
            position: 0.0,
            prev: [0.0; OUTPUT_CHANNELS],
            curr: [0.0; OUTPUT_CHANNELS],
            primed: false,
            output: Vec::with_capacity(8192),
        })
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    #[inline]
    pub fn is_passthrough(&self) -> bool {
        self.input_rate == OUTPUT_SAMPLE_RATE
    }

    /// Convert one block. The returned slice is valid until the next call.
    ///
    /// A block whose rate or channel count differs from the current setup
    /// reconfigures the resampler first; interpolation restarts from that
    /// block. Blocks with a zero rate or no channels produce nothing.
    pub fn process(&mut self, block: &PcmBlock) -> &[i16] {
        self.output.clear();

        if block.sample_rate == 0 || block.channels == 0 {
            return &self.output;
        }
        if block.sample_rate != self.input_rate || block.channels != self.channels {
            self.reconfigure(block.sample_rate, block.channels);
        }

        let channels = self.channels;
        if self.is_passthrough() {
            for frame in block.samples.chunks_exact(channels) {
                let (l, r) = stereo(frame);
                self.output.push(to_i16(l));
                self.output.push(to_i16(r));
            }
            return &self.output;
        }

        for frame in block.samples.chunks_exact(channels) {
            let (l, r) = stereo(frame);
            self.prev = self.curr;
            self.curr = [l, r];

            if !self.primed {
                self.primed = true;
                continue;
            }

            while self.position < 1.0 {
                let t = self.position as f32;
                for ch in 0..OUTPUT_CHANNELS {
                    let prev = self.prev[ch];
                    let curr = self.curr[ch];
                    self.output.push(to_i16(prev + t * (curr - prev)));
                }
                self.position += self.rate_ratio;
            }
            self.position -= 1.0;
        }

        &self.output
    }

    fn reconfigure(&mut self, input_rate: u32, channels: usize) {
        tracing::debug!(input_rate, channels, "resampler reconfigured");
        self.input_rate = input_rate;
        self.channels = channels;
        self.rate_ratio = input_rate as f64 / OUTPUT_SAMPLE_RATE as f64;
        self.position = 0.0;
        self.primed = false;
    }
}

#[inline]
fn stereo(frame: &[f32]) -> (f32, f32) {
    match frame {
        [mono] => (*mono, *mono),
        [l, r, ..] => (*l, *r),
        [] => (0.0, 0.0),
    }
}

#[inline]
fn to_i16(s: f32) -> i16 {
    (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}
