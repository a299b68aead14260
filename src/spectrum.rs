//! Spectrum analyzer for the bar visualization
//!
//! The output callback pushes post-volume stereo frames with
//! [`SpectrumAnalyzer::push_samples`]. The polling loop calls
//! [`SpectrumAnalyzer::process_samples`] about thirty times a second, and
//! whoever draws reads the latest bars with [`SpectrumAnalyzer::get_spectrum`].
//!
//! Each analysis tick takes the freshest window of mono samples, applies a
//! Hann window and runs a forward FFT planned once up front.
//! Bins are then folded into [`NUM_BARS`] octave-spaced bars. Every bar is
//! normalized against its own slowly decaying peak and smoothed with a fast
//! attack and a gravity-style fall.
//!
//! # Example
//!
//! ```
//! use funkwelle::spectrum::{SpectrumAnalyzer, SpectrumConfig};
//!
//! let analyzer = SpectrumAnalyzer::new(SpectrumConfig::default());
//! analyzer.push_samples(&[0i16; 4096 * 2]);
//! analyzer.process_samples();
//!
//! let (bars, updated) = analyzer.get_spectrum();
//! assert!(updated);
//! assert!(bars.iter().all(|b| *b < 0.1));
//! ```

use core::f32::consts::PI;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

pub const NUM_BARS: usize = 16;

/// Bar boundaries in Hz; bar `i` covers `[edges[i], edges[i + 1])`.
pub const DEFAULT_BAR_EDGES: [f32; NUM_BARS + 1] = [
    30.0, 60.0, 90.0, 120.0, 160.0, 200.0, 250.0, 315.0, 400.0, 500.0, 630.0, 800.0, 1000.0,
    1600.0, 2500.0, 4000.0, 10000.0,
];

/// Tuning for the analyzer. All of these are visual constants.
#[derive(Clone, Debug)]
pub struct SpectrumConfig {
    /// Samples per analysis window (power of two)
    pub window_size: usize,
    pub sample_rate: u32,
    /// Minimum time between two analysis ticks
    pub update_interval: Duration,
    pub bar_edges: [f32; NUM_BARS + 1],
    pub max_bins_per_bar: usize,
    /// Multiplier applied to every bar's running peak once per tick
    pub autogain_decay: f32,
    /// Floor for the running peak
    pub min_peak: f32,
    /// Exponent applied after normalization, below 1 lifts quiet bars
    pub gamma: f32,
    /// Fraction of the gap kept per tick while rising
    pub attack: f32,
    /// Fraction of the gap kept per tick while falling
    pub decay: f32,
    pub gravity_base: f32,
    pub gravity_slope: f32,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            window_size: 2048,
            sample_rate: crate::OUTPUT_SAMPLE_RATE,
            update_interval: Duration::from_millis(33),
            bar_edges: DEFAULT_BAR_EDGES,
            max_bins_per_bar: 60,
            autogain_decay: 0.995,
            min_peak: 0.02,
            gamma: 0.7,
            attack: 0.60,
            decay: 0.85,
            gravity_base: 0.01,
            gravity_slope: 0.04,
        }
    }
}

impl SpectrumConfig {
    /// Inclusive-exclusive DFT bin range for every bar.
    pub fn bar_bins(&self) -> [(usize, usize); NUM_BARS] {
        let n = self.window_size;
        let bin_hz = self.sample_rate as f32 / n as f32;
        let nyquist = n / 2;

        let mut ranges = [(0, 0); NUM_BARS];
        for (bar, range) in ranges.iter_mut().enumerate() {
            let low = self.bar_edges[bar];
            let high = self.bar_edges[bar + 1];

            let start = ((low / bin_hz) as usize).max(1);
            let end = ((high / bin_hz) as usize)
                .max(start + 1)
                .min(start + self.max_bins_per_bar)
                .min(nyquist);

            *range = (start.min(end), end);
        }
        ranges
    }
}

/// Mono history, four windows long, overwriting the oldest samples.
struct SampleRing {
    data: Vec<f32>,
    write: usize,
    filled: usize,
    /// Samples pushed since the last analysis took a window
    fresh: usize,
}

impl SampleRing {
    fn new(len: usize) -> Self {
        Self {
            data: vec![0.0; len],
            write: 0,
            filled: 0,
            fresh: 0,
        }
    }

    #[inline]
    fn push(&mut self, sample: f32) {
        self.data[self.write] = sample;
        self.write = (self.write + 1) % self.data.len();
        self.filled = (self.filled + 1).min(self.data.len());
        self.fresh = (self.fresh + 1).min(self.data.len());
    }

    /// Copy the newest `out.len()` samples, oldest first.
    fn copy_latest(&mut self, out: &mut [f32]) {
        let len = self.data.len();
        let start = (self.write + len - out.len()) % len;
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.data[(start + i) % len];
        }
        self.fresh = 0;
    }
}

struct Analysis {
    hann: Vec<f32>,
    frame: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
    bins: [(usize, usize); NUM_BARS],
    /// Bars of the last tick before autogain
    raw: [f32; NUM_BARS],
    peaks: [f32; NUM_BARS],
    smoothed: [f32; NUM_BARS],
    last_run: Option<Instant>,
}

impl Analysis {
    fn new(config: &SpectrumConfig) -> Self {
        let n = config.window_size;
        let bins = config.bar_bins();
        let max_bin = bins.iter().map(|&(_, end)| end).max().unwrap_or(1);

        // periodic Hann, so bin-centered tones leak into their two neighbours only
        let hann = (0..n)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n as f32).cos()))
            .collect();
        let fft = FftPlanner::<f32>::new().plan_fft_forward(n);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];

        Self {
            hann,
            frame: vec![0.0; n],
            fft,
            spectrum: vec![Complex::default(); n],
            scratch,
            magnitudes: vec![0.0; max_bin],
            bins,
            raw: [0.0; NUM_BARS],
            peaks: [0.0; NUM_BARS],
            smoothed: [0.0; NUM_BARS],
            last_run: None,
        }
    }

    /// Magnitude of every bin the bars use, scaled by 1/N.
    fn transform(&mut self) {
        let n = self.frame.len() as f32;

        for ((c, x), w) in self.spectrum.iter_mut().zip(&self.frame).zip(&self.hann) {
            *c = Complex::new(x * w, 0.0);
        }
        self.fft.process_with_scratch(&mut self.spectrum, &mut self.scratch);

        for (mag, c) in self.magnitudes.iter_mut().zip(&self.spectrum).skip(1) {
            *mag = c.norm() / n;
        }
    }

    fn raw_bars(&self) -> [f32; NUM_BARS] {
        let mut raw = [0.0; NUM_BARS];
        for (bar, &(start, end)) in self.bins.iter().enumerate() {
            if end <= start {
                continue;
            }
            let sum: f32 = self.magnitudes[start..end].iter().sum();
            raw[bar] = (sum / (end - start) as f32).sqrt() * 2.0;
        }
        raw
    }

    /// Autogain and smoothing for one tick.
    fn update_bars(&mut self, raw: &[f32; NUM_BARS], config: &SpectrumConfig) -> [f32; NUM_BARS] {
        for bar in 0..NUM_BARS {
            let mut peak = self.peaks[bar] * config.autogain_decay;
            if raw[bar] > peak {
                peak = raw[bar];
            }
            peak = peak.max(config.min_peak);
            self.peaks[bar] = peak;

            let target = (raw[bar] / peak).powf(config.gamma).clamp(0.0, 1.0);
            let current = self.smoothed[bar];
            let diff = target - current;

            self.smoothed[bar] = if diff > 0.0 {
                current + diff * (1.0 - config.attack)
            } else {
                let gravity = config.gravity_base + config.gravity_slope * current;
                let fall = (-diff * (1.0 - config.decay)).max(gravity);
                (current - fall).max(0.0)
            };
        }
        self.smoothed
    }
}

struct Snapshot {
    bars: [f32; NUM_BARS],
    updated: bool,
}

/// Shared between the output callback, the polling loop and the renderer.
///
/// Its internal ring and running peaks survive across stations so the bars
/// glide from one stream into the next instead of resetting.
pub struct SpectrumAnalyzer {
    config: SpectrumConfig,
    samples: Mutex<SampleRing>,
    analysis: Mutex<Analysis>,
    published: Mutex<Snapshot>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SpectrumAnalyzer {
    pub fn new(config: SpectrumConfig) -> Self {
        assert!(
            config.window_size.is_power_of_two(),
            "spectrum window must be a power of two"
        );

        Self {
            samples: Mutex::new(SampleRing::new(config.window_size * 4)),
            analysis: Mutex::new(Analysis::new(&config)),
            published: Mutex::new(Snapshot {
                bars: [0.0; NUM_BARS],
                updated: false,
            }),
            config,
        }
    }

    pub fn config(&self) -> &SpectrumConfig {
        &self.config
    }

    /// Append interleaved stereo frames, downmixed to mono.
    ///
    /// Safe to call from the output callback: it never waits. If the polling
    /// thread is copying a window at that moment the block is skipped.
    pub fn push_samples(&self, frames: &[i16]) {
        let mut ring = match self.samples.try_lock() {
            Ok(ring) => ring,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return,
        };

        for frame in frames.chunks_exact(2) {
            let mono = (frame[0] as f32 + frame[1] as f32) * 0.5 / 32768.0;
            ring.push(mono);
        }
    }

    /// Run one analysis tick if it is due. Returns whether new bars were published.
    pub fn process_samples(&self) -> bool {
        self.process_samples_at(Instant::now())
    }

    /// Like [`process_samples`](Self::process_samples) with an explicit clock.
    pub fn process_samples_at(&self, now: Instant) -> bool {
        let mut analysis = lock(&self.analysis);

        if let Some(last) = analysis.last_run {
            if now.saturating_duration_since(last) < self.config.update_interval {
                return false;
            }
        }

        {
            let window = self.config.window_size;
            let mut ring = lock(&self.samples);
            if ring.filled < window || ring.fresh < window / 2 {
                return false;
            }
            ring.copy_latest(&mut analysis.frame);
        }

        analysis.last_run = Some(now);
        analysis.transform();
        let raw = analysis.raw_bars();
        analysis.raw = raw;
        let bars = analysis.update_bars(&raw, &self.config);
        drop(analysis);

        let mut published = lock(&self.published);
        published.bars = bars;
        published.updated = true;
        true
    }

    /// Latest bars in [0, 1] and whether they changed since the previous call.
    pub fn get_spectrum(&self) -> ([f32; NUM_BARS], bool) {
        let mut published = lock(&self.published);
        let updated = core::mem::replace(&mut published.updated, false);
        (published.bars, updated)
    }

    #[cfg(test)]
    pub(crate) fn raw_bars(&self) -> [f32; NUM_BARS] {
        lock(&self.analysis).raw
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new(SpectrumConfig::default())
    }
}
