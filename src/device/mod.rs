//! Audio output
//!
//! [`OutputCallback`] is what runs on the device's real-time thread: it
//! drains the transport ring, fills any shortfall with silence, applies the
//! volume and feeds the analyzer. [`OutputDevice`] is the seam to the actual
//! hardware, implemented by [`CpalOutput`] behind the `cpal_sink` feature.

#[cfg(feature = "cpal_sink")]
mod cpal_sink;

#[cfg(feature = "cpal_sink")]
pub use cpal_sink::CpalOutput;

use std::sync::Arc;

use crate::error::StartError;
use crate::ring::TransportRing;
use crate::spectrum::SpectrumAnalyzer;
use crate::status::PlayerContext;
use crate::FRAME_BYTES;

/// A registered output stream. Released when dropped.
pub trait OutputDevice {
    /// Begin pulling audio through the callback.
    fn start(&mut self) -> Result<(), StartError>;

    /// Stop pulling audio. The device stays registered until dropped.
    fn stop(&mut self);
}

/// Volumes at or above this are treated as unity and skip scaling.
const UNITY_GAIN: f32 = 0.99;

/// The consumer side of the transport ring.
///
/// `render` never blocks or allocates; an empty ring is heard as silence.
pub struct OutputCallback {
    ring: Arc<TransportRing>,
    spectrum: Arc<SpectrumAnalyzer>,
    context: Arc<PlayerContext>,
}

impl OutputCallback {
    pub fn new(
        ring: Arc<TransportRing>,
        spectrum: Arc<SpectrumAnalyzer>,
        context: Arc<PlayerContext>,
    ) -> Self {
        Self {
            ring,
            spectrum,
            context,
        }
    }

    pub fn ring(&self) -> &Arc<TransportRing> {
        &self.ring
    }

    /// Fill `out` with interleaved stereo samples. Returns the number of
    /// samples that came from the ring; the rest are silence.
    pub fn render(&mut self, out: &mut [i16]) -> usize {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(out);
        // whole frames only, so a partial read never shifts the channels
        let wanted = bytes.len().min(self.ring.available_to_read());
        let wanted = wanted - wanted % FRAME_BYTES;
        let read = self.ring.read(&mut bytes[..wanted]);
        bytes[read..].fill(0);

        let samples = read / 2;
        if samples == 0 {
            return 0;
        }

        let gain = self.context.volume.get();
        if gain < UNITY_GAIN {
            for s in &mut out[..samples] {
                *s = (*s as f32 * gain) as i16;
            }
        }

        self.spectrum.push_samples(&out[..samples]);
        samples
    }
}
