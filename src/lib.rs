//! Funkwelle - real-time web radio playback
//!
//! Three threads cooperate:
//! - a session worker that downloads, decodes and resamples one station into
//!   a lock-free [`TransportRing`]
//! - the audio device's callback, which drains the ring, applies the volume
//!   and feeds the [`SpectrumAnalyzer`]
//! - the caller's polling loop, which drains the [`PlayerContext`] mailboxes,
//!   ticks the analyzer and issues play/stop/volume intents
//!
//! The callback never blocks, allocates or does I/O. When the ring runs dry
//! it plays silence.
//!
//! Output is always interleaved stereo `i16` at 44.1 kHz.

pub mod config;
pub mod device;
pub mod error;
pub mod lookup;
pub mod player;
pub mod resample;
pub mod ring;
pub mod session;
pub mod spectrum;
pub mod status;
pub mod stream;
pub mod tags;

pub use config::{load_stations, PlayerConfig, Station};
pub use device::{OutputCallback, OutputDevice};
pub use error::{ConfigError, PlayError, StartError, StreamError};
pub use lookup::{TrackInfo, TrackLookup};
pub use player::PlaybackController;
pub use ring::TransportRing;
pub use session::{Backend, SessionEnd, StreamSession};
pub use spectrum::{SpectrumAnalyzer, SpectrumConfig, NUM_BARS};
pub use status::{PlayerContext, SessionState};
pub use stream::{PacketStream, PcmBlock, StreamFormat};

#[cfg(feature = "cpal_sink")]
pub use device::CpalOutput;
#[cfg(feature = "cpal_sink")]
pub use player::SystemBackend;

pub const OUTPUT_SAMPLE_RATE: u32 = 44_100;
pub const OUTPUT_CHANNELS: usize = 2;
/// Bytes per interleaved stereo `i16` frame
pub const FRAME_BYTES: usize = OUTPUT_CHANNELS * 2;
