//! Compressed input streams
//!
//! A [`PacketStream`] is one opened radio stream: it pulls a packet from the
//! network, decodes it into a [`PcmBlock`] and keeps the metadata seen so far.
//! The session drives it and never looks at the codec directly.

mod http;
mod icy;

pub use http::{HttpOpener, SymphoniaStream};
pub use icy::{IcyMetadata, IcyReader};

use crate::error::StreamError;
use crate::tags::Tags;

/// Decoded interleaved samples in the stream's native format.
#[derive(Clone, Debug, Default)]
pub struct PcmBlock {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
}

impl PcmBlock {
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    /// Short codec name, e.g. `"mp3"`
    pub codec: String,
    pub bitrate_kbps: Option<u32>,
    pub sample_rate: u32,
    pub channels: usize,
}

impl StreamFormat {
    /// Codec name with a capital first letter plus the nominal bitrate, e.g. `"Mp3 128kbps"`.
    pub fn describe(&self) -> String {
        let mut chars = self.codec.chars();
        let mut name: String = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::from("Unknown"),
        };
        if let Some(kbps) = self.bitrate_kbps.filter(|k| *k > 0) {
            name.push_str(&format!(" {}kbps", kbps));
        }
        name
    }
}

/// An opened, decodable stream.
pub trait PacketStream {
    fn format(&self) -> StreamFormat;

    /// Read and decode the next packet into `pcm`.
    ///
    /// Returns the packet's compressed size, or `None` at the end of the
    /// stream. A packet that fails to decode leaves `pcm` empty and still
    /// counts as read.
    fn next_packet(&mut self, pcm: &mut PcmBlock) -> Result<Option<usize>, StreamError>;

    /// Tags currently in effect.
    fn tags(&mut self) -> Tags;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_codec_and_bitrate() {
        let mut format = StreamFormat {
            codec: "mp3".into(),
            bitrate_kbps: Some(128),
            sample_rate: 44_100,
            channels: 2,
        };
        assert_eq!(format.describe(), "Mp3 128kbps");

        format.codec = "aac".into();
        format.bitrate_kbps = None;
        assert_eq!(format.describe(), "Aac");

        format.bitrate_kbps = Some(0);
        assert_eq!(format.describe(), "Aac");
    }
}
