//! HTTP radio streams decoded with symphonia

use std::io::ErrorKind;
use std::time::Duration;

use hashbrown::HashMap;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Track};
use symphonia::core::io::{MediaSource, MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;
use tracing::{debug, trace};

use super::icy::{IcyMetadata, IcyReader};
use super::{PacketStream, PcmBlock, StreamFormat};
use crate::error::{StartError, StreamError};
use crate::tags::Tags;

pub const DEFAULT_USER_AGENT: &str = concat!("funkwelle/", env!("CARGO_PKG_VERSION"));

/// Response headers worth keeping as stream-level tags.
const ICY_HEADERS: [&str; 5] = ["icy-name", "icy-genre", "icy-br", "icy-description", "icy-url"];

/// Opens station URLs over HTTP, asking for ICY metadata.
#[derive(Clone, Debug)]
pub struct HttpOpener {
    agent: ureq::Agent,
}

impl HttpOpener {
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_USER_AGENT, Duration::from_secs(10))
    }

    /// Only the connection gets a timeout; a stalled stream is left for the user to stop.
    pub fn with_settings(user_agent: &str, connect_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .user_agent(user_agent)
            .timeout_connect(connect_timeout)
            .build();
        Self { agent }
    }

    pub fn open(&self, url: &str) -> Result<SymphoniaStream, StartError> {
        let response = self
            .agent
            .get(url)
            .set("Icy-MetaData", "1")
            .call()
            .map_err(|e| StartError::Open {
                url: url.to_string(),
                source: Box::new(e),
            })?;

        let header = |name: &str| {
            response
                .header(name)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
        };

        let header_tags: Vec<(String, String)> = ICY_HEADERS
            .iter()
            .filter_map(|name| header(*name).map(|v| (name.to_string(), v)))
            .collect();
        let metaint = header("icy-metaint").and_then(|v| v.parse().ok());
        let bitrate = header("icy-br").and_then(|v| v.split(',').next()?.trim().parse().ok());

        let content_type = response.content_type().to_ascii_lowercase();
        let mut hint = Hint::new();
        hint.mime_type(&content_type);
        if let Some(ext) = extension_for(&content_type) {
            hint.with_extension(ext);
        }
        debug!(url, %content_type, ?metaint, "stream connected");

        let icy = IcyMetadata::default();
        let reader = IcyReader::new(response.into_reader(), metaint, icy.clone());
        let source = ReadOnlySource::new(reader);

        let mut stream = SymphoniaStream::from_source(Box::new(source), hint)?;
        stream.format.bitrate_kbps = bitrate;
        stream.header_tags = header_tags;
        stream.icy = Some(icy);
        Ok(stream)
    }
}

impl Default for HttpOpener {
    fn default() -> Self {
        Self::new()
    }
}

fn extension_for(content_type: &str) -> Option<&'static str> {
    let ext = match content_type.split(';').next()?.trim() {
        "audio/mpeg" | "audio/mp3" | "audio/mpeg3" => "mp3",
        "audio/aac" | "audio/aacp" | "audio/x-aac" => "aac",
        "audio/mp4" | "audio/x-m4a" => "m4a",
        "audio/ogg" | "application/ogg" | "audio/vorbis" => "ogg",
        "audio/flac" | "audio/x-flac" => "flac",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        _ => return None,
    };
    Some(ext)
}

/// A probed stream with its decoder.
pub struct SymphoniaStream {
    // field order is drop order: decoder before demuxer and input
    decoder: Box<dyn Decoder>,
    reader: Box<dyn FormatReader>,
    track_id: u32,
    format: StreamFormat,
    sample_buf: Option<SampleBuffer<f32>>,

    header_tags: Vec<(String, String)>,
    icy: Option<IcyMetadata>,
    container_tags: HashMap<String, String>,
}

impl SymphoniaStream {
    /// Probe `source` and open a decoder for its first audio track.
    pub fn from_source(source: Box<dyn MediaSource>, hint: Hint) -> Result<Self, StartError> {
        let mss = MediaSourceStream::new(source, Default::default());
        let mut probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(StartError::Probe)?;

        let mut container_tags = HashMap::new();
        if let Some(mut metadata) = probed.metadata.get() {
            if let Some(rev) = metadata.skip_to_latest() {
                merge_revision(&mut container_tags, rev);
            }
        }

        Self::from_reader(probed.format, container_tags)
    }

    /// Open a decoder for the first audio track of an already demuxing `reader`.
    fn from_reader(
        reader: Box<dyn FormatReader>,
        container_tags: HashMap<String, String>,
    ) -> Result<Self, StartError> {
        let track = first_audio_track(reader.tracks()).ok_or(StartError::NoAudioTrack)?;
        let (decoder, format) = open_decoder(track)?;
        let track_id = track.id;

        Ok(Self {
            decoder,
            reader,
            track_id,
            format,
            sample_buf: None,
            header_tags: vec![],
            icy: None,
            container_tags,
        })
    }

    /// A chained stream (Ogg) started a new logical stream, possibly with
    /// another codec setup. Pick up its audio track with a fresh decoder.
    fn restart_track(&mut self) -> Result<(), StreamError> {
        let track = first_audio_track(self.reader.tracks())
            .ok_or(StreamError::Restart(StartError::NoAudioTrack))?;
        let (decoder, format) = open_decoder(track).map_err(StreamError::Restart)?;

        self.track_id = track.id;
        self.decoder = decoder;
        self.sample_buf = None;
        self.format.codec = format.codec;
        self.format.sample_rate = format.sample_rate;
        self.format.channels = format.channels;
        Ok(())
    }
}

fn first_audio_track(tracks: &[Track]) -> Option<&Track> {
    tracks.iter().find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
}

fn open_decoder(track: &Track) -> Result<(Box<dyn Decoder>, StreamFormat), StartError> {
    let codecs = symphonia::default::get_codecs();
    let codec = codecs
        .get_codec(track.codec_params.codec)
        .map(|d| d.short_name.to_string())
        .unwrap_or_else(|| String::from("unknown"));
    let decoder = codecs
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| StartError::Decoder(codec.clone(), e))?;

    let format = StreamFormat {
        codec,
        bitrate_kbps: None,
        sample_rate: track.codec_params.sample_rate.unwrap_or(0),
        channels: track.codec_params.channels.map(|c| c.count()).unwrap_or(0),
    };
    debug!(codec = %format.codec, rate = format.sample_rate, channels = format.channels, track = track.id, "decoder ready");
    Ok((decoder, format))
}

fn merge_revision(tags: &mut HashMap<String, String>, rev: &MetadataRevision) {
    for tag in rev.tags() {
        let key = match tag.std_key {
            Some(StandardTagKey::TrackTitle) => String::from("title"),
            Some(StandardTagKey::Artist) => String::from("artist"),
            Some(StandardTagKey::Album) => String::from("album"),
            Some(StandardTagKey::Genre) => String::from("genre"),
            _ => tag.key.to_ascii_lowercase(),
        };
        tags.insert(key, tag.value.to_string());
    }
}

impl PacketStream for SymphoniaStream {
    fn format(&self) -> StreamFormat {
        self.format.clone()
    }

    fn next_packet(&mut self, pcm: &mut PcmBlock) -> Result<Option<usize>, StreamError> {
        pcm.clear();

        let packet = loop {
            match self.reader.next_packet() {
                Ok(packet) if packet.track_id() == self.track_id => break packet,
                Ok(_) => continue,
                Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    return Ok(None)
                }
                Err(SymphoniaError::IoError(e)) => return Err(StreamError::Network(e)),
                Err(SymphoniaError::ResetRequired) => {
                    debug!("new logical stream");
                    self.restart_track()?;
                }
                Err(e) => return Err(StreamError::Demux(e)),
            }
        };
        let wire_bytes = packet.data.len();

        match self.decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let needed = decoded.capacity() * spec.channels.count();
                if self.sample_buf.as_ref().map_or(true, |b| b.capacity() < needed) {
                    self.sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                }
                if let Some(buf) = self.sample_buf.as_mut() {
                    buf.copy_interleaved_ref(decoded);
                    pcm.samples.extend_from_slice(buf.samples());
                }
                pcm.sample_rate = spec.rate;
                pcm.channels = spec.channels.count();
            }
            Err(SymphoniaError::DecodeError(e)) => trace!(error = e, "skipping undecodable packet"),
            Err(SymphoniaError::IoError(e)) => trace!(error = %e, "skipping truncated packet"),
            Err(SymphoniaError::ResetRequired) => {
                debug!("decoder reset");
                self.decoder.reset();
                self.sample_buf = None;
            }
            Err(e) => return Err(StreamError::Demux(e)),
        }

        Ok(Some(wire_bytes))
    }

    fn tags(&mut self) -> Tags {
        if let Some(rev) = self.reader.metadata().skip_to_latest() {
            merge_revision(&mut self.container_tags, rev);
        }

        let mut tags = Tags::new();
        for (key, value) in &self.header_tags {
            tags.insert_stream(key, value.as_str());
        }
        if let Some(icy) = &self.icy {
            for (key, value) in icy.snapshot() {
                tags.insert_stream(&key, value);
            }
        }
        for (key, value) in &self.container_tags {
            tags.insert_format(key, value.as_str());
        }
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn wav(rate: u32, samples: &[i16]) -> Vec<u8> {
        let data_len = (samples.len() * 2) as u32;
        let mut out = vec![];
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVEfmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&rate.to_le_bytes());
        out.extend_from_slice(&(rate * 2).to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        out.extend(samples.iter().flat_map(|s| s.to_le_bytes()));
        out
    }

    #[test]
    fn decodes_every_frame_of_a_wav() {
        let samples: Vec<i16> = (0..4000).map(|i| ((i % 200) * 100) as i16).collect();
        let mut hint = Hint::new();
        hint.with_extension("wav");

        let mut stream =
            SymphoniaStream::from_source(Box::new(Cursor::new(wav(8000, &samples))), hint).unwrap();
        let format = stream.format();
        assert_eq!(format.sample_rate, 8000);
        assert_eq!(format.channels, 1);

        let mut pcm = PcmBlock::default();
        let mut frames = 0;
        while let Some(bytes) = stream.next_packet(&mut pcm).unwrap() {
            assert!(bytes > 0);
            assert_eq!(pcm.sample_rate, 8000);
            frames += pcm.frames();
        }
        assert_eq!(frames, 4000);
    }

    mod chained {
        use std::collections::VecDeque;

        use symphonia::core::audio::Channels;
        use symphonia::core::codecs::{CodecParameters, CODEC_TYPE_PCM_S16LE};
        use symphonia::core::errors::{Result, SeekErrorKind};
        use symphonia::core::formats::{Cue, Packet, SeekMode, SeekTo, SeekedTo};
        use symphonia::core::meta::{Metadata, MetadataLog};
        use symphonia::core::sample::SampleFormat;

        use super::*;

        pub enum Step {
            Packet,
            /// Start a new logical stream on a fresh track id
            NewStream,
        }

        fn pcm_track(id: u32) -> Track {
            let mut params = CodecParameters::new();
            params
                .for_codec(CODEC_TYPE_PCM_S16LE)
                .with_sample_rate(8000)
                .with_channels(Channels::FRONT_LEFT)
                .with_sample_format(SampleFormat::S16)
                .with_bits_per_sample(16)
                .with_bits_per_coded_sample(16)
                .with_max_frames_per_packet(4);
            Track::new(id, params)
        }

        /// Replays packets and logical stream boundaries like a chained Ogg feed.
        pub struct ChainedReader {
            tracks: Vec<Track>,
            steps: VecDeque<Step>,
            metadata: MetadataLog,
        }

        impl ChainedReader {
            pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
                Self {
                    tracks: vec![pcm_track(0)],
                    steps: steps.into_iter().collect(),
                    metadata: MetadataLog::default(),
                }
            }
        }

        impl FormatReader for ChainedReader {
            fn try_new(_: MediaSourceStream, _: &FormatOptions) -> Result<Self> {
                Err(SymphoniaError::Unsupported("scripted reader"))
            }

            fn cues(&self) -> &[Cue] {
                &[]
            }

            fn metadata(&mut self) -> Metadata<'_> {
                self.metadata.metadata()
            }

            fn seek(&mut self, _: SeekMode, _: SeekTo) -> Result<SeekedTo> {
                Err(SymphoniaError::SeekError(SeekErrorKind::Unseekable))
            }

            fn tracks(&self) -> &[Track] {
                &self.tracks
            }

            fn next_packet(&mut self) -> Result<Packet> {
                match self.steps.pop_front() {
                    Some(Step::Packet) => Ok(Packet::new_from_slice(
                        self.tracks[0].id,
                        0,
                        4,
                        &[1, 0, 2, 0, 3, 0, 4, 0],
                    )),
                    Some(Step::NewStream) => {
                        let next = self.tracks[0].id + 1;
                        self.tracks = vec![pcm_track(next)];
                        Err(SymphoniaError::ResetRequired)
                    }
                    None => Err(SymphoniaError::IoError(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "end of feed",
                    ))),
                }
            }

            fn into_inner(self: Box<Self>) -> MediaSourceStream {
                MediaSourceStream::new(Box::new(Cursor::new(Vec::<u8>::new())), Default::default())
            }
        }
    }

    #[test]
    fn plays_through_chained_stream_boundaries() {
        use chained::{ChainedReader, Step};

        let mut steps = vec![Step::Packet, Step::NewStream];
        steps.extend((0..7).map(|_| Step::Packet));
        steps.push(Step::NewStream);
        steps.push(Step::Packet);

        let reader = ChainedReader::new(steps);
        let mut stream = SymphoniaStream::from_reader(Box::new(reader), HashMap::new()).unwrap();

        let mut pcm = PcmBlock::default();
        let mut packets = 0;
        while let Some(bytes) = stream.next_packet(&mut pcm).unwrap() {
            assert_eq!(bytes, 8);
            assert_eq!(pcm.frames(), 4);
            assert!(pcm.samples[0] > 0.0);
            packets += 1;
        }
        assert_eq!(packets, 9);
        assert_eq!(stream.track_id, 2);
    }

    #[test]
    fn garbage_fails_to_probe() {
        let noise: Vec<u8> = (0..4096u32).map(|i| (i * 7919 % 251) as u8).collect();
        let result = SymphoniaStream::from_source(Box::new(Cursor::new(noise)), Hint::new());
        assert!(matches!(result, Err(StartError::Probe(_))));
    }

    #[test]
    fn maps_content_types() {
        assert_eq!(extension_for("audio/mpeg"), Some("mp3"));
        assert_eq!(extension_for("audio/aacp; charset=utf-8"), Some("aac"));
        assert_eq!(extension_for("text/html"), None);
    }
}
