//! The decode worker for one station
//!
//! A [`StreamSession`] walks `Opening → Prebuffering → Playing → Stopping →
//! Closed`. It is the only writer of the transport ring and the only source
//! of buffer-fill, bandwidth and metadata updates while it runs.
//!
//! Everything it acquires (input stream, resampler, output device) lives in
//! locals of one function, declared in that order, so every exit path
//! releases them in reverse: device, resampler, stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, trace, warn};

use crate::config::PlayerConfig;
use crate::device::{OutputCallback, OutputDevice};
use crate::error::StartError;
use crate::lookup::TrackLookup;
use crate::resample::Resampler;
use crate::ring::TransportRing;
use crate::spectrum::SpectrumAnalyzer;
use crate::status::{NowPlaying, PlayerContext, SessionState};
use crate::stream::{PacketStream, PcmBlock};
use crate::tags::{track_parts, TitleTracker};
use crate::FRAME_BYTES;

/// Where streams and output devices come from.
///
/// Both are opened on the session's worker thread, so neither has to be `Send`.
pub trait Backend: Send + Sync + 'static {
    type Stream: PacketStream;
    type Device: OutputDevice;

    fn open_stream(&self, url: &str) -> Result<Self::Stream, StartError>;

    /// Register (but do not start) an output device driven by `callback`.
    fn open_device(&self, callback: OutputCallback) -> Result<Self::Device, StartError>;
}

/// Why a session that did start has ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// A stop was requested
    Stopped,
    /// The server closed the stream
    StreamEnded,
    /// Reading the stream failed
    NetworkError,
}

/// State that outlives any one session.
#[derive(Clone)]
pub struct Shared {
    pub ring: Arc<TransportRing>,
    pub spectrum: Arc<SpectrumAnalyzer>,
    pub context: Arc<PlayerContext>,
    pub lookup: Option<Arc<dyn TrackLookup>>,
}

pub struct StreamSession<B: Backend> {
    backend: Arc<B>,
    config: PlayerConfig,
    shared: Shared,
    url: String,
    station: String,
    stop: Arc<AtomicBool>,
}

enum Pumped {
    Packet(usize),
    Ended(SessionEnd),
}

impl<B: Backend> StreamSession<B> {
    pub fn new(
        backend: Arc<B>,
        config: PlayerConfig,
        shared: Shared,
        url: &str,
        station: &str,
    ) -> Self {
        Self {
            backend,
            config,
            shared,
            url: url.to_string(),
            station: station.to_string(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Setting this flag makes the session wind down within one packet.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    #[inline]
    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Run until stopped, the stream ends or startup fails.
    ///
    /// Always leaves the ring cleared and the state `Closed`. If the session
    /// ends on its own, `playing = false` is posted for the UI.
    #[instrument(name = "session", skip(self), fields(station = %self.station))]
    pub fn run(self) -> Result<SessionEnd, StartError> {
        let result = self.open_and_play();

        // the device is released by now, nothing reads the ring
        self.shared.ring.clear_from_producer();

        let context = &self.shared.context;
        context.set_session_state(SessionState::Closed);
        match &result {
            Ok(SessionEnd::Stopped) => debug!("session stopped"),
            Ok(end) => {
                info!(?end, "session ended");
                context.playing.post(false);
            }
            Err(e) => {
                warn!(error = %e, url = %self.url, "session failed to start");
                context.playing.post(false);
            }
        }
        result
    }

    fn open_and_play(&self) -> Result<SessionEnd, StartError> {
        let context = &self.shared.context;
        context.set_session_state(SessionState::Opening);

        let mut stream = self.backend.open_stream(&self.url)?;
        let format = stream.format();
        info!(format = %format.describe(), rate = format.sample_rate, channels = format.channels, "stream opened");
        context.stream_format.post(format.describe());

        let mut resampler = Resampler::new(format.sample_rate, format.channels)?;
        let mut device = self.backend.open_device(OutputCallback::new(
            self.shared.ring.clone(),
            self.shared.spectrum.clone(),
            context.clone(),
        ))?;

        // the device is not pulling yet, so this thread stands in for the consumer
        self.shared.ring.clear_from_consumer();
        context.buffer_fill.post(0);
        context.set_session_state(SessionState::Prebuffering);
        debug!(target_bytes = self.config.prebuffer_target(), "prebuffering");

        let mut pcm = PcmBlock::default();
        let mut spill = Vec::new();
        if let Some(end) = self.prebuffer(&mut stream, &mut resampler, &mut pcm, &mut spill) {
            return Ok(end);
        }

        device.start()?;
        context.set_session_state(SessionState::Playing);
        info!("playing");

        let end = if self.write_all(&spill) {
            self.play(&mut stream, &mut resampler, &mut pcm)
        } else {
            SessionEnd::Stopped
        };

        context.set_session_state(SessionState::Stopping);
        device.stop();
        Ok(end)
    }

    /// Fill the ring up to the prebuffer target. `Some` if the session ended first.
    ///
    /// Nothing drains the ring yet, so whatever of the last packet does not
    /// fit goes to `spill` instead of waiting for room.
    fn prebuffer(
        &self,
        stream: &mut B::Stream,
        resampler: &mut Resampler,
        pcm: &mut PcmBlock,
        spill: &mut Vec<u8>,
    ) -> Option<SessionEnd> {
        let target = self.config.prebuffer_target();
        loop {
            if self.stop_requested() {
                self.shared.context.set_session_state(SessionState::Stopping);
                return Some(SessionEnd::Stopped);
            }
            if let Pumped::Ended(end) = self.pump(stream, resampler, pcm, Some(&mut *spill)) {
                return Some(end);
            }

            let buffered = self.shared.ring.available_to_read();
            self.shared
                .context
                .buffer_fill
                .post(fill_percent(buffered, target));
            if buffered >= target {
                return None;
            }
        }
    }

    fn play(
        &self,
        stream: &mut B::Stream,
        resampler: &mut Resampler,
        pcm: &mut PcmBlock,
    ) -> SessionEnd {
        let context = &self.shared.context;
        let target = self.config.prebuffer_target();
        let interval = u64::from(self.config.metadata_interval.max(1));

        let mut tracker = TitleTracker::default();
        let mut meter = BandwidthMeter::new(self.config.bandwidth_window, Instant::now());
        let mut packets: u64 = 0;

        loop {
            if self.stop_requested() {
                return SessionEnd::Stopped;
            }
            if packets % interval == 0 {
                self.scan_metadata(stream, &mut tracker);
            }

            let wire_bytes = match self.pump(stream, resampler, pcm, None) {
                Pumped::Packet(bytes) => bytes,
                Pumped::Ended(end) => return end,
            };
            packets += 1;

            if let Some(kib_per_sec) = meter.record(wire_bytes, Instant::now()) {
                trace!(kib_per_sec, "bandwidth");
                context.bandwidth.post(kib_per_sec);
            }
            context
                .buffer_fill
                .post(fill_percent(self.shared.ring.available_to_read(), target));
        }
    }

    /// Read, decode and resample one packet into the ring.
    ///
    /// With a `spill` buffer the write never waits: the part that does not
    /// fit is appended there.
    fn pump(
        &self,
        stream: &mut B::Stream,
        resampler: &mut Resampler,
        pcm: &mut PcmBlock,
        spill: Option<&mut Vec<u8>>,
    ) -> Pumped {
        let wire_bytes = match stream.next_packet(pcm) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("end of stream");
                return Pumped::Ended(SessionEnd::StreamEnded);
            }
            Err(e) => {
                warn!(error = %e, "stream read failed");
                return Pumped::Ended(SessionEnd::NetworkError);
            }
        };

        if !pcm.samples.is_empty() {
            let bytes: &[u8] = bytemuck::cast_slice(resampler.process(pcm));
            match spill {
                Some(spill) => {
                    let written = self.write_frames(bytes);
                    spill.extend_from_slice(&bytes[written..]);
                }
                None => {
                    if !self.write_all(bytes) {
                        return Pumped::Ended(SessionEnd::Stopped);
                    }
                }
            }
        }
        Pumped::Packet(wire_bytes)
    }

    /// Write as many whole frames of `bytes` as fit right now.
    fn write_frames(&self, bytes: &[u8]) -> usize {
        let room = self.shared.ring.available_to_write();
        let room = room - room % FRAME_BYTES;
        self.shared.ring.write(&bytes[..room.min(bytes.len())])
    }

    /// Write whole frames until `bytes` is consumed, sleeping while the ring
    /// is full. Returns `false` if a stop arrived first.
    fn write_all(&self, mut bytes: &[u8]) -> bool {
        while !bytes.is_empty() {
            if self.stop_requested() {
                return false;
            }

            let written = self.write_frames(bytes);
            if written == 0 {
                thread::sleep(self.config.backpressure_sleep);
                continue;
            }
            bytes = &bytes[written..];
        }
        true
    }

    fn scan_metadata(&self, stream: &mut B::Stream, tracker: &mut TitleTracker) {
        let tags = stream.tags();
        let context = &self.shared.context;

        if let Some(title) = tracker.title_changed(&tags) {
            info!(%title, "now playing");
            let (artist, song) = track_parts(&tags, &title);
            if let Some(lookup) = &self.shared.lookup {
                lookup.request(artist.as_deref().unwrap_or(""), &song);
            }
            context.now_playing.post(NowPlaying {
                station: self.station.clone(),
                title,
                artist,
                song,
            });
        }

        if let Some(genre) = tracker.genre_changed(&tags) {
            debug!(%genre, "genre");
            context.genre.post(genre);
        }
    }
}

/// Percentage of the prebuffer target currently buffered, capped at 100.
pub fn fill_percent(buffered: usize, target: usize) -> u8 {
    if target == 0 {
        return 100;
    }
    (buffered.saturating_mul(100) / target).min(100) as u8
}

/// Download rate over fixed windows.
#[derive(Debug)]
pub struct BandwidthMeter {
    window: Duration,
    started: Instant,
    bytes: u64,
}

impl BandwidthMeter {
    pub fn new(window: Duration, now: Instant) -> Self {
        Self {
            window,
            started: now,
            bytes: 0,
        }
    }

    /// Count `bytes`; once a window has passed, return KiB/s over it and start over.
    pub fn record(&mut self, bytes: usize, now: Instant) -> Option<f32> {
        self.bytes += bytes as u64;

        let elapsed = now.saturating_duration_since(self.started);
        if elapsed < self.window || elapsed.is_zero() {
            return None;
        }

        let kib_per_sec = self.bytes as f64 * 1000.0 / (elapsed.as_millis() as f64 * 1024.0);
        self.bytes = 0;
        self.started = now;
        Some(kib_per_sec as f32)
    }
}
