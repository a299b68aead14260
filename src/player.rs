//! Playback control
//!
//! [`PlaybackController`] owns at most one running [`StreamSession`] and the
//! state shared between sessions: the transport ring, the analyzer and the
//! [`PlayerContext`] the UI polls.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "cpal_sink")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use funkwelle::{PlaybackController, PlayerConfig, SystemBackend};
//!
//! let mut player = PlaybackController::new(SystemBackend::new(), PlayerConfig::default());
//! player.play("http://ice1.somafm.com/groovesalad-128-mp3", "Groove Salad")?;
//!
//! loop {
//!     if let Some(percent) = player.context().buffer_fill.take() {
//!         println!("buffering {}%", percent);
//!     }
//!     player.spectrum().process_samples();
//!     std::thread::sleep(std::time::Duration::from_millis(50));
//! }
//! # }
//! # #[cfg(not(feature = "cpal_sink"))]
//! # fn main() {}
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::config::PlayerConfig;
use crate::error::{PlayError, StartError};
use crate::lookup::TrackLookup;
use crate::ring::TransportRing;
use crate::session::{Backend, SessionEnd, Shared, StreamSession};
use crate::spectrum::SpectrumAnalyzer;
use crate::status::PlayerContext;

struct ActiveSession {
    station: String,
    stop: Arc<AtomicBool>,
    worker: JoinHandle<Result<SessionEnd, StartError>>,
}

pub struct PlaybackController<B: Backend> {
    backend: Arc<B>,
    config: PlayerConfig,
    shared: Shared,
    active: Option<ActiveSession>,
}

impl<B: Backend> PlaybackController<B> {
    /// # Panics
    ///
    /// If `config.ring_capacity` was set directly to something that is not a
    /// power of two. [`PlayerConfig::with_ring_capacity`] rounds it up.
    pub fn new(backend: B, config: PlayerConfig) -> Self {
        let shared = Shared {
            ring: Arc::new(TransportRing::new(config.ring_capacity)),
            spectrum: Arc::new(SpectrumAnalyzer::new(config.spectrum.clone())),
            context: Arc::new(PlayerContext::new()),
            lookup: None,
        };

        Self {
            backend: Arc::new(backend),
            config,
            shared,
            active: None,
        }
    }

    /// Send title changes to `lookup` for enrichment.
    pub fn with_lookup(mut self, lookup: Arc<dyn TrackLookup>) -> Self {
        self.shared.lookup = Some(lookup);
        self
    }

    /// Switch to `url`. Any running session is torn down first, blocking
    /// until its worker has exited.
    pub fn play(&mut self, url: &str, station: &str) -> Result<(), PlayError> {
        self.stop_session();

        let context = &self.shared.context;
        context.playing.post(true);

        let session = StreamSession::new(
            self.backend.clone(),
            self.config.clone(),
            self.shared.clone(),
            url,
            station,
        );
        let stop = session.stop_flag();

        let worker = thread::Builder::new()
            .name("funkwelle-session".into())
            .spawn(move || session.run())
            .map_err(|e| {
                context.playing.post(false);
                PlayError::Spawn(e)
            })?;

        debug!(station, url, "session started");
        self.active = Some(ActiveSession {
            station: station.to_string(),
            stop,
            worker,
        });
        Ok(())
    }

    /// Stop the running session, blocking until its worker has exited.
    pub fn stop(&mut self) {
        self.stop_session();
        self.shared.context.playing.post(false);
    }

    fn stop_session(&mut self) -> Option<Result<SessionEnd, StartError>> {
        let active = self.active.take()?;
        active.stop.store(true, Ordering::Release);

        match active.worker.join() {
            Ok(outcome) => {
                debug!(station = %active.station, ?outcome, "session joined");
                Some(outcome)
            }
            Err(_) => {
                warn!(station = %active.station, "session worker panicked");
                None
            }
        }
    }

    /// Whether a session worker is still running. A session that ended on
    /// its own stays selected until the next `play` or `stop`.
    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .map_or(false, |active| !active.worker.is_finished())
    }

    pub fn station(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.station.as_str())
    }

    pub fn context(&self) -> &Arc<PlayerContext> {
        &self.shared.context
    }

    pub fn spectrum(&self) -> &Arc<SpectrumAnalyzer> {
        &self.shared.spectrum
    }

    pub fn ring(&self) -> &Arc<TransportRing> {
        &self.shared.ring
    }

    pub fn volume_up(&self) -> f32 {
        self.shared.context.volume.step_up(self.config.volume_step)
    }

    pub fn volume_down(&self) -> f32 {
        self.shared.context.volume.step_down(self.config.volume_step)
    }
}

impl<B: Backend> Drop for PlaybackController<B> {
    fn drop(&mut self) {
        self.stop_session();
    }
}

#[cfg(feature = "cpal_sink")]
pub use system::SystemBackend;

#[cfg(feature = "cpal_sink")]
mod system {
    use super::Backend;
    use crate::device::{CpalOutput, OutputCallback};
    use crate::error::StartError;
    use crate::stream::{HttpOpener, SymphoniaStream};

    /// HTTP streams decoded with symphonia, played on the default CPAL device.
    #[derive(Clone, Debug, Default)]
    pub struct SystemBackend {
        opener: HttpOpener,
    }

    impl SystemBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_opener(opener: HttpOpener) -> Self {
            Self { opener }
        }
    }

    impl Backend for SystemBackend {
        type Stream = SymphoniaStream;
        type Device = CpalOutput;

        fn open_stream(&self, url: &str) -> Result<SymphoniaStream, StartError> {
            self.opener.open(url)
        }

        fn open_device(&self, callback: OutputCallback) -> Result<CpalOutput, StartError> {
            CpalOutput::open(callback)
        }
    }
}
