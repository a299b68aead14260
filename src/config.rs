//! Player settings and the station list

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::ring::DEFAULT_RING_CAPACITY;
use crate::spectrum::SpectrumConfig;
use crate::FRAME_BYTES;

#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Transport ring size in bytes, a power of two
    pub ring_capacity: usize,
    /// Bytes buffered before the output device starts
    pub prebuffer_bytes: usize,
    /// Packets between two metadata scans
    pub metadata_interval: u32,
    /// Sleep between write attempts while the ring is full
    pub backpressure_sleep: Duration,
    /// Period of the bandwidth estimate
    pub bandwidth_window: Duration,
    pub volume_step: f32,
    pub spectrum: SpectrumConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            ring_capacity: DEFAULT_RING_CAPACITY,
            prebuffer_bytes: 65_536,
            metadata_interval: 5,
            backpressure_sleep: Duration::from_millis(1),
            bandwidth_window: Duration::from_secs(1),
            volume_step: 0.05,
            spectrum: SpectrumConfig::default(),
        }
    }
}

impl PlayerConfig {
    /// Rounded up to the next power of two the ring can be built with.
    pub fn with_ring_capacity(mut self, bytes: usize) -> Self {
        self.ring_capacity = bytes.max(2).next_power_of_two();
        self
    }

    /// The session clamps this to what the ring can hold.
    pub fn with_prebuffer_bytes(mut self, bytes: usize) -> Self {
        self.prebuffer_bytes = bytes;
        self
    }

    pub fn with_metadata_interval(mut self, packets: u32) -> Self {
        self.metadata_interval = packets.max(1);
        self
    }

    pub fn with_backpressure_sleep(mut self, sleep: Duration) -> Self {
        self.backpressure_sleep = sleep;
        self
    }

    pub fn with_volume_step(mut self, step: f32) -> Self {
        self.volume_step = step;
        self
    }

    pub fn with_spectrum(mut self, spectrum: SpectrumConfig) -> Self {
        self.spectrum = spectrum;
        self
    }

    /// Prebuffer target the session actually waits for.
    pub fn prebuffer_target(&self) -> usize {
        let usable = self.ring_capacity.saturating_sub(1) / FRAME_BYTES * FRAME_BYTES;
        self.prebuffer_bytes.min(usable)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    pub name: String,
    pub url: String,
}

/// Parse a JSON object of `"name": "url"` pairs, sorted by name.
pub fn parse_stations(json: &str) -> Result<Vec<Station>, ConfigError> {
    let map: BTreeMap<String, String> = serde_json::from_str(json)?;
    Ok(map
        .into_iter()
        .map(|(name, url)| Station { name, url })
        .collect())
}

pub fn load_stations(path: impl AsRef<Path>) -> Result<Vec<Station>, ConfigError> {
    let json = std::fs::read_to_string(path)?;
    parse_stations(&json)
}
