//! MusicBrainz recording lookup
//!
//! One background thread works through queued requests, at most one HTTP
//! query per second as the MusicBrainz API asks. Status changes are pushed
//! into an SPSC ring the UI drains at its own pace; if the UI falls behind,
//! new events are dropped rather than blocking the worker.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use hashbrown::HashMap;
use rtrb::{Consumer, Producer, RingBuffer};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{cache_key, TrackInfo, TrackLookup};
use crate::error::LookupError;

#[derive(Clone, Debug)]
pub struct MusicBrainzConfig {
    pub endpoint: String,
    pub user_agent: String,
    pub timeout: Duration,
    /// Minimum spacing between two HTTP queries
    pub min_interval: Duration,
    /// Status events buffered for the UI
    pub event_capacity: usize,
}

impl Default for MusicBrainzConfig {
    fn default() -> Self {
        Self {
            endpoint: String::from("https://musicbrainz.org/ws/2/recording/"),
            user_agent: format!(
                "funkwelle/{} ( https://crates.io/crates/funkwelle )",
                env!("CARGO_PKG_VERSION")
            ),
            timeout: Duration::from_secs(5),
            min_interval: Duration::from_secs(1),
            event_capacity: 64,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupStatus {
    Waiting,
    Querying,
    Received,
    NotFound,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LookupEvent {
    pub status: LookupStatus,
    /// `"artist - title"` as requested
    pub query: String,
    pub info: Option<TrackInfo>,
    pub error: Option<String>,
}

impl LookupEvent {
    fn new(status: LookupStatus, query: &str) -> Self {
        Self {
            status,
            query: query.to_string(),
            info: None,
            error: None,
        }
    }
}

struct Request {
    artist: String,
    title: String,
    key: String,
}

/// `None` marks a lookup that was requested but has not finished.
type Cache = Arc<Mutex<HashMap<String, Option<TrackInfo>>>>;
type Events = Arc<Mutex<Producer<LookupEvent>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn publish(events: &Events, event: LookupEvent) {
    if lock(events).push(event).is_err() {
        debug!("lookup event dropped, consumer is behind");
    }
}

pub struct MusicBrainzLookup {
    requests: Option<Sender<Request>>,
    cache: Cache,
    events: Events,
    worker: Option<JoinHandle<()>>,
}

impl MusicBrainzLookup {
    /// Start the worker. The returned consumer yields status events.
    pub fn spawn(config: MusicBrainzConfig) -> std::io::Result<(Self, Consumer<LookupEvent>)> {
        let (producer, consumer) = RingBuffer::new(config.event_capacity.max(1));
        let (requests, queue) = channel::unbounded();

        let cache: Cache = Arc::default();
        let events: Events = Arc::new(Mutex::new(producer));

        let worker = Worker {
            agent: ureq::AgentBuilder::new()
                .user_agent(&config.user_agent)
                .timeout(config.timeout)
                .build(),
            config,
            cache: cache.clone(),
            events: events.clone(),
            last_query: None,
        };
        let worker = thread::Builder::new()
            .name("funkwelle-lookup".into())
            .spawn(move || worker.run(queue))?;

        let lookup = Self {
            requests: Some(requests),
            cache,
            events,
            worker: Some(worker),
        };
        Ok((lookup, consumer))
    }

    pub fn clear_cache(&self) {
        lock(&self.cache).clear();
    }
}

impl TrackLookup for MusicBrainzLookup {
    fn request(&self, artist: &str, title: &str) {
        if artist.trim().is_empty() && title.trim().is_empty() {
            return;
        }

        let key = cache_key(artist, title);
        {
            let mut cache = lock(&self.cache);
            if cache.contains_key(&key) {
                return;
            }
            cache.insert(key.clone(), None);
        }

        let query = format!("{} - {}", artist, title);
        publish(&self.events, LookupEvent::new(LookupStatus::Waiting, &query));

        if let Some(requests) = &self.requests {
            let request = Request {
                artist: artist.to_string(),
                title: title.to_string(),
                key,
            };
            if requests.send(request).is_err() {
                warn!("lookup worker is gone");
            }
        }
    }

    fn result(&self, artist: &str, title: &str) -> Option<TrackInfo> {
        lock(&self.cache).get(&cache_key(artist, title)).cloned().flatten()
    }
}

impl Drop for MusicBrainzLookup {
    fn drop(&mut self) {
        // closing the channel ends the worker's loop
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("lookup worker panicked");
            }
        }
    }
}

struct Worker {
    agent: ureq::Agent,
    config: MusicBrainzConfig,
    cache: Cache,
    events: Events,
    last_query: Option<Instant>,
}

impl Worker {
    fn run(mut self, queue: Receiver<Request>) {
        for request in queue.iter() {
            if let Some(last) = self.last_query {
                let elapsed = last.elapsed();
                if elapsed < self.config.min_interval {
                    thread::sleep(self.config.min_interval - elapsed);
                }
            }
            self.last_query = Some(Instant::now());

            let query = format!("{} - {}", request.artist, request.title);
            publish(&self.events, LookupEvent::new(LookupStatus::Querying, &query));

            let mut event = LookupEvent::new(LookupStatus::NotFound, &query);
            let info = match self.fetch(&request.artist, &request.title) {
                Ok(info) => info,
                Err(e) => {
                    warn!(%query, error = %e, "metadata lookup failed");
                    event.status = LookupStatus::Failed;
                    event.error = Some(e.to_string());
                    TrackInfo::default()
                }
            };

            if info.is_available() {
                info!(%query, album = %info.album, year = %info.year, genre = %info.genre, "metadata found");
                event.status = LookupStatus::Received;
                event.info = Some(info.clone());
            }

            lock(&self.cache).insert(request.key, Some(info));
            publish(&self.events, event);
        }
        debug!("lookup worker finished");
    }

    fn fetch(&self, artist: &str, title: &str) -> Result<TrackInfo, LookupError> {
        let query = search_query(artist, title);
        let body = self
            .agent
            .get(&self.config.endpoint)
            .query("query", &query)
            .query("fmt", "json")
            .query("limit", "1")
            .call()
            .map_err(Box::new)?
            .into_string()?;

        let json: Value = serde_json::from_str(&body)?;
        let mut info = parse_recording(&json);
        info.artist = artist.to_string();
        info.title = title.to_string();
        Ok(info)
    }
}

fn search_query(artist: &str, title: &str) -> String {
    match (artist.trim(), title.trim()) {
        ("", title) => format!("recording:\"{}\"", title),
        (artist, "") => format!("artist:\"{}\"", artist),
        (artist, title) => format!("recording:\"{}\" AND artist:\"{}\"", title, artist),
    }
}

/// How well a release stands for the original album.
fn release_score(release: &Value) -> i32 {
    let mut score = match release["status"].as_str() {
        Some("Official") => 10,
        Some("Bootleg") => -20,
        _ => 5,
    };

    let group = &release["release-group"];
    score += match group["primary-type"].as_str() {
        Some("Album") => 10,
        Some("EP") => 5,
        Some("Single") => 3,
        _ => 0,
    };

    if let Some(secondary) = group["secondary-types"].as_array() {
        for kind in secondary.iter().filter_map(Value::as_str) {
            score -= match kind {
                "Compilation" => 100,
                "Live" => 50,
                "Remix" => 40,
                "DJ-mix" | "Mixtape/Street" => 30,
                "Spokenword" | "Interview" | "Audiobook" | "Audio drama" => 25,
                "Soundtrack" => 20,
                _ => 0,
            };
        }
    }
    score
}

fn release_year(release: &Value) -> Option<(String, i32)> {
    let date = release["date"].as_str()?;
    let year = date.get(..4)?;
    Some((year.to_string(), year.parse().ok()?))
}

/// Most-tagged name in a MusicBrainz `tags` array.
fn top_tag(tags: &Value) -> Option<String> {
    tags.as_array()?
        .iter()
        .filter_map(|tag| Some((tag["count"].as_i64()?, tag["name"].as_str()?)))
        .fold(None, |best: Option<(i64, &str)>, (count, name)| match best {
            Some((top, _)) if top >= count => best,
            _ => Some((count, name)),
        })
        .map(|(_, name)| name.to_string())
}

/// Album, year and genre from a recording search response.
fn parse_recording(json: &Value) -> TrackInfo {
    let mut info = TrackInfo::default();
    let recording = &json["recordings"][0];
    if recording.is_null() {
        return info;
    }

    let mut best: Option<(i32, Option<i32>, &Value)> = None;
    for release in recording["releases"].as_array().into_iter().flatten() {
        let mut score = release_score(release);
        if score < 0 {
            continue;
        }
        let year = release_year(release).map(|(_, y)| y);
        if let Some(year) = year {
            score += (2100 - year).max(0) / 10;
        }

        let better = match best {
            None => true,
            Some((top, _, _)) if score > top => true,
            Some((top, top_year, _)) if score == top => match year {
                Some(year) => year < top_year.unwrap_or(9999),
                None => false,
            },
            _ => false,
        };
        if better {
            best = Some((score, year, release));
        }
    }

    if let Some((score, _, release)) = best {
        info.album = release["title"].as_str().unwrap_or_default().to_string();
        info.year = release_year(release).map(|(y, _)| y).unwrap_or_default();
        info.score = score;
    }

    info.genre = top_tag(&recording["tags"])
        .or_else(|| top_tag(&recording["artist-credit"][0]["artist"]["tags"]))
        .unwrap_or_default();

    info
}
