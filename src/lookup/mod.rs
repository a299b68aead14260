//! Track metadata lookup
//!
//! A best-effort enrichment source for album, year and genre. Requests are
//! fire-and-forget and deduplicated by [`cache_key`]; results are polled.
//! Nothing in the playback path ever waits on a lookup.

#[cfg(feature = "musicbrainz")]
mod musicbrainz;

#[cfg(feature = "musicbrainz")]
pub use musicbrainz::{LookupEvent, LookupStatus, MusicBrainzConfig, MusicBrainzLookup};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackInfo {
    pub artist: String,
    pub title: String,
    pub album: String,
    pub year: String,
    pub genre: String,
    /// Score of the chosen release
    pub score: i32,
}

impl TrackInfo {
    /// Whether the lookup produced anything beyond the query itself.
    pub fn is_available(&self) -> bool {
        !self.album.is_empty() || !self.year.is_empty() || !self.genre.is_empty()
    }
}

pub trait TrackLookup: Send + Sync {
    /// Queue a lookup unless one for the same track was already requested.
    fn request(&self, artist: &str, title: &str);

    /// Whether a finished lookup found something worth showing.
    fn has_result(&self, artist: &str, title: &str) -> bool {
        self.result(artist, title)
            .map_or(false, |info| info.is_available())
    }

    /// The finished lookup, if any. Pending lookups return `None`.
    fn result(&self, artist: &str, title: &str) -> Option<TrackInfo>;
}

pub fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

pub fn cache_key(artist: &str, title: &str) -> String {
    format!("{} - {}", normalize(artist), normalize(title))
}
