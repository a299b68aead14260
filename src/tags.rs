//! In-band metadata: tag storage and "now playing" resolution
//!
//! Streams carry tags at two levels. Stream-level tags come from the
//! transport (ICY headers and `StreamTitle` blocks), format-level tags from
//! the container. Lookups try the stream level first.

use hashbrown::HashMap;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tags {
    stream: HashMap<String, String>,
    format: HashMap<String, String>,
}

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_stream(&mut self, key: &str, value: impl Into<String>) {
        self.stream.insert(key.to_ascii_lowercase(), value.into());
    }

    pub fn insert_format(&mut self, key: &str, value: impl Into<String>) {
        self.format.insert(key.to_ascii_lowercase(), value.into());
    }

    /// Case-insensitive lookup, stream level first. Empty values count as missing.
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_ascii_lowercase();
        self.stream
            .get(&key)
            .or_else(|| self.format.get(&key))
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// First of `keys` present at the stream level, then at the format level.
    pub fn get_any(&self, keys: &[&str]) -> Option<&str> {
        for level in [&self.stream, &self.format] {
            for key in keys {
                let found = level
                    .get(&key.to_ascii_lowercase())
                    .map(String::as_str)
                    .filter(|v| !v.trim().is_empty());
                if found.is_some() {
                    return found;
                }
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.stream.is_empty() && self.format.is_empty()
    }
}

/// Remove one pair of matching surrounding quotes.
pub fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    let bytes = s.as_bytes();
    if bytes.len() > 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'\'' || first == b'"') {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// Display title from the tags currently in effect.
///
/// A combined `StreamTitle` wins. Otherwise separate artist and title tags
/// are joined as `"artist - title"`, and a lone title is used as is.
pub fn resolve_title(tags: &Tags) -> Option<String> {
    if let Some(combined) = tags.get("streamtitle").map(strip_quotes) {
        if !combined.is_empty() {
            return Some(combined.to_string());
        }
    }

    let title = tags.get("title").map(strip_quotes);
    match (tags.get("artist").map(strip_quotes), title) {
        (Some(artist), Some(title)) => Some(format!("{} - {}", artist, title)),
        (None, Some(title)) => Some(title.to_string()),
        _ => None,
    }
}

pub fn resolve_genre(tags: &Tags) -> Option<&str> {
    tags.get_any(&["genre", "icy-genre"])
}

/// Split a display title into `(artist, song)` at the first `" - "`.
pub fn split_artist_title(title: &str) -> (Option<&str>, &str) {
    match title.split_once(" - ") {
        Some((artist, song)) if !artist.trim().is_empty() => (Some(artist.trim()), song.trim()),
        _ => (None, title.trim()),
    }
}

/// Artist and song for a metadata lookup.
///
/// Separate artist and title tags are used as they are when there is no
/// combined stream title; otherwise the resolved title is split.
pub fn track_parts(tags: &Tags, resolved: &str) -> (Option<String>, String) {
    if tags.get("streamtitle").is_none() {
        if let (Some(artist), Some(title)) = (tags.get("artist"), tags.get("title")) {
            return (
                Some(strip_quotes(artist).to_string()),
                strip_quotes(title).to_string(),
            );
        }
    }
    let (artist, song) = split_artist_title(resolved);
    (artist.map(str::to_string), song.to_string())
}

/// Remembers what a session last announced so repeats stay silent.
#[derive(Debug, Default)]
pub struct TitleTracker {
    title: Option<String>,
    genre: Option<String>,
}

impl TitleTracker {
    /// Returns the title if it differs from the previously announced one.
    pub fn title_changed(&mut self, tags: &Tags) -> Option<String> {
        let title = resolve_title(tags)?;
        if self.title.as_deref() == Some(title.as_str()) {
            return None;
        }
        self.title = Some(title.clone());
        Some(title)
    }

    pub fn genre_changed(&mut self, tags: &Tags) -> Option<String> {
        let genre = resolve_genre(tags)?;
        if self.genre.as_deref() == Some(genre) {
            return None;
        }
        self.genre = Some(genre.to_string());
        Some(genre.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_title_wins_and_loses_its_quotes() {
        let mut tags = Tags::new();
        tags.insert_format("ARTIST", "Ignored");
        tags.insert_format("TITLE", "Also ignored");
        tags.insert_stream("StreamTitle", "'Boards of Canada - Roygbiv'");
        assert_eq!(resolve_title(&tags).as_deref(), Some("Boards of Canada - Roygbiv"));
    }

    #[test]
    fn falls_back_to_artist_and_title() {
        let mut tags = Tags::new();
        tags.insert_format("artist", "Stereolab");
        tags.insert_format("title", "\"French Disko\"");
        assert_eq!(resolve_title(&tags).as_deref(), Some("Stereolab - French Disko"));

        let mut only_title = Tags::new();
        only_title.insert_format("title", "Station ID");
        assert_eq!(resolve_title(&only_title).as_deref(), Some("Station ID"));

        assert_eq!(resolve_title(&Tags::new()), None);
    }

    #[test]
    fn short_values_keep_their_quotes() {
        assert_eq!(strip_quotes("''"), "''");
        assert_eq!(strip_quotes("'a'"), "a");
        assert_eq!(strip_quotes("'mismatch\""), "'mismatch\"");
    }

    #[test]
    fn stream_level_genre_before_format_level() {
        let mut tags = Tags::new();
        tags.insert_format("genre", "Rock");
        tags.insert_stream("icy-genre", "Jazz");
        assert_eq!(resolve_genre(&tags), Some("Jazz"));
    }

    #[test]
    fn tracker_announces_each_change_once() {
        let mut tracker = TitleTracker::default();
        let mut tags = Tags::new();
        tags.insert_stream("streamtitle", "A - One");

        assert_eq!(tracker.title_changed(&tags).as_deref(), Some("A - One"));
        assert_eq!(tracker.title_changed(&tags), None);

        tags.insert_stream("streamtitle", "A - Two");
        assert_eq!(tracker.title_changed(&tags).as_deref(), Some("A - Two"));

        tags.insert_stream("icy-genre", "Ambient");
        assert_eq!(tracker.genre_changed(&tags).as_deref(), Some("Ambient"));
        assert_eq!(tracker.genre_changed(&tags), None);
    }

    #[test]
    fn lookup_parts_prefer_separate_tags() {
        let mut tags = Tags::new();
        tags.insert_format("artist", "Sigur Rós");
        tags.insert_format("title", "Hoppípolla - Live");
        let resolved = resolve_title(&tags).unwrap();
        assert_eq!(
            track_parts(&tags, &resolved),
            (Some("Sigur Rós".to_string()), "Hoppípolla - Live".to_string())
        );

        tags.insert_stream("streamtitle", "Múm - Green Grass of Tunnel");
        let resolved = resolve_title(&tags).unwrap();
        assert_eq!(
            track_parts(&tags, &resolved),
            (Some("Múm".to_string()), "Green Grass of Tunnel".to_string())
        );
    }

    #[test]
    fn splits_on_first_separator() {
        assert_eq!(split_artist_title("A - B - C"), (Some("A"), "B - C"));
        assert_eq!(split_artist_title("Just a jingle"), (None, "Just a jingle"));
        assert_eq!(split_artist_title(" - Untitled"), (None, "- Untitled"));
    }
}
