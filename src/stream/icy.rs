//! ICY (Shoutcast/Icecast) in-band metadata
//!
//! With `Icy-MetaData: 1` the server interleaves a metadata block after
//! every `icy-metaint` bytes of audio. A block starts with one length byte
//! (in units of 16 bytes) followed by NUL-padded text like
//! `StreamTitle='Artist - Song';StreamUrl='';`.

use std::io::{self, Read};
use std::sync::{Arc, Mutex};

use hashbrown::HashMap;

/// Latest ICY key/value pairs, shared between the reader and the stream.
#[derive(Clone, Debug, Default)]
pub struct IcyMetadata(Arc<Mutex<HashMap<String, String>>>);

impl IcyMetadata {
    pub fn insert(&self, key: &str, value: &str) {
        let mut map = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        map.insert(key.to_ascii_lowercase(), value.to_string());
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Strips metadata blocks out of an ICY byte stream, leaving plain audio.
pub struct IcyReader<R> {
    inner: R,
    metaint: Option<usize>,
    until_meta: usize,
    metadata: IcyMetadata,
}

impl<R: Read> IcyReader<R> {
    /// `metaint` is the `icy-metaint` response header; `None` passes bytes through.
    pub fn new(inner: R, metaint: Option<usize>, metadata: IcyMetadata) -> Self {
        let metaint = metaint.filter(|m| *m > 0);
        Self {
            inner,
            until_meta: metaint.unwrap_or(0),
            metaint,
            metadata,
        }
    }

    fn read_metadata_block(&mut self) -> io::Result<()> {
        let mut len = [0u8; 1];
        self.inner.read_exact(&mut len)?;
        let len = len[0] as usize * 16;
        if len == 0 {
            return Ok(());
        }

        let mut block = vec![0u8; len];
        self.inner.read_exact(&mut block)?;
        let text = decode_text(block);
        for (key, value) in parse_block(&text) {
            tracing::trace!(key, value, "icy metadata");
            self.metadata.insert(key, value);
        }
        Ok(())
    }
}

impl<R: Read> Read for IcyReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(metaint) = self.metaint else {
            return self.inner.read(buf);
        };
        if buf.is_empty() {
            return Ok(0);
        }

        if self.until_meta == 0 {
            self.read_metadata_block()?;
            self.until_meta = metaint;
        }

        let want = buf.len().min(self.until_meta);
        let n = self.inner.read(&mut buf[..want])?;
        self.until_meta -= n;
        Ok(n)
    }
}

/// UTF-8 if it is valid, otherwise Latin-1, which older Shoutcast servers send.
fn decode_text(block: Vec<u8>) -> String {
    match String::from_utf8(block) {
        Ok(text) => text,
        Err(e) => e.into_bytes().into_iter().map(char::from).collect(),
    }
}

/// `Key='value';` pairs. Values may themselves contain quotes or semicolons,
/// so a value only ends at a `';` sequence.
fn parse_block(text: &str) -> Vec<(&str, &str)> {
    let mut rest = text.trim_end_matches('\0');
    let mut pairs = vec![];

    while let Some(eq) = rest.find("='") {
        let key = rest[..eq].trim();
        let after = &rest[eq + 2..];
        let (value, next) = match after.find("';") {
            Some(end) => (&after[..end], &after[end + 2..]),
            None => (after.trim_end().trim_end_matches('\''), ""),
        };
        if !key.is_empty() {
            pairs.push((key, value));
        }
        rest = next;
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn meta_block(text: &str) -> Vec<u8> {
        let blocks = (text.len() + 15) / 16;
        let mut out = vec![blocks as u8];
        out.extend_from_slice(text.as_bytes());
        out.resize(1 + blocks * 16, 0);
        out
    }

    #[test]
    fn strips_interleaved_metadata() {
        let mut wire = b"abcd".to_vec();
        wire.extend(meta_block("StreamTitle='Nils Frahm - Says';StreamUrl='';"));
        wire.extend_from_slice(b"efgh");
        wire.push(0);
        wire.extend_from_slice(b"ij");

        let metadata = IcyMetadata::default();
        let mut reader = IcyReader::new(Cursor::new(wire), Some(4), metadata.clone());
        let mut audio = vec![];
        reader.read_to_end(&mut audio).unwrap();

        assert_eq!(audio, b"abcdefghij");
        let tags = metadata.snapshot();
        assert_eq!(tags.get("streamtitle").map(String::as_str), Some("Nils Frahm - Says"));
        assert_eq!(tags.get("streamurl").map(String::as_str), Some(""));
    }

    #[test]
    fn passes_through_without_metaint() {
        let mut reader = IcyReader::new(Cursor::new(b"plain".to_vec()), None, IcyMetadata::default());
        let mut audio = vec![];
        reader.read_to_end(&mut audio).unwrap();
        assert_eq!(audio, b"plain");
    }

    #[test]
    fn latin1_titles_keep_their_accents() {
        let mut block = vec![2u8];
        block.extend_from_slice(b"StreamTitle='Bj\xf6rk - J\xf3ga';");
        block.resize(1 + 32, 0);
        let mut wire = b"ab".to_vec();
        wire.extend(block);

        let metadata = IcyMetadata::default();
        let mut reader = IcyReader::new(Cursor::new(wire), Some(2), metadata.clone());
        reader.read_to_end(&mut vec![]).unwrap();

        let tags = metadata.snapshot();
        assert_eq!(tags.get("streamtitle").map(String::as_str), Some("Björk - Jóga"));
    }

    #[test]
    fn utf8_titles_are_left_alone() {
        assert_eq!(decode_text("Sigur Rós".as_bytes().to_vec()), "Sigur Rós");
    }

    #[test]
    fn values_may_contain_quotes() {
        let pairs = parse_block("StreamTitle='Guns N' Roses - Don't Cry';\0\0\0");
        assert_eq!(pairs, vec![("StreamTitle", "Guns N' Roses - Don't Cry")]);

        let unterminated = parse_block("StreamTitle='Tail'");
        assert_eq!(unterminated, vec![("StreamTitle", "Tail")]);
    }
}
