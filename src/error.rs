use std::io;

use thiserror::Error;

/// Failures that keep a session from ever reaching playback.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("cannot open stream {url}")]
    Open {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },

    #[error("cannot recognise stream format")]
    Probe(#[source] symphonia::core::errors::Error),

    #[error("stream has no audio track")]
    NoAudioTrack,

    #[error("no decoder for codec {0}")]
    Decoder(String, #[source] symphonia::core::errors::Error),

    #[error("cannot resample from {rate} Hz with {channels} channels")]
    Resampler { rate: u32, channels: usize },

    #[error("no audio output device available")]
    NoOutputDevice,

    #[error("audio output failed: {0}")]
    Device(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Fatal errors while reading an already opened stream.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("network read failed")]
    Network(#[from] io::Error),

    #[error("demuxer failed")]
    Demux(#[source] symphonia::core::errors::Error),

    #[error("cannot continue into the next chained stream")]
    Restart(#[source] StartError),
}

#[derive(Debug, Error)]
pub enum PlayError {
    #[error("cannot spawn session worker")]
    Spawn(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read station list")]
    Io(#[from] io::Error),

    #[error("station list is not a JSON object of name to URL")]
    Json(#[from] serde_json::Error),
}

#[cfg(feature = "musicbrainz")]
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("metadata request failed")]
    Http(#[from] Box<ureq::Error>),

    #[error("cannot read metadata response")]
    Body(#[from] io::Error),

    #[error("malformed metadata response")]
    Json(#[from] serde_json::Error),
}
