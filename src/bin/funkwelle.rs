//! Headless radio player
//!
//! Usage: `funkwelle [stations.json]`
//!
//! Type a station number to tune in, `s` to stop, `+`/`-` for volume and
//! `q` to quit. Progress, titles and the spectrum go to the log.

use std::io::BufRead;
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError};
use funkwelle::{load_stations, PlaybackController, PlayerConfig, SystemBackend};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "musicbrainz")]
use funkwelle::TrackLookup;
#[cfg(feature = "musicbrainz")]
use std::sync::Arc;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Used when `RUST_LOG` is unset or unparsable
const DEFAULT_LOG_FILTER: &str = "info";

enum Command {
    Select(usize),
    Stop,
    VolumeUp,
    VolumeDown,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    match line.trim() {
        "q" | "quit" => Some(Command::Quit),
        "s" | "stop" => Some(Command::Stop),
        "+" => Some(Command::VolumeUp),
        "-" => Some(Command::VolumeDown),
        other => other.parse().ok().map(Command::Select),
    }
}

fn bar_line(bars: &[f32]) -> String {
    const LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    bars.iter()
        .map(|b| LEVELS[((b.clamp(0.0, 1.0) * 7.0).round()) as usize])
        .collect()
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "stations.json".into());
    let stations = match load_stations(&path) {
        Ok(stations) if !stations.is_empty() => stations,
        Ok(_) => {
            error!(%path, "station list is empty");
            std::process::exit(1);
        }
        Err(e) => {
            error!(%path, error = %e, "cannot load stations");
            std::process::exit(1);
        }
    };
    for (i, station) in stations.iter().enumerate() {
        info!("{:>3}  {}", i + 1, station.name);
    }

    let mut player = PlaybackController::new(SystemBackend::new(), PlayerConfig::default());

    #[cfg(feature = "musicbrainz")]
    let (lookup, mut lookup_events) = {
        use funkwelle::lookup::{MusicBrainzConfig, MusicBrainzLookup};
        match MusicBrainzLookup::spawn(MusicBrainzConfig::default()) {
            Ok((lookup, events)) => {
                let lookup = Arc::new(lookup);
                player = player.with_lookup(lookup.clone());
                (Some(lookup), Some(events))
            }
            Err(e) => {
                error!(error = %e, "metadata lookup unavailable");
                (None, None)
            }
        }
    };

    let (commands, inbox) = channel::unbounded();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines().map_while(Result::ok) {
            if let Some(command) = parse_command(&line) {
                if commands.send(command).is_err() {
                    break;
                }
            }
        }
    });

    let mut current: Option<(Option<String>, String)> = None;

    loop {
        match inbox.recv_timeout(POLL_INTERVAL) {
            Ok(Command::Select(n)) => match stations.get(n.wrapping_sub(1)) {
                Some(station) => {
                    info!(station = %station.name, "tuning in");
                    current = None;
                    if let Err(e) = player.play(&station.url, &station.name) {
                        error!(error = %e, "cannot start playback");
                    }
                }
                None => error!(n, "no such station"),
            },
            Ok(Command::Stop) => player.stop(),
            Ok(Command::VolumeUp) => {
                player.volume_up();
                info!(volume = player.context().volume.percent(), "volume");
            }
            Ok(Command::VolumeDown) => {
                player.volume_down();
                info!(volume = player.context().volume.percent(), "volume");
            }
            Ok(Command::Quit) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let context = player.context();
        if let Some(playing) = context.playing.take() {
            info!(playing, "playback");
        }
        if let Some(percent) = context.buffer_fill.take() {
            if percent < 100 {
                info!(percent, "buffering");
            }
        }
        if let Some(format) = context.stream_format.take() {
            info!(%format, "stream");
        }
        if let Some(kib) = context.bandwidth.take() {
            tracing::debug!(kib_per_sec = kib, "bandwidth");
        }
        if let Some(genre) = context.genre.take() {
            info!(%genre, "genre");
        }
        if let Some(now) = context.now_playing.take() {
            info!(station = %now.station, title = %now.title, "now playing");
            current = Some((now.artist, now.song));
        }

        #[cfg(feature = "musicbrainz")]
        {
            if let Some(events) = lookup_events.as_mut() {
                while let Ok(event) = events.pop() {
                    tracing::debug!(status = ?event.status, query = %event.query, "lookup");
                }
            }
            if let (Some(lookup), Some((artist, song))) = (&lookup, &current) {
                let artist = artist.as_deref().unwrap_or("");
                if lookup.has_result(artist, song) {
                    if let Some(track) = lookup.result(artist, song) {
                        info!(album = %track.album, year = %track.year, genre = %track.genre, "track info");
                    }
                    current = None;
                }
            }
        }

        let spectrum = player.spectrum();
        spectrum.process_samples();
        let (bars, updated) = spectrum.get_spectrum();
        if updated && player.is_running() {
            tracing::trace!(spectrum = %bar_line(&bars));
        }
    }

    player.stop();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
        assert!(EnvFilter::try_new("funkwelle=trace").is_ok());
    }

    #[test]
    fn commands() {
        assert!(matches!(parse_command(" 3 "), Some(Command::Select(3))));
        assert!(matches!(parse_command("s"), Some(Command::Stop)));
        assert!(matches!(parse_command("+"), Some(Command::VolumeUp)));
        assert!(matches!(parse_command("q"), Some(Command::Quit)));
        assert!(parse_command("louder").is_none());
    }

    #[test]
    fn bar_line_maps_levels() {
        assert_eq!(bar_line(&[0.0, 0.5, 1.0, 2.0]), "▁▅██");
    }
}
