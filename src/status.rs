//! Cross-thread state shared by the session worker and the polling loop
//!
//! Every cell here has one writer and one reader and keeps only the latest
//! value. If the UI polls slower than the worker posts, intermediate values
//! are lost, which is fine for a progress bar or a title line.

use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard};

/// A single-slot, latest-value-wins mailbox.
#[derive(Debug)]
pub struct Mailbox<T> {
    slot: Mutex<Option<T>>,
}

impl<T> Mailbox<T> {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<T>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace whatever is waiting with `value`.
    pub fn post(&self, value: T) {
        *self.slot() = Some(value);
    }

    /// Take the waiting value, leaving the mailbox empty.
    pub fn take(&self) -> Option<T> {
        self.slot().take()
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Buffer-fill percentage, a lock-free mailbox around one atomic.
#[derive(Debug)]
pub struct FillCell(AtomicI32);

impl FillCell {
    const EMPTY: i32 = -1;

    pub const fn new() -> Self {
        Self(AtomicI32::new(Self::EMPTY))
    }

    pub fn post(&self, percent: u8) {
        self.0.store(percent.min(100) as i32, Ordering::Release);
    }

    pub fn take(&self) -> Option<u8> {
        match self.0.swap(Self::EMPTY, Ordering::AcqRel) {
            Self::EMPTY => None,
            percent => Some(percent as u8),
        }
    }
}

impl Default for FillCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Output gain in [0, 1], read by the output callback on every tick.
#[derive(Debug)]
pub struct Volume(AtomicU32);

impl Volume {
    pub fn new(gain: f32) -> Self {
        Self(AtomicU32::new(gain.clamp(0.0, 1.0).to_bits()))
    }

    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, gain: f32) {
        self.0.store(gain.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn step_up(&self, step: f32) -> f32 {
        let gain = (self.get() + step).clamp(0.0, 1.0);
        self.set(gain);
        gain
    }

    pub fn step_down(&self, step: f32) -> f32 {
        let gain = (self.get() - step).clamp(0.0, 1.0);
        self.set(gain);
        gain
    }

    pub fn percent(&self) -> u8 {
        (self.get() * 100.0).round() as u8
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Opening = 0,
    Prebuffering = 1,
    Playing = 2,
    Stopping = 3,
    Closed = 4,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Opening,
            1 => SessionState::Prebuffering,
            2 => SessionState::Playing,
            3 => SessionState::Stopping,
            _ => SessionState::Closed,
        }
    }
}

/// A resolved in-band title change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NowPlaying {
    pub station: String,
    /// What to display, e.g. `"Artist - Song"`
    pub title: String,
    pub artist: Option<String>,
    pub song: String,
}

/// Everything the worker publishes for the UI, plus the shared volume.
#[derive(Debug)]
pub struct PlayerContext {
    pub playing: Mailbox<bool>,
    pub buffer_fill: FillCell,
    pub now_playing: Mailbox<NowPlaying>,
    /// e.g. `"Mp3 128kbps"`
    pub stream_format: Mailbox<String>,
    /// Measured download rate in KiB/s
    pub bandwidth: Mailbox<f32>,
    pub genre: Mailbox<String>,
    pub volume: Volume,
    state: AtomicU8,
}

impl PlayerContext {
    pub fn new() -> Self {
        Self {
            playing: Mailbox::new(),
            buffer_fill: FillCell::new(),
            now_playing: Mailbox::new(),
            stream_format: Mailbox::new(),
            bandwidth: Mailbox::new(),
            genre: Mailbox::new(),
            volume: Volume::default(),
            state: AtomicU8::new(SessionState::Closed as u8),
        }
    }

    pub fn session_state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_session_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

impl Default for PlayerContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailbox_keeps_latest_value() {
        let mailbox = Mailbox::new();
        assert_eq!(mailbox.take(), None);
        mailbox.post(1);
        mailbox.post(2);
        assert_eq!(mailbox.take(), Some(2));
        assert_eq!(mailbox.take(), None);
    }

    #[test]
    fn fill_cell_caps_and_drains() {
        let fill = FillCell::new();
        fill.post(250);
        assert_eq!(fill.take(), Some(100));
        assert_eq!(fill.take(), None);
        fill.post(0);
        assert_eq!(fill.take(), Some(0));
    }

    #[test]
    fn volume_steps_stay_in_range() {
        let volume = Volume::new(0.97);
        assert_eq!(volume.step_up(0.05), 1.0);
        volume.set(0.02);
        assert_eq!(volume.step_down(0.05), 0.0);
        volume.set(0.5);
        volume.step_up(0.05);
        assert_eq!(volume.percent(), 55);
    }
}
