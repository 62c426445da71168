//! Authoritative per-room playback state.
//!
//! `progress` is the anchor: the position that was accurate at `anchor_time`.
//! While playing, the live position is extrapolated from it; otherwise it is the
//! position as recorded.

use serde::{Deserialize, Serialize};

use crate::clock;

pub const DEFAULT_RATE: f64 = 1.0;
pub const MAX_RATE: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayStatus {
    Playing,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoState {
    pub source:           Option<String>,
    pub status:           PlayStatus,
    pub progress:         f64,
    pub anchor_time:      i64,
    pub playback_rate:    f64,
    pub subtitle:         Option<String>,
    pub last_update_time: i64,
}

/// Plain-data projection sent to clients, with the live position resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSnapshot {
    pub source:           Option<String>,
    pub status:           PlayStatus,
    pub progress:         f64,
    pub anchor_time:      i64,
    pub playback_rate:    f64,
    pub subtitle:         Option<String>,
    pub last_update_time: i64,
    pub current_progress: f64,
}

impl VideoState {
    pub fn new(now: i64) -> Self {
        Self {
            source:           None,
            status:           PlayStatus::Stopped,
            progress:         0.0,
            anchor_time:      now,
            playback_rate:    DEFAULT_RATE,
            subtitle:         None,
            last_update_time: now,
        }
    }

    pub fn is_playing(&self) -> bool { self.status == PlayStatus::Playing }

    /// Live position at `now`, never negative.
    pub fn current_progress(&self, now: i64) -> f64 {
        if !self.is_playing() {
            return self.progress;
        }
        clock::extrapolate(self.progress, self.anchor_time, now, self.playback_rate).max(0.0)
    }

    /// Turn the moving position into a fixed anchor at `now`.
    fn freeze(&mut self, now: i64) {
        self.progress = self.current_progress(now);
        self.anchor_time = now;
    }

    pub fn set_source(&mut self, source: Option<String>, now: i64) {
        self.source = source;
        self.last_update_time = now;
    }

    /// Resume from the recorded position. Re-playing while already playing
    /// keeps the running anchor.
    pub fn play(&mut self, now: i64) {
        if !self.is_playing() {
            self.anchor_time = now;
        }
        self.status = PlayStatus::Playing;
        self.last_update_time = now;
    }

    pub fn pause(&mut self, now: i64) {
        self.freeze(now);
        self.status = PlayStatus::Paused;
        self.last_update_time = now;
    }

    pub fn seek(&mut self, progress: f64, now: i64) {
        self.progress = progress;
        self.anchor_time = now;
        self.last_update_time = now;
    }

    /// The position reached under the old rate is frozen first, so the new
    /// rate only applies from `now` on.
    pub fn set_rate(&mut self, rate: f64, now: i64) {
        self.freeze(now);
        self.playback_rate = rate;
        self.last_update_time = now;
    }

    pub fn set_subtitle(&mut self, subtitle: Option<String>, now: i64) {
        self.subtitle = subtitle;
        self.last_update_time = now;
    }

    pub fn snapshot(&self, now: i64) -> VideoSnapshot {
        VideoSnapshot {
            source:           self.source.clone(),
            status:           self.status,
            progress:         self.progress,
            anchor_time:      self.anchor_time,
            playback_rate:    self.playback_rate,
            subtitle:         self.subtitle.clone(),
            last_update_time: self.last_update_time,
            current_progress: self.current_progress(now),
        }
    }
}

pub fn valid_progress(p: f64) -> bool { p.is_finite() && p >= 0.0 }

pub fn valid_rate(r: f64) -> bool { r.is_finite() && r > 0.0 && r <= MAX_RATE }
