//! Client-side reconciliation: listener sets for inbound notifications and a
//! local playback anchor that turns the last event into a live position.
//!
//! Transport-agnostic; feed it [`ServerFrame`]s and acks from whatever socket
//! the presentation layer uses; [`crate::connection::SyncClient`] is the
//! socket-backed driver.

use serde_json::Value;
use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};
use tracing::error;

use crate::{
    clock,
    error::AckError,
    event::{MemberEvent, SyncEvent},
    protocol::{Ack, ServerFrame},
    sync::InitState,
    video::PlayStatus,
};

/* ------------ 本地錨點 ------------ */

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackAnchor {
    pub progress:      f64,
    pub anchor_time:   i64,
    pub playback_rate: f64,
    pub status:        PlayStatus,
}

impl PlaybackAnchor {
    /// First anchor after joining: the snapshot's live position at `serverTime`.
    pub fn from_init(init: &InitState) -> Self {
        Self {
            progress:      init.video_state.current_progress,
            anchor_time:   init.server_time,
            playback_rate: init.video_state.playback_rate,
            status:        init.video_state.status,
        }
    }

    pub fn from_event(ev: &SyncEvent) -> Self {
        let p = ev.payload();
        Self {
            progress:      p.progress,
            anchor_time:   ev.server_time(),
            playback_rate: p.playback_rate,
            status:        p.status,
        }
    }

    /// Expected position at `now`; clamped to `[0, duration]` when the media
    /// length is known.
    pub fn position_at(&self, now: i64, duration: Option<f64>) -> f64 {
        let raw = match self.status {
            PlayStatus::Playing => clock::extrapolate(self.progress, self.anchor_time, now, self.playback_rate),
            _ => self.progress,
        };
        let pos = raw.max(0.0);
        match duration {
            Some(d) if d >= 0.0 => pos.min(d),
            _ => pos,
        }
    }

    /// Positive when the local player is ahead of the room.
    pub fn drift(&self, observed: f64, now: i64) -> f64 { observed - self.position_at(now, None) }

    pub fn needs_resync(&self, observed: f64, now: i64, threshold_secs: f64) -> bool {
        self.drift(observed, now).abs() > threshold_secs
    }
}

/* ------------ 監聽器 ------------ */

pub type ListenerId = u64;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct ListenerSet<T> {
    label:     &'static str,
    listeners: Mutex<HashMap<ListenerId, Callback<T>>>,
}

impl<T> ListenerSet<T> {
    fn new(label: &'static str) -> Self { Self { label, listeners: Mutex::new(HashMap::new()) } }

    fn insert(&self, id: ListenerId, cb: Callback<T>) {
        self.listeners.lock().unwrap_or_else(|p| p.into_inner()).insert(id, cb);
    }

    fn remove(&self, id: ListenerId) -> bool {
        self.listeners.lock().unwrap_or_else(|p| p.into_inner()).remove(&id).is_some()
    }

    fn clear(&self) { self.listeners.lock().unwrap_or_else(|p| p.into_inner()).clear(); }

    fn len(&self) -> usize { self.listeners.lock().unwrap_or_else(|p| p.into_inner()).len() }

    /// Each listener runs in isolation; a panicking one is logged and skipped.
    /// Callbacks run outside the lock so they may (un)register listeners.
    fn notify(&self, value: &T) -> usize {
        let snapshot: Vec<Callback<T>> =
            self.listeners.lock().unwrap_or_else(|p| p.into_inner()).values().cloned().collect();
        let mut delivered = 0;
        for cb in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| cb(value))) {
                Ok(()) => delivered += 1,
                Err(_) => error!(listener = self.label, "listener panicked"),
            }
        }
        delivered
    }
}

pub struct Reconciler {
    next_id:   AtomicU64,
    events:    ListenerSet<SyncEvent>,
    errors:    ListenerSet<AckError>,
    joined:    ListenerSet<MemberEvent>,
    left:      ListenerSet<MemberEvent>,
    anchor:    Mutex<Option<PlaybackAnchor>>,
}

impl Default for Reconciler {
    fn default() -> Self { Self::new() }
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            events:  ListenerSet::new("sync:event"),
            errors:  ListenerSet::new("error"),
            joined:  ListenerSet::new("member:joined"),
            left:    ListenerSet::new("member:left"),
            anchor:  Mutex::new(None),
        }
    }

    fn id(&self) -> ListenerId { self.next_id.fetch_add(1, Ordering::Relaxed) }

    pub fn on_sync_event(&self, cb: impl Fn(&SyncEvent) + Send + Sync + 'static) -> ListenerId {
        let id = self.id();
        self.events.insert(id, Arc::new(cb));
        id
    }

    pub fn on_error(&self, cb: impl Fn(&AckError) + Send + Sync + 'static) -> ListenerId {
        let id = self.id();
        self.errors.insert(id, Arc::new(cb));
        id
    }

    pub fn on_member_joined(&self, cb: impl Fn(&MemberEvent) + Send + Sync + 'static) -> ListenerId {
        let id = self.id();
        self.joined.insert(id, Arc::new(cb));
        id
    }

    pub fn on_member_left(&self, cb: impl Fn(&MemberEvent) + Send + Sync + 'static) -> ListenerId {
        let id = self.id();
        self.left.insert(id, Arc::new(cb));
        id
    }

    /// Ids are unique across all four sets.
    pub fn off(&self, id: ListenerId) -> bool {
        self.events.remove(id) | self.errors.remove(id) | self.joined.remove(id) | self.left.remove(id)
    }

    pub fn clear(&self) {
        self.events.clear();
        self.errors.clear();
        self.joined.clear();
        self.left.clear();
    }

    pub fn listener_count(&self) -> usize {
        self.events.len() + self.errors.len() + self.joined.len() + self.left.len()
    }

    pub fn anchor(&self) -> Option<PlaybackAnchor> {
        *self.anchor.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn position_at(&self, now: i64, duration: Option<f64>) -> Option<f64> {
        self.anchor().map(|a| a.position_at(now, duration))
    }

    pub fn apply_init(&self, init: &InitState) {
        self.set_anchor(PlaybackAnchor::from_init(init));
    }

    fn set_anchor(&self, a: PlaybackAnchor) {
        *self.anchor.lock().unwrap_or_else(|p| p.into_inner()) = Some(a);
    }

    /// Routes one inbound frame. Acks are not handled here; see [`Reconciler::settle`].
    pub fn handle_frame(&self, frame: &ServerFrame) {
        match frame {
            ServerFrame::Sync(ev) => {
                self.set_anchor(PlaybackAnchor::from_event(ev));
                self.events.notify(ev);
            }
            ServerFrame::MemberJoined(ev) => { self.joined.notify(ev); }
            ServerFrame::MemberLeft(ev)   => { self.left.notify(ev); }
            ServerFrame::Ack(_) => {}
        }
    }

    /// Unwraps a command's ack; failures also reach the error listeners.
    pub fn settle(&self, ack: Ack) -> Result<Value, AckError> {
        if ack.ok {
            return Ok(ack.data.unwrap_or(Value::Null));
        }
        let err = ack.error.unwrap_or_else(|| AckError {
            code:    "UNKNOWN_ERROR".into(),
            message: "request failed".into(),
        });
        self.errors.notify(&err);
        Err(err)
    }

    pub fn notify_error(&self, err: &AckError) { self.errors.notify(err); }
}
