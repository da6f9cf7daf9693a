//! Mood state machine driven by lifecycle events and quiet-period
//! timers.
//!
//! The tracker is the single writer for mood and session statistics.
//! Its dispatch loop consumes decoded events from an mpsc channel and
//! doubles as the timer wheel: `recv_timeout` waits until the earliest
//! pending deadline, so timer effects run on the same thread that
//! applies events and can never race a cancellation.

use crate::stats::{ActivityRecord, SessionStats, ZERO_DURATION};
use crate::timer::Countdown;
use perch_protocol::{EventKind, LifecycleEvent};
use serde::Serialize;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Quiet period after which the tracker drifts off to sleep.
pub const SLEEP_DELAY: Duration = Duration::from_secs(300);
/// Delay after a tool completion before reverting to idle.
pub const REVERT_DELAY: Duration = Duration::from_secs(3);
const DURATION_TICK: Duration = Duration::from_secs(1);
/// recv_timeout bound for the rare moment when no timer is armed.
const IDLE_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Idle,
    Thinking,
    Working,
    Happy,
    Alert,
    Sleeping,
}

impl Mood {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mood::Idle => "idle",
            Mood::Thinking => "thinking",
            Mood::Working => "working",
            Mood::Happy => "happy",
            Mood::Alert => "alert",
            Mood::Sleeping => "sleeping",
        }
    }
}

/// Read-only view published for the rendering layer after every
/// dispatch and timer fire.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub mood: Mood,
    pub session_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_started_at: Option<String>,
    pub duration: String,
    pub event_count: u64,
    pub recent_events: Vec<ActivityRecord>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            mood: Mood::Idle,
            session_active: false,
            session_started_at: None,
            duration: ZERO_DURATION.to_string(),
            event_count: 0,
            recent_events: Vec::new(),
        }
    }
}

/// Cloneable read handle over the tracker's published snapshot.
#[derive(Clone)]
pub struct TrackerHandle {
    shared: Arc<Mutex<StatusSnapshot>>,
}

impl TrackerHandle {
    pub fn snapshot(&self) -> StatusSnapshot {
        self.shared
            .lock()
            .map(|snapshot| snapshot.clone())
            .unwrap_or_default()
    }

    pub fn mood(&self) -> Mood {
        self.snapshot().mood
    }
}

type MoodObserver = Box<dyn FnMut(Mood) + Send>;

pub struct Tracker {
    mood: Mood,
    stats: SessionStats,
    sleep_timer: Countdown,
    revert_timer: Countdown,
    duration_tick: Countdown,
    shared: Arc<Mutex<StatusSnapshot>>,
    observer: Option<MoodObserver>,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker {
    pub fn new() -> Self {
        let mut tracker = Self {
            mood: Mood::Idle,
            stats: SessionStats::new(),
            sleep_timer: Countdown::new(),
            revert_timer: Countdown::new(),
            duration_tick: Countdown::new(),
            shared: Arc::new(Mutex::new(StatusSnapshot::default())),
            observer: None,
        };
        tracker.sleep_timer.reset(Instant::now(), SLEEP_DELAY);
        tracker
    }

    pub fn handle(&self) -> TrackerHandle {
        TrackerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Registers a callback invoked on actual mood changes only;
    /// a transition to the current mood is not re-notified.
    pub fn set_observer(&mut self, observer: impl FnMut(Mood) + Send + 'static) {
        self.observer = Some(Box::new(observer));
    }

    pub fn mood(&self) -> Mood {
        self.mood
    }

    /// Consumes decoded events until every sender is dropped. All
    /// state mutation and every timer effect happens on the calling
    /// thread.
    pub fn run(mut self, events: Receiver<LifecycleEvent>) {
        loop {
            let now = Instant::now();
            self.fire_due(now);

            let wait = match self.next_deadline() {
                Some(deadline) => deadline.saturating_duration_since(now),
                None => IDLE_WAIT,
            };
            match events.recv_timeout(wait) {
                Ok(event) => self.handle_event(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    pub fn handle_event(&mut self, event: LifecycleEvent) {
        self.handle_event_at(event, Instant::now());
    }

    /// Applies one event against the transition table. Every dispatch,
    /// recognized or not, re-arms the sleep timer.
    pub fn handle_event_at(&mut self, event: LifecycleEvent, now: Instant) {
        self.sleep_timer.cancel();

        match event.kind {
            EventKind::SessionStart => {
                self.stats.start_session(now);
                self.stats.note_event();
                self.duration_tick.reset(now, DURATION_TICK);
                self.transition(Mood::Thinking);
            }
            EventKind::PreToolUse => {
                self.stats
                    .record_tool_start(event.tool, event.tool_input, event.tool_use_id);
                self.revert_timer.cancel();
                self.transition(Mood::Working);
            }
            EventKind::PostToolUse => {
                let success = event.is_success();
                self.stats
                    .record_tool_end(event.tool, event.tool_use_id, success);
                self.transition(if success { Mood::Happy } else { Mood::Alert });
                self.revert_timer.reset(now, REVERT_DELAY);
            }
            EventKind::SessionEnd => {
                self.stats.note_event();
                self.stats.end_session();
                self.duration_tick.cancel();
                self.revert_timer.cancel();
                self.transition(Mood::Idle);
            }
            EventKind::Other => {
                debug!(status = %event.status, "Ignoring unrecognized event kind");
            }
        }

        self.sleep_timer.reset(now, SLEEP_DELAY);
        self.publish();
    }

    /// Fires whichever timers are due at `now`. Safe to call
    /// spuriously; deadlines are cleared as they fire.
    pub fn fire_due(&mut self, now: Instant) {
        let mut fired = false;

        if self.sleep_timer.take_due(now) {
            self.transition(Mood::Sleeping);
            fired = true;
        }
        if self.revert_timer.take_due(now) {
            self.transition(Mood::Idle);
            fired = true;
        }
        if self.duration_tick.take_due(now) {
            self.stats.refresh_duration(now);
            if self.stats.session_active() {
                self.duration_tick.reset(now, DURATION_TICK);
            }
            fired = true;
        }

        if fired {
            self.publish();
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.sleep_timer.deadline(),
            self.revert_timer.deadline(),
            self.duration_tick.deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn transition(&mut self, next: Mood) {
        if self.mood == next {
            return;
        }
        info!(from = self.mood.as_str(), to = next.as_str(), "Mood transition");
        self.mood = next;
        if let Some(observer) = self.observer.as_mut() {
            observer(next);
        }
    }

    fn publish(&mut self) {
        let snapshot = StatusSnapshot {
            mood: self.mood,
            session_active: self.stats.session_active(),
            session_started_at: self.stats.started_at().map(|at| at.to_rfc3339()),
            duration: self.stats.formatted_duration().to_string(),
            event_count: self.stats.event_count(),
            recent_events: self.stats.recent().cloned().collect(),
        };
        if let Ok(mut shared) = self.shared.lock() {
            *shared = snapshot;
        }
    }
}
