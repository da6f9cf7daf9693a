//! Per-session statistics derived from the event stream.
//!
//! Owned exclusively by the tracker; nothing here is thread-safe on
//! its own. Counters and the activity log are cleared at session
//! start, not session end, so the just-ended session stays visible as
//! a historical record.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::time::Instant;

pub const RECENT_CAPACITY: usize = 20;
pub const ZERO_DURATION: &str = "0m 00s";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Running,
    Success,
    Error,
}

/// One row of the bounded recent-activity log.
///
/// A running record is flipped to its terminal status in place when
/// the matching completion arrives, keeping its original position and
/// timestamp. `tool_input` is only captured on the invocation-start
/// record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityRecord {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    pub status: ToolStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
}

#[derive(Debug)]
pub struct SessionStats {
    session_start: Option<Instant>,
    started_at: Option<DateTime<Utc>>,
    event_count: u64,
    recent: VecDeque<ActivityRecord>,
    formatted_duration: String,
    next_record_id: u64,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            session_start: None,
            started_at: None,
            event_count: 0,
            recent: VecDeque::with_capacity(RECENT_CAPACITY),
            formatted_duration: ZERO_DURATION.to_string(),
            next_record_id: 0,
        }
    }

    /// Begins a fresh session: the previous session's count and log
    /// are discarded here, not at `end_session`.
    pub fn start_session(&mut self, now: Instant) {
        self.session_start = Some(now);
        self.started_at = Some(Utc::now());
        self.event_count = 0;
        self.recent.clear();
        self.formatted_duration = ZERO_DURATION.to_string();
    }

    /// Clears the start timestamp so the duration display reverts to
    /// its zero state. Count and log survive until the next
    /// `start_session`.
    pub fn end_session(&mut self) {
        self.session_start = None;
        self.started_at = None;
        self.formatted_duration = ZERO_DURATION.to_string();
    }

    /// Counts a recognized event that has no activity record of its
    /// own (session start/end).
    pub fn note_event(&mut self) {
        self.event_count += 1;
    }

    pub fn record_tool_start(
        &mut self,
        tool: Option<String>,
        tool_input: Option<Map<String, Value>>,
        tool_use_id: Option<String>,
    ) {
        self.event_count += 1;
        let id = self.take_record_id();
        self.push(ActivityRecord {
            id,
            timestamp: Utc::now(),
            kind: "PreToolUse",
            tool,
            status: ToolStatus::Running,
            tool_input,
            tool_use_id,
        });
    }

    /// Matches a completion against the newest running record with the
    /// same invocation id and flips its status in place. When the
    /// start was evicted or the id is absent, appends a terminal
    /// record instead.
    pub fn record_tool_end(
        &mut self,
        tool: Option<String>,
        tool_use_id: Option<String>,
        success: bool,
    ) {
        self.event_count += 1;
        let status = if success {
            ToolStatus::Success
        } else {
            ToolStatus::Error
        };

        if let Some(id) = tool_use_id.as_deref() {
            if let Some(record) = self
                .recent
                .iter_mut()
                .rev()
                .find(|record| {
                    record.status == ToolStatus::Running
                        && record.tool_use_id.as_deref() == Some(id)
                })
            {
                record.status = status;
                return;
            }
        }

        let id = self.take_record_id();
        self.push(ActivityRecord {
            id,
            timestamp: Utc::now(),
            kind: "PostToolUse",
            tool,
            status,
            tool_input: None,
            tool_use_id,
        });
    }

    pub fn refresh_duration(&mut self, now: Instant) {
        let Some(start) = self.session_start else {
            self.formatted_duration = ZERO_DURATION.to_string();
            return;
        };
        let total = now.duration_since(start).as_secs();
        self.formatted_duration = format!("{}m {:02}s", total / 60, total % 60);
    }

    pub fn session_active(&self) -> bool {
        self.session_start.is_some()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    pub fn formatted_duration(&self) -> &str {
        &self.formatted_duration
    }

    pub fn recent(&self) -> impl Iterator<Item = &ActivityRecord> {
        self.recent.iter()
    }

    fn push(&mut self, record: ActivityRecord) {
        self.recent.push_back(record);
        while self.recent.len() > RECENT_CAPACITY {
            self.recent.pop_front();
        }
    }

    fn take_record_id(&mut self) -> u64 {
        self.next_record_id += 1;
        self.next_record_id
    }
}
