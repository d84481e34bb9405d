//! Historical event reader
//!
//! Replays the orchestrator's JSONL conversation logs onto the bus. This is
//! what subscribers see while the manager is in log-only mode.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use seneca_protocol::types::HISTORY_SOURCE;
use seneca_protocol::{parse_timestamp, Event};
use seneca_utils::conversation_log_dir;

use crate::bus::EventBus;

const LOG_PREFIXES: [&str; 2] = ["conversations_", "realtime_"];

/// Event type used when a record names none
const DEFAULT_EVENT_TYPE: &str = "conversation";

/// Reads `conversations_*.jsonl` and `realtime_*.jsonl` files
#[derive(Debug, Clone)]
pub struct LogReader {
    dir: PathBuf,
}

impl Default for LogReader {
    fn default() -> Self {
        Self::new(conversation_log_dir())
    }
}

impl LogReader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn log_files(&self) -> Vec<PathBuf> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %self.dir.display(), error = %e, "Log directory not readable");
                return Vec::new();
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    return false;
                };
                name.ends_with(".jsonl") && LOG_PREFIXES.iter().any(|p| name.starts_with(p))
            })
            .collect();
        files.sort();
        files
    }

    /// Events within `[since, until]`, in file-name then line order
    ///
    /// With a window set, records without a readable timestamp are skipped.
    pub fn read_events(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Vec<Event> {
        let windowed = since.is_some() || until.is_some();
        let mut events = Vec::new();

        for path in self.log_files() {
            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable log file");
                    continue;
                }
            };

            for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
                let Ok(record) = serde_json::from_str::<Value>(line) else {
                    continue;
                };

                let timestamp = record
                    .get("timestamp")
                    .and_then(Value::as_str)
                    .and_then(parse_timestamp);

                if windowed {
                    let Some(ts) = timestamp else { continue };
                    if since.is_some_and(|s| ts < s) || until.is_some_and(|u| ts > u) {
                        continue;
                    }
                }

                events.push(record_to_event(record, timestamp));
            }
        }

        events
    }

    /// Publish every event since `since` to the bus; returns how many
    pub fn backfill(&self, bus: &EventBus, since: Option<DateTime<Utc>>) -> usize {
        let events = self.read_events(since, None);
        let count = events.len();
        for event in events {
            bus.publish(event);
        }
        debug!(count, dir = %self.dir.display(), "Backfill complete");
        count
    }
}

fn record_to_event(record: Value, timestamp: Option<DateTime<Utc>>) -> Event {
    let text = |key: &str| record.get(key).and_then(Value::as_str).map(str::to_string);

    let source = text("instance_id").unwrap_or_else(|| HISTORY_SOURCE.to_string());
    let event_type = text("type")
        .or_else(|| text("event"))
        .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string());

    Event::with_timestamp(source, event_type, timestamp.unwrap_or_else(Utc::now), record)
}
