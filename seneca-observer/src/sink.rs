//! Event consumers run by the observer
//!
//! The log sink writes every bus event as a structured tracing record. The
//! state watcher logs lifecycle transitions and replays conversation logs
//! each time the manager falls back to log-only mode.

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use seneca_link::{ConnectionState, EventBus, LogReader, Subscription};
use seneca_utils::EVENTS_TARGET;

/// Drain `subscription` into the log until cancelled or closed
///
/// Returns the number of events written.
pub fn spawn_log_sink(subscription: Subscription, cancel: CancellationToken) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut written = 0u64;
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = subscription.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            info!(
                target: EVENTS_TARGET,
                source = event.source_instance_id(),
                event_type = event.event_type(),
                timestamp = %event.timestamp(),
                historical = event.is_historical(),
                payload = %event.payload(),
                "Event"
            );
            written += 1;
        }

        if subscription.dropped() > 0 {
            info!(dropped = subscription.dropped(), "Log sink fell behind");
        }
        debug!(written, "Log sink exiting");
        written
    })
}

/// Log state changes and backfill from `reader` once per log-only stretch
///
/// A stretch lasts until a session is established; the driver's periodic
/// rediscovery inside it does not trigger another replay. Each backfill only
/// replays records newer than the previous one.
pub fn spawn_state_watcher(
    mut states: watch::Receiver<ConnectionState>,
    reader: Option<LogReader>,
    bus: EventBus,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_backfill: Option<DateTime<Utc>> = None;
        let mut previous: Option<ConnectionState> = None;
        let mut log_only_stretch = false;

        loop {
            let state = *states.borrow_and_update();
            if previous != Some(state) {
                info!(state = %state, "Connection state");

                if state.is_connected() {
                    log_only_stretch = false;
                } else if state.is_log_only() && !log_only_stretch {
                    log_only_stretch = true;
                    if let Some(reader) = &reader {
                        let since = last_backfill.replace(Utc::now());
                        replay(reader.clone(), bus.clone(), since).await;
                    }
                }
                previous = Some(state);
            }

            if state.is_terminal() {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    })
}

async fn replay(reader: LogReader, bus: EventBus, since: Option<DateTime<Utc>>) {
    let dir = reader.dir().display().to_string();
    match tokio::task::spawn_blocking(move || reader.backfill(&bus, since)).await {
        Ok(count) => info!(count, dir = %dir, "Replayed conversation logs"),
        Err(e) => warn!(error = %e, dir = %dir, "Conversation log replay failed"),
    }
}
