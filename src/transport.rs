//! Event transport and collaborator seams
//!
//! The engine hands finished events to an [`EventSink`] and never blocks on
//! delivery semantics beyond what the sink itself does. Two sinks are
//! provided: a crossbeam channel pair for in-process consumers (and tests),
//! and a JSON-lines writer for the CLI.
//!
//! The realtime watcher and the content differ are external collaborators;
//! their seams live here as traits the engine consumes.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde_json::Value;
use std::io::Write;
use tracing::warn;

/// Consumer of emitted events and log-line alerts
pub trait EventSink: Send + Sync {
    /// Deliver one structured event
    fn send_event(&self, event: Value);

    /// Deliver one flat alert line (capacity alerts)
    fn send_log(&self, message: &str);
}

/// Channel-backed sink: events and logs land on separate receivers
pub struct ChannelSink {
    events_tx: Sender<Value>,
    logs_tx: Sender<String>,
}

impl ChannelSink {
    /// Create the sink plus the receivers for its two streams
    pub fn new() -> (Self, Receiver<Value>, Receiver<String>) {
        let (events_tx, events_rx) = unbounded();
        let (logs_tx, logs_rx) = unbounded();
        (
            Self { events_tx, logs_tx },
            events_rx,
            logs_rx,
        )
    }
}

impl EventSink for ChannelSink {
    fn send_event(&self, event: Value) {
        if self.events_tx.send(event).is_err() {
            warn!("event receiver dropped, discarding event");
        }
    }

    fn send_log(&self, message: &str) {
        if self.logs_tx.send(message.to_string()).is_err() {
            warn!("log receiver dropped, discarding alert");
        }
    }
}

/// Writes each event as one JSON line; alert lines pass through verbatim
pub struct JsonLinesSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn send_event(&self, event: Value) {
        let mut out = self.out.lock();
        if writeln!(out, "{event}").is_err() {
            warn!("failed to write event");
        }
    }

    fn send_log(&self, message: &str) {
        let mut out = self.out.lock();
        if writeln!(out, "{message}").is_err() {
            warn!("failed to write alert");
        }
    }
}

/// Seam to the OS watcher collaborator
pub trait RealtimeController: Send + Sync {
    /// Register (or refresh) a watch on a directory
    fn add_watch(&self, path: &str, follow: bool);

    /// Whether the watcher lost events since the last sanitize
    fn queue_overflow(&self) -> bool;

    /// Rebuild the watch map after a loss; clears the overflow flag
    fn sanitize(&self);
}

/// Seam to the content-diff collaborator
pub trait ContentDiffer: Send + Sync {
    /// Produce the textual diff for a modified file, if any
    fn file_diff(&self, path: &str) -> Option<String>;

    /// Drop any retained snapshot for a deleted file
    fn process_delete(&self, path: &str);

    /// Re-measure the diff storage quota at the start of a scan
    fn refresh_quota(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_sink_delivers() {
        let (sink, events, logs) = ChannelSink::new();

        sink.send_event(json!({"type": "event"}));
        sink.send_log("alert line");

        assert_eq!(events.recv().unwrap()["type"], "event");
        assert_eq!(logs.recv().unwrap(), "alert line");
    }

    #[test]
    fn test_json_lines_sink() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.send_event(json!({"a": 1}));
        sink.send_log("plain");

        let out = sink.out.into_inner();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "{\"a\":1}\nplain\n");
    }
}
