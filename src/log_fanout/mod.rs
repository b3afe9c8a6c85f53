//! Log Fanout (C9).
//!
//! Per §9's redesign note: rather than tailing a shared log file (the
//! reference implementation's approach, kept only as a persistence/crash
//! story), live log lines are pushed directly from the command logger into
//! a per-execution in-memory ring buffer and fanned out to whichever
//! WebSocket subscribers are currently streaming that command.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use tokio::sync::mpsc;

const RING_BUFFER_CAPACITY: usize = 2000;

const REDACTION_MARKERS: &[&str] = &["token=", "password=", "key=", "secret="];
const LOW_VALUE_MARKERS: &[&str] = &["cache hit", "cache miss", "library-cache lookup"];

fn should_drop(line: &str) -> bool {
    let lower = line.to_lowercase();
    REDACTION_MARKERS.iter().any(|m| lower.contains(m)) || LOW_VALUE_MARKERS.iter().any(|m| lower.contains(m))
}

struct StreamState {
    execution_id: i64,
    subscribers: Vec<mpsc::UnboundedSender<String>>,
}

pub struct LogFanout {
    buffers: RwLock<HashMap<i64, VecDeque<String>>>,
    streams: RwLock<HashMap<String, StreamState>>,
}

impl Default for LogFanout {
    fn default() -> Self {
        Self::new()
    }
}

impl LogFanout {
    pub fn new() -> Self {
        Self { buffers: RwLock::new(HashMap::new()), streams: RwLock::new(HashMap::new()) }
    }

    /// Idempotent: if `command_name` already has a stream, its subscribers
    /// are kept and just pointed at the new `execution_id` rather than
    /// dropped, so a second client starting the same stream doesn't cut off
    /// an already-subscribed one.
    pub fn start_streaming(&self, command_name: &str, execution_id: i64) {
        self.buffers.write().unwrap().entry(execution_id).or_insert_with(VecDeque::new);
        let mut streams = self.streams.write().unwrap();
        match streams.get_mut(command_name) {
            Some(state) => state.execution_id = execution_id,
            None => {
                streams.insert(command_name.to_string(), StreamState { execution_id, subscribers: Vec::new() });
            }
        }
    }

    pub fn stop_streaming(&self, command_name: &str) {
        // Never hold both locks at once: release `streams` before touching
        // `buffers`, so this can't invert against `push_line`'s ordering.
        let execution_id = self.streams.write().unwrap().remove(command_name).map(|state| state.execution_id);
        if let Some(execution_id) = execution_id {
            self.buffers.write().unwrap().remove(&execution_id);
        }
    }

    /// Returns a receiver that yields log lines as they're pushed for the
    /// execution currently streaming under `command_name`. Replays the
    /// ring buffer's contents first if a stream is already active.
    pub fn subscribe(&self, command_name: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();

        // Read both locks one at a time, never nested, so this can't invert
        // against `push_line`'s `buffers`-then-`streams` ordering.
        let execution_id = self.streams.read().unwrap().get(command_name).map(|state| state.execution_id);

        if let Some(execution_id) = execution_id {
            if let Some(buffer) = self.buffers.read().unwrap().get(&execution_id) {
                for line in buffer {
                    let _ = tx.send(line.clone());
                }
            }
        }

        if let Some(state) = self.streams.write().unwrap().get_mut(command_name) {
            state.subscribers.push(tx);
        }

        rx
    }

    pub fn unsubscribe_command(&self, command_name: &str) {
        if let Some(state) = self.streams.write().unwrap().get_mut(command_name) {
            state.subscribers.clear();
        }
    }

    /// Called by the command logger for every line produced during an
    /// execution. Applies redaction/low-value filtering, appends to the
    /// ring buffer, and fans out to subscribers of whichever command is
    /// currently streaming this execution id.
    pub fn push_line(&self, execution_id: i64, line: &str) {
        if should_drop(line) {
            return;
        }

        {
            let mut buffers = self.buffers.write().unwrap();
            let Some(buffer) = buffers.get_mut(&execution_id) else {
                return;
            };
            buffer.push_back(line.to_string());
            while buffer.len() > RING_BUFFER_CAPACITY {
                buffer.pop_front();
            }
        }

        let mut streams = self.streams.write().unwrap();
        for state in streams.values_mut() {
            if state.execution_id != execution_id {
                continue;
            }
            state.subscribers.retain(|tx| tx.send(line.to_string()).is_ok());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_receives_lines_pushed_after_subscribing() {
        let fanout = LogFanout::new();
        fanout.start_streaming("sync_playlists", 42);
        let mut rx = fanout.subscribe("sync_playlists");
        fanout.push_line(42, "starting sync");
        assert_eq!(rx.try_recv().unwrap(), "starting sync");
    }

    #[test]
    fn lines_for_other_executions_are_not_forwarded() {
        let fanout = LogFanout::new();
        fanout.start_streaming("sync_playlists", 42);
        let mut rx = fanout.subscribe("sync_playlists");
        fanout.push_line(99, "unrelated execution");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn redacted_lines_are_dropped() {
        let fanout = LogFanout::new();
        fanout.start_streaming("sync_playlists", 42);
        let mut rx = fanout.subscribe("sync_playlists");
        fanout.push_line(42, "Authorization token=abc123");
        fanout.push_line(42, "safe line");
        assert_eq!(rx.try_recv().unwrap(), "safe line");
    }

    #[test]
    fn low_value_chatter_is_dropped() {
        let fanout = LogFanout::new();
        fanout.start_streaming("sync_playlists", 42);
        let mut rx = fanout.subscribe("sync_playlists");
        fanout.push_line(42, "cache hit for artist_lookup:abc");
        fanout.push_line(42, "real progress line");
        assert_eq!(rx.try_recv().unwrap(), "real progress line");
    }

    #[test]
    fn subscribe_replays_existing_buffer() {
        let fanout = LogFanout::new();
        fanout.start_streaming("sync_playlists", 42);
        fanout.push_line(42, "first");
        let mut rx = fanout.subscribe("sync_playlists");
        fanout.push_line(42, "second");
        assert_eq!(rx.try_recv().unwrap(), "first");
        assert_eq!(rx.try_recv().unwrap(), "second");
    }

    #[test]
    fn stop_streaming_clears_buffer_and_subscribers() {
        let fanout = LogFanout::new();
        fanout.start_streaming("sync_playlists", 42);
        let mut rx = fanout.subscribe("sync_playlists");
        fanout.stop_streaming("sync_playlists");
        fanout.push_line(42, "after stop");
        assert!(rx.try_recv().is_err());
    }
}
