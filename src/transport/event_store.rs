//! Event store for SSE resumability.
//!
//! An append-only per-stream log of outbound payloads. Event ids are
//! stream-local, strictly monotonic integers starting at 1; a client
//! reconnecting with `Last-Event-ID` gets every later event replayed in
//! order before the live stream resumes. Streams are trimmed FIFO at the
//! configured cap.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

/// Ordered per-stream append log.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Ensure a stream exists.
    async fn create_stream(&self, stream_id: &str);

    /// Append a message, returning its assigned event id.
    async fn store_event(&self, stream_id: &str, message: Value) -> u64;

    /// Events with id greater than `last_event_id`, oldest first, bounded by
    /// `limit`. `None` replays from the beginning of what is retained.
    async fn replay_events_after(
        &self,
        stream_id: &str,
        last_event_id: Option<u64>,
        limit: Option<usize>,
    ) -> Vec<(u64, Value)>;

    /// Highest assigned event id for the stream, if any events exist.
    async fn get_tail_id(&self, stream_id: &str) -> Option<u64>;

    /// Drop the stream and its retained events.
    async fn delete_stream(&self, stream_id: &str);
}

#[derive(Default)]
struct Inner {
    events: HashMap<String, VecDeque<(u64, Value)>>,
    counters: HashMap<String, u64>,
}

/// In-memory event store. Concurrent access is serialized by one mutex.
pub struct InMemoryEventStore {
    inner: Mutex<Inner>,
    max_events_per_stream: usize,
}

impl std::fmt::Debug for InMemoryEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventStore")
            .field("streams", &self.inner.lock().events.len())
            .field("max_events_per_stream", &self.max_events_per_stream)
            .finish()
    }
}

impl InMemoryEventStore {
    /// Store retaining up to `max_events_per_stream` events per stream.
    pub fn new(max_events_per_stream: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_events_per_stream,
        }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn create_stream(&self, stream_id: &str) {
        self.inner
            .lock()
            .events
            .entry(stream_id.to_string())
            .or_default();
    }

    async fn store_event(&self, stream_id: &str, message: Value) -> u64 {
        let mut inner = self.inner.lock();
        let counter = inner.counters.entry(stream_id.to_string()).or_insert(0);
        *counter += 1;
        let id = *counter;
        let stream = inner.events.entry(stream_id.to_string()).or_default();
        stream.push_back((id, message));
        while stream.len() > self.max_events_per_stream {
            stream.pop_front();
        }
        id
    }

    async fn replay_events_after(
        &self,
        stream_id: &str,
        last_event_id: Option<u64>,
        limit: Option<usize>,
    ) -> Vec<(u64, Value)> {
        let inner = self.inner.lock();
        let Some(stream) = inner.events.get(stream_id) else {
            return Vec::new();
        };
        let after = last_event_id.unwrap_or(0);
        let iter = stream.iter().filter(|(id, _)| *id > after).cloned();
        match limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }

    async fn get_tail_id(&self, stream_id: &str) -> Option<u64> {
        self.inner
            .lock()
            .events
            .get(stream_id)
            .and_then(|s| s.back().map(|(id, _)| *id))
    }

    async fn delete_stream(&self, stream_id: &str) {
        let mut inner = self.inner.lock();
        inner.events.remove(stream_id);
        inner.counters.remove(stream_id);
    }
}
