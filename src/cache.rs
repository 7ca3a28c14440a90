//! Chunk data cache.
//!
//! Every `(operation, resolved path values)` pair maps to one shared
//! [`DataStream`]. The stream keeps the last payload with its fetch time and
//! replays it to new subscribers; it never fetches anything itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::types::CACHE_TTL;

/// `[operation_id, value1, value2, ...]` with values in route order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CacheKey(pub Vec<String>);

impl CacheKey {
    pub fn new(operation_id: &str, values: impl IntoIterator<Item = String>) -> Self {
        let mut key = vec![operation_id.to_string()];
        key.extend(values);
        CacheKey(key)
    }

    pub fn operation_id(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or("")
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join(":"))
    }
}

/// A payload together with the moment it was stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPayload {
    pub value: Value,
    pub fetched_at: Instant,
}

/// Replaying stream of one cache entry.
///
/// Subscribers see the last stored payload immediately and every later
/// update. Completing the stream drops the sender, which ends every
/// subscription; payloads stored afterwards are discarded.
#[derive(Debug)]
pub struct DataStream {
    key: CacheKey,
    ttl: Duration,
    sender: Mutex<Option<watch::Sender<Option<CachedPayload>>>>,
    receiver: watch::Receiver<Option<CachedPayload>>,
}

impl DataStream {
    pub fn new(key: CacheKey, ttl: Duration) -> Self {
        let (sender, receiver) = watch::channel(None);
        Self {
            key,
            ttl,
            sender: Mutex::new(Some(sender)),
            receiver,
        }
    }

    fn sender(&self) -> MutexGuard<'_, Option<watch::Sender<Option<CachedPayload>>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Cached payload if it is younger than the TTL.
    ///
    /// A stale payload is cleared and `None` returned, so the caller re-fetches.
    pub fn get_data(&self) -> Option<Value> {
        self.get_data_at(Instant::now())
    }

    /// [`get_data`](Self::get_data) evaluated at a given instant.
    pub fn get_data_at(&self, now: Instant) -> Option<Value> {
        let sender = self.sender();
        let sender = sender.as_ref()?;
        let fresh = match &*sender.borrow() {
            Some(cached) => now.saturating_duration_since(cached.fetched_at) < self.ttl,
            None => return None,
        };
        if fresh {
            sender.borrow().as_ref().map(|cached| cached.value.clone())
        } else {
            log::debug!("cache entry {} expired", self.key);
            sender.send_replace(None);
            None
        }
    }

    /// When the current payload was stored.
    pub fn data_timestamp(&self) -> Option<Instant> {
        self.receiver.borrow().as_ref().map(|cached| cached.fetched_at)
    }

    /// Store a payload stamped with the current time and publish it.
    pub fn set_data(&self, value: Value) {
        self.set_data_at(value, Instant::now());
    }

    pub fn set_data_at(&self, value: Value, fetched_at: Instant) {
        match self.sender().as_ref() {
            Some(sender) => {
                sender.send_replace(Some(CachedPayload { value, fetched_at }));
            }
            None => log::debug!("dropping payload for completed stream {}", self.key),
        }
    }

    /// Reset the payload; with `complete`, also end the stream.
    pub fn clear_data(&self, complete: bool) {
        let mut sender = self.sender();
        if let Some(tx) = sender.as_ref() {
            tx.send_replace(None);
        }
        if complete {
            sender.take();
        }
    }

    pub fn is_completed(&self) -> bool {
        self.sender().is_none()
    }

    /// Subscribe to the stream; the current payload is visible right away.
    pub fn subscribe(&self) -> watch::Receiver<Option<CachedPayload>> {
        self.receiver.clone()
    }
}

/// Registry of data streams keyed by [`CacheKey`].
#[derive(Debug)]
pub struct ChunkCache {
    ttl: Duration,
    streams: HashMap<CacheKey, Arc<DataStream>>,
}

impl Default for ChunkCache {
    fn default() -> Self {
        Self::new(CACHE_TTL)
    }
}

impl ChunkCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            streams: HashMap::new(),
        }
    }

    /// The stream for `key`, created on first use.
    ///
    /// The same key always yields the same stream until it is completed.
    pub fn stream(&mut self, key: &CacheKey) -> Arc<DataStream> {
        if let Some(stream) = self.streams.get(key) {
            if !stream.is_completed() {
                return Arc::clone(stream);
            }
        }
        let stream = Arc::new(DataStream::new(key.clone(), self.ttl));
        self.streams.insert(key.clone(), Arc::clone(&stream));
        stream
    }

    pub fn get(&self, key: &CacheKey) -> Option<&Arc<DataStream>> {
        self.streams.get(key)
    }

    /// Complete and forget a stream.
    pub fn evict(&mut self, key: &CacheKey) {
        if let Some(stream) = self.streams.remove(key) {
            stream.clear_data(true);
        }
    }

    /// Complete and forget every stream.
    pub fn clear(&mut self) {
        for (_, stream) in self.streams.drain() {
            stream.clear_data(true);
        }
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
