#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Topic-tagged event bus used for change notifications between front desk components.
//!
//! Delivery is a hint, not a log: a slow subscriber that falls behind receives a
//! synthetic [`RESYNC_EVENT`] instead of the records it missed and is expected to
//! re-read whatever state it mirrors.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::{
    fs::OpenOptions,
    io::AsyncWriteExt,
    sync::broadcast::{self, error::RecvError},
};
use uuid::Uuid;

/// Event type delivered to a [`TopicReceiver`] that lagged behind the bus.
pub const RESYNC_EVENT: &str = "resync";

/// Generic event record encoded as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique identifier (uuid).
    pub id: String,
    /// Component producing the event.
    pub source: String,
    /// Routing topic (a store collection name, or `dispatch` for telemetry).
    pub topic: String,
    /// Event type (e.g., `updated`, `dispatch.offer.created`).
    pub event_type: String,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Arbitrary JSON payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl EventRecord {
    /// Builds a record stamped with a fresh id and the current time.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        topic: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: format!("evt-{}", Uuid::new_v4()),
            source: source.into(),
            topic: topic.into(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Event publisher interface.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes an event to the bus.
    async fn publish(&self, event: EventRecord) -> Result<()>;
}

/// Event subscriber interface.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Receives every event published after the call.
    async fn subscribe(&self) -> Result<broadcast::Receiver<EventRecord>>;

    /// Receives only the events routed to `topic`.
    async fn subscribe_topic(&self, topic: &str) -> Result<TopicReceiver> {
        let inner = self.subscribe().await?;
        Ok(TopicReceiver::new(inner, topic))
    }
}

/// Receiver filtered down to one topic.
#[derive(Debug)]
pub struct TopicReceiver {
    inner: broadcast::Receiver<EventRecord>,
    topic: String,
}

impl TopicReceiver {
    /// Wraps a raw broadcast receiver.
    #[must_use]
    pub fn new(inner: broadcast::Receiver<EventRecord>, topic: impl Into<String>) -> Self {
        Self {
            inner,
            topic: topic.into(),
        }
    }

    /// Topic this receiver listens to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Waits for the next event on the topic. Returns `None` once the bus is dropped.
    pub async fn recv(&mut self) -> Option<EventRecord> {
        loop {
            match self.inner.recv().await {
                Ok(event) if event.topic == self.topic => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {
                    return Some(EventRecord::new(
                        "event-bus",
                        self.topic.clone(),
                        RESYNC_EVENT,
                        serde_json::Value::Null,
                    ));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// In-memory broadcast bus with a bounded backlog of recent events.
#[derive(Debug, Clone)]
pub struct MemoryEventBus {
    sender: broadcast::Sender<EventRecord>,
    backlog: Arc<Mutex<VecDeque<EventRecord>>>,
    capacity: usize,
}

impl MemoryEventBus {
    /// Creates a new bus with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            backlog: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Snapshot of recent events retained in memory, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.backlog.lock().iter().cloned().collect()
    }

    /// Snapshot of recent events for a single topic.
    #[must_use]
    pub fn snapshot_topic(&self, topic: &str) -> Vec<EventRecord> {
        self.backlog
            .lock()
            .iter()
            .filter(|event| event.topic == topic)
            .cloned()
            .collect()
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// File-backed publisher useful for durable event logs.
#[derive(Debug, Clone)]
pub struct FileEventPublisher {
    path: PathBuf,
}

impl FileEventPublisher {
    /// Creates a publisher that appends JSON lines to the given path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Destination file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventPublisher for MemoryEventBus {
    async fn publish(&self, event: EventRecord) -> Result<()> {
        {
            let mut backlog = self.backlog.lock();
            backlog.push_back(event.clone());
            while backlog.len() > self.capacity {
                backlog.pop_front();
            }
        }
        // No subscribers is not an error: the backlog still records the event.
        let _ = self.sender.send(event);
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for MemoryEventBus {
    async fn subscribe(&self) -> Result<broadcast::Receiver<EventRecord>> {
        Ok(self.sender.subscribe())
    }
}

#[async_trait]
impl EventPublisher for FileEventPublisher {
    async fn publish(&self, event: EventRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let data = serde_json::to_vec(&event)?;
        file.write_all(&data).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn task_update() -> EventRecord {
        EventRecord::new("store", "tasks", "updated", json!({ "id": "t-1" }))
    }

    #[tokio::test]
    async fn publishes_and_receives() {
        let bus = MemoryEventBus::new(16);
        let mut rx = bus.subscribe().await.unwrap();
        bus.publish(task_update()).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "updated");
        assert_eq!(event.topic, "tasks");
    }

    #[tokio::test]
    async fn topic_receiver_skips_other_topics() {
        let bus = MemoryEventBus::new(16);
        let mut rx = bus.subscribe_topic("tasks").await.unwrap();
        bus.publish(EventRecord::new("store", "guestRequests", "created", json!({})))
            .await
            .unwrap();
        bus.publish(task_update()).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "tasks");
        assert_eq!(event.payload["id"], "t-1");
    }

    #[tokio::test]
    async fn lagged_receiver_gets_resync() {
        let bus = MemoryEventBus::new(2);
        let mut rx = bus.subscribe_topic("tasks").await.unwrap();
        for _ in 0..5 {
            bus.publish(task_update()).await.unwrap();
        }
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, RESYNC_EVENT);
    }

    #[tokio::test]
    async fn backlog_is_bounded() {
        let bus = MemoryEventBus::new(3);
        for _ in 0..10 {
            bus.publish(task_update()).await.unwrap();
        }
        assert_eq!(bus.snapshot().len(), 3);
        assert_eq!(bus.snapshot_topic("tasks").len(), 3);
        assert!(bus.snapshot_topic("users").is_empty());
    }

    #[tokio::test]
    async fn file_publisher_writes_events() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");
        let publisher = FileEventPublisher::new(&path).unwrap();
        publisher.publish(task_update()).await.unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("\"topic\":\"tasks\""));
    }
}
