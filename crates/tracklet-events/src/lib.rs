#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, missing_docs)]
#![warn(
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Core event bus for the Tracklet platform.
//!
//! The bus provides a typed event enum, sequential identifiers, and support
//! for replaying recent events when subscribers reconnect. Internally it uses
//! `tokio::broadcast` with a bounded buffer; when the channel overflows, the
//! oldest events are dropped, matching the desired backpressure behaviour.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::{Receiver, Sender};
use tracing::error;
use uuid::Uuid;

/// Identifier assigned to each event emitted by the platform.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Typed domain events surfaced across the system.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A scheduler pass over one feed began.
    FeedTickStarted {
        /// Site the feed belongs to.
        site_id: String,
        /// Subscription identifier.
        feed_id: Uuid,
    },
    /// A scheduler pass over one feed finished.
    FeedTickFinished {
        /// Site the feed belongs to.
        site_id: String,
        /// Subscription identifier.
        feed_id: Uuid,
        /// Items the feed delivered.
        items: u32,
        /// Items that passed eligibility and were handed to dispatch.
        accepted: u32,
    },
    /// A torrent was sighted for the first time.
    TorrentDiscovered {
        /// Owning site id.
        site_id: String,
        /// Site-local torrent id.
        torrent_id: String,
        /// Title as reported by the feed.
        title: String,
    },
    /// The eligibility gate rejected a torrent.
    TorrentSkipped {
        /// Owning site id.
        site_id: String,
        /// Site-local torrent id.
        torrent_id: String,
        /// Stable rejection reason code.
        reason: String,
    },
    /// The `.torrent` payload was fetched and staged.
    TorrentDownloaded {
        /// Owning site id.
        site_id: String,
        /// Site-local torrent id.
        torrent_id: String,
        /// Info-hash computed from the payload.
        info_hash: String,
    },
    /// A downloader accepted the torrent.
    TorrentPushed {
        /// Owning site id.
        site_id: String,
        /// Site-local torrent id.
        torrent_id: String,
        /// Downloader display name.
        downloader: String,
        /// Whether the push was skipped because the task already existed.
        already_present: bool,
    },
    /// Every downloader in the push set refused the torrent.
    PushFailed {
        /// Owning site id.
        site_id: String,
        /// Site-local torrent id.
        torrent_id: String,
        /// Failure description.
        message: String,
    },
    /// A lifecycle timer was armed against a promotion end.
    FreeWindowArmed {
        /// Record identifier.
        record_id: i64,
        /// Promotion end the timer fires at.
        end_time: DateTime<Utc>,
    },
    /// The transfer finished before the promotion ended.
    FreeWindowCompleted {
        /// Record identifier.
        record_id: i64,
    },
    /// The promotion ended with the transfer incomplete; the task was paused.
    FreeWindowPaused {
        /// Record identifier.
        record_id: i64,
        /// Progress observed at expiry, 0–100.
        progress: f64,
    },
    /// The promotion ended with the transfer incomplete; the task and its
    /// data were deleted.
    FreeWindowDeleted {
        /// Record identifier.
        record_id: i64,
        /// Progress observed at expiry, 0–100.
        progress: f64,
    },
    /// Account statistics were refreshed for a site.
    AccountSynced {
        /// Site identifier.
        site_id: String,
    },
    /// Account statistics refresh failed for a site.
    AccountSyncFailed {
        /// Site identifier.
        site_id: String,
        /// Failure description.
        message: String,
    },
    /// Configuration update was applied.
    SettingsChanged {
        /// Description of the applied configuration change.
        description: String,
    },
    /// System health status changed (degraded or restored components).
    HealthChanged {
        /// Components currently considered degraded.
        degraded: Vec<String>,
    },
}

impl Event {
    /// Machine-friendly discriminator for stream consumers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::FeedTickStarted { .. } => "feed_tick_started",
            Self::FeedTickFinished { .. } => "feed_tick_finished",
            Self::TorrentDiscovered { .. } => "torrent_discovered",
            Self::TorrentSkipped { .. } => "torrent_skipped",
            Self::TorrentDownloaded { .. } => "torrent_downloaded",
            Self::TorrentPushed { .. } => "torrent_pushed",
            Self::PushFailed { .. } => "push_failed",
            Self::FreeWindowArmed { .. } => "free_window_armed",
            Self::FreeWindowCompleted { .. } => "free_window_completed",
            Self::FreeWindowPaused { .. } => "free_window_paused",
            Self::FreeWindowDeleted { .. } => "free_window_deleted",
            Self::AccountSynced { .. } => "account_synced",
            Self::AccountSyncFailed { .. } => "account_sync_failed",
            Self::SettingsChanged { .. } => "settings_changed",
            Self::HealthChanged { .. } => "health_changed",
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct EventEnvelope {
    /// Monotonic identifier assigned to the wrapped event.
    pub id: EventId,
    /// Timestamp recording when the envelope was produced.
    pub timestamp: DateTime<Utc>,
    /// Wrapped event payload.
    pub event: Event,
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    buffer: Arc<Mutex<VecDeque<EventEnvelope>>>,
    next_id: Arc<std::sync::atomic::AtomicU64>,
    replay_capacity: usize,
}

impl EventBus {
    /// Construct a new bus with the provided broadcast capacity.
    ///
    /// The broadcast channel uses the same capacity as the in-memory replay
    /// buffer, ensuring dropped events impact both structures consistently.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "event bus capacity must be positive");
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(std::sync::atomic::AtomicU64::new(1)),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default in-memory buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish a new event to the bus, assigning it a sequential identifier.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };

        {
            let mut buffer = self.lock_buffer();
            if buffer.len() == self.replay_capacity {
                buffer.pop_front();
            }
            buffer.push_back(envelope.clone());
        }

        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to the bus, replaying any buffered events newer than `since_id`.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let mut backlog = VecDeque::new();
        if let Some(since) = since_id {
            let buffer = self.lock_buffer();
            for item in buffer.iter() {
                if item.id > since {
                    backlog.push_back(item.clone());
                }
            }
        }

        let receiver = self.sender.subscribe();
        EventStream { backlog, receiver }
    }

    /// Return a snapshot of buffered events newer than the supplied identifier.
    #[must_use]
    pub fn backlog_since(&self, since_id: EventId) -> Vec<EventEnvelope> {
        let buffer = self.lock_buffer();
        buffer
            .iter()
            .filter(|item| item.id > since_id)
            .cloned()
            .collect()
    }

    /// Returns the last assigned identifier, if any events have been published.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        let buffer = self.lock_buffer();
        buffer.back().map(|event| event.id)
    }

    fn lock_buffer(&self) -> MutexGuard<'_, VecDeque<EventEnvelope>> {
        match self.buffer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("event buffer mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream wrapper that yields events either from the replay backlog or from
/// the live broadcast channel.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
}

impl EventStream {
    /// Receive the next event, respecting the replay backlog first.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }

        match self.receiver.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(_)) => self.receiver.recv().await.ok(),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(i: usize) -> Event {
        Event::TorrentSkipped {
            site_id: "hdsky".to_string(),
            torrent_id: format!("{i}"),
            reason: "size_exceeded".to_string(),
        }
    }

    #[test]
    fn event_kinds_match_serde_tags() {
        let events = [
            Event::FeedTickStarted {
                site_id: "hdsky".to_string(),
                feed_id: Uuid::nil(),
            },
            Event::TorrentPushed {
                site_id: "hdsky".to_string(),
                torrent_id: "164895".to_string(),
                downloader: "qb-main".to_string(),
                already_present: false,
            },
            Event::FreeWindowDeleted {
                record_id: 7,
                progress: 40.0,
            },
            Event::HealthChanged {
                degraded: vec!["scheduler".to_string()],
            },
        ];
        for event in events {
            let json = serde_json::to_value(&event).expect("event serialises");
            assert_eq!(json["type"], event.kind());
        }
    }

    #[tokio::test]
    async fn sequential_ids_and_replay() {
        let bus = EventBus::with_capacity(16);

        let mut last_id = 0;
        for i in 0..5 {
            last_id = bus.publish(sample_event(i));
        }
        assert_eq!(last_id, 5);

        let mut stream = bus.subscribe(Some(2));
        let mut received = Vec::new();
        for _ in 0..3 {
            if let Some(event) = stream.next().await {
                received.push(event);
            }
        }

        assert_eq!(received.len(), 3);
        assert_eq!(received.first().unwrap().id, 3);
        assert_eq!(received.last().unwrap().id, 5);
    }

    #[tokio::test]
    async fn ring_drops_oldest_when_full() {
        let bus = EventBus::with_capacity(2);
        for i in 0..4 {
            let _ = bus.publish(sample_event(i));
        }
        let backlog = bus.backlog_since(0);
        assert_eq!(backlog.len(), 2);
        assert_eq!(backlog[0].id, 3);
        assert_eq!(bus.last_event_id(), Some(4));
    }

    #[tokio::test]
    async fn stream_returns_none_after_sender_dropped() {
        let mut stream = {
            let bus = EventBus::with_capacity(1);
            let stream = bus.subscribe(None);
            drop(bus);
            stream
        };
        assert!(
            stream.next().await.is_none(),
            "closing the sender should end the stream"
        );
    }
}
