//! Typed download events delivered over a bounded channel.
//!
//! One consumer (CLI, UI, or a fan-out adapter) drains the receiver.
//! Messages are ordered per download but not across downloads. Emitters
//! block briefly when the channel is full (backpressure).

use std::path::PathBuf;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::time::Duration;

use crate::store::DownloadId;

/// Default channel capacity.
pub const EVENT_BUFFER: usize = 128;

#[derive(Debug, Clone)]
pub enum Event {
    Started {
        id: DownloadId,
        url: String,
        filename: String,
        total: u64,
        dest_path: PathBuf,
    },
    Progress {
        id: DownloadId,
        downloaded: u64,
        total: u64,
        /// Session speed in bytes/sec, EMA-smoothed.
        speed: f64,
        active_connections: usize,
    },
    Completed {
        id: DownloadId,
        filename: String,
        elapsed: Duration,
        total: u64,
    },
    Error {
        id: DownloadId,
        reason: String,
    },
    Paused {
        id: DownloadId,
        downloaded: u64,
    },
    Resumed {
        id: DownloadId,
    },
    /// An external request awaiting user confirmation.
    Request {
        url: String,
        filename: Option<String>,
        path: Option<PathBuf>,
    },
}

impl Event {
    /// The download this event belongs to, if any.
    pub fn download_id(&self) -> Option<DownloadId> {
        match self {
            Event::Started { id, .. }
            | Event::Progress { id, .. }
            | Event::Completed { id, .. }
            | Event::Error { id, .. }
            | Event::Paused { id, .. }
            | Event::Resumed { id } => Some(*id),
            Event::Request { .. } => None,
        }
    }
}

/// Sending half of the event channel; cheap to clone into workers.
#[derive(Clone)]
pub struct EventBus {
    tx: SyncSender<Event>,
}

impl EventBus {
    pub fn new() -> (Self, Receiver<Event>) {
        Self::with_capacity(EVENT_BUFFER)
    }

    pub fn with_capacity(capacity: usize) -> (Self, Receiver<Event>) {
        let (tx, rx) = sync_channel(capacity);
        (Self { tx }, rx)
    }

    /// Delivers an event, blocking while the channel is full. Events emitted
    /// after the consumer is gone are dropped.
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn events_arrive_in_order() {
        let (bus, rx) = EventBus::new();
        let id = Uuid::new_v4();
        bus.emit(Event::Resumed { id });
        bus.emit(Event::Paused { id, downloaded: 7 });
        assert!(matches!(rx.recv().unwrap(), Event::Resumed { .. }));
        assert!(matches!(rx.recv().unwrap(), Event::Paused { downloaded: 7, .. }));
    }

    #[test]
    fn emit_after_receiver_dropped_is_a_no_op() {
        let (bus, rx) = EventBus::with_capacity(1);
        drop(rx);
        bus.emit(Event::Resumed { id: Uuid::new_v4() });
    }

    #[test]
    fn download_id_accessor() {
        let id = Uuid::new_v4();
        assert_eq!(Event::Resumed { id }.download_id(), Some(id));
        let req = Event::Request {
            url: "https://example.com/f".into(),
            filename: None,
            path: None,
        };
        assert_eq!(req.download_id(), None);
    }
}
