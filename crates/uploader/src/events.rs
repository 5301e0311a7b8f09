//! Named-event publish/subscribe for session notifications.
//!
//! Subscribers run synchronously on the emitting task, in registration
//! order. Events are never replayed to late subscribers.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use hugeup_protocol::CompleteUploadResponse;

/// Event names a subscriber can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Progress,
    FileRetry,
    Error,
    Online,
    Offline,
    Finish,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Progress,
        EventKind::FileRetry,
        EventKind::Error,
        EventKind::Online,
        EventKind::Offline,
        EventKind::Finish,
    ];

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Progress => "progress",
            EventKind::FileRetry => "fileRetry",
            EventKind::Error => "error",
            EventKind::Online => "online",
            EventKind::Offline => "offline",
            EventKind::Finish => "finish",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| format!("unknown event: {s}"))
    }
}

/// A transient failure about to be retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryNotice {
    pub chunk_index: u64,
    pub retries_left: u32,
    pub message: String,
}

impl RetryNotice {
    pub fn new(chunk_index: u64, retries_left: u32) -> Self {
        Self {
            chunk_index,
            retries_left,
            message: format!(
                "An error occurred uploading chunk {chunk_index}. {retries_left} retries left"
            ),
        }
    }
}

/// Terminal failure description carried by the `error` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    /// HTTP status, when the server answered.
    pub status: Option<u16>,
    pub chunk_index: Option<u64>,
    pub message: String,
}

/// A session notification.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// Whole-number percentage of chunks acknowledged.
    Progress(u8),
    FileRetry(RetryNotice),
    Error(FailureReport),
    Online,
    Offline,
    /// Body of the completion response.
    Finish(CompleteUploadResponse),
}

impl UploadEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            UploadEvent::Progress(_) => EventKind::Progress,
            UploadEvent::FileRetry(_) => EventKind::FileRetry,
            UploadEvent::Error(_) => EventKind::Error,
            UploadEvent::Online => EventKind::Online,
            UploadEvent::Offline => EventKind::Offline,
            UploadEvent::Finish(_) => EventKind::Finish,
        }
    }
}

/// Handle returned by [`EventBus::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(&UploadEvent) + Send + Sync>;

/// Event bus owned by one session.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<EventKind, Vec<(SubscriptionId, Subscriber)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `subscriber` for events of `kind`.
    pub fn on<F>(&self, kind: EventKind, subscriber: F) -> SubscriptionId
    where
        F: Fn(&UploadEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, Arc::new(subscriber)));
        id
    }

    /// Removes a subscription. Returns `false` if it was not registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for list in subscribers.values_mut() {
            if let Some(pos) = list.iter().position(|(sub, _)| *sub == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// Delivers `event` to the subscribers registered for its kind.
    ///
    /// The subscriber list is snapshotted first, so a subscriber may call
    /// back into the bus or the session. Subscribers added during dispatch
    /// see only later events.
    pub fn emit(&self, event: &UploadEvent) {
        let snapshot: Vec<Subscriber> = {
            let subscribers = self
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match subscribers.get(&event.kind()) {
                Some(list) => list.iter().map(|(_, sub)| Arc::clone(sub)).collect(),
                None => return,
            }
        };
        for subscriber in snapshot {
            subscriber(event);
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<&str, usize> = subscribers
            .iter()
            .map(|(kind, list)| (kind.name(), list.len()))
            .collect();
        f.debug_struct("EventBus")
            .field("subscribers", &counts)
            .finish()
    }
}
