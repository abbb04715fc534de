//! Listener registry and event dispatch

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::{error::AmiError, event::AmiEvent};

/// Callback invoked for every matching event.
pub type ListenerCallback = Arc<dyn Fn(&AmiEvent) + Send + Sync>;

/// Handle identifying one registration, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Matching criteria for a listener.
///
/// An empty whitelist accepts every event name; an empty field set accepts
/// every event. A missing key reads as `""`, so it fails any non-empty
/// required value and satisfies an empty one.
///
/// ```
/// use asterisk_ami_tokio::EventFilter;
///
/// let filter = EventFilter::new()
///     .whitelist(["DeviceStateChange"])
///     .field("Device", "PJSIP/100");
/// assert!(!filter.is_match_all());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    whitelist: HashSet<String>,
    fields: HashMap<String, String>,
}

impl EventFilter {
    /// Filter matching every event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept only the given event names (adds to any earlier whitelist).
    pub fn whitelist<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.whitelist
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Require `key` to be present with exactly `value`.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields
            .insert(key.into(), value.into());
        self
    }

    /// `true` if neither names nor fields are constrained.
    pub fn is_match_all(&self) -> bool {
        self.whitelist
            .is_empty()
            && self
                .fields
                .is_empty()
    }

    /// Whether `event` passes this filter.
    pub fn matches(&self, event: &AmiEvent) -> bool {
        if !self
            .whitelist
            .is_empty()
            && !self
                .whitelist
                .contains(event.name())
        {
            return false;
        }
        self.fields
            .iter()
            .all(|(key, expected)| event.field(key) == expected)
    }
}

struct Registration {
    id: ListenerId,
    filter: EventFilter,
    callback: ListenerCallback,
}

/// Ordered listener registry.
///
/// Registration and removal may happen at any time, including from inside a
/// callback. Dispatch works on a snapshot taken when the event arrives, so
/// a listener added during dispatch first sees the next event.
pub struct EventBus {
    registrations: RwLock<Vec<Arc<Registration>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.len())
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Append a listener. It is invoked after every listener registered
    /// before it.
    pub fn subscribe<F>(&self, callback: F, filter: EventFilter) -> ListenerId
    where
        F: Fn(&AmiEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(
            self.next_id
                .fetch_add(1, Ordering::Relaxed),
        );
        let registration = Arc::new(Registration {
            id,
            filter,
            callback: Arc::new(callback),
        });
        self.registrations
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(registration);
        debug!("Registered {}", id);
        id
    }

    /// Remove a listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut registrations = self
            .registrations
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        let removed = registrations.len() != before;
        if removed {
            debug!("Removed {}", id);
        }
        removed
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.registrations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// `true` if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every matching listener in registration order.
    ///
    /// No lock is held while callbacks run. A panicking callback is logged
    /// and skipped. Returns the number of listeners invoked.
    pub fn dispatch(&self, event: &AmiEvent) -> usize {
        let snapshot: Vec<Arc<Registration>> = self
            .registrations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut invoked = 0;
        for registration in snapshot
            .iter()
            .filter(|r| r.filter.matches(event))
        {
            invoked += 1;
            let callback = &registration.callback;
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!(
                    "Event handler {} panicked on event {}",
                    registration.id,
                    event.name()
                );
            }
        }
        invoked
    }
}

/// Overflow bookkeeping shared between a stream and its listener callback.
struct StreamState {
    overflow: AtomicBool,
    dropped: AtomicU64,
}

/// Try to send an event to the stream via try_send.
///
/// If the channel is full, drop the item, set the overflow flag, and
/// increment the dropped counter. Before each delivery, check the overflow
/// flag and attempt to deliver a QueueFull notification first.
fn forward_event(
    tx: &mpsc::Sender<Result<AmiEvent, AmiError>>,
    state: &StreamState,
    event: &AmiEvent,
) {
    if state
        .overflow
        .load(Ordering::Relaxed)
    {
        match tx.try_send(Err(AmiError::QueueFull)) {
            Ok(()) => {
                state
                    .overflow
                    .store(false, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return,
            Err(mpsc::error::TrySendError::Full(_)) => {}
        }
    }

    match tx.try_send(Ok(event.clone())) {
        Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            state
                .overflow
                .store(true, Ordering::Relaxed);
            state
                .dropped
                .fetch_add(1, Ordering::Relaxed);
            warn!("Event stream queue full, dropping {}", event.name());
        }
    }
}

/// Event stream receiver (!Clone)
///
/// A listener that queues matching events instead of running a callback.
/// Events are delivered as `Result<AmiEvent, AmiError>`; an
/// `Err(AmiError::QueueFull)` means one or more events were dropped because
/// the consumer fell behind. Dropping the stream removes the listener.
pub struct AmiEventStream {
    rx: mpsc::Receiver<Result<AmiEvent, AmiError>>,
    bus: Arc<EventBus>,
    id: ListenerId,
    state: Arc<StreamState>,
}

impl std::fmt::Debug for AmiEventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmiEventStream")
            .field("id", &self.id)
            .field("dropped", &self.dropped_event_count())
            .finish()
    }
}

impl AmiEventStream {
    pub(crate) fn register(bus: &Arc<EventBus>, filter: EventFilter, queue_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let state = Arc::new(StreamState {
            overflow: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        });
        let cb_state = state.clone();
        let id = bus.subscribe(move |event| forward_event(&tx, &cb_state, event), filter);
        Self {
            rx,
            bus: bus.clone(),
            id,
            state,
        }
    }

    /// Receive the next event, or None if the stream was closed.
    pub async fn recv(&mut self) -> Option<Result<AmiEvent, AmiError>> {
        self.rx
            .recv()
            .await
    }

    /// Registration backing this stream.
    pub fn listener_id(&self) -> ListenerId {
        self.id
    }

    /// Number of events dropped due to a full queue.
    pub fn dropped_event_count(&self) -> u64 {
        self.state
            .dropped
            .load(Ordering::Relaxed)
    }
}

impl Drop for AmiEventStream {
    fn drop(&mut self) {
        self.bus
            .unsubscribe(self.id);
    }
}

impl futures_util::Stream for AmiEventStream {
    type Item = Result<AmiEvent, AmiError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx
            .poll_recv(cx)
    }
}
