//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`DeviceEvent`]s. There is
//! no process-wide instance: the bus is constructed once at startup and
//! handed to every component that publishes or subscribes.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use camview_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// DeviceEvent
// ---------------------------------------------------------------------------

/// Something that happened to a device, its session, or its scans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceEvent {
    /// A device was registered.
    Created { device_id: DbId },

    /// A device's connection parameters or settings changed.
    Updated { device_id: DbId },

    /// A device was removed from the registry.
    Deleted { device_id: DbId },

    /// The device answered an RPC call with a classified error.
    RpcError {
        device_id: DbId,
        method: String,
        kind: String,
        code: i64,
        message: String,
    },

    /// A scan window completed and the cursor was persisted.
    ScanProgress {
        device_id: DbId,
        mode: String,
        percent: f64,
    },

    /// A scan reached the end of its range.
    ScanCompleted {
        device_id: DbId,
        mode: String,
        created: u64,
        updated: u64,
        deleted: u64,
        finished_at: Timestamp,
    },

    /// A scan aborted; its cursor stays at the last completed window.
    ScanFailed {
        device_id: DbId,
        mode: String,
        error: String,
    },
}

impl DeviceEvent {
    /// Dot-separated event name, e.g. `"device.updated"`.
    pub fn event_type(&self) -> &'static str {
        match self {
            DeviceEvent::Created { .. } => "device.created",
            DeviceEvent::Updated { .. } => "device.updated",
            DeviceEvent::Deleted { .. } => "device.deleted",
            DeviceEvent::RpcError { .. } => "rpc.error",
            DeviceEvent::ScanProgress { .. } => "scan.progress",
            DeviceEvent::ScanCompleted { .. } => "scan.completed",
            DeviceEvent::ScanFailed { .. } => "scan.failed",
        }
    }

    /// The device this event concerns.
    pub fn device_id(&self) -> DbId {
        match self {
            DeviceEvent::Created { device_id }
            | DeviceEvent::Updated { device_id }
            | DeviceEvent::Deleted { device_id }
            | DeviceEvent::RpcError { device_id, .. }
            | DeviceEvent::ScanProgress { device_id, .. }
            | DeviceEvent::ScanCompleted { device_id, .. }
            | DeviceEvent::ScanFailed { device_id, .. } => *device_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A live subscription to an [`EventBus`].
///
/// Receive with [`recv`](Self::recv); release with
/// [`EventBus::unsubscribe`].
pub struct Subscription {
    id: u64,
    receiver: broadcast::Receiver<DeviceEvent>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the bus has been dropped. Lagged receivers skip
    /// the events they missed and keep going.
    pub async fn recv(&mut self) -> Option<DeviceEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        subscription_id = self.id,
                        skipped,
                        "Event subscriber lagged, some events were dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// # Usage
///
/// ```rust
/// use camview_events::bus::{DeviceEvent, EventBus};
///
/// let bus = EventBus::default();
/// let subscription = bus.subscribe();
///
/// bus.publish(DeviceEvent::Updated { device_id: 1 });
/// bus.unsubscribe(subscription);
/// ```
pub struct EventBus {
    sender: broadcast::Sender<DeviceEvent>,
    next_id: AtomicU64,
    active: Mutex<HashSet<u64>>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            next_id: AtomicU64::new(1),
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: DeviceEvent) {
        tracing::debug!(
            event_type = event.event_type(),
            device_id = event.device_id(),
            "Publishing event"
        );
        // A SendError only means there are no receivers.
        let _ = self.sender.send(event);
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut active) = self.active.lock() {
            active.insert(id);
        }
        Subscription {
            id,
            receiver: self.sender.subscribe(),
        }
    }

    /// Release a subscription. Its pending events are discarded.
    pub fn unsubscribe(&self, subscription: Subscription) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&subscription.id);
        }
        drop(subscription);
    }

    /// Number of subscriptions that have not been released.
    pub fn subscriber_count(&self) -> usize {
        self.active.lock().map(|active| active.len()).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
