//! camview event bus.
//!
//! - [`EventBus`]: explicitly constructed publish/subscribe hub backed by
//!   `tokio::sync::broadcast`, shared via `Arc<EventBus>`.
//! - [`DeviceEvent`]: the events components publish about devices,
//!   sessions and scans.
//! - [`Subscription`]: an explicit subscription token that is released with
//!   [`EventBus::unsubscribe`].

pub mod bus;

pub use bus::{DeviceEvent, EventBus, Subscription};
