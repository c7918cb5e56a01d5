//! Lifecycle events and webhook delivery
//!
//! The downloader and the scheduler report what they do by emitting
//! [`Event`]s. The [`HookDispatcher`] fans each event out to every enabled
//! webhook subscribed to its kind (or to `*`), one best-effort attempt per
//! listener. Delivery failures are logged and counted, never returned.

pub mod dispatcher;
pub mod events;
pub mod transport;

pub use dispatcher::{HookDispatcher, HookError, WebhookUpdate};
pub use events::{ALL_EVENTS, Event, EventKind, WILDCARD, is_valid_event};
pub use transport::{HttpTransport, HttpTransportConfig, TransportError, WebhookTransport};
