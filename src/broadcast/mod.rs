//! Subscriber registry and fan-out
//!
//! The broadcaster owns every live subscriber and copies each published
//! message into every subscriber's bounded queue. Each subscriber's
//! connection task drains its own queue, so one slow client never stalls
//! the publisher or the other clients.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<Broadcaster>
//!                     ┌─────────────────────────┐
//!                     │ subscribers: HashMap<Id,│
//!                     │   SubscriberSlot {      │
//!                     │     tx: mpsc::Sender,   │
//!                     │     shared: state,      │
//!                     │   }                     │
//!                     │ >                       │
//!                     └───────────┬─────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//!         ▼                       ▼                       ▼
//!    [Ingester]           [SubscriberHandle]      [SubscriberHandle]
//!    publish()              handle.recv()           handle.recv()
//!         │                       │                       │
//!         └──► try_send() per slot ──► SSE body ──► HTTP connection
//! ```
//!
//! # Lifecycle
//!
//! `Pending -> Active -> Closing -> Closed`. A subscriber is pending until
//! its connection starts streaming, active while it receives fan-out,
//! closing once a disconnect or timeout is detected, and closed once its
//! slot is removed and its queue released.
//!
//! # Slow consumers
//!
//! Queues are bounded by `queue_capacity`. When a queue is full the message
//! is dropped for that subscriber only and counted in its statistics.

pub mod config;
pub mod error;
pub mod message;
pub mod store;
pub mod subscriber;

pub use config::BroadcasterConfig;
pub use error::BroadcastError;
pub use message::{EventMessage, SubscriberId};
pub use store::{Broadcaster, PublishOutcome, RemovalReason};
pub use subscriber::{SubscriberHandle, SubscriberState};
