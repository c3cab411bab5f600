//! Orbital: sampled UDP event relay with a live Server-Sent Events feed
//!
//! Many anonymous UDP senders feed one process; many HTTP clients watch a
//! shared live stream. Each datagram gets one independent sampling draw and
//! the survivors are fanned out, byte for byte, to every connected client.
//!
//! ```text
//! UDP datagram ─► Ingester ─► Sampler ─► Broadcaster.publish()
//!                                               │ try_send (bounded, drop on full)
//!                        ┌──────────────────────┼──────────────────────┐
//!                        ▼                      ▼                      ▼
//!                 SubscriberHandle       SubscriberHandle       SubscriberHandle
//!                        │                      │                      │
//!                  GET /stream (SSE)      GET /stream (SSE)      GET /stream (SSE)
//! ```
//!
//! Delivery is best effort: no durability, no replay for late joiners, and a
//! slow client only loses its own messages.
//!
//! # Example
//!
//! ```no_run
//! use orbital::{OrbitalServer, ServerConfig};
//!
//! # async fn example() -> orbital::Result<()> {
//! let config = ServerConfig::default().sample_rate(0.1);
//! let server = OrbitalServer::new(config)?;
//!
//! server
//!     .run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! # }
//! ```

pub mod broadcast;
pub mod cli;
pub mod error;
pub mod generator;
pub mod ingest;
pub mod sampler;
pub mod server;
pub mod stats;

pub use broadcast::{
    Broadcaster, BroadcasterConfig, EventMessage, SubscriberHandle, SubscriberId, SubscriberState,
};
pub use error::{Error, Result};
pub use ingest::{DatagramSource, Ingester};
pub use sampler::{should_forward, Sampler};
pub use server::{OrbitalServer, ServerConfig};
