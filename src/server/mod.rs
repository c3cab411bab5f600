//! HTTP endpoint adapter and process wiring

pub mod config;
pub mod connection;
pub mod http;
pub mod listener;
pub mod sse;

pub use config::ServerConfig;
pub use listener::{BoundSockets, OrbitalServer};
