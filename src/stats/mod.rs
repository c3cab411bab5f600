//! Relay statistics

pub mod metrics;

pub use metrics::{
    BroadcastSnapshot, BroadcastStats, IngestSnapshot, IngestStats, SubscriberStats,
};
