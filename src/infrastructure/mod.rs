//! Infrastructure - cold path only
//!
//! This module contains non-latency-critical code:
//! - Logging and metrics
//! - Configuration management
//! - Buffer pooling and the async send queue
//! - Thread pinning

pub mod affinity;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod pool;
pub mod queue;

pub use metrics::{ConnectionStats, StatsSnapshot};
pub use pool::{BufferPool, PooledBuffer};
pub use queue::OutboundQueue;
