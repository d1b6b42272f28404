//! # ict-common
//!
//! Cross-cutting pieces every ict-rs subsystem relies on:
//!
//! - [`Lifecycle`]: the `terminated → starting → running → terminating`
//!   state machine that governs every long-running component. Illegal
//!   transitions fail fast instead of silently no-opping.
//! - [`NodeConfig`]: the externally owned configuration consumed by the
//!   core (bind address, neighbors, capacity, anti-spam threshold, forward
//!   delays, round duration).

pub mod config;
pub mod lifecycle;

pub use config::{ConfigError, NodeConfig};
pub use lifecycle::{Lifecycle, LifecycleError, LifecycleState};

/// Hard limit on the number of configured neighbors.
///
/// The gossip protocol is designed for very small, hand-picked neighborhoods;
/// flooding more than this many peers defeats the anti-spam accounting.
pub const MAX_NEIGHBOR_COUNT: usize = 3;
