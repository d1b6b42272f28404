//! # Effect Dispatch Bus
//!
//! Inter-component communication happens through named [`Environment`]s:
//! a component publishes an effect into an environment, and every listener
//! registered on that environment observes it. A single dispatch task
//! delivers effects strictly in submission order, so two listeners on the
//! same environment always agree on the order of effects.
//!
//! On top of plain environments sit *chains*: ordered pipelines of
//! preprocessors that each see an effect before the terminal environment
//! does, and decide whether to pass it on. The gossip pipeline uses a
//! chain to let applications filter or buffer transactions before the
//! node reacts to them.

pub mod chain;
pub mod dispatcher;
pub mod environment;

pub use chain::ChainedPreprocessor;
pub use dispatcher::{EffectDispatcher, EffectListener, ListenerId};
pub use environment::Environment;

use thiserror::Error;

/// Queue depth at which the dispatch task starts warning about a slow
/// listener holding up the bus.
pub const DEFAULT_BACKLOG_WARN_THRESHOLD: usize = 1000;

/// Errors from chain management on the bus.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("chain `{environment}` is already registered")]
    ChainAlreadyRegistered { environment: Environment },

    #[error("no chain registered under `{environment}`")]
    UnknownChain { environment: Environment },

    #[error("chain `{environment}` already has a preprocessor at position {position}")]
    PositionOccupied {
        environment: Environment,
        position: i64,
    },
}
