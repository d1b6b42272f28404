//! Preprocessor handles for chained effect pipelines.

use tokio::sync::mpsc::UnboundedReceiver;

use crate::{EffectDispatcher, Environment};

/// One stage of a preprocessor chain.
///
/// Effects travelling along the chain arrive via [`take_effect`] (or
/// [`poll_effect`] for non-blocking use); the stage decides whether to
/// forward each one with [`pass_on`]. An effect that is never passed on is
/// silently filtered out of the chain. Dropping the handle deregisters the
/// stage, so later effects skip straight to its successor.
///
/// [`take_effect`]: ChainedPreprocessor::take_effect
/// [`poll_effect`]: ChainedPreprocessor::poll_effect
/// [`pass_on`]: ChainedPreprocessor::pass_on
pub struct ChainedPreprocessor<T: Send + 'static> {
    chain: Environment,
    position: i64,
    incoming: UnboundedReceiver<T>,
    dispatcher: EffectDispatcher<T>,
}

impl<T: Send + 'static> ChainedPreprocessor<T> {
    pub(crate) fn new(
        chain: Environment,
        position: i64,
        incoming: UnboundedReceiver<T>,
        dispatcher: EffectDispatcher<T>,
    ) -> Self {
        Self {
            chain,
            position,
            incoming,
            dispatcher,
        }
    }

    #[must_use]
    pub fn chain(&self) -> &Environment {
        &self.chain
    }

    #[must_use]
    pub fn position(&self) -> i64 {
        self.position
    }

    /// Wait for the next effect routed through this stage.
    ///
    /// Returns `None` once the stage has been removed from the chain and
    /// its queue has drained.
    pub async fn take_effect(&mut self) -> Option<T> {
        self.incoming.recv().await
    }

    /// Take a queued effect without waiting.
    pub fn poll_effect(&mut self) -> Option<T> {
        self.incoming.try_recv().ok()
    }

    /// Forward an effect to the next stage, or to the chain's terminal
    /// environment if this is the last stage.
    pub fn pass_on(&self, effect: T) {
        self.dispatcher
            .chain_hop(self.chain.clone(), self.position, effect);
    }
}

impl<T: Send + 'static> Drop for ChainedPreprocessor<T> {
    fn drop(&mut self) {
        self.dispatcher.remove_preprocessor(&self.chain, self.position);
    }
}
