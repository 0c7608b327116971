//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::persistence::LedgerStore;
use crate::service::MutationEngine;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug)]
pub struct AppState<S: LedgerStore> {
    /// Mutation engine for both write protocols.
    pub engine: Arc<MutationEngine<S>>,
}

impl<S: LedgerStore> AppState<S> {
    /// Wraps `engine` for sharing across handlers.
    #[must_use]
    pub fn new(engine: MutationEngine<S>) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

// Derived `Clone` would require `S: Clone`.
impl<S: LedgerStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}
