//! REST endpoint handlers organized by resource.

pub mod system;
pub mod transaction;

use axum::Router;

use crate::app_state::AppState;
use crate::persistence::LedgerStore;

/// Composes all resource routes under `/api`.
pub fn routes<S: LedgerStore>() -> Router<AppState<S>> {
    Router::new().merge(transaction::routes())
}
