//! Service layer: deadline-bound execution and the mutation protocols.
//!
//! [`MutationEngine`] runs each protocol inside a [`TxGuard`] under one
//! [`Deadline`] obtained from [`with_deadline`].

pub mod deadline;
pub mod mutation_engine;
pub mod tx_guard;

pub use deadline::{
    Deadline, DeadlineExceeded, OperationKind, POINT_TIMEOUT, SCAN_TIMEOUT, Timeouts,
    with_deadline,
};
pub use mutation_engine::MutationEngine;
pub use tx_guard::{StepTracker, TxGuard, TxState};
