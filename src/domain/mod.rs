//! Domain layer: identifiers, ledger entries and mutation protocols.
//!
//! Three persistent entities take part in the write path: ledger entries,
//! actors (end users) and counterparties (corporates holding a balance).
//! This module holds the values exchanged between the HTTP layer, the
//! mutation engine and the store.

pub mod ids;
pub mod ledger_entry;
pub mod mutation;

pub use ids::{ActorId, CounterpartyId, LedgerEntryId};
pub use ledger_entry::{LedgerStatus, NewLedgerEntry, ReferenceCode};
pub use mutation::{MutationOutcome, MutationRequest, MutationStep, Protocol};
