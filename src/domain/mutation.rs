//! Mutation requests, protocol descriptors and outcomes.

use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;

use super::{ActorId, CounterpartyId, LedgerEntryId, LedgerStatus, NewLedgerEntry, ReferenceCode};

/// Inputs shared by both mutation protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationRequest {
    /// Actor whose activity timestamp is touched.
    pub actor_id: ActorId,
    /// Counterparty the ledger entry is booked against.
    pub counterparty_id: CounterpartyId,
    /// Amount recorded (and, for the full protocol, debited).
    pub amount: Decimal,
}

/// The two transactional write protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Ledger insert + actor activity update.
    WithActivity,
    /// Counterparty lock + ledger insert + actor update + balance debit.
    FullProcess,
}

impl Protocol {
    /// Number of entities a committed run of this protocol touches.
    #[must_use]
    pub const fn entities_touched(self) -> u8 {
        match self {
            Self::WithActivity => 2,
            Self::FullProcess => 3,
        }
    }

    /// Prefix of the reference codes generated by this protocol.
    #[must_use]
    pub const fn reference_prefix(self) -> &'static str {
        match self {
            Self::WithActivity => "ACID2",
            Self::FullProcess => "ACID3",
        }
    }

    const fn description(self) -> &'static str {
        match self {
            Self::WithActivity => "ACID 2-table benchmark",
            Self::FullProcess => "ACID 3-table benchmark",
        }
    }

    /// Builds the ledger row this protocol inserts for `request`, with a
    /// freshly drawn reference code.
    #[must_use]
    pub fn ledger_entry(self, request: &MutationRequest) -> NewLedgerEntry {
        NewLedgerEntry {
            actor_id: request.actor_id,
            counterparty_id: request.counterparty_id,
            amount: request.amount,
            currency: "THB",
            kind: "payment",
            status: LedgerStatus::Completed,
            description: self.description(),
            reference_code: ReferenceCode::generate(self.reference_prefix()),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WithActivity => f.write_str("with_activity"),
            Self::FullProcess => f.write_str("full_process"),
        }
    }
}

/// A single step of a mutation protocol. Used to attribute failures and to
/// tell lock waits apart from other timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum MutationStep {
    /// Waiting for a pooled connection.
    Acquire = 0,
    /// Opening the transaction on the acquired connection.
    Begin = 1,
    /// `SELECT ... FOR UPDATE` on the counterparty row.
    LockCounterparty = 2,
    /// Inserting the ledger entry.
    InsertEntry = 3,
    /// Updating the actor's last-active timestamp.
    TouchActor = 4,
    /// Debiting the locked counterparty balance.
    DebitCounterparty = 5,
    /// Committing.
    Commit = 6,
}

impl MutationStep {
    /// Decodes a step stored with `as u8`.
    #[must_use]
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Begin,
            2 => Self::LockCounterparty,
            3 => Self::InsertEntry,
            4 => Self::TouchActor,
            5 => Self::DebitCounterparty,
            6 => Self::Commit,
            _ => Self::Acquire,
        }
    }

    /// Snake-case step name used in logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Acquire => "acquire",
            Self::Begin => "begin",
            Self::LockCounterparty => "lock_counterparty",
            Self::InsertEntry => "insert_entry",
            Self::TouchActor => "touch_actor",
            Self::DebitCounterparty => "debit_counterparty",
            Self::Commit => "commit",
        }
    }
}

impl fmt::Display for MutationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a committed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOutcome {
    /// Protocol that produced this outcome.
    pub protocol: Protocol,
    /// Identity assigned to the new ledger entry.
    pub ledger_entry_id: LedgerEntryId,
    /// Status recorded on the entry.
    pub status: LedgerStatus,
    /// Number of entities written.
    pub entities_touched: u8,
    /// Balance observed under the row lock minus the amount. Only set by
    /// [`Protocol::FullProcess`]; never re-read after commit.
    pub balance_remaining: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_round_trips_through_u8() {
        for step in [
            MutationStep::Acquire,
            MutationStep::Begin,
            MutationStep::LockCounterparty,
            MutationStep::InsertEntry,
            MutationStep::TouchActor,
            MutationStep::DebitCounterparty,
            MutationStep::Commit,
        ] {
            assert_eq!(MutationStep::from_u8(step as u8), step);
        }
    }

    #[test]
    fn ledger_entry_carries_protocol_defaults() {
        let request = MutationRequest {
            actor_id: ActorId::new(42),
            counterparty_id: CounterpartyId::new(7),
            amount: Decimal::new(10_000, 2),
        };
        let entry = Protocol::FullProcess.ledger_entry(&request);
        assert_eq!(entry.status, LedgerStatus::Completed);
        assert_eq!(entry.currency, "THB");
        assert_eq!(entry.kind, "payment");
        assert!(entry.reference_code.as_str().starts_with("ACID3"));
        assert_eq!(entry.amount, request.amount);
    }

    #[test]
    fn entities_touched_per_protocol() {
        assert_eq!(Protocol::WithActivity.entities_touched(), 2);
        assert_eq!(Protocol::FullProcess.entities_touched(), 3);
    }
}
