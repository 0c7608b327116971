//! Ledger entry values written by the mutation protocols.

use std::fmt;

use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{ActorId, CounterpartyId};

/// Upper bound (exclusive) of the random part of a reference code.
const REFERENCE_SPACE: i64 = 999_999_999_999;

/// Lifecycle status stored on a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    /// Recorded but not yet settled.
    Pending,
    /// Settled in the same transaction that recorded it.
    Completed,
}

impl LedgerStatus {
    /// Returns the value stored in the `status` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-readable reference code: a protocol prefix followed by twelve
/// zero-padded random digits (e.g. `ACID3000482915733`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ReferenceCode(String);

impl ReferenceCode {
    /// Draws a fresh code with the given prefix from the thread-local RNG.
    #[must_use]
    pub fn generate(prefix: &str) -> Self {
        let suffix = rand::thread_rng().gen_range(0..REFERENCE_SPACE);
        Self(format!("{prefix}{suffix:012}"))
    }

    /// Returns the code as stored in `reference_code`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReferenceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A ledger row ready to be inserted. The store assigns the identity and
/// the creation timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLedgerEntry {
    /// Actor that initiated the movement.
    pub actor_id: ActorId,
    /// Counterparty the movement is booked against.
    pub counterparty_id: CounterpartyId,
    /// Signed monetary amount.
    pub amount: Decimal,
    /// ISO currency code.
    pub currency: &'static str,
    /// Movement kind (`tx_type` column).
    pub kind: &'static str,
    /// Initial status.
    pub status: LedgerStatus,
    /// Free-text description.
    pub description: &'static str,
    /// Unique reference code.
    pub reference_code: ReferenceCode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_code_has_prefix_and_twelve_digits() {
        let code = ReferenceCode::generate("ACID3");
        let s = code.as_str();
        assert_eq!(s.len(), 17);
        assert!(s.starts_with("ACID3"));
        assert!(s.get(5..).is_some_and(|d| d.chars().all(|c| c.is_ascii_digit())));
    }

    #[test]
    fn reference_codes_differ_between_draws() {
        let a = ReferenceCode::generate("ACID2");
        let b = ReferenceCode::generate("ACID2");
        assert_ne!(a, b);
    }

    #[test]
    fn status_column_values() {
        assert_eq!(LedgerStatus::Completed.as_str(), "completed");
        assert_eq!(LedgerStatus::Pending.to_string(), "pending");
    }
}
