//! Mutation request and response DTOs.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{
    ActorId, CounterpartyId, LedgerEntryId, LedgerStatus, MutationOutcome, MutationRequest,
};

/// Request body for both `POST /api/transactions/*` endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct MutationRequestDto {
    /// Actor whose activity is recorded.
    pub user_id: i64,
    /// Counterparty the entry is booked against.
    pub corporate_id: i64,
    /// Amount, as a JSON number or a decimal string.
    pub amount: Decimal,
}

impl From<MutationRequestDto> for MutationRequest {
    fn from(dto: MutationRequestDto) -> Self {
        Self {
            actor_id: ActorId::new(dto.user_id),
            counterparty_id: CounterpartyId::new(dto.corporate_id),
            amount: dto.amount,
        }
    }
}

/// Response body for a committed mutation.
#[derive(Debug, Clone, Serialize)]
pub struct MutationResponse {
    /// Identity of the new ledger entry.
    pub transaction_id: LedgerEntryId,
    /// Status recorded on the entry.
    pub status: LedgerStatus,
    /// Number of tables written.
    pub tables_touched: u8,
    /// Counterparty balance after the debit (string-encoded). Only present
    /// for the full-process protocol.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit_remaining: Option<Decimal>,
}

impl From<MutationOutcome> for MutationResponse {
    fn from(outcome: MutationOutcome) -> Self {
        Self {
            transaction_id: outcome.ledger_entry_id,
            status: outcome.status,
            tables_touched: outcome.entities_touched,
            credit_remaining: outcome.balance_remaining,
        }
    }
}
