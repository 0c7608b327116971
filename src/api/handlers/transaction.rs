//! Mutation endpoint handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use crate::api::dto::{MutationRequestDto, MutationResponse};
use crate::app_state::AppState;
use crate::domain::MutationRequest;
use crate::error::GatewayError;
use crate::persistence::LedgerStore;

/// `POST /transactions/with-activity`: Record a ledger entry and touch the
/// user's activity timestamp in one transaction.
///
/// # Errors
///
/// Returns [`GatewayError`] on a malformed body, non-positive ids, or any
/// step failure. Nothing is committed on error.
pub async fn create_with_activity<S: LedgerStore>(
    State(state): State<AppState<S>>,
    payload: Result<Json<MutationRequestDto>, JsonRejection>,
) -> Result<impl IntoResponse, GatewayError> {
    let request = parse_body(payload)?;
    let outcome = state
        .engine
        .create_ledger_entry_with_activity(request)
        .await?;
    Ok((StatusCode::CREATED, Json(MutationResponse::from(outcome))))
}

/// `POST /transactions/full-process`: Lock the corporate, record a ledger
/// entry, touch the user and debit the corporate's credit in one
/// transaction.
///
/// # Errors
///
/// Returns [`GatewayError`] on a malformed body, non-positive ids, an
/// unknown corporate, lock timeout, or any step failure. Nothing is
/// committed on error.
pub async fn create_full_process<S: LedgerStore>(
    State(state): State<AppState<S>>,
    payload: Result<Json<MutationRequestDto>, JsonRejection>,
) -> Result<impl IntoResponse, GatewayError> {
    let request = parse_body(payload)?;
    let outcome = state.engine.create_ledger_entry_full(request).await?;
    Ok((StatusCode::CREATED, Json(MutationResponse::from(outcome))))
}

fn parse_body(
    payload: Result<Json<MutationRequestDto>, JsonRejection>,
) -> Result<MutationRequest, GatewayError> {
    let Json(dto) = payload.map_err(|rejection| GatewayError::InvalidRequest(rejection.body_text()))?;
    Ok(dto.into())
}

/// Mutation routes.
pub fn routes<S: LedgerStore>() -> Router<AppState<S>> {
    Router::new()
        .route("/transactions/with-activity", post(create_with_activity::<S>))
        .route("/transactions/full-process", post(create_full_process::<S>))
}
