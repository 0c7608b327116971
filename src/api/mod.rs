//! REST API layer: route handlers, DTOs, and router composition.
//!
//! Mutation endpoints are mounted under `/api`; `/health` sits at the root.

pub mod dto;
pub mod handlers;

use axum::Router;

use crate::app_state::AppState;
use crate::persistence::LedgerStore;

/// Builds the complete API router with all REST endpoints.
pub fn build_router<S: LedgerStore>() -> Router<AppState<S>> {
    Router::new()
        .nest("/api", handlers::routes())
        .merge(handlers::system::routes())
}

#[cfg(test)]
#[allow(clippy::panic, clippy::indexing_slicing)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use rust_decimal::Decimal;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::domain::{ActorId, CounterpartyId};
    use crate::persistence::{FaultPoint, MemoryLedgerStore, StoreError};
    use crate::service::{MutationEngine, Timeouts};

    fn app() -> (Router, MemoryLedgerStore) {
        let store = MemoryLedgerStore::new(4);
        store.add_counterparty(CounterpartyId::new(7), Decimal::new(50_000, 2));
        store.add_actor(ActorId::new(42));
        let state = AppState::new(MutationEngine::new(store.clone(), Timeouts::default()));
        (build_router().with_state(state), store)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let Ok(response) = app.oneshot(request).await;
        let status = response.status();
        let Ok(bytes) = axum::body::to_bytes(response.into_body(), usize::MAX).await else {
            panic!("read body");
        };
        let Ok(body) = serde_json::from_slice(&bytes) else {
            panic!("body is not JSON: {}", String::from_utf8_lossy(&bytes));
        };
        (status, body)
    }

    fn post(uri: &str, body: &Value) -> Request<Body> {
        let Ok(request) = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
        else {
            panic!("request");
        };
        request
    }

    #[tokio::test]
    async fn with_activity_returns_created() {
        let (app, store) = app();
        let (status, body) = send(
            app,
            post(
                "/api/transactions/with-activity",
                &json!({"user_id": 42, "corporate_id": 7, "amount": 100.00}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "completed");
        assert_eq!(body["tables_touched"], 2);
        assert!(body["transaction_id"].as_i64().is_some_and(|id| id > 0));
        assert!(body.get("credit_remaining").is_none());
        assert!(store.actor_last_active(ActorId::new(42)).is_some());
    }

    #[tokio::test]
    async fn full_process_reports_credit_remaining() {
        let (app, store) = app();
        let (status, body) = send(
            app,
            post(
                "/api/transactions/full-process",
                &json!({"user_id": 42, "corporate_id": 7, "amount": "150.00"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["tables_touched"], 3);
        assert_eq!(body["credit_remaining"], "350.00");
        assert_eq!(
            store.balance(CounterpartyId::new(7)),
            Some(Decimal::new(35_000, 2))
        );
    }

    #[tokio::test]
    async fn malformed_body_is_invalid_request() {
        let (app, _) = app();
        let (status, body) = send(
            app,
            post("/api/transactions/full-process", &json!({"user_id": 42})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], 1001);
        assert_eq!(body["error"]["category"], "invalid_request");
        assert_eq!(body["error"]["retryable"], false);
    }

    #[tokio::test]
    async fn non_positive_id_is_invalid_request() {
        let (app, _) = app();
        let (status, _) = send(
            app,
            post(
                "/api/transactions/with-activity",
                &json!({"user_id": -1, "corporate_id": 7, "amount": 1}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_corporate_is_not_found() {
        let (app, _) = app();
        let (status, body) = send(
            app,
            post(
                "/api/transactions/full-process",
                &json!({"user_id": 42, "corporate_id": 99, "amount": 1}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["category"], "not_found");
    }

    #[tokio::test]
    async fn step_failure_names_the_cause() {
        let (app, store) = app();
        store.fail_at(FaultPoint::TouchActor, StoreError::Database("boom".to_string()));
        let (status, body) = send(
            app,
            post(
                "/api/transactions/with-activity",
                &json!({"user_id": 42, "corporate_id": 7, "amount": 1}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["category"], "write_failed");
        assert_eq!(body["error"]["message"], "touch_actor failed: database error: boom");
        assert!(store.ledger_entries().is_empty());
    }

    #[tokio::test]
    async fn health_reports_pool_stats() {
        let (app, _) = app();
        let Ok(request) = Request::get("/health").body(Body::empty()) else {
            panic!("request");
        };
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["max_conns"], 4);
        assert_eq!(body["acquired_conns"], 0);
        assert!(body.get("error").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn health_is_unavailable_when_pool_is_saturated() {
        let store = MemoryLedgerStore::new(0);
        let state = AppState::new(MutationEngine::new(store, Timeouts::default()));
        let app = build_router().with_state(state);
        let Ok(request) = Request::get("/health").body(Body::empty()) else {
            panic!("request");
        };
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["error"], "connection pool exhausted");
    }
}
