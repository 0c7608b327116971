//! End-to-end tests over a real socket against the in-process store.

#![allow(clippy::panic, clippy::indexing_slicing)]

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use serde_json::{Value, json};

use acidbench::api;
use acidbench::app_state::AppState;
use acidbench::domain::{ActorId, CounterpartyId};
use acidbench::persistence::{FaultPoint, LedgerStore, MemoryLedgerStore};
use acidbench::service::{MutationEngine, Timeouts};

async fn spawn_server(store: MemoryLedgerStore) -> SocketAddr {
    let state = AppState::new(MutationEngine::new(store, Timeouts::default()));
    let app = api::build_router().with_state(state);
    let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
        panic!("bind");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("local addr");
    };
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

#[tokio::test]
async fn concurrent_full_process_requests_serialize_on_the_corporate() {
    let store = MemoryLedgerStore::new(8);
    store.add_counterparty(CounterpartyId::new(7), Decimal::new(50_000, 2));
    store.add_actor(ActorId::new(42));
    // Hold the row lock long enough for the other requests to connect and
    // queue behind it.
    store.delay_at(FaultPoint::InsertEntry, Duration::from_millis(20));
    let addr = spawn_server(store.clone()).await;
    let client = reqwest::Client::new();

    let started = Instant::now();
    let requests = (0..10).map(|_| {
        let client = client.clone();
        async move {
            client
                .post(format!("http://{addr}/api/transactions/full-process"))
                .json(&json!({"user_id": 42, "corporate_id": 7, "amount": "12.50"}))
                .send()
                .await
        }
    });
    let handles: Vec<_> = requests.map(tokio::spawn).collect();

    let mut remaining = Vec::new();
    for handle in handles {
        let Ok(Ok(response)) = handle.await else {
            panic!("request failed");
        };
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);
        let Ok(body) = response.json::<Value>().await else {
            panic!("json body");
        };
        assert_eq!(body["tables_touched"], 3);
        let Some(Ok(credit)) = body["credit_remaining"].as_str().map(str::parse::<Decimal>) else {
            panic!("credit_remaining is a decimal string: {body}");
        };
        remaining.push(credit);
    }
    remaining.sort();

    // Every request saw the balance left by the one before it.
    let expected: Vec<Decimal> = (1..=10)
        .rev()
        .map(|k| Decimal::new(50_000 - 1_250 * k, 2))
        .collect();
    assert_eq!(remaining, expected);
    assert!(store.peak_acquired() > 1);
    assert!(started.elapsed() >= Duration::from_millis(200));

    assert_eq!(
        store.balance(CounterpartyId::new(7)),
        Some(Decimal::new(37_500, 2))
    );
    assert_eq!(store.ledger_entries().len(), 10);
    assert_eq!(store.pool_stats().acquired, 0);
}

#[tokio::test]
async fn health_and_error_shape() {
    let store = MemoryLedgerStore::new(2);
    store.add_actor(ActorId::new(42));
    let addr = spawn_server(store).await;
    let client = reqwest::Client::new();

    let Ok(health) = client.get(format!("http://{addr}/health")).send().await else {
        panic!("health request");
    };
    assert_eq!(health.status(), reqwest::StatusCode::OK);
    let Ok(health) = health.json::<Value>().await else {
        panic!("health body");
    };
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["max_conns"], 2);

    let Ok(missing) = client
        .post(format!("http://{addr}/api/transactions/full-process"))
        .json(&json!({"user_id": 42, "corporate_id": 404, "amount": 1}))
        .send()
        .await
    else {
        panic!("mutation request");
    };
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    let Ok(body) = missing.json::<Value>().await else {
        panic!("error body");
    };
    assert_eq!(body["error"]["code"], 2001);
    assert_eq!(body["error"]["retryable"], false);
    assert_eq!(body["error"]["message"], "counterparty not found: 404");
}
