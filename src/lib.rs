//! # acidbench
//!
//! Transactional write path of a PostgreSQL ACID benchmark service.
//!
//! Two HTTP endpoints each run one multi-statement transaction against three
//! tables (ledger entries, actors, counterparties) under a fixed deadline,
//! sharing a bounded, health-checked connection pool.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP)
//!     │
//!     ├── REST Handlers (api/)
//!     │
//!     ├── MutationEngine (service/)
//!     ├── TxGuard + with_deadline (service/)
//!     │
//!     ├── LedgerStore (persistence/)
//!     ├── DbPool + health monitor (persistence/)
//!     │
//!     └── PostgreSQL
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod service;
