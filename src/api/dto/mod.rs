//! Data Transfer Objects for REST request/response serialization.
//!
//! Decimal amounts are serialized as JSON strings to prevent precision
//! loss; requests accept either form.

pub mod transaction_dto;

pub use transaction_dto::*;
