//! Type-safe entity identifiers.
//!
//! The store generates every key as a positive `BIGINT`. Each entity gets its
//! own newtype so an actor key can never be bound where a counterparty key is
//! expected.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw store key.
            #[must_use]
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Returns the raw store key.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }

            /// Returns `true` if the key can have been generated by the store.
            #[must_use]
            pub const fn is_valid(self) -> bool {
                self.0 > 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

entity_id! {
    /// Identifier of an end user (`app_user.id`).
    ActorId
}

entity_id! {
    /// Identifier of a corporate counterparty (`corporate.id`).
    CounterpartyId
}

entity_id! {
    /// Identifier of a ledger entry (`transaction_record.id`), assigned on insert.
    LedgerEntryId
}
