//! Strongly-typed identifiers for workflow entities
//!
//! Using newtype wrappers around UUIDs provides type safety and prevents
//! accidental mixing of an application id with an event id, which matters
//! here because both travel side by side in every event envelope.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates a new time-ordered identifier (v7)
            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }

            /// Creates from an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Returns the identifier prefix for display
            pub fn prefix() -> &'static str {
                $prefix
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                // Strip prefix if present
                let uuid_str = s.strip_prefix(concat!($prefix, "-")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(uuid_str)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.0
            }
        }
    };
}

// Correlation key threading every event of one application's lifecycle
define_id!(ApplicationId, "APP");

// Globally unique event identity, used for deduplication
define_id!(EventId, "EVT");

// Farmers, extension workers, agriculturists, PCIC and DA officers
define_id!(ActorId, "ACT");

define_id!(TenantId, "TEN");

// Staged outbox record
define_id!(OutboxId, "OBX");

impl ApplicationId {
    /// Returns the bus partition key for this application
    ///
    /// All events of one application share the key so a single consumer
    /// instance sees them in producer order.
    pub fn partition_key(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_id_display() {
        let id = ApplicationId::new();
        let display = id.to_string();
        assert!(display.starts_with("APP-"));
    }

    #[test]
    fn test_id_parsing() {
        let original = EventId::new();
        let parsed: EventId = original.to_string().parse().unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_uuid_conversion() {
        let uuid = Uuid::new_v4();
        let application_id = ApplicationId::from(uuid);
        let back: Uuid = application_id.into();
        assert_eq!(uuid, back);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// The partition key is one bus subject token and parses back to the id
            #[test]
            fn prop_partition_key_is_a_stable_subject_token(bits in any::<u128>()) {
                let id = ApplicationId::from_uuid(Uuid::from_u128(bits));
                let key = id.partition_key();

                prop_assert_eq!(&key, &id.to_string());
                prop_assert!(!key.contains(['.', '*', '>', ' ']));
                prop_assert_eq!(key.parse::<ApplicationId>().unwrap(), id);
            }
        }
    }
}
