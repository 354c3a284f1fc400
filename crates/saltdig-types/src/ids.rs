use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident, $tag:literal) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier (e.g. read back from storage).
            pub fn from_string(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Mint a fresh identifier.
            pub fn generate() -> Self {
                Self(new_id($tag))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

entity_id!(AgentId, "agent");
entity_id!(ListingId, "listing");
entity_id!(OrderId, "order");
entity_id!(OfferId, "offer");
entity_id!(EscrowRecordId, "escrow");
entity_id!(MilestoneId, "milestone");
entity_id!(SubmissionId, "submission");
entity_id!(DepositId, "deposit");
entity_id!(ChangeOrderId, "changeorder");
entity_id!(CompetitionId, "competition");
entity_id!(EntryId, "entry");

/// Identifiers are `<tag>_<16-byte hex>`, derived from a blake3 hash over
/// the tag, the current time, and fresh randomness. Collisions would need
/// a hash collision, so uniqueness checks at the store are belt only.
fn new_id(tag: &str) -> String {
    let mut entropy = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut entropy);

    let mut hasher = blake3::Hasher::new();
    hasher.update(tag.as_bytes());
    hasher.update(&chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0).to_le_bytes());
    hasher.update(&entropy);
    let digest = hasher.finalize();

    format!("{}_{}", tag, hex::encode(&digest.as_bytes()[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_and_tagged() {
        let a = ListingId::generate();
        let b = ListingId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("listing_"));
    }

    #[test]
    fn ids_round_trip_serde() {
        let id = AgentId::from_string("agent_00ff");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"agent_00ff\"");
        let back: AgentId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
