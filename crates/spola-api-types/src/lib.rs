//! Shared request and response types for the Spola catalog sync API.
//!
//! These types define the wire contract between the Spola server, the
//! storefront client, and the remote search backend. They carry no behaviour
//! beyond serde derives so that clients can depend on this crate without
//! pulling in the server.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Kind of catalog entity participating in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiEntityKind {
    Product,
    Tag,
    Category,
    Attribute,
    AttributeTerm,
}

/// Operation carried by a delta delivered to the remote backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaOp {
    Upsert,
    Delete,
}

/// A single entity delta pushed to the remote backend.
///
/// The receiver must treat deliveries idempotently: the same delta applied
/// twice is harmless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaPayload {
    pub entity_kind: ApiEntityKind,
    pub entity_id: Uuid,
    pub op: DeltaOp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// Structural taxonomy change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyNotification {
    pub concept: ApiEntityKind,
    pub term_id: Uuid,
    pub change: TaxonomyChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxonomyChange {
    Updated,
    Deleted,
}

/// One page of the bulk fingerprint listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintPage {
    /// Published product id → fingerprint digest.
    pub fingerprints: BTreeMap<Uuid, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Single-entity fingerprint response, optionally with the pre-digest
/// projection for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityFingerprint {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub computed_at: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection: Option<serde_json::Value>,
}

/// Feed buffer summary exposed by the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedStatus {
    pub pending: u64,
    #[serde(with = "time::serde::rfc3339::option", default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_enqueued_at: Option<OffsetDateTime>,
}

/// Batch scheduler summary exposed by the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatusSummary {
    pub status: String,
    pub processed_count: u64,
    pub batch_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_product_id: Option<Uuid>,
}

/// Aggregate settings/summary endpoint payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub feed: FeedStatus,
    pub batch: BatchStatusSummary,
    pub published_products: u64,
    pub fingerprinted_products: u64,
}

/// Externally-published cache manifest.
///
/// Non-privileged clients fetch this blob to decide locally whether a cached
/// response predates the current flush boundary or a per-dimension touch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheManifest {
    /// Flush interval in minutes.
    pub flush_interval: u64,
    /// Unix timestamp (seconds) of the last global flush.
    pub last_flush_time: i64,
    /// Dimension → key → unix timestamp of the last touch.
    pub per_field_last_touched: BTreeMap<String, BTreeMap<String, i64>>,
}

/// A taxonomy membership reference carried in mutation events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermRefWire {
    pub kind: ApiEntityKind,
    pub term_id: Uuid,
}

/// Inbound mutation event posted by the catalog collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MutationEvent {
    ProductSaved {
        id: Uuid,
        /// Memberships before the write. When the collaborator includes
        /// them, removed associations are detected as well as added ones.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_terms: Option<Vec<TermRefWire>>,
    },
    ProductDeleted {
        id: Uuid,
        /// Final memberships of the deleted product.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        terms: Option<Vec<TermRefWire>>,
    },
    TermSaved {
        kind: ApiEntityKind,
        term_id: Uuid,
    },
    TermDeleted {
        kind: ApiEntityKind,
        term_id: Uuid,
    },
    AttributeUpdated {
        id: Uuid,
    },
    AttributeDeleted {
        id: Uuid,
    },
    TermMetaChanged {
        kind: ApiEntityKind,
        term_id: Uuid,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_uses_camel_case_keys() {
        let manifest = CacheManifest {
            flush_interval: 60,
            last_flush_time: 1_700_000_000,
            per_field_last_touched: BTreeMap::new(),
        };
        let json = serde_json::to_value(&manifest).expect("serialize manifest");
        assert!(json.get("flushInterval").is_some());
        assert!(json.get("lastFlushTime").is_some());
        assert!(json.get("perFieldLastTouched").is_some());
    }

    #[test]
    fn delta_omits_fingerprint_for_deletes() {
        let delta = DeltaPayload {
            entity_kind: ApiEntityKind::Product,
            entity_id: Uuid::nil(),
            op: DeltaOp::Delete,
            fingerprint: None,
        };
        let json = serde_json::to_value(&delta).expect("serialize delta");
        assert!(json.get("fingerprint").is_none());
        assert_eq!(json["op"], "delete");
    }

    #[test]
    fn mutation_event_round_trips_through_tagging() {
        let event = MutationEvent::TermSaved {
            kind: ApiEntityKind::Tag,
            term_id: Uuid::nil(),
        };
        let json = serde_json::to_string(&event).expect("serialize event");
        assert!(json.contains("\"event\":\"term_saved\""));
        let back: MutationEvent = serde_json::from_str(&json).expect("parse event");
        assert_eq!(back, event);
    }
}
