//! Domain entities mirrored from persistent storage.

use std::collections::BTreeSet;

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::types::{ProductStatus, StockStatus, TermKind};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductRecord {
    pub id: Uuid,
    pub sku: String,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub short_description: String,
    pub status: ProductStatus,
    pub regular_price_cents: Option<i64>,
    pub sale_price_cents: Option<i64>,
    pub stock_status: StockStatus,
    pub stock_quantity: Option<i32>,
    pub image_urls: Vec<String>,
    /// Structured metadata carried opaquely from the system-of-record.
    pub metadata: serde_json::Value,
    pub fingerprint: Option<String>,
    pub fingerprint_computed_at: Option<OffsetDateTime>,
    /// Set once the entity's current state has been delivered downstream.
    pub feed_handled: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// A taxonomy term: tag, category, or attribute term.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TermRecord {
    pub id: Uuid,
    pub kind: TermKind,
    pub slug: String,
    pub name: String,
    pub parent_id: Option<Uuid>,
    /// Owning attribute for `attribute_term` rows.
    pub attribute_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeRecord {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// The taxonomy memberships of a single product.
///
/// Kept as ordered sets so a before/after diff is cheap and deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProductTaxonomy {
    pub memberships: BTreeSet<(TermKind, Uuid)>,
}

impl ProductTaxonomy {
    pub fn new(memberships: impl IntoIterator<Item = (TermKind, Uuid)>) -> Self {
        Self {
            memberships: memberships.into_iter().collect(),
        }
    }

    /// Terms present on either side of a write.
    ///
    /// The union guarantees removals are detected, not just additions.
    pub fn union<'a>(&'a self, other: &'a Self) -> impl Iterator<Item = (TermKind, Uuid)> + 'a {
        self.memberships.union(&other.memberships).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.memberships.is_empty()
    }
}

/// A pending entry in the durable outbound feed buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedEntryRecord {
    pub id: i64,
    pub entity_kind: crate::domain::types::EntityKind,
    pub entity_id: Uuid,
    /// True when the entity was deleted and the delta is a tombstone.
    pub deleted: bool,
    pub enqueued_at: OffsetDateTime,
    pub attempts: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_union_covers_removals() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        let before = ProductTaxonomy::new([(TermKind::Tag, a), (TermKind::Tag, b)]);
        let after = ProductTaxonomy::new([(TermKind::Tag, a), (TermKind::Category, c)]);

        let union: BTreeSet<_> = before.union(&after).collect();
        assert!(union.contains(&(TermKind::Tag, a)));
        assert!(union.contains(&(TermKind::Tag, b)), "removed tag must appear");
        assert!(union.contains(&(TermKind::Category, c)));
        assert_eq!(union.len(), 3);
    }
}
