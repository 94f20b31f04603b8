//! Content-hash engine.
//!
//! Derives a deterministic digest per catalog entity from a whitelisted,
//! canonically-ordered projection of its content. The digest is a change
//! detector, not a security boundary: two projections are equal exactly when
//! their digests are equal, irrespective of field insertion order.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::application::repos::{ProductsRepo, RepoError, TaxonomyRepo};
use crate::domain::entities::{ProductRecord, TermRecord};
use crate::domain::types::TermKind;

/// Bumped whenever the whitelist or canonicalization rules change, so stored
/// digests from older projections never compare equal to fresh ones.
pub const PROJECTION_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum FingerprintError {
    /// The entity vanished between event and processing. Callers must leave
    /// the entity unfingerprinted so it is retried; a stale-but-wrong digest
    /// would suppress re-sync.
    #[error("entity could not be resolved")]
    NoData,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Resolved view of a product: the record plus its taxonomy memberships with
/// term content attached.
#[derive(Debug, Clone)]
pub struct ProductView {
    pub product: ProductRecord,
    pub terms: Vec<TermRecord>,
}

pub struct FingerprintEngine {
    products: Arc<dyn ProductsRepo>,
    taxonomy: Arc<dyn TaxonomyRepo>,
}

impl FingerprintEngine {
    pub fn new(products: Arc<dyn ProductsRepo>, taxonomy: Arc<dyn TaxonomyRepo>) -> Self {
        Self { products, taxonomy }
    }

    /// Resolve the canonical entity view from the catalog collaborator.
    ///
    /// Terms that no longer resolve are omitted from the view; the taxonomy
    /// sweep re-dirties affected products when terms change, so the omission
    /// is corrected on the next pass.
    pub async fn resolve(&self, id: Uuid) -> Result<ProductView, FingerprintError> {
        let product = self
            .products
            .find_product(id)
            .await?
            .ok_or(FingerprintError::NoData)?;

        let memberships = self.products.taxonomy_for(id).await?;
        let mut terms = Vec::with_capacity(memberships.memberships.len());
        for (_, term_id) in &memberships.memberships {
            if let Some(term) = self.taxonomy.find_term(*term_id).await? {
                terms.push(term);
            }
        }

        Ok(ProductView { product, terms })
    }

    /// Compute the digest for an entity by id.
    pub async fn fingerprint(&self, id: Uuid) -> Result<String, FingerprintError> {
        let view = self.resolve(id).await?;
        Ok(digest(&view))
    }

    /// Compute both the digest and the pre-digest projection, for the debug
    /// REST path.
    pub async fn fingerprint_with_projection(
        &self,
        id: Uuid,
    ) -> Result<(String, Value), FingerprintError> {
        let view = self.resolve(id).await?;
        let projected = projection(&view);
        Ok((digest_of_projection(&projected), projected))
    }
}

/// Project a resolved view onto the fixed field whitelist.
///
/// Volatile bookkeeping fields (the stored fingerprint, the feed-handled
/// marker, computed timestamps) are excluded: they change as a *consequence*
/// of syncing and must never feed back into the digest.
pub fn projection(view: &ProductView) -> Value {
    let product = &view.product;

    let mut taxonomies: Vec<(TermKind, &TermRecord)> =
        view.terms.iter().map(|term| (term.kind, term)).collect();
    taxonomies.sort_by(|(ka, ta), (kb, tb)| ka.cmp(kb).then_with(|| ta.slug.cmp(&tb.slug)));

    let taxonomy_values: Vec<Value> = taxonomies
        .into_iter()
        .map(|(kind, term)| {
            json!({
                "kind": kind.as_str(),
                "slug": term.slug,
                "name": term.name,
            })
        })
        .collect();

    let raw = json!({
        "version": PROJECTION_VERSION,
        "sku": product.sku,
        "slug": product.slug,
        "name": product.name,
        "description": product.description,
        "short_description": product.short_description,
        "status": product.status,
        "regular_price_cents": product.regular_price_cents,
        "sale_price_cents": product.sale_price_cents,
        "stock_status": product.stock_status.as_str(),
        "stock_quantity": product.stock_quantity,
        "images": product.image_urls,
        "taxonomies": taxonomy_values,
        "metadata": product.metadata,
    });

    canonicalize(&raw)
}

/// Digest a resolved view.
pub fn digest(view: &ProductView) -> String {
    digest_of_projection(&projection(view))
}

fn digest_of_projection(projected: &Value) -> String {
    let serialized = projected.to_string();
    hex::encode(Sha256::digest(serialized.as_bytes()))
}

/// Recursively rewrite a JSON value into canonical form: mapping keys in
/// sorted order, sequence elements in a stable total order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::with_capacity(map.len());
            for key in keys {
                out.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            let mut out: Vec<Value> = items.iter().map(canonicalize).collect();
            out.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
            Value::Array(out)
        }
        other => other.clone(),
    }
}
