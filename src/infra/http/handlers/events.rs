//! Inbound mutation event webhook.
//!
//! The catalog system-of-record posts mutation notifications here; they are
//! translated into typed sync events and published on the bus.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use uuid::Uuid;

use spola_api_types::{ApiEntityKind, MutationEvent, TermRefWire};

use crate::application::events::SyncEvent;
use crate::domain::entities::ProductTaxonomy;
use crate::domain::types::TermKind;

use super::super::HttpState;
use super::super::error::ApiError;

fn term_kind(kind: ApiEntityKind) -> Result<TermKind, ApiError> {
    match kind {
        ApiEntityKind::Tag => Ok(TermKind::Tag),
        ApiEntityKind::Category => Ok(TermKind::Category),
        ApiEntityKind::AttributeTerm => Ok(TermKind::AttributeTerm),
        ApiEntityKind::Product | ApiEntityKind::Attribute => Err(ApiError::unprocessable(
            "not a taxonomy term kind",
            Some(format!("{kind:?} cannot carry term events")),
        )),
    }
}

fn taxonomy_from_refs(refs: &[TermRefWire]) -> Result<ProductTaxonomy, ApiError> {
    let mut memberships = Vec::with_capacity(refs.len());
    for term_ref in refs {
        memberships.push((term_kind(term_ref.kind)?, term_ref.term_id));
    }
    Ok(ProductTaxonomy::new(memberships))
}

/// `POST /api/v1/events`
pub async fn post_event(
    State(state): State<HttpState>,
    Json(payload): Json<MutationEvent>,
) -> Result<impl IntoResponse, ApiError> {
    let event = translate(&state, payload).await?;
    state.bus.publish(event).await.map_err(ApiError::repo)?;
    Ok(StatusCode::ACCEPTED)
}

async fn translate(state: &HttpState, payload: MutationEvent) -> Result<SyncEvent, ApiError> {
    Ok(match payload {
        MutationEvent::ProductSaved { id, previous_terms } => {
            let after = current_taxonomy(state, id).await?;
            // Without the previous memberships only additions are visible
            // here; term-level changes still arrive via the sweep path.
            let before = match previous_terms {
                Some(refs) => taxonomy_from_refs(&refs)?,
                None => after.clone(),
            };
            SyncEvent::ProductSaved { id, before, after }
        }
        MutationEvent::ProductDeleted { id, terms } => {
            let memberships = match terms {
                Some(refs) => taxonomy_from_refs(&refs)?,
                None => ProductTaxonomy::default(),
            };
            SyncEvent::ProductDeleted { id, memberships }
        }
        MutationEvent::TermSaved { kind, term_id } => SyncEvent::TermSaved {
            kind: term_kind(kind)?,
            term_id,
        },
        MutationEvent::TermDeleted { kind, term_id } => SyncEvent::TermDeleted {
            kind: term_kind(kind)?,
            term_id,
        },
        MutationEvent::AttributeUpdated { id } => SyncEvent::AttributeUpdated { id },
        MutationEvent::AttributeDeleted { id } => SyncEvent::AttributeDeleted { id },
        MutationEvent::TermMetaChanged { kind, term_id } => SyncEvent::TermMetaChanged {
            kind: term_kind(kind)?,
            term_id,
        },
    })
}

async fn current_taxonomy(state: &HttpState, id: Uuid) -> Result<ProductTaxonomy, ApiError> {
    state.products.taxonomy_for(id).await.map_err(ApiError::repo)
}
