use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{RepoError, TaxonomyRepo};
use crate::domain::entities::{AttributeRecord, TermRecord};
use crate::domain::types::TermKind;

use super::{PostgresRepositories, map_sqlx_error};

const TERM_COLUMNS: &str = "id, kind, slug, name, parent_id, attribute_id, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct TermRow {
    id: Uuid,
    kind: TermKind,
    slug: String,
    name: String,
    parent_id: Option<Uuid>,
    attribute_id: Option<Uuid>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<TermRow> for TermRecord {
    fn from(row: TermRow) -> Self {
        Self {
            id: row.id,
            kind: row.kind,
            slug: row.slug,
            name: row.name,
            parent_id: row.parent_id,
            attribute_id: row.attribute_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AttributeRow {
    id: Uuid,
    slug: String,
    name: String,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<AttributeRow> for AttributeRecord {
    fn from(row: AttributeRow) -> Self {
        Self {
            id: row.id,
            slug: row.slug,
            name: row.name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl TaxonomyRepo for PostgresRepositories {
    async fn find_term(&self, id: Uuid) -> Result<Option<TermRecord>, RepoError> {
        let row = sqlx::query_as::<_, TermRow>(&format!(
            "SELECT {TERM_COLUMNS} FROM terms WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(TermRecord::from))
    }

    async fn find_attribute(&self, id: Uuid) -> Result<Option<AttributeRecord>, RepoError> {
        let row = sqlx::query_as::<_, AttributeRow>(
            "SELECT id, slug, name, created_at, updated_at FROM attributes WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(AttributeRecord::from))
    }

    async fn terms_for_attribute(&self, attribute_id: Uuid) -> Result<Vec<TermRecord>, RepoError> {
        let rows = sqlx::query_as::<_, TermRow>(&format!(
            "SELECT {TERM_COLUMNS} FROM terms WHERE attribute_id = $1 ORDER BY slug"
        ))
        .bind(attribute_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(TermRecord::from).collect())
    }
}
