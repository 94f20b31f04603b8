//! The durable feed buffer table.

use async_trait::async_trait;
use sqlx::Row;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{FeedBufferRepo, RepoError};
use crate::domain::entities::FeedEntryRecord;
use crate::domain::types::EntityKind;

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct FeedRow {
    id: i64,
    entity_kind: String,
    entity_id: Uuid,
    deleted: bool,
    enqueued_at: OffsetDateTime,
    attempts: i32,
}

impl TryFrom<FeedRow> for FeedEntryRecord {
    type Error = RepoError;

    fn try_from(row: FeedRow) -> Result<Self, Self::Error> {
        let entity_kind = match row.entity_kind.as_str() {
            "product" => EntityKind::Product,
            "tag" => EntityKind::Tag,
            "category" => EntityKind::Category,
            "attribute" => EntityKind::Attribute,
            "attribute_term" => EntityKind::AttributeTerm,
            other => {
                return Err(RepoError::from_persistence(format!(
                    "unknown feed entity kind `{other}`"
                )));
            }
        };

        Ok(Self {
            id: row.id,
            entity_kind,
            entity_id: row.entity_id,
            deleted: row.deleted,
            enqueued_at: row.enqueued_at,
            attempts: row.attempts,
        })
    }
}

#[async_trait]
impl FeedBufferRepo for PostgresRepositories {
    async fn enqueue(
        &self,
        entity_kind: EntityKind,
        entity_id: Uuid,
        deleted: bool,
    ) -> Result<i64, RepoError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO feed_buffer (entity_kind, entity_id, deleted, enqueued_at, attempts) \
             VALUES ($1, $2, $3, now(), 0) \
             RETURNING id",
        )
        .bind(entity_kind.as_str())
        .bind(entity_id)
        .bind(deleted)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(id)
    }

    async fn list_pending(&self, limit: u32) -> Result<Vec<FeedEntryRecord>, RepoError> {
        let rows = sqlx::query_as::<_, FeedRow>(
            "SELECT id, entity_kind, entity_id, deleted, enqueued_at, attempts \
             FROM feed_buffer \
             ORDER BY id \
             LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(FeedEntryRecord::try_from).collect()
    }

    async fn acknowledge(&self, entry_id: i64) -> Result<(), RepoError> {
        // Remove the entry and any earlier entry for the same key that it
        // supersedes.
        sqlx::query(
            "DELETE FROM feed_buffer \
             WHERE id <= $1 \
               AND (entity_kind, entity_id) = \
                   (SELECT entity_kind, entity_id FROM feed_buffer WHERE id = $1)",
        )
        .bind(entry_id)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn record_attempt(&self, entry_id: i64) -> Result<(), RepoError> {
        sqlx::query("UPDATE feed_buffer SET attempts = attempts + 1 WHERE id = $1")
            .bind(entry_id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn pending_count(&self) -> Result<u64, RepoError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM feed_buffer")
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(count as u64)
    }

    async fn oldest_enqueued_at(&self) -> Result<Option<OffsetDateTime>, RepoError> {
        let row = sqlx::query("SELECT MIN(enqueued_at) AS oldest FROM feed_buffer")
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.get::<Option<OffsetDateTime>, _>("oldest"))
    }

    async fn clear(&self) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM feed_buffer")
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(())
    }
}
