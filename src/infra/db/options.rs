//! The `options` table: a small key-value configuration store with a row
//! version column for optimistic conditional writes.

use async_trait::async_trait;
use sqlx::Row;

use crate::application::repos::{ConfigStore, RepoError, VersionedValue};

use super::{PostgresRepositories, map_sqlx_error};

#[async_trait]
impl ConfigStore for PostgresRepositories {
    async fn get(&self, key: &str) -> Result<Option<String>, RepoError> {
        let row = sqlx::query("SELECT value FROM options WHERE key = $1")
            .bind(key)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(|row| row.get::<String, _>("value")))
    }

    async fn get_versioned(&self, key: &str) -> Result<Option<VersionedValue>, RepoError> {
        let row = sqlx::query("SELECT value, version FROM options WHERE key = $1")
            .bind(key)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(|row| VersionedValue {
            value: row.get::<String, _>("value"),
            version: row.get::<i64, _>("version"),
        }))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO options (key, value, version) VALUES ($1, $2, 1) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, \
                                             version = options.version + 1",
        )
        .bind(key)
        .bind(value)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn set_versioned(
        &self,
        key: &str,
        value: &str,
        expected_version: Option<i64>,
    ) -> Result<bool, RepoError> {
        let affected = match expected_version {
            // The key must not exist yet.
            None => sqlx::query(
                "INSERT INTO options (key, value, version) VALUES ($1, $2, 1) \
                 ON CONFLICT (key) DO NOTHING",
            )
            .bind(key)
            .bind(value)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?
            .rows_affected(),
            Some(expected) => sqlx::query(
                "UPDATE options SET value = $2, version = version + 1 \
                 WHERE key = $1 AND version = $3",
            )
            .bind(key)
            .bind(value)
            .bind(expected)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?
            .rows_affected(),
        };

        Ok(affected == 1)
    }

    async fn delete(&self, key: &str) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM options WHERE key = $1")
            .bind(key)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(())
    }
}
