//! A [`Connector`] that reads artifacts from the result set of a SQL query.
//!
//! Grounded on the original's `BigQueryConnector`, reimplemented against
//! Postgres via `sqlx` since no BigQuery client crate is part of this stack;
//! see `DESIGN.md`.

use async_trait::async_trait;
use bytes::Bytes;
use cif_types::Fingerprint;
use sqlx::{Column, PgPool, Row};

use crate::error::DatabaseSnafu;
use crate::interface::{calc_line_chunks_from_bytes, Connector};
use crate::Result;
use md5::Digest;
use snafu::ResultExt;

/// Runs `sql` and treats each result row as one artifact, keyed by the
/// `|`-joined values of `key_columns`, serialized as a JSON object.
#[derive(Debug)]
pub struct TabularConnector {
    pool: PgPool,
    sql: String,
    key_columns: Vec<String>,
}

impl TabularConnector {
    pub fn new(pool: PgPool, sql: impl Into<String>, key_columns: Vec<String>) -> Self {
        Self { pool, sql: sql.into(), key_columns }
    }

    fn row_to_json(row: &sqlx::postgres::PgRow) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        for column in row.columns() {
            let name = column.name();
            let value: Option<String> = row.try_get(name).ok();
            object.insert(name.to_string(), value.map(serde_json::Value::String).unwrap_or(serde_json::Value::Null));
        }
        serde_json::Value::Object(object)
    }

    fn external_id(&self, row: &sqlx::postgres::PgRow) -> String {
        self.key_columns
            .iter()
            .map(|c| row.try_get::<String, _>(c.as_str()).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("|")
    }
}

#[async_trait]
impl Connector for TabularConnector {
    async fn list_artifacts(&self) -> Result<Vec<(String, Fingerprint)>> {
        let rows = sqlx::query(&self.sql).fetch_all(&self.pool).await.context(DatabaseSnafu)?;
        let mut artifacts = Vec::with_capacity(rows.len());
        for row in &rows {
            let json = Self::row_to_json(row);
            let content = serde_json::to_vec(&json).unwrap_or_default();
            let version = format!("{:x}", md5::Md5::digest(&content));
            artifacts.push((
                self.external_id(row),
                Fingerprint { content_type: "application/json".to_string(), content_length: content.len() as i64, version },
            ));
        }
        Ok(artifacts)
    }

    async fn get_artifact(&self, external_id: &str) -> Result<(Bytes, Fingerprint)> {
        let rows = sqlx::query(&self.sql).fetch_all(&self.pool).await.context(DatabaseSnafu)?;
        let row = rows
            .iter()
            .find(|r| self.external_id(r) == external_id)
            .ok_or_else(|| crate::error::NotFoundSnafu { external_id: external_id.to_string() }.build())?;
        let json = Self::row_to_json(row);
        let content = serde_json::to_vec(&json).unwrap_or_default();
        let version = format!("{:x}", md5::Md5::digest(&content));
        let fingerprint = Fingerprint { content_type: "application/json".to_string(), content_length: content.len() as i64, version };
        Ok((Bytes::from(content), fingerprint))
    }

    async fn get_artifact_chunk(&self, external_id: &str, start: i64, end: i64) -> Result<Bytes> {
        let (content, _) = self.get_artifact(external_id).await?;
        Ok(content.slice((start as usize).min(content.len())..(end as usize).min(content.len())))
    }

    async fn calc_line_chunks(&self, external_id: &str, lines_per_chunk: usize) -> Result<Vec<(i64, i64)>> {
        let (content, _) = self.get_artifact(external_id).await?;
        Ok(calc_line_chunks_from_bytes(&content, lines_per_chunk))
    }
}
