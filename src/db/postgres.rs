//! Postgres-backed database
//!
//! Queries run on a shared `PgPool`. Every agent query is executed inside a
//! read-only transaction that is always rolled back, so the connection goes
//! back to the pool on every path, including errors.

use crate::db::{ColumnInfo, Database, SqlParam};
use crate::sql::statement_body;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row};
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PgDatabase {
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        statement_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(statement_timeout)
            .connect(database_url)
            .await?;

        Ok(Self::from_pool(pool, statement_timeout))
    }

    pub fn from_pool(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn relation_names(&self) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_schema = current_schema()
            ORDER BY table_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(names)
    }

    async fn columns(&self, relation: &str) -> Result<Vec<ColumnInfo>> {
        let rows = sqlx::query(
            r#"
            SELECT column_name::text AS column_name,
                   data_type::text AS data_type,
                   (is_nullable = 'YES') AS nullable
            FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name = $1
            ORDER BY ordinal_position
            "#,
        )
        .bind(relation)
        .fetch_all(&self.pool)
        .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            columns.push(ColumnInfo {
                name: row.try_get("column_name")?,
                data_type: row.try_get("data_type")?,
                nullable: row.try_get("nullable")?,
            });
        }
        Ok(columns)
    }

    async fn fetch_json(&self, sql: &str, params: &[SqlParam]) -> Result<Value> {
        let body = statement_body(sql)?;
        // Newlines keep a trailing line comment from swallowing the wrapper.
        let wrapped = format!("SELECT row_to_json(q) FROM (\n{}\n) AS q", body);

        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;

        let mut query = sqlx::query_scalar::<Postgres, Value>(&wrapped);
        for param in params {
            query = match param {
                SqlParam::Int(value) => query.bind(*value),
                SqlParam::Text(value) => query.bind(value.clone()),
                SqlParam::Timestamp(value) => query.bind(*value),
            };
        }

        let rows = query.fetch_all(&mut *tx).await?;
        tx.rollback().await?;

        debug!(row_count = rows.len(), "Query returned rows");
        Ok(Value::Array(rows))
    }
}
