//! Database access behind a trait
//!
//! The tool set only needs three things from the database: relation names,
//! column definitions and a way to run a read query returning JSON rows.

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod postgres;
pub use postgres::PgDatabase;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// Value bound to a `$n` placeholder.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum SqlParam {
    Int(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

#[async_trait]
pub trait Database: Send + Sync {
    /// Every table and view visible in the working schema.
    async fn relation_names(&self) -> Result<Vec<String>>;

    /// Column definitions of one relation, in ordinal order.
    async fn columns(&self, relation: &str) -> Result<Vec<ColumnInfo>>;

    /// Run a read-only query. Rows come back as a JSON array of objects;
    /// `Value::Null` means the driver produced no result at all.
    async fn fetch_json(&self, sql: &str, params: &[SqlParam]) -> Result<Value>;
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted database used by unit tests.

    use super::*;
    use crate::error::AgentError;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    type Handler = Box<dyn Fn(&str, &[SqlParam]) -> Result<Value> + Send + Sync>;

    pub struct FakeDatabase {
        relations: BTreeMap<String, Vec<ColumnInfo>>,
        handler: Handler,
        latency: Option<Duration>,
        pub executed: Mutex<Vec<(String, Vec<SqlParam>)>>,
    }

    fn col(name: &str, data_type: &str) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: false,
        }
    }

    impl FakeDatabase {
        /// The finance schema plus a migrations table, answering every query
        /// with an empty row set.
        pub fn finance() -> Self {
            let mut relations = BTreeMap::new();
            relations.insert(
                "Users".to_string(),
                vec![col("id", "integer"), col("email", "text")],
            );
            relations.insert(
                "Accounts".to_string(),
                vec![
                    col("id", "integer"),
                    col("user_id", "integer"),
                    col("name", "text"),
                    col("balance", "numeric"),
                    col("currency_id", "integer"),
                ],
            );
            relations.insert(
                "Transactions".to_string(),
                vec![
                    col("id", "integer"),
                    col("account_id", "integer"),
                    col("category_id", "integer"),
                    col("amount", "numeric"),
                    col("type", "text"),
                    col("description", "text"),
                    col("date", "timestamp with time zone"),
                ],
            );
            relations.insert(
                "Categories".to_string(),
                vec![col("id", "integer"), col("name", "text")],
            );
            relations.insert(
                "Currencies".to_string(),
                vec![col("id", "integer"), col("code", "text")],
            );
            relations.insert(
                "Budgets".to_string(),
                vec![
                    col("id", "integer"),
                    col("user_id", "integer"),
                    col("amount", "numeric"),
                ],
            );
            relations.insert(
                "_prisma_migrations".to_string(),
                vec![col("id", "text")],
            );

            Self {
                relations,
                handler: Box::new(|_, _| Ok(Value::Array(vec![]))),
                latency: None,
                executed: Mutex::new(Vec::new()),
            }
        }

        pub fn with_handler<F>(mut self, handler: F) -> Self
        where
            F: Fn(&str, &[SqlParam]) -> Result<Value> + Send + Sync + 'static,
        {
            self.handler = Box::new(handler);
            self
        }

        /// Delay every `fetch_json` answer by `latency`.
        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = Some(latency);
            self
        }

        pub fn executed_sql(&self) -> Vec<String> {
            self.executed
                .lock()
                .map(|log| log.iter().map(|(sql, _)| sql.clone()).collect())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl Database for FakeDatabase {
        async fn relation_names(&self) -> Result<Vec<String>> {
            Ok(self.relations.keys().cloned().collect())
        }

        async fn columns(&self, relation: &str) -> Result<Vec<ColumnInfo>> {
            self.relations.get(relation).cloned().ok_or_else(|| {
                AgentError::DatabaseError(format!("relation \"{}\" does not exist", relation))
            })
        }

        async fn fetch_json(&self, sql: &str, params: &[SqlParam]) -> Result<Value> {
            if let Ok(mut log) = self.executed.lock() {
                log.push((sql.to_string(), params.to_vec()));
            }
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            (self.handler)(sql, params)
        }
    }
}
