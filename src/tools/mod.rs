//! Tool set exposed to the supervisor and the query synthesizer
//!
//! Four tools, dispatched through the [`Tool`] enum so every caller handles
//! all of them. Tool failures that a retry can fix are reported as text or
//! as an `Invalid` outcome carrying remediation hints, never as a bare
//! database error.

use crate::db::{ColumnInfo, Database, SqlParam};
use crate::error::AgentError;
use crate::models::{Correction, QueryPayload, Row, UserId, ValidationOutcome, EMPTY_RESULT_WARNING};
use crate::sql::{ensure_read_only, render_identifier, IdentifierRegistry, SqlCorrector};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Relations that belong to no user and may be sampled freely.
pub const DEFAULT_SHARED_TABLES: &[&str] = &["Categories", "Currencies"];

const MAX_SAMPLE_VALUE_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tool {
    ListTables,
    DescribeSchema,
    CheckQuery,
    ExecuteQuery,
}

impl Tool {
    pub const ALL: [Tool; 4] = [
        Tool::ListTables,
        Tool::DescribeSchema,
        Tool::CheckQuery,
        Tool::ExecuteQuery,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Tool::ListTables => "list_tables",
            Tool::DescribeSchema => "describe_schema",
            Tool::CheckQuery => "check_query",
            Tool::ExecuteQuery => "execute_query",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Tool::ListTables => "List the user-facing tables and views",
            Tool::DescribeSchema => {
                "Column definitions and sample rows for a comma-separated list of tables"
            }
            Tool::CheckQuery => "Check and repair table names in a SQL query without running it",
            Tool::ExecuteQuery => "Run a read-only SQL query and validate the result",
        }
    }

    pub fn from_name(name: &str) -> Option<Tool> {
        let normalized = name.trim().to_lowercase().replace('-', "_");
        Tool::ALL.into_iter().find(|tool| tool.name() == normalized)
    }
}

/// A tool together with its input.
#[derive(Debug, Clone)]
pub enum ToolCall {
    ListTables,
    DescribeSchema {
        tables: String,
        owner: Option<UserId>,
    },
    CheckQuery {
        sql: String,
    },
    ExecuteQuery {
        sql: String,
        params: Vec<SqlParam>,
    },
}

impl ToolCall {
    pub fn tool(&self) -> Tool {
        match self {
            ToolCall::ListTables => Tool::ListTables,
            ToolCall::DescribeSchema { .. } => Tool::DescribeSchema,
            ToolCall::CheckQuery { .. } => Tool::CheckQuery,
            ToolCall::ExecuteQuery { .. } => Tool::ExecuteQuery,
        }
    }

    /// Build a call from a tool and its single textual input.
    pub fn from_text(tool: Tool, input: &str) -> Self {
        match tool {
            Tool::ListTables => ToolCall::ListTables,
            Tool::DescribeSchema => ToolCall::DescribeSchema {
                tables: input.to_string(),
                owner: None,
            },
            Tool::CheckQuery => ToolCall::CheckQuery {
                sql: input.to_string(),
            },
            Tool::ExecuteQuery => ToolCall::ExecuteQuery {
                sql: input.to_string(),
                params: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Tables(Vec<String>),
    Text(String),
    Outcome(ValidationOutcome),
}

impl ToolOutput {
    pub fn to_text(&self) -> String {
        match self {
            ToolOutput::Tables(tables) => tables.join(", "),
            ToolOutput::Text(text) => text.clone(),
            ToolOutput::Outcome(outcome) => outcome.to_text(),
        }
    }
}

/// Result of `CheckQuery`.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckReport {
    pub fixed_sql: String,
    pub corrections: Vec<Correction>,
    pub problem: Option<String>,
}

impl CheckReport {
    pub fn is_valid(&self) -> bool {
        self.problem.is_none()
    }

    pub fn to_text(&self) -> String {
        if let Some(problem) = &self.problem {
            return format!("Error: {}", problem);
        }
        if self.corrections.is_empty() {
            return "query looks correct".to_string();
        }

        let mut out = format!("Corrected query:\n{}\n\nCorrections:", self.fixed_sql);
        for correction in &self.corrections {
            out.push_str(&format!(
                "\n- {} -> {}",
                correction.original, correction.corrected
            ));
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub sample_rows: u32,
    pub db_timeout: Duration,
    pub shared_tables: Vec<String>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            sample_rows: 3,
            db_timeout: Duration::from_secs(10),
            shared_tables: DEFAULT_SHARED_TABLES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

pub struct ToolSet {
    db: Arc<dyn Database>,
    corrector: SqlCorrector,
    settings: ToolSettings,
}

impl ToolSet {
    pub fn new(
        db: Arc<dyn Database>,
        registry: Arc<IdentifierRegistry>,
        settings: ToolSettings,
    ) -> Self {
        Self {
            db,
            corrector: SqlCorrector::new(registry),
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<IdentifierRegistry> {
        self.corrector.registry()
    }

    pub async fn invoke(&self, call: ToolCall) -> Result<ToolOutput> {
        let tool = call.tool();
        debug!(tool = tool.name(), "Invoking tool");

        let output = match call {
            ToolCall::ListTables => ToolOutput::Tables(self.list_tables().await?),
            ToolCall::DescribeSchema { tables, owner } => {
                ToolOutput::Text(self.describe_schema(&tables, owner).await)
            }
            ToolCall::CheckQuery { sql } => ToolOutput::Text(self.check_query(&sql).to_text()),
            ToolCall::ExecuteQuery { sql, params } => {
                ToolOutput::Outcome(self.execute_query(&sql, &params).await)
            }
        };

        Ok(output)
    }

    // =============================
    // ListTables
    // =============================

    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .with_timeout("listing tables", self.db.relation_names())
            .await?
            .into_iter()
            .filter(|name| !is_internal_relation(name))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Register every live relation name so the corrector knows the real
    /// spellings. Conflicts with existing mappings are logged and skipped.
    pub async fn sync_registry(&self) -> Result<usize> {
        let mut registered = 0;
        for name in self.list_tables().await? {
            match self.registry().register_canonical(&name) {
                Ok(()) => registered += 1,
                Err(e) => warn!(relation = %name, error = %e, "Skipping relation"),
            }
        }
        info!(registered, "Identifier registry synchronised with database");
        Ok(registered)
    }

    // =============================
    // DescribeSchema
    // =============================

    /// `DescribeSchema` as the tool surface sees it: failures come back as
    /// an error string.
    pub async fn describe_schema(&self, tables_csv: &str, owner: Option<UserId>) -> String {
        match self.describe_tables(tables_csv, owner).await {
            Ok(text) => text,
            Err(e) => {
                warn!(tables = %tables_csv, error = %e, "DescribeSchema failed");
                format!("Error: {}", e)
            }
        }
    }

    pub async fn describe_tables(&self, tables_csv: &str, owner: Option<UserId>) -> Result<String> {
        let requested: Vec<&str> = tables_csv
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect();
        if requested.is_empty() {
            return Err(AgentError::SchemaError("no table names given".to_string()));
        }

        let available = self.list_tables().await?;
        let mut sections = Vec::with_capacity(requested.len());

        for name in requested {
            let unquoted = name.trim_matches('"');
            let canonical = self
                .registry()
                .canonical(unquoted)
                .unwrap_or_else(|| unquoted.to_string());
            let actual = available
                .iter()
                .find(|t| **t == canonical)
                .or_else(|| available.iter().find(|t| t.eq_ignore_ascii_case(&canonical)))
                .ok_or_else(|| {
                    AgentError::SchemaError(format!(
                        "table '{}' does not exist. Valid tables: {}",
                        name,
                        available.join(", ")
                    ))
                })?;

            let columns = self
                .with_timeout("describing table", self.db.columns(actual))
                .await?;
            let samples = self.sample_rows(actual, &columns, owner).await;
            sections.push(render_table(actual, &columns, samples.as_deref()));
        }

        Ok(sections.join("\n\n"))
    }

    /// Sample rows for one relation, restricted to the owner when one is
    /// given. `None` means samples are withheld or unavailable.
    async fn sample_rows(
        &self,
        relation: &str,
        columns: &[ColumnInfo],
        owner: Option<UserId>,
    ) -> Option<Vec<Row>> {
        if self.settings.sample_rows == 0 {
            return None;
        }

        let has_column = |name: &str| columns.iter().any(|c| c.name == name);
        let table = render_identifier(relation);

        let (filter, params) = match owner {
            None => (String::new(), Vec::new()),
            Some(user) if has_column("user_id") => {
                (" WHERE user_id = $1".to_string(), vec![SqlParam::Int(user.0)])
            }
            Some(user) if has_column("account_id") => {
                let accounts = self
                    .registry()
                    .canonical("accounts")
                    .unwrap_or_else(|| "Accounts".to_string());
                (
                    format!(
                        " WHERE account_id IN (SELECT id FROM {} WHERE user_id = $1)",
                        render_identifier(&accounts)
                    ),
                    vec![SqlParam::Int(user.0)],
                )
            }
            Some(_)
                if self
                    .settings
                    .shared_tables
                    .iter()
                    .any(|t| t.eq_ignore_ascii_case(relation)) =>
            {
                (String::new(), Vec::new())
            }
            Some(_) => return None,
        };

        let sql = format!(
            "SELECT * FROM {}{} LIMIT {}",
            table, filter, self.settings.sample_rows
        );

        match self
            .with_timeout("sampling rows", self.db.fetch_json(&sql, &params))
            .await
        {
            Ok(Value::Array(items)) => Some(
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::Object(row) => Some(row),
                        _ => None,
                    })
                    .collect(),
            ),
            Ok(_) => None,
            Err(e) => {
                warn!(relation = %relation, error = %e, "Sampling rows failed");
                None
            }
        }
    }

    // =============================
    // CheckQuery
    // =============================

    pub fn check_query(&self, sql: &str) -> CheckReport {
        match self.corrector.correct(sql) {
            Ok(corrected) => {
                let problem = ensure_read_only(&corrected.fixed_sql)
                    .err()
                    .map(|e| e.to_string());
                CheckReport {
                    fixed_sql: corrected.fixed_sql,
                    corrections: corrected.corrections,
                    problem,
                }
            }
            Err(e) => CheckReport {
                fixed_sql: sql.to_string(),
                corrections: Vec::new(),
                problem: Some(e.to_string()),
            },
        }
    }

    // =============================
    // ExecuteQuery
    // =============================

    pub async fn execute_query(&self, sql: &str, params: &[SqlParam]) -> ValidationOutcome {
        let corrected = match self.corrector.correct(sql) {
            Ok(corrected) => corrected,
            Err(e) => {
                return ValidationOutcome::Invalid {
                    reason: e.to_string(),
                }
            }
        };

        if let Err(e) = ensure_read_only(&corrected.fixed_sql) {
            warn!(sql = %corrected.fixed_sql, error = %e, "Refusing to execute query");
            return ValidationOutcome::Invalid {
                reason: e.to_string(),
            };
        }

        info!(sql = %corrected.fixed_sql, params = params.len(), "Executing query");

        let result = self
            .with_timeout(
                "query execution",
                self.db.fetch_json(&corrected.fixed_sql, params),
            )
            .await;

        match result {
            Ok(Value::Null) => ValidationOutcome::Invalid {
                reason: "the query produced no result".to_string(),
            },
            Ok(Value::Array(items)) if items.iter().all(Value::is_object) => {
                let rows: Vec<Row> = items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::Object(row) => Some(row),
                        _ => None,
                    })
                    .collect();
                let warning = rows.is_empty().then(|| EMPTY_RESULT_WARNING.to_string());
                ValidationOutcome::Valid {
                    payload: QueryPayload::Rows(rows),
                    warning,
                }
            }
            Ok(other) => ValidationOutcome::Valid {
                payload: QueryPayload::Scalar(other),
                warning: None,
            },
            Err(e) => {
                let reason = self.remediate(&e).await;
                warn!(sql = %corrected.fixed_sql, reason = %reason, "Query failed");
                ValidationOutcome::Invalid { reason }
            }
        }
    }

    /// Turn a database failure into a message the next attempt can act on.
    async fn remediate(&self, error: &AgentError) -> String {
        let message = match error {
            AgentError::DatabaseError(message) => message.clone(),
            other => other.to_string(),
        };

        if message.contains("does not exist") {
            let tables = match self.list_tables().await {
                Ok(tables) => tables,
                Err(_) => self.registry().canonical_names(),
            };
            return format!(
                "{}. Valid tables are: {}. Use DescribeSchema to inspect their columns.",
                message,
                tables.join(", ")
            );
        }

        if matches!(error, AgentError::TimeoutError(_)) {
            return format!("{}. Narrow the date range or aggregate further.", message);
        }

        format!(
            "{}. Check column names and types with DescribeSchema before retrying.",
            message
        )
    }

    async fn with_timeout<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.settings.db_timeout, fut)
            .await
            .map_err(|_| {
                AgentError::TimeoutError(format!(
                    "{} exceeded {}s",
                    what,
                    self.settings.db_timeout.as_secs_f32()
                ))
            })?
    }
}

/// Migration bookkeeping and catalog relations are never shown to the model.
fn is_internal_relation(name: &str) -> bool {
    let lowered = name.to_lowercase();
    lowered.starts_with('_')
        || lowered.starts_with("pg_")
        || lowered.starts_with("sql_")
        || lowered == "schema_migrations"
}

fn render_table(relation: &str, columns: &[ColumnInfo], samples: Option<&[Row]>) -> String {
    let table = render_identifier(relation);
    let mut out = format!("CREATE TABLE {} (\n", table);
    let definitions: Vec<String> = columns
        .iter()
        .map(|c| {
            format!(
                "\t{} {}{}",
                c.name,
                c.data_type,
                if c.nullable { "" } else { " NOT NULL" }
            )
        })
        .collect();
    out.push_str(&definitions.join(",\n"));
    out.push_str("\n)\n\n/*\n");

    match samples {
        Some(rows) => {
            out.push_str(&format!("{} rows from {} table:\n", rows.len(), table));
            let header: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
            out.push_str(&header.join("\t"));
            for row in rows {
                let values: Vec<String> = columns
                    .iter()
                    .map(|c| render_value(row.get(&c.name)))
                    .collect();
                out.push('\n');
                out.push_str(&values.join("\t"));
            }
        }
        None => out.push_str("sample rows withheld"),
    }

    out.push_str("\n*/");
    out
}

fn render_value(value: Option<&Value>) -> String {
    let text = match value {
        None | Some(Value::Null) => "NULL".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    if text.chars().count() > MAX_SAMPLE_VALUE_CHARS {
        let truncated: String = text.chars().take(MAX_SAMPLE_VALUE_CHARS).collect();
        format!("{}...", truncated)
    } else {
        text
    }
}
