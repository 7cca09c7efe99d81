//! Finance SQL Agent
//!
//! Answers natural-language questions about a user's own finances:
//! - Generates SQL from a query intent, always scoped to the asking user
//! - Repairs table-name casing and quoting before execution
//! - Executes read-only queries with remediation hints on failure
//! - Formats aggregated rows into a short answer
//! - Retries a bounded number of times, then apologises
//!
//! PIPELINE:
//! QUESTION → SYNTHESIZE → CHECK → EXECUTE → FORMAT → ANSWER

pub mod agent;
pub mod api;
pub mod audit;
pub mod config;
pub mod db;
pub mod error;
pub mod formatter;
pub mod gemini;
pub mod models;
pub mod sql;
pub mod synthesizer;
pub mod tools;

pub use error::{AgentError, Result};

// Re-export common types
pub use agent::{CancellationToken, Supervisor, APOLOGY};
pub use models::*;
