//! Core data models for the SQL agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// One result row, keyed by column name.
pub type Row = serde_json::Map<String, Value>;

/// Advisory attached to a valid outcome that produced zero rows.
pub const EMPTY_RESULT_WARNING: &str = "no rows; check filters";

//
// ================= Identity =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

//
// ================= Conversation =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "role", content = "content", rename_all = "lowercase")]
pub enum Message {
    System(String),
    User(String),
    Assistant(String),
}

impl Message {
    pub fn text(&self) -> &str {
        match self {
            Message::System(text) | Message::User(text) | Message::Assistant(text) => text,
        }
    }
}

//
// ================= Correction =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Correction {
    pub original: String,
    pub corrected: String,
    pub timestamp: DateTime<Utc>,
}

impl Correction {
    pub fn new(original: impl Into<String>, corrected: impl Into<String>) -> Self {
        Self {
            original: original.into(),
            corrected: corrected.into(),
            timestamp: Utc::now(),
        }
    }
}

//
// ================= Validation =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum QueryPayload {
    Rows(Vec<Row>),
    Scalar(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ValidationOutcome {
    Valid {
        payload: QueryPayload,
        warning: Option<String>,
    },
    Invalid {
        reason: String,
    },
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid { .. })
    }

    /// Render the outcome the way a tool caller sees it.
    pub fn to_text(&self) -> String {
        match self {
            ValidationOutcome::Valid { payload, warning } => {
                let body = match payload {
                    QueryPayload::Rows(rows) => {
                        serde_json::to_string(rows).unwrap_or_else(|_| "[]".to_string())
                    }
                    QueryPayload::Scalar(value) => value.to_string(),
                };
                match warning {
                    Some(w) => format!("{}\nWarning: {}", body, w),
                    None => body,
                }
            }
            ValidationOutcome::Invalid { reason } => format!("Error: {}", reason),
        }
    }
}

//
// ================= Agent State =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Running,
    Succeeded,
    Failed,
}

/// Per-question unit of work threaded through the supervisor.
///
/// Created fresh for each request and dropped once a terminal status is
/// reached; nothing in here is shared between questions.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub conversation: Vec<Message>,
    pub user_id: UserId,
    pub attempts: u32,
    pub last_query: String,
    pub last_result: String,
    pub status: AgentStatus,
}

impl AgentState {
    pub fn new(conversation: Vec<Message>, user_id: UserId) -> Self {
        Self {
            conversation,
            user_id,
            attempts: 0,
            last_query: String::new(),
            last_result: String::new(),
            status: AgentStatus::Running,
        }
    }

    /// Latest user turn, if any.
    pub fn question(&self) -> Option<&str> {
        self.conversation.iter().rev().find_map(|m| match m {
            Message::User(text) => Some(text.as_str()),
            _ => None,
        })
    }
}

//
// ================= Run Diagnostics =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub sql: Option<String>,
    pub corrections: Vec<Correction>,
    pub error_kind: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Outcome of one supervisor run plus the metadata needed to debug it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub run_id: Uuid,
    pub user_id: UserId,
    pub question: String,
    pub answer: String,
    pub status: AgentStatus,
    pub attempts: u32,
    pub last_query: String,
    pub warning: Option<String>,
    pub cancelled: bool,
    pub attempt_log: Vec<AttemptRecord>,
    pub sql_fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub execution_time_ms: u64,
}
