//! Supervisor state machine
//!
//! One non-terminal node, `SqlAgent`, which either loops back to itself
//! (retry) or moves to `End`:
//!
//! SYNTHESIZE → EXECUTE → FORMAT → END
//!      ↑__________ retry ______|
//!
//! Every failure inside the node is caught there and becomes a retry until
//! the attempt budget is spent; after that the user gets a fixed apology.

use crate::audit::{sql_fingerprint, RunLog};
use crate::config::AgentConfig;
use crate::db::Database;
use crate::error::AgentError;
use crate::formatter::ResultFormatter;
use crate::models::{
    AgentRun, AgentState, AgentStatus, AttemptRecord, Message, UserId, ValidationOutcome,
};
use crate::sql::IdentifierRegistry;
use crate::synthesizer::{
    GeminiIntentGenerator, IntentGenerator, KeywordIntentGenerator, QuerySynthesizer,
};
use crate::tools::{ToolSet, ToolSettings, DEFAULT_SHARED_TABLES};
use crate::Result;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const APOLOGY: &str =
    "Sorry, I couldn't answer that question right now. Please try rephrasing it or ask again later.";

/// Token for cooperative cancellation of a run.
///
/// Uses an AtomicBool internally. Clone is cheap and shares state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Guard that cancels the token when dropped, unless disarmed first.
    pub fn drop_guard(&self) -> DropGuard {
        DropGuard {
            token: Some(self.clone()),
        }
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(AgentError::Cancelled)
        } else {
            Ok(())
        }
    }
}

pub struct DropGuard {
    token: Option<CancellationToken>,
}

impl DropGuard {
    pub fn disarm(mut self) -> CancellationToken {
        self.token.take().unwrap_or_default()
    }
}

impl Drop for DropGuard {
    fn drop(&mut self) {
        if let Some(token) = &self.token {
            token.cancel();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    SqlAgent,
    End,
}

/// Where to go after a pass through `SqlAgent`. `attempts` counts failed
/// passes so far.
pub fn transition(attempts: u32, succeeded: bool, max_attempts: u32) -> Node {
    if succeeded || attempts >= max_attempts {
        Node::End
    } else {
        Node::SqlAgent
    }
}

struct Answered {
    text: String,
    warning: Option<String>,
}

pub struct Supervisor {
    tools: Arc<ToolSet>,
    synthesizer: QuerySynthesizer,
    formatter: ResultFormatter,
    run_log: Option<RunLog>,
    max_attempts: u32,
}

impl Supervisor {
    pub fn new(tools: Arc<ToolSet>, synthesizer: QuerySynthesizer, max_attempts: u32) -> Self {
        Self {
            tools,
            synthesizer,
            formatter: ResultFormatter::new(),
            run_log: None,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Wire up the whole pipeline from configuration. Uses Gemini when an
    /// API key is configured, keyword routing otherwise.
    pub fn from_config(config: &AgentConfig, db: Arc<dyn Database>) -> Result<Self> {
        let settings = ToolSettings {
            sample_rows: config.sample_rows,
            db_timeout: config.db_timeout,
            shared_tables: DEFAULT_SHARED_TABLES.iter().map(|s| s.to_string()).collect(),
        };
        let tools = Arc::new(ToolSet::new(
            db,
            Arc::new(IdentifierRegistry::with_defaults()),
            settings,
        ));

        let generator: Arc<dyn IntentGenerator> = match &config.gemini_api_key {
            Some(key) => Arc::new(GeminiIntentGenerator::new(
                key.clone(),
                &config.gemini_model,
                config.llm_timeout,
            )?),
            None => {
                warn!("GEMINI_API_KEY not set, using keyword intent routing");
                Arc::new(KeywordIntentGenerator)
            }
        };

        let synthesizer = QuerySynthesizer::new(tools.clone(), generator, config.llm_timeout);
        Ok(Self::new(tools, synthesizer, config.max_attempts))
    }

    pub fn with_run_log(mut self, run_log: RunLog) -> Self {
        self.run_log = Some(run_log);
        self
    }

    pub fn tools(&self) -> &Arc<ToolSet> {
        &self.tools
    }

    pub fn run_log(&self) -> Option<&RunLog> {
        self.run_log.as_ref()
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Answer the latest user question in `conversation`.
    pub async fn answer(&self, conversation: Vec<Message>, user_id: UserId) -> String {
        self.run(conversation, user_id, &CancellationToken::new())
            .await
            .answer
    }

    /// Run the state machine to completion and report how it went.
    pub async fn run(
        &self,
        conversation: Vec<Message>,
        user_id: UserId,
        cancel: &CancellationToken,
    ) -> AgentRun {
        let start_time = Instant::now();
        let run_id = Uuid::new_v4();
        let mut state = AgentState::new(conversation, user_id);
        let mut attempt_log: Vec<AttemptRecord> = Vec::new();
        let mut warning = None;
        let mut cancelled = false;

        let question = state.question().map(str::to_string);

        info!(
            run_id = %run_id,
            user_id = %user_id,
            generator = self.synthesizer.generator_name(),
            "Supervisor: starting run"
        );

        match &question {
            None => warn!(run_id = %run_id, "Conversation has no user message"),
            Some(question) => {
                let mut previous_error: Option<String> = None;
                let mut node = Node::SqlAgent;

                while node == Node::SqlAgent {
                    if cancel.is_cancelled() {
                        cancelled = true;
                        break;
                    }

                    let mut record = AttemptRecord {
                        attempt: attempt_log.len() as u32 + 1,
                        sql: None,
                        corrections: Vec::new(),
                        error_kind: None,
                        error: None,
                        started_at: Utc::now(),
                        duration_ms: 0,
                    };
                    let step_start = Instant::now();

                    let step = self
                        .sql_agent(question, user_id, previous_error.as_deref(), cancel, &mut record)
                        .await;

                    record.duration_ms = step_start.elapsed().as_millis() as u64;
                    if let Some(sql) = &record.sql {
                        state.last_query = sql.clone();
                    }

                    match step {
                        Ok(answered) => {
                            state.last_result = answered.text.clone();
                            state.conversation.push(Message::Assistant(answered.text));
                            state.status = AgentStatus::Succeeded;
                            warning = answered.warning;
                            node = transition(state.attempts, true, self.max_attempts);
                        }
                        Err(AgentError::Cancelled) => {
                            record.error_kind = Some(AgentError::Cancelled.kind().to_string());
                            cancelled = true;
                            attempt_log.push(record);
                            break;
                        }
                        Err(e) => {
                            state.attempts += 1;
                            state.last_result = e.to_string();
                            record.error_kind = Some(e.kind().to_string());
                            record.error = Some(e.to_string());
                            node = transition(state.attempts, false, self.max_attempts);

                            if node == Node::SqlAgent {
                                warn!(
                                    run_id = %run_id,
                                    user_id = %user_id,
                                    attempt = state.attempts,
                                    sql = record.sql.as_deref().unwrap_or(""),
                                    error = %e,
                                    timestamp = %Utc::now().to_rfc3339(),
                                    "sql_agent step failed, retrying"
                                );
                            } else {
                                warn!(
                                    run_id = %run_id,
                                    attempt = state.attempts,
                                    error = %e,
                                    "sql_agent step failed, attempt budget spent"
                                );
                            }
                            previous_error = Some(e.to_string());
                        }
                    }

                    attempt_log.push(record);
                }
            }
        }

        if cancelled {
            state.status = AgentStatus::Failed;
            info!(run_id = %run_id, attempts = attempt_log.len(), "Run cancelled");
        } else if state.status != AgentStatus::Succeeded {
            state.status = AgentStatus::Failed;
            state.conversation.push(Message::Assistant(APOLOGY.to_string()));
            error!(
                run_id = %run_id,
                user_id = %user_id,
                attempts = attempt_log.len(),
                last_query = %state.last_query,
                timestamp = %Utc::now().to_rfc3339(),
                "Returning apology"
            );
        }

        let answer = if cancelled {
            String::new()
        } else {
            state
                .conversation
                .last()
                .map(|m| m.text().to_string())
                .unwrap_or_default()
        };

        let run = AgentRun {
            run_id,
            user_id,
            question: question.unwrap_or_default(),
            answer,
            status: state.status,
            attempts: attempt_log.len() as u32,
            sql_fingerprint: (!state.last_query.is_empty())
                .then(|| sql_fingerprint(&state.last_query)),
            last_query: state.last_query,
            warning,
            cancelled,
            attempt_log,
            created_at: Utc::now(),
            execution_time_ms: start_time.elapsed().as_millis() as u64,
        };

        debug!(
            run_id = %run_id,
            status = ?run.status,
            attempts = run.attempts,
            elapsed_ms = run.execution_time_ms,
            "Supervisor: run finished"
        );

        if let Some(log) = &self.run_log {
            if let Err(e) = log.record(run.clone()).await {
                warn!(run_id = %run_id, error = %e, "Failed to record run");
            }
        }

        run
    }

    /// One pass through the `SqlAgent` node.
    async fn sql_agent(
        &self,
        question: &str,
        user_id: UserId,
        previous_error: Option<&str>,
        cancel: &CancellationToken,
        record: &mut AttemptRecord,
    ) -> Result<Answered> {
        cancel.check()?;
        let synthesized = self
            .synthesizer
            .synthesize(question, user_id, previous_error)
            .await?;
        record.sql = Some(synthesized.sql().to_string());
        record.corrections = synthesized.corrections().to_vec();

        if !synthesized.is_valid() {
            return Err(AgentError::SqlValidationError(
                synthesized
                    .check
                    .problem
                    .clone()
                    .unwrap_or_else(|| "query failed pre-check".to_string()),
            ));
        }

        cancel.check()?;
        let outcome = self
            .tools
            .execute_query(synthesized.sql(), synthesized.query.params())
            .await;
        let (payload, warning) = match outcome {
            ValidationOutcome::Valid { payload, warning } => (payload, warning),
            ValidationOutcome::Invalid { reason } if reason.contains("does not exist") => {
                return Err(AgentError::SchemaError(reason))
            }
            ValidationOutcome::Invalid { reason } => return Err(AgentError::DatabaseError(reason)),
        };

        cancel.check()?;
        let text = self.formatter.format(&payload, &synthesized.intent)?;

        Ok(Answered { text, warning })
    }
}
