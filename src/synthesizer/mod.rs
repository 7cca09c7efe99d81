//! Query Synthesizer
//!
//! Question → schema context → intent → user-scoped SQL → `CheckQuery`.
//! The generator decides what to compute; the SQL itself always comes from
//! [`QueryIntent::render`], so it cannot lose the user predicate.

use crate::error::AgentError;
use crate::models::{Correction, UserId};
use crate::tools::{CheckReport, ToolSet};
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub mod gemini;
pub mod generator;
pub mod intent;

pub use gemini::GeminiIntentGenerator;
pub use generator::{IntentGenerator, IntentRequest, KeywordIntentGenerator};
pub use intent::{Grouping, Measure, Period, QueryIntent, ScopedQuery};

/// Core domain tables handed to the generator as schema context.
pub const CONTEXT_TABLES: &str = "transactions, categories, accounts, currencies";

/// A candidate query and its pre-check.
#[derive(Debug, Clone)]
pub struct SynthesizedQuery {
    pub intent: QueryIntent,
    pub query: ScopedQuery,
    pub check: CheckReport,
}

impl SynthesizedQuery {
    /// False means the query must not be executed.
    pub fn is_valid(&self) -> bool {
        self.check.is_valid()
    }

    pub fn sql(&self) -> &str {
        self.query.sql()
    }

    pub fn corrections(&self) -> &[Correction] {
        &self.check.corrections
    }
}

pub struct QuerySynthesizer {
    tools: Arc<ToolSet>,
    generator: Arc<dyn IntentGenerator>,
    generation_timeout: Duration,
}

impl QuerySynthesizer {
    pub fn new(
        tools: Arc<ToolSet>,
        generator: Arc<dyn IntentGenerator>,
        generation_timeout: Duration,
    ) -> Self {
        Self {
            tools,
            generator,
            generation_timeout,
        }
    }

    pub fn generator_name(&self) -> &'static str {
        self.generator.name()
    }

    /// Produce a candidate query for `question`, scoped to `user_id`.
    ///
    /// `previous_error` is the failure of the previous attempt, passed on
    /// to the generator so a retry can differ.
    pub async fn synthesize(
        &self,
        question: &str,
        user_id: UserId,
        previous_error: Option<&str>,
    ) -> Result<SynthesizedQuery> {
        let schema_context = self
            .tools
            .describe_schema(CONTEXT_TABLES, Some(user_id))
            .await;

        let request = IntentRequest {
            question,
            schema_context: &schema_context,
            previous_error,
        };

        let intent = tokio::time::timeout(self.generation_timeout, self.generator.generate(&request))
            .await
            .map_err(|_| {
                AgentError::TimeoutError(format!(
                    "{} generator exceeded {}s",
                    self.generator.name(),
                    self.generation_timeout.as_secs_f32()
                ))
            })??;

        debug!(
            generator = self.generator.name(),
            measure = ?intent.measure,
            group_by = ?intent.group_by,
            period = ?intent.period,
            "Generated query intent"
        );

        let query = intent.render(user_id, Utc::now(), self.tools.registry());
        let check = self.tools.check_query(query.sql());
        if let Some(problem) = &check.problem {
            warn!(user_id = %user_id, sql = %query.sql(), problem = %problem, "Synthesized query failed pre-check");
        }

        Ok(SynthesizedQuery {
            intent,
            query,
            check,
        })
    }
}
