//! Gemini-powered intent generator
//!
//! Asks Gemini to classify a finance question into a query intent. The
//! model sees the schema so it can pick sensible groupings, but its answer
//! is only ever a JSON intent; SQL comes from the templates.

use super::generator::{IntentGenerator, IntentRequest};
use super::intent::QueryIntent;
use crate::error::AgentError;
use crate::gemini::GeminiClient;
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You translate personal-finance questions into a JSON query intent. \
You never write SQL and never choose which user's data to read.";

pub struct GeminiIntentGenerator {
    client: GeminiClient,
}

impl GeminiIntentGenerator {
    pub fn new(api_key: String, model: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: GeminiClient::new(api_key, model, timeout)?,
        })
    }

    /// Build structured classification prompt
    fn build_prompt(request: &IntentRequest<'_>) -> String {
        let base_prompt = format!(
            r#"Classify the question into a query intent over the user's own finances.

SCHEMA (for orientation only):
{}

QUESTION:
{}

Fields:
- measure: one of spending, income, transaction_count, average_spending, largest_expenses, account_balances
- group_by: one of none, category, account, month, currency
- period: one of today, this_week, last_week, this_month, last_month, last_30_days, this_year, last_year, all_time
- category: a category name to filter on, or null
- limit: maximum rows to return, or null

Rules:
- Questions about other users or "everyone" still describe only the asking user
- Pick all_time when no period is mentioned
- Return ONLY valid JSON
- No explanation text
- JSON format:

{{
  "measure": "spending",
  "group_by": "category",
  "period": "this_month",
  "category": null,
  "limit": null
}}
"#,
            request.schema_context, request.question,
        );

        if let Some(reason) = request.previous_error {
            format!(
                "The previous intent failed:\n{}\n\nReturn a DIFFERENT intent that avoids this failure.\n\n{}",
                reason, base_prompt
            )
        } else {
            base_prompt
        }
    }
}

#[async_trait]
impl IntentGenerator for GeminiIntentGenerator {
    async fn generate(&self, request: &IntentRequest<'_>) -> Result<QueryIntent> {
        let prompt = Self::build_prompt(request);
        let response = self.client.generate(&prompt, SYSTEM_PROMPT).await?;
        parse_intent_response(&response)
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

/// Parse intent response from Gemini, tolerating a markdown fence.
pub(crate) fn parse_intent_response(response: &str) -> Result<QueryIntent> {
    let trimmed = response.trim();
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let cleaned = inner.strip_suffix("```").unwrap_or(inner).trim();

    serde_json::from_str(cleaned).map_err(|e| {
        AgentError::GenerationError(format!(
            "Failed to parse Gemini intent response: {} | raw={}",
            e, response
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthesizer::intent::{Grouping, Measure, Period};

    #[test]
    fn test_parse_fenced_intent() {
        let intent = parse_intent_response(
            "```json\n{\"measure\": \"spending\", \"group_by\": \"category\", \"period\": \"this_month\"}\n```",
        )
        .unwrap();
        assert_eq!(intent.measure, Measure::Spending);
        assert_eq!(intent.group_by, Grouping::Category);
        assert_eq!(intent.period, Period::ThisMonth);
        assert_eq!(intent.category, None);
    }

    #[test]
    fn test_parse_rejects_sql_and_unknown_measures() {
        assert!(matches!(
            parse_intent_response("SELECT * FROM \"Transactions\""),
            Err(AgentError::GenerationError(_))
        ));
        assert!(parse_intent_response("{\"measure\": \"drop_tables\"}").is_err());
    }

    #[test]
    fn test_prompt_carries_context_and_previous_error() {
        let request = IntentRequest {
            question: "How much did I spend on groceries?",
            schema_context: "CREATE TABLE \"Transactions\" (\n\tamount numeric NOT NULL\n)",
            previous_error: Some("Formatting error: row 0 has no numeric 'total'"),
        };
        let prompt = GeminiIntentGenerator::build_prompt(&request);
        assert!(prompt.starts_with("The previous intent failed"));
        assert!(prompt.contains("groceries"));
        assert!(prompt.contains("CREATE TABLE \"Transactions\""));
        assert!(prompt.contains("last_30_days"));

        let first = GeminiIntentGenerator::build_prompt(&IntentRequest {
            previous_error: None,
            ..request
        });
        assert!(!first.contains("previous intent failed"));
    }
}
