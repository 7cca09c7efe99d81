//! Intent generators
//!
//! An intent generator stands in for "the model": it reads the question
//! (plus schema context and, on retries, the previous failure) and proposes
//! a [`QueryIntent`].

use super::intent::QueryIntent;
use crate::Result;
use async_trait::async_trait;

/// Everything a generator may look at.
#[derive(Debug, Clone, Copy)]
pub struct IntentRequest<'a> {
    pub question: &'a str,
    pub schema_context: &'a str,
    pub previous_error: Option<&'a str>,
}

#[async_trait]
pub trait IntentGenerator: Send + Sync {
    async fn generate(&self, request: &IntentRequest<'_>) -> Result<QueryIntent>;

    fn name(&self) -> &'static str;
}

/// Deterministic keyword routing. Keeps the agent usable without a model
/// and makes tests reproducible.
pub struct KeywordIntentGenerator;

#[async_trait]
impl IntentGenerator for KeywordIntentGenerator {
    async fn generate(&self, request: &IntentRequest<'_>) -> Result<QueryIntent> {
        Ok(QueryIntent::from_question(request.question))
    }

    fn name(&self) -> &'static str {
        "keyword"
    }
}
