//! Read-only statement guard
//!
//! The agent only ever needs analytic reads. Anything else is refused before
//! it reaches the database.

use crate::error::AgentError;
use crate::sql::lexer::{tokenize, Token, TokenKind};
use crate::Result;

const READ_STATEMENTS: &[&str] = &["SELECT", "WITH", "VALUES", "TABLE"];

/// Keywords that write data, change schema or permissions, or create tables
/// (`SELECT ... INTO`). `FOR UPDATE` locking is rejected along with them.
const WRITE_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "INTO", "DROP", "ALTER", "CREATE", "TRUNCATE",
    "GRANT", "REVOKE", "COPY",
];

pub fn ensure_read_only(sql: &str) -> Result<()> {
    let tokens = tokenize(sql)?;
    let significant: Vec<&Token<'_>> = tokens.iter().filter(|t| !t.is_trivia()).collect();

    if significant.is_empty() {
        return Err(AgentError::SqlValidationError("empty statement".to_string()));
    }

    if let Some(pos) = significant.iter().position(|t| t.is_punct(';')) {
        if pos != significant.len() - 1 {
            return Err(AgentError::SqlValidationError(
                "multiple statements are not allowed".to_string(),
            ));
        }
    }

    let first = significant
        .iter()
        .find(|t| !t.is_punct('('))
        .ok_or_else(|| AgentError::SqlValidationError("empty statement".to_string()))?;
    if !READ_STATEMENTS.iter().any(|k| first.is_keyword(k)) {
        return Err(AgentError::SqlValidationError(format!(
            "only read-only SELECT statements are permitted, got '{}'",
            first.text
        )));
    }

    if let Some(keyword) = significant
        .iter()
        .filter(|t| t.kind == TokenKind::Word)
        .find(|t| WRITE_KEYWORDS.iter().any(|k| t.is_keyword(k)))
    {
        return Err(AgentError::SqlValidationError(format!(
            "only read-only SELECT statements are permitted, found '{}'",
            keyword.text.to_ascii_uppercase()
        )));
    }

    Ok(())
}

/// The statement text without a trailing `;` (and anything after it), ready
/// to be embedded as a subquery.
pub fn statement_body(sql: &str) -> Result<&str> {
    let tokens = tokenize(sql)?;
    let end = tokens
        .iter()
        .find(|t| t.is_punct(';'))
        .map(|t| t.start)
        .unwrap_or(sql.len());
    Ok(sql[..end].trim())
}
