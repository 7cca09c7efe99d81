//! SQL Corrector
//!
//! Repairs the casing of table references against the identifier registry
//! and adds identifier quotes where a canonical name needs them. Works on
//! tokens, so string literals and comments are never touched, and running
//! it on its own output is a no-op.

use crate::models::Correction;
use crate::sql::lexer::{tokenize, Token, TokenKind};
use crate::sql::registry::{render_identifier, IdentifierRegistry};
use crate::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// Keywords that end a `FROM` list item; never mistaken for a table alias.
const CLAUSE_KEYWORDS: &[&str] = &[
    "WHERE", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "NATURAL", "OUTER", "ON",
    "USING", "GROUP", "ORDER", "LIMIT", "OFFSET", "HAVING", "UNION", "INTERSECT", "EXCEPT",
    "WINDOW", "FETCH", "FOR", "RETURNING", "SET", "VALUES", "SELECT", "WITH", "FROM", "INTO",
    "AS", "LATERAL", "DEFAULT",
];

/// Words allowed between a table keyword and the table name.
const REFERENCE_MODIFIERS: &[&str] = &["ONLY", "IF", "NOT", "EXISTS", "TABLE"];

#[derive(Debug, Clone, PartialEq)]
pub struct CorrectedSql {
    pub fixed_sql: String,
    pub corrections: Vec<Correction>,
}

impl CorrectedSql {
    pub fn is_unchanged(&self) -> bool {
        self.corrections.is_empty()
    }
}

#[derive(Clone)]
pub struct SqlCorrector {
    registry: Arc<IdentifierRegistry>,
}

impl SqlCorrector {
    pub fn new(registry: Arc<IdentifierRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<IdentifierRegistry> {
        &self.registry
    }

    pub fn correct(&self, sql: &str) -> Result<CorrectedSql> {
        let tokens = tokenize(sql)?;
        let significant: Vec<usize> = tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.is_trivia())
            .map(|(i, _)| i)
            .collect();

        let mut after_dot = vec![false; tokens.len()];
        let mut before_paren = vec![false; tokens.len()];
        // The word after AS names an output column or alias.
        let mut after_as = vec![false; tokens.len()];
        for pair in significant.windows(2) {
            after_dot[pair[1]] = tokens[pair[0]].is_punct('.');
            after_as[pair[1]] = tokens[pair[0]].is_keyword("AS");
            before_paren[pair[0]] = tokens[pair[1]].is_punct('(');
        }

        let mut is_reference = vec![false; tokens.len()];
        let mut referenced: HashSet<String> = HashSet::new();
        for index in find_table_references(&tokens, &significant) {
            let canonical = tokens[index]
                .identifier()
                .and_then(|name| self.registry.canonical(&name));
            if let Some(canonical) = canonical {
                is_reference[index] = true;
                referenced.insert(canonical);
            }
        }

        let mut fixed_sql = String::with_capacity(sql.len() + 16);
        let mut corrections: Vec<Correction> = Vec::new();

        for (i, token) in tokens.iter().enumerate() {
            let eligible = is_reference[i] || !(after_dot[i] || before_paren[i] || after_as[i]);
            let rewrite = if eligible {
                self.rewrite(token, is_reference[i], &referenced)
            } else {
                None
            };

            let Some((text, correction)) = rewrite else {
                fixed_sql.push_str(token.text);
                continue;
            };

            // Keep a quoted replacement from fusing with a neighbouring quote.
            if fixed_sql.ends_with('"') {
                fixed_sql.push(' ');
            }
            fixed_sql.push_str(&text);
            if tokens
                .get(i + 1)
                .map(|next| next.text.starts_with('"'))
                .unwrap_or(false)
            {
                fixed_sql.push(' ');
            }

            let seen = corrections.iter().any(|c| {
                c.original == correction.original && c.corrected == correction.corrected
            });
            if !seen {
                info!(
                    original = %correction.original,
                    corrected = %correction.corrected,
                    timestamp = %correction.timestamp.to_rfc3339(),
                    "Corrected SQL identifier"
                );
                corrections.push(correction);
            }
        }

        Ok(CorrectedSql {
            fixed_sql,
            corrections,
        })
    }

    fn rewrite(
        &self,
        token: &Token<'_>,
        is_reference: bool,
        referenced: &HashSet<String>,
    ) -> Option<(String, Correction)> {
        match token.kind {
            TokenKind::Word => {
                let word = token.text;
                let canonical = self.registry.canonical(word)?;
                let applies =
                    is_reference || word == canonical || referenced.contains(&canonical);
                if !applies {
                    return None;
                }
                let rendered = render_identifier(&canonical);
                if rendered == word {
                    return None;
                }
                let correction = if word != canonical {
                    Correction::new(word, canonical.as_str())
                } else {
                    Correction::new(word, rendered.as_str())
                };
                Some((rendered, correction))
            }
            TokenKind::QuotedIdent => {
                let name = token.identifier()?;
                let canonical = self.registry.canonical(&name)?;
                if name == canonical || !(is_reference || referenced.contains(&canonical)) {
                    return None;
                }
                let correction = Correction::new(name, canonical.as_str());
                Some((format!("\"{}\"", canonical), correction))
            }
            _ => None,
        }
    }
}

fn is_identifier(token: &Token<'_>) -> bool {
    matches!(token.kind, TokenKind::Word | TokenKind::QuotedIdent)
}

fn is_clause_keyword(token: &Token<'_>) -> bool {
    token.kind == TokenKind::Word && CLAUSE_KEYWORDS.iter().any(|k| token.is_keyword(k))
}

/// Token indices of every table/view name that follows a table keyword.
fn find_table_references(tokens: &[Token<'_>], significant: &[usize]) -> Vec<usize> {
    let mut references = Vec::new();
    let mut i = 0;

    while i < significant.len() {
        let token = &tokens[significant[i]];
        if token.kind == TokenKind::Word {
            let upper = token.text.to_ascii_uppercase();
            // (accepts a comma list, `name(` is a function call rather than a table)
            let mode = match upper.as_str() {
                "FROM" => Some((true, true)),
                "JOIN" => Some((false, true)),
                "INTO" | "UPDATE" => Some((false, false)),
                "TRUNCATE" | "TABLE" | "VIEW" => Some((true, false)),
                _ => None,
            };
            if let Some((list, call_is_function)) = mode {
                i = collect_references(
                    tokens,
                    significant,
                    i + 1,
                    list,
                    call_is_function,
                    &mut references,
                );
                continue;
            }
        }
        i += 1;
    }

    references
}

fn collect_references(
    tokens: &[Token<'_>],
    significant: &[usize],
    mut j: usize,
    list: bool,
    call_is_function: bool,
    references: &mut Vec<usize>,
) -> usize {
    let at = |k: usize| significant.get(k).map(|&index| &tokens[index]);

    loop {
        while let Some(token) = at(j) {
            if REFERENCE_MODIFIERS.iter().any(|m| token.is_keyword(m)) {
                j += 1;
            } else {
                break;
            }
        }

        let Some(token) = at(j) else { break };
        if !is_identifier(token) || is_clause_keyword(token) {
            break;
        }

        let mut target = significant[j];
        if let (Some(dot), Some(name)) = (at(j + 1), at(j + 2)) {
            if dot.is_punct('.') && is_identifier(name) {
                target = significant[j + 2];
                j += 2;
            }
        }

        if call_is_function && at(j + 1).map(|t| t.is_punct('(')).unwrap_or(false) {
            j += 1;
            break;
        }

        references.push(target);
        j += 1;

        if !list {
            break;
        }

        match at(j) {
            Some(token) if token.is_keyword("AS") => j += 2,
            Some(token) if is_identifier(token) && !is_clause_keyword(token) => j += 1,
            _ => {}
        }

        match at(j) {
            Some(token) if token.is_punct(',') => j += 1,
            _ => break,
        }
    }

    j
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::registry::DEFAULT_RELATIONS;
    use proptest::prelude::*;

    fn corrector() -> SqlCorrector {
        SqlCorrector::new(Arc::new(IdentifierRegistry::with_defaults()))
    }

    fn fixed(sql: &str) -> String {
        corrector().correct(sql).unwrap().fixed_sql
    }

    #[test]
    fn test_lowercase_table_is_corrected_and_quoted() {
        let result = corrector()
            .correct("SELECT * FROM transactions WHERE user_id = 5")
            .unwrap();
        assert_eq!(
            result.fixed_sql,
            "SELECT * FROM \"Transactions\" WHERE user_id = 5"
        );
        assert_eq!(result.corrections.len(), 1);
        assert_eq!(result.corrections[0].original, "transactions");
        assert_eq!(result.corrections[0].corrected, "Transactions");
    }

    #[test]
    fn test_already_quoted_sql_is_untouched() {
        let sql = "SELECT * FROM \"Transactions\" t JOIN \"Accounts\" a ON a.id = t.account_id";
        let result = corrector().correct(sql).unwrap();
        assert_eq!(result.fixed_sql, sql);
        assert!(result.is_unchanged());
    }

    #[test]
    fn test_correct_case_but_unquoted() {
        let result = corrector().correct("SELECT * FROM Accounts").unwrap();
        assert_eq!(result.fixed_sql, "SELECT * FROM \"Accounts\"");
        assert_eq!(result.corrections[0].corrected, "\"Accounts\"");
    }

    #[test]
    fn test_literals_and_comments_are_preserved() {
        let sql = "SELECT 'from transactions' AS note -- join accounts\nFROM transactions /* accounts */";
        assert_eq!(
            fixed(sql),
            "SELECT 'from transactions' AS note -- join accounts\nFROM \"Transactions\" /* accounts */"
        );
    }

    #[test]
    fn test_qualified_columns_follow_the_table() {
        assert_eq!(
            fixed("SELECT transactions.amount FROM transactions JOIN ACCOUNTS ON accounts.id = transactions.account_id"),
            "SELECT \"Transactions\".amount FROM \"Transactions\" JOIN \"Accounts\" ON \"Accounts\".id = \"Transactions\".account_id"
        );
    }

    #[test]
    fn test_schema_qualified_and_comma_lists() {
        assert_eq!(
            fixed("SELECT * FROM public.accounts a, currencies c WHERE a.currency_id = c.id"),
            "SELECT * FROM public.\"Accounts\" a, \"Currencies\" c WHERE a.currency_id = c.id"
        );
    }

    #[test]
    fn test_wrongly_cased_quoted_reference() {
        let result = corrector().correct("SELECT * FROM \"transactions\"").unwrap();
        assert_eq!(result.fixed_sql, "SELECT * FROM \"Transactions\"");
        assert_eq!(result.corrections.len(), 1);
    }

    #[test]
    fn test_ddl_and_dml_keywords_are_recognised() {
        assert_eq!(
            fixed("DROP TABLE IF EXISTS budgets"),
            "DROP TABLE IF EXISTS \"Budgets\""
        );
        assert_eq!(
            fixed("INSERT INTO categories (name) VALUES ('x')"),
            "INSERT INTO \"Categories\" (name) VALUES ('x')"
        );
        assert_eq!(
            fixed("UPDATE ONLY users SET name = 'users'"),
            "UPDATE ONLY \"Users\" SET name = 'users'"
        );
    }

    #[test]
    fn test_unreferenced_lowercase_words_are_left_alone() {
        let sql = "SELECT a.accounts FROM ledger a";
        assert_eq!(fixed(sql), sql);
        let sql = "SELECT EXTRACT(YEAR FROM t.date) FROM ledger t";
        assert_eq!(fixed(sql), sql);
    }

    #[test]
    fn test_output_aliases_keep_their_names() {
        let result = corrector()
            .correct("SELECT COUNT(*) AS accounts FROM accounts")
            .unwrap();
        assert_eq!(result.fixed_sql, "SELECT COUNT(*) AS accounts FROM \"Accounts\"");
        assert_eq!(result.corrections.len(), 1);
        assert_eq!(
            fixed(&result.fixed_sql),
            "SELECT COUNT(*) AS accounts FROM \"Accounts\""
        );

        assert_eq!(
            fixed("SELECT t.amount AS Transactions FROM transactions t"),
            "SELECT t.amount AS Transactions FROM \"Transactions\" t"
        );
    }

    #[test]
    fn test_unknown_tables_pass_through() {
        let result = corrector().correct("SELECT * FROM Bogus").unwrap();
        assert_eq!(result.fixed_sql, "SELECT * FROM Bogus");
        assert!(result.is_unchanged());
    }

    #[test]
    fn test_unterminated_literal_is_rejected() {
        assert!(corrector().correct("SELECT * FROM transactions WHERE x = 'oops").is_err());
    }

    fn sql_fragment() -> impl Strategy<Value = String> {
        let words = prop::sample::select(vec![
            "SELECT", "*", "FROM", "JOIN", "ON", "WHERE", "INTO", "UPDATE", "TABLE", "AS", ",",
            ".", "(", ")", "=", "$1", "5", "t", "a", "amount", "user_id", "'transactions'",
            "-- accounts\n", "/* Budgets */", "\"Accounts\"", "\"transactions\"", "public",
        ])
        .prop_map(str::to_string);
        let tables = (prop::sample::select(DEFAULT_RELATIONS.to_vec()), any::<u8>())
            .prop_map(|(name, mask)| mixed_case(name, mask));
        prop_oneof![3 => words, 2 => tables]
    }

    fn mixed_case(name: &str, mask: u8) -> String {
        name.chars()
            .enumerate()
            .map(|(i, c)| {
                if mask & (1 << (i % 8)) != 0 {
                    c.to_ascii_uppercase()
                } else {
                    c.to_ascii_lowercase()
                }
            })
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn prop_correction_is_idempotent(parts in prop::collection::vec(sql_fragment(), 1..24)) {
            let sql = parts.join(" ");
            let corrector = corrector();
            if let Ok(first) = corrector.correct(&sql) {
                let second = corrector.correct(&first.fixed_sql).unwrap();
                prop_assert_eq!(&second.fixed_sql, &first.fixed_sql);
                prop_assert!(second.is_unchanged());
            }
        }

        #[test]
        fn prop_every_alias_resolves_to_quoted_canonical(index in 0..DEFAULT_RELATIONS.len(), mask in any::<u8>()) {
            let registry = IdentifierRegistry::with_defaults();
            let canonical = DEFAULT_RELATIONS[index];
            let alias = mixed_case(canonical, mask);
            let corrector = SqlCorrector::new(Arc::new(registry));
            let result = corrector.correct(&format!("SELECT * FROM {}", alias)).unwrap();
            let expected = format!("SELECT * FROM \"{}\"", canonical);
            prop_assert_eq!(result.fixed_sql, expected);
        }
    }
}
