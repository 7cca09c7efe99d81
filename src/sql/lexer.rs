//! Minimal SQL tokenizer
//!
//! Only distinguishes what the corrector and guard need: words, quoted
//! identifiers, literals, comments and punctuation. Concatenating every
//! token's `text` always reproduces the input exactly.

use crate::error::AgentError;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    QuotedIdent,
    StringLiteral,
    Number,
    Param,
    LineComment,
    BlockComment,
    Whitespace,
    Punct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub start: usize,
}

impl<'a> Token<'a> {
    /// Whitespace and comments carry no meaning for the SQL structure.
    pub fn is_trivia(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Whitespace | TokenKind::LineComment | TokenKind::BlockComment
        )
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    pub fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct && self.text.starts_with(c)
    }

    /// Identifier name with quoting removed (`"a""b"` → `a"b`).
    pub fn identifier(&self) -> Option<String> {
        match self.kind {
            TokenKind::Word => Some(self.text.to_string()),
            TokenKind::QuotedIdent => {
                let inner = &self.text[1..self.text.len() - 1];
                Some(inner.replace("\"\"", "\""))
            }
            _ => None,
        }
    }
}

pub fn tokenize(sql: &str) -> Result<Vec<Token<'_>>> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < sql.len() {
        let rest = &sql[pos..];
        let c = match rest.chars().next() {
            Some(c) => c,
            None => break,
        };

        let (kind, len) = if c.is_whitespace() {
            let len = rest
                .char_indices()
                .find(|(_, ch)| !ch.is_whitespace())
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            (TokenKind::Whitespace, len)
        } else if rest.starts_with("--") {
            let len = rest.find('\n').unwrap_or(rest.len());
            (TokenKind::LineComment, len)
        } else if rest.starts_with("/*") {
            (TokenKind::BlockComment, block_comment_len(rest, pos)?)
        } else if c == '\'' {
            (TokenKind::StringLiteral, quoted_len(rest, '\'', pos, "string literal")?)
        } else if c == '"' {
            (TokenKind::QuotedIdent, quoted_len(rest, '"', pos, "quoted identifier")?)
        } else if (c == 'e' || c == 'E') && bytes.get(pos + 1) == Some(&b'\'') {
            (TokenKind::StringLiteral, 1 + escape_string_len(&rest[1..], pos)?)
        } else if c == '$' {
            dollar_token(rest, pos)?
        } else if c.is_alphabetic() || c == '_' {
            let len = rest
                .char_indices()
                .find(|(_, ch)| !(ch.is_alphanumeric() || *ch == '_' || *ch == '$'))
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            (TokenKind::Word, len)
        } else if c.is_ascii_digit() {
            let len = rest
                .char_indices()
                .find(|(_, ch)| !(ch.is_ascii_alphanumeric() || *ch == '.' || *ch == '_'))
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            (TokenKind::Number, len)
        } else {
            (TokenKind::Punct, c.len_utf8())
        };

        tokens.push(Token {
            kind,
            text: &rest[..len],
            start: pos,
        });
        pos += len;
    }

    Ok(tokens)
}

fn unterminated(what: &str, offset: usize) -> AgentError {
    AgentError::SqlValidationError(format!("unterminated {} starting at offset {}", what, offset))
}

/// Length of a `'...'` or `"..."` run where the quote is escaped by doubling.
fn quoted_len(rest: &str, quote: char, offset: usize, what: &str) -> Result<usize> {
    let mut chars = rest.char_indices().skip(1).peekable();
    while let Some((i, ch)) = chars.next() {
        if ch == quote {
            if let Some(&(_, next)) = chars.peek() {
                if next == quote {
                    chars.next();
                    continue;
                }
            }
            return Ok(i + ch.len_utf8());
        }
    }
    Err(unterminated(what, offset))
}

/// `'...'` with backslash escapes, as used after an `E` prefix.
fn escape_string_len(rest: &str, offset: usize) -> Result<usize> {
    let mut chars = rest.char_indices().skip(1).peekable();
    while let Some((i, ch)) = chars.next() {
        match ch {
            '\\' => {
                chars.next();
            }
            '\'' => {
                if let Some(&(_, '\'')) = chars.peek() {
                    chars.next();
                    continue;
                }
                return Ok(i + 1);
            }
            _ => {}
        }
    }
    Err(unterminated("string literal", offset))
}

/// Postgres block comments nest.
fn block_comment_len(rest: &str, offset: usize) -> Result<usize> {
    let mut depth = 0usize;
    let mut i = 0;
    while i < rest.len() {
        let tail = &rest[i..];
        if tail.starts_with("/*") {
            depth += 1;
            i += 2;
        } else if tail.starts_with("*/") {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return Ok(i);
            }
        } else {
            i += tail.chars().next().map(char::len_utf8).unwrap_or(1);
        }
    }
    Err(unterminated("block comment", offset))
}

/// `$1` placeholders and `$tag$ ... $tag$` dollar-quoted strings.
fn dollar_token(rest: &str, offset: usize) -> Result<(TokenKind, usize)> {
    let after = &rest[1..];
    let digits = after
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(after.len());
    if digits > 0 {
        return Ok((TokenKind::Param, 1 + digits));
    }

    let tag_len = after
        .char_indices()
        .find(|(_, ch)| !(ch.is_alphanumeric() || *ch == '_'))
        .map(|(i, _)| i)
        .unwrap_or(after.len());
    if after[tag_len..].starts_with('$') {
        let delimiter = &rest[..tag_len + 2];
        let body_start = delimiter.len();
        return match rest[body_start..].find(delimiter) {
            Some(end) => Ok((TokenKind::StringLiteral, body_start + end + delimiter.len())),
            None => Err(unterminated("dollar-quoted string", offset)),
        };
    }

    Ok((TokenKind::Punct, 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(sql: &str) -> Vec<(TokenKind, &str)> {
        tokenize(sql)
            .unwrap()
            .into_iter()
            .filter(|t| !t.is_trivia())
            .map(|t| (t.kind, t.text))
            .collect()
    }

    #[test]
    fn test_round_trips_input() {
        let sql = "SELECT \"Accounts\".name, 'it''s' -- note\nFROM x /* a /* b */ c */ WHERE id = $1;";
        let rebuilt: String = tokenize(sql).unwrap().iter().map(|t| t.text).collect();
        assert_eq!(rebuilt, sql);
    }

    #[test]
    fn test_literals_and_identifiers() {
        let tokens = kinds("SELECT 'from transactions' AS \"Weird \"\"name\"\"\" FROM t");
        assert_eq!(tokens[1], (TokenKind::StringLiteral, "'from transactions'"));
        assert_eq!(tokens[3].0, TokenKind::QuotedIdent);
        assert_eq!(
            tokenize("\"Weird \"\"name\"\"\"").unwrap()[0].identifier().unwrap(),
            "Weird \"name\""
        );
    }

    #[test]
    fn test_escape_and_dollar_strings() {
        let tokens = kinds(r"SELECT E'it\'s', $body$ FROM accounts $body$, $2");
        assert_eq!(tokens[1], (TokenKind::StringLiteral, r"E'it\'s'"));
        assert_eq!(tokens[3], (TokenKind::StringLiteral, "$body$ FROM accounts $body$"));
        assert_eq!(tokens[5], (TokenKind::Param, "$2"));
    }

    #[test]
    fn test_unterminated_inputs_fail() {
        assert!(tokenize("SELECT 'oops").is_err());
        assert!(tokenize("SELECT \"oops").is_err());
        assert!(tokenize("SELECT 1 /* open").is_err());
        assert!(tokenize("SELECT $x$ never closed").is_err());
    }
}
