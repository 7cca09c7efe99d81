//! SQL text handling: tokenizing, identifier repair and the read-only guard.

pub mod corrector;
pub mod guard;
pub mod lexer;
pub mod registry;

pub use corrector::{CorrectedSql, SqlCorrector};
pub use guard::{ensure_read_only, statement_body};
pub use registry::{render_identifier, requires_quoting, IdentifierRegistry, DEFAULT_RELATIONS};
