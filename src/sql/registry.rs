//! Identifier Registry
//!
//! Canonical, case-correct names for every table/view the agent may
//! reference. Lookups are case-insensitive; the mapping is append-only.

use crate::error::AgentError;
use crate::Result;
use std::collections::BTreeMap;
use std::sync::RwLock;
use tracing::debug;

/// Relations of the finance schema, spelled the way they were created.
pub const DEFAULT_RELATIONS: &[&str] = &[
    "Users",
    "Accounts",
    "Transactions",
    "Categories",
    "Currencies",
    "Budgets",
];

pub struct IdentifierRegistry {
    // lowercase alias → canonical name
    entries: RwLock<BTreeMap<String, String>>,
}

impl IdentifierRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registry preloaded with [`DEFAULT_RELATIONS`].
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        for name in DEFAULT_RELATIONS {
            // Defaults are distinct and quotable.
            let _ = registry.register_canonical(name);
        }
        registry
    }

    /// Register `canonical` under its own lowercase spelling.
    pub fn register_canonical(&self, canonical: &str) -> Result<()> {
        self.register(&canonical.to_lowercase(), canonical)
    }

    pub fn register(&self, alias: &str, canonical: &str) -> Result<()> {
        validate_canonical(canonical)?;
        let alias = alias.trim().to_lowercase();
        if alias.is_empty() {
            return Err(AgentError::RegistryConflict("empty alias".to_string()));
        }

        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // The canonical spelling must always resolve to itself as well.
        let self_alias = canonical.to_lowercase();
        for key in [&alias, &self_alias] {
            if let Some(existing) = entries.get(key) {
                if existing != canonical {
                    return Err(AgentError::RegistryConflict(format!(
                        "alias '{}' already maps to '{}', refusing '{}'",
                        key, existing, canonical
                    )));
                }
            }
        }

        for key in [alias, self_alias] {
            if !entries.contains_key(&key) {
                debug!(alias = %key, canonical = %canonical, "Registered identifier");
                entries.insert(key, canonical.to_string());
            }
        }
        Ok(())
    }

    /// Case-insensitive lookup of the canonical spelling.
    pub fn canonical(&self, name: &str) -> Option<String> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.get(&name.to_lowercase()).cloned()
    }

    /// Distinct canonical names, sorted.
    pub fn canonical_names(&self) -> Vec<String> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut names: Vec<String> = entries.values().cloned().collect();
        names.sort();
        names.dedup();
        names
    }
}

impl Default for IdentifierRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Unquoted identifiers fold to lowercase, so any uppercase letter means the
/// name only resolves when quoted.
pub fn requires_quoting(name: &str) -> bool {
    name.chars().any(char::is_uppercase)
}

/// Spelling to emit in SQL text for a canonical name.
pub fn render_identifier(canonical: &str) -> String {
    if requires_quoting(canonical) {
        format!("\"{}\"", canonical)
    } else {
        canonical.to_string()
    }
}

fn validate_canonical(canonical: &str) -> Result<()> {
    if canonical.is_empty() {
        return Err(AgentError::RegistryConflict(
            "canonical name must not be empty".to_string(),
        ));
    }
    if canonical
        .chars()
        .any(|c| c == '"' || c == '\0' || c.is_whitespace())
    {
        return Err(AgentError::RegistryConflict(format!(
            "canonical name '{}' cannot be quoted safely",
            canonical
        )));
    }
    Ok(())
}
