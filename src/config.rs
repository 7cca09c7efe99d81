//! Runtime configuration
//!
//! Everything is read from the environment (optionally seeded from `.env`).

use crate::error::AgentError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub max_attempts: u32,
    pub db_timeout: Duration,
    pub llm_timeout: Duration,
    pub sample_rows: u32,
    pub api_port: u16,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 8,
            gemini_api_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            db_timeout: Duration::from_secs(10),
            llm_timeout: Duration::from_secs(30),
            sample_rows: 3,
            api_port: 8080,
        }
    }
}

impl AgentConfig {
    /// Load `.env` (if present) and then the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let max_attempts = parse_or(&lookup, "AGENT_MAX_ATTEMPTS", defaults.max_attempts)?;
        if max_attempts == 0 {
            return Err(AgentError::ConfigError(
                "AGENT_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let api_port = match non_empty("PORT").or_else(|| non_empty("API_PORT")) {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| {
                AgentError::ConfigError(format!("invalid PORT '{}': {}", raw, e))
            })?,
            None => defaults.api_port,
        };

        Ok(Self {
            database_url: non_empty("DATABASE_URL"),
            db_max_connections: parse_or(
                &lookup,
                "DB_MAX_CONNECTIONS",
                defaults.db_max_connections,
            )?,
            gemini_api_key: non_empty("GEMINI_API_KEY"),
            gemini_model: non_empty("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            max_attempts,
            db_timeout: Duration::from_secs(parse_or(
                &lookup,
                "AGENT_DB_TIMEOUT_SECS",
                defaults.db_timeout.as_secs(),
            )?),
            llm_timeout: Duration::from_secs(parse_or(
                &lookup,
                "AGENT_LLM_TIMEOUT_SECS",
                defaults.llm_timeout.as_secs(),
            )?),
            sample_rows: parse_or(&lookup, "AGENT_SAMPLE_ROWS", defaults.sample_rows)?,
            api_port,
        })
    }

    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| AgentError::ConfigError("DATABASE_URL is not set".to_string()))
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| AgentError::ConfigError(format!("invalid {} '{}': {}", key, raw, e))),
        None => Ok(default),
    }
}
