use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Datelike, Local};
use ::config::{Config, Environment, File};
use serde::Deserialize;

use crate::normalize::IdStrategy;

const DEFAULT_DB_PATH: &str = "data/pyq.sqlite";
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko)";

/// Runtime settings: defaults, then `pyq.toml` if present, then `PYQ_*` env vars.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db_path: PathBuf,
    /// Year used when an origin carries no `20xx` token.
    pub fallback_year: i32,
    pub id_strategy: IdStrategy,
    pub fetch_concurrency: usize,
    pub http_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            fallback_year: Local::now().year(),
            id_strategy: IdStrategy::default(),
            fetch_concurrency: 8,
            http_timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let defaults = Settings::default();
        let settings = Config::builder()
            .set_default("db_path", DEFAULT_DB_PATH)?
            .set_default("fallback_year", i64::from(defaults.fallback_year))?
            .set_default("id_strategy", "content_hash")?
            .set_default("fetch_concurrency", defaults.fetch_concurrency as i64)?
            .set_default("http_timeout_secs", defaults.http_timeout_secs as i64)?
            .set_default("user_agent", DEFAULT_USER_AGENT)?
            .add_source(File::with_name("pyq").required(false))
            .add_source(Environment::with_prefix("PYQ").try_parsing(true))
            .build()
            .context("Failed to read settings")?;
        let settings: Settings = settings
            .try_deserialize()
            .context("Invalid settings")?;
        Ok(settings.clamped())
    }

    fn clamped(mut self) -> Self {
        self.fetch_concurrency = self.fetch_concurrency.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = Settings::default();
        assert_eq!(s.db_path, PathBuf::from("data/pyq.sqlite"));
        assert_eq!(s.id_strategy, IdStrategy::ContentHash);
        assert!(s.fallback_year >= 2024);
        assert!(s.fetch_concurrency > 0);
    }

    #[test]
    fn zero_concurrency_is_clamped() {
        let s = Settings {
            fetch_concurrency: 0,
            ..Settings::default()
        };
        assert_eq!(s.clamped().fetch_concurrency, 1);
    }
}
