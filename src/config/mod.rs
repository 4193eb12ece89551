//! Configuration for revscrape
//!
//! All tunables live in one immutable `Config` value constructed at startup
//! and passed explicitly into the scheduler and session driver. Values come
//! from defaults, then an optional TOML file, then environment-variable
//! overrides for the documented option names.

mod scrape;

pub use scrape::{ScrapeConfig, SessionConfig};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Output shape of the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Severity floor used when `RUST_LOG` is not set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive form fed to the subscriber's env filter.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Subscriber configuration; verbosity flags on the CLI override `level`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub level: LogLevel,
}

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Extraction-loop tunables
    #[serde(default)]
    pub scrape: ScrapeConfig,
    /// Browser-session tunables
    #[serde(default)]
    pub session: SessionConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file, then apply environment
    /// overrides and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, validated.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary lookup. Split out from
    /// `apply_env` so override semantics are testable without touching
    /// process-global state.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("HEADLESS") {
            self.session.headless = parse_bool(&v);
        }
        if let Some(v) = lookup("REVIEW_LANGUAGE") {
            let v = v.trim();
            if !v.is_empty() {
                self.scrape.review_language = v.to_string();
            }
        }
        if let Some(v) = lookup("BROWSER") {
            let v = v.trim();
            if !v.is_empty() {
                self.session.browser = v.to_string();
            }
        }
        if let Some(v) = lookup("SCROLL_IDLE_ROUNDS").and_then(|v| v.trim().parse().ok()) {
            self.scrape.scroll_idle_rounds = v;
        }
        if let Some(v) = lookup("SCROLL_PAUSE_MS").and_then(|v| v.trim().parse().ok()) {
            self.scrape.scroll_pause_ms = v;
        }
        if let Some(v) = lookup("MAX_RETRIES_PER_PLACE").and_then(|v| v.trim().parse().ok()) {
            self.scrape.max_retries_per_place = v;
        }
        if let Some(v) = lookup("MAX_REVIEWS_PER_PLACE").and_then(|v| v.trim().parse().ok()) {
            self.scrape.max_reviews_per_place = v;
        }
        if let Some(v) = lookup("MAX_SCROLL_ROUNDS").and_then(|v| v.trim().parse().ok()) {
            self.scrape.max_scroll_rounds = v;
        }
        if let Some(v) = lookup("TRANSLATE_SWITCH") {
            self.scrape.translate_switch = parse_bool(&v);
        }
        if let Some(v) = lookup("BLOCK_RESOURCES") {
            self.session.block_resources = parse_bool(&v);
        }
        if let Some(v) = lookup("DEFAULT_TIMEOUT_MS").and_then(|v| v.trim().parse().ok()) {
            self.session.op_timeout_ms = v;
            // Navigation follows the general timeout unless overridden below.
            self.session.nav_timeout_ms = v;
        }
        if let Some(v) = lookup("DEFAULT_NAV_TIMEOUT_MS").and_then(|v| v.trim().parse().ok()) {
            self.session.nav_timeout_ms = v;
        }
        if let Some(v) = lookup("PLACE_HARD_TIMEOUT_SEC").and_then(|v| v.trim().parse().ok()) {
            self.scrape.place_hard_timeout_secs = v;
        }
    }

    /// Validate all configuration fields.
    ///
    /// Collects all validation errors and reports them together so the user
    /// can fix everything in one pass.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.scrape.review_language.trim().is_empty() {
            errors.push("review_language must not be empty".to_string());
        }
        if self.scrape.scroll_idle_rounds == 0 {
            errors.push("scroll_idle_rounds must be positive".to_string());
        }
        if self.scrape.max_retries_per_place == 0 {
            errors.push("max_retries_per_place must be positive".to_string());
        }
        if self.scrape.max_scroll_rounds == 0 {
            errors.push("max_scroll_rounds must be positive".to_string());
        }
        if self.session.browser != "chromium" {
            errors.push(format!(
                "unsupported browser '{}': only 'chromium' can be driven over CDP",
                self.session.browser
            ));
        }
        if self.session.nav_timeout_ms == 0 {
            errors.push("nav_timeout_ms must be positive".to_string());
        }
        if self.session.op_timeout_ms == 0 {
            errors.push("op_timeout_ms must be positive".to_string());
        }
        if self.scrape.place_hard_timeout_secs == 0 {
            errors.push("place_hard_timeout_secs must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }
}

/// Boolean parsing for environment overrides: `1`, `true`, `yes` (any case)
/// are true, everything else false.
fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}
