//! Runtime settings.
//!
//! Loaded from the process environment (optionally seeded from a local `.env`
//! via `dotenvy`). Credentials are never compiled in.

use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.together.xyz/v1/chat/completions";
pub const DEFAULT_EXTRACTION_MODEL: &str = "meta-llama/Meta-Llama-3.1-8B-Instruct-Turbo-128K";
pub const DEFAULT_ADVICE_MODEL: &str = "meta-llama/Llama-3.3-70B-Instruct-Turbo";
pub const DEFAULT_MAX_PROMPT_CHARS: usize = 3000;

#[derive(Clone)]
pub struct Settings {
    pub api_key: String,
    pub api_url: String,
    pub extraction_model: String,
    pub advice_model: String,
    pub completion_timeout: Duration,
    pub ocr_url: String,
    pub ocr_timeout: Duration,
    pub bind_addr: String,
    pub max_prompt_chars: usize,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("extraction_model", &self.extraction_model)
            .field("advice_model", &self.advice_model)
            .field("completion_timeout", &self.completion_timeout)
            .field("ocr_url", &self.ocr_url)
            .field("ocr_timeout", &self.ocr_timeout)
            .field("bind_addr", &self.bind_addr)
            .field("max_prompt_chars", &self.max_prompt_chars)
            .finish()
    }
}

impl Settings {
    /// Read each known key individually; unrelated variables are never touched.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let text = |key: &str, default: &str| vars(key).unwrap_or_else(|| default.to_string());

        let api_key = vars("TOGETHER_API_KEY")
            .context("TOGETHER_API_KEY environment variable not set")?;

        Ok(Self {
            api_key,
            api_url: text("TOGETHER_API_URL", DEFAULT_API_URL),
            extraction_model: text("EXTRACTION_MODEL", DEFAULT_EXTRACTION_MODEL),
            advice_model: text("ADVICE_MODEL", DEFAULT_ADVICE_MODEL),
            completion_timeout: Duration::from_secs(number(&vars, "COMPLETION_TIMEOUT_SECS", 60)?),
            ocr_url: text("OCR_URL", "http://localhost:3001"),
            ocr_timeout: Duration::from_secs(number(&vars, "OCR_TIMEOUT_SECS", 120)?),
            bind_addr: text("BIND_ADDR", "0.0.0.0:3000"),
            max_prompt_chars: number(&vars, "MAX_PROMPT_CHARS", DEFAULT_MAX_PROMPT_CHARS)?,
        })
    }
}

fn number<T>(vars: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match vars(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: {:?}", key, raw)),
        None => Ok(default),
    }
}
