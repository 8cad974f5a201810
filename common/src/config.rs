//! Service configuration.
//!
//! Values come from the process environment (optionally seeded from a `.env`
//! file). The LLM credential is required; everything else has a default.

use std::str::FromStr;

use crate::errors::{AppError, AppResult};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8001;
const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_LLM_MODEL: &str = "gpt-3.5-turbo-0125";

/// Chat-completion provider settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
}

/// Bounds on the schema context handed to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaLimits {
    /// Row limit the model is asked to apply to its query.
    pub top_k: usize,
    /// Maximum number of tables described in the prompt.
    pub max_tables: usize,
    /// Example rows shown per table.
    pub sample_rows: usize,
}

impl Default for SchemaLimits {
    fn default() -> Self {
        Self {
            top_k: 30,
            max_tables: 30,
            sample_rows: 3,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub service_name: String,
    pub host: String,
    pub port: u16,
    pub llm: LlmConfig,
    pub schema: SchemaLimits,
}

impl AppConfig {
    /// Loads `.env` (if present) and builds the configuration from the environment.
    pub fn load_with_service(service_name: &str) -> AppResult<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env file");
        }
        Self::from_lookup(service_name, |key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(service_name: &str, lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("OPENAI_API_KEY")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AppError::Config("OPENAI_API_KEY must be set".into()))?;

        let defaults = SchemaLimits::default();

        Ok(Self {
            service_name: service_name.to_string(),
            host: lookup("SERVER_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_or(&lookup, "SERVER_PORT", DEFAULT_PORT)?,
            llm: LlmConfig {
                api_key,
                base_url: lookup("OPENAI_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
                model: lookup("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
                temperature: parse_or(&lookup, "LLM_TEMPERATURE", 0.0)?,
            },
            schema: SchemaLimits {
                top_k: parse_or(&lookup, "SQL_TOP_K", defaults.top_k)?,
                max_tables: parse_or(&lookup, "SCHEMA_MAX_TABLES", defaults.max_tables)?,
                sample_rows: parse_or(&lookup, "SCHEMA_SAMPLE_ROWS", defaults.sample_rows)?,
            },
        })
    }

    /// Address the HTTP listener binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> AppResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} has an invalid value: {}", key, raw))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_api_key_is_required() {
        let err = AppConfig::from_lookup("svc", lookup_from(&[])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup("svc", lookup_from(&[("OPENAI_API_KEY", "sk-test")]))
            .unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:8001");
        assert_eq!(config.llm.model, "gpt-3.5-turbo-0125");
        assert_eq!(config.schema, SchemaLimits::default());
    }

    #[test]
    fn test_overrides_and_invalid_numbers() {
        let config = AppConfig::from_lookup(
            "svc",
            lookup_from(&[
                ("OPENAI_API_KEY", "sk-test"),
                ("SERVER_PORT", "9000"),
                ("SQL_TOP_K", "5"),
            ]),
        )
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.schema.top_k, 5);

        let err = AppConfig::from_lookup(
            "svc",
            lookup_from(&[("OPENAI_API_KEY", "sk-test"), ("SERVER_PORT", "http")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("SERVER_PORT"));
    }
}
