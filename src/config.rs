//! Engine configuration loaded from the process environment.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{OrchestrationError, Result};

/// Every knob the engine reads at startup. `Default` gives the documented
/// production defaults with no API key, which is what tests start from.
#[derive(Clone)]
pub struct EngineConfig {
    pub gemini_api_key: String,
    pub router_model: String,
    pub analyst_model: String,
    pub reasoning_model: String,

    /// TTL for cached tool results.
    pub tool_cache_ttl: Duration,
    /// TTL for whole cached responses.
    pub response_cache_ttl: Duration,
    pub response_cache_enabled: bool,

    /// Append the SEBI regulator notice to every disclaimer.
    pub include_regulator_notice: bool,

    /// Messages retained per session; older ones are evicted on append.
    pub session_history_limit: usize,
    /// Most recent messages handed to agents as conversation context.
    pub context_messages: usize,
    pub context_message_chars: usize,

    pub router_timeout: Duration,
    pub agent_timeout: Duration,
    pub tool_timeout: Duration,

    pub fund_api_base_url: String,
    pub quote_api_base_url: String,
    pub database_url: Option<String>,

    pub port: u16,
    pub cors_origins: Vec<String>,
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("gemini_api_key", &if self.gemini_api_key.is_empty() { "" } else { "[REDACTED]" })
            .field("router_model", &self.router_model)
            .field("analyst_model", &self.analyst_model)
            .field("reasoning_model", &self.reasoning_model)
            .field("tool_cache_ttl", &self.tool_cache_ttl)
            .field("response_cache_ttl", &self.response_cache_ttl)
            .field("response_cache_enabled", &self.response_cache_enabled)
            .field("include_regulator_notice", &self.include_regulator_notice)
            .field("session_history_limit", &self.session_history_limit)
            .field("context_messages", &self.context_messages)
            .field("router_timeout", &self.router_timeout)
            .field("agent_timeout", &self.agent_timeout)
            .field("tool_timeout", &self.tool_timeout)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("port", &self.port)
            .finish()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            router_model: "gemini-2.0-flash-lite".to_string(),
            analyst_model: "gemini-2.0-flash".to_string(),
            reasoning_model: "gemini-2.5-flash".to_string(),
            tool_cache_ttl: Duration::from_secs(24 * 3600),
            response_cache_ttl: Duration::from_secs(3600),
            response_cache_enabled: true,
            include_regulator_notice: false,
            session_history_limit: 50,
            context_messages: 4,
            context_message_chars: 200,
            router_timeout: Duration::from_secs(10),
            agent_timeout: Duration::from_secs(60),
            tool_timeout: Duration::from_secs(15),
            fund_api_base_url: "https://api.mfapi.in".to_string(),
            quote_api_base_url: "https://query1.finance.yahoo.com".to_string(),
            database_url: None,
            port: 8000,
            cors_origins: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Read configuration from the environment, falling back to defaults for
    /// unset variables. A set but unparsable value is an error.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Self {
            gemini_api_key: get("GEMINI_API_KEY").unwrap_or_default(),
            router_model: get("ROUTER_MODEL").unwrap_or(defaults.router_model),
            analyst_model: get("ANALYST_MODEL").unwrap_or(defaults.analyst_model),
            reasoning_model: get("REASONING_MODEL").unwrap_or(defaults.reasoning_model),
            tool_cache_ttl: Duration::from_secs(
                parse_or(get("CACHE_TTL_HOURS"), "CACHE_TTL_HOURS", 24u64)? * 3600,
            ),
            response_cache_ttl: Duration::from_secs(parse_or(
                get("RESPONSE_CACHE_TTL_SECS"),
                "RESPONSE_CACHE_TTL_SECS",
                3600u64,
            )?),
            response_cache_enabled: parse_bool(get("RESPONSE_CACHE_ENABLED"), "RESPONSE_CACHE_ENABLED", true)?,
            include_regulator_notice: parse_bool(
                get("INCLUDE_REGULATOR_NOTICE"),
                "INCLUDE_REGULATOR_NOTICE",
                defaults.include_regulator_notice,
            )?,
            session_history_limit: parse_or(get("SESSION_HISTORY_LIMIT"), "SESSION_HISTORY_LIMIT", 50usize)?,
            context_messages: parse_or(get("CONTEXT_MESSAGES"), "CONTEXT_MESSAGES", 4usize)?,
            context_message_chars: parse_or(get("CONTEXT_MESSAGE_CHARS"), "CONTEXT_MESSAGE_CHARS", 200usize)?,
            router_timeout: Duration::from_secs(parse_or(get("ROUTER_TIMEOUT_SECS"), "ROUTER_TIMEOUT_SECS", 10u64)?),
            agent_timeout: Duration::from_secs(parse_or(get("AGENT_TIMEOUT_SECS"), "AGENT_TIMEOUT_SECS", 60u64)?),
            tool_timeout: Duration::from_secs(parse_or(get("TOOL_TIMEOUT_SECS"), "TOOL_TIMEOUT_SECS", 15u64)?),
            fund_api_base_url: get("FUND_API_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.fund_api_base_url),
            quote_api_base_url: get("QUOTE_API_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.quote_api_base_url),
            database_url: get("POSTGRES_URL").or_else(|| get("DATABASE_URL")),
            port: match get("PORT").or_else(|| get("API_PORT")) {
                Some(raw) => parse_value(&raw, "PORT")?,
                None => defaults.port,
            },
            cors_origins: get("CORS_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    pub fn llm_enabled(&self) -> bool {
        !self.gemini_api_key.is_empty()
    }
}

fn parse_value<T: FromStr>(raw: &str, key: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|_| OrchestrationError::Config(format!("{} has an invalid value: {:?}", key, raw)))
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T> {
    match raw {
        Some(raw) => parse_value(&raw, key),
        None => Ok(default),
    }
}

fn parse_bool(raw: Option<String>, key: &str, default: bool) -> Result<bool> {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(OrchestrationError::Config(format!(
            "{} has an invalid value: {:?}",
            key, other
        ))),
    }
}
