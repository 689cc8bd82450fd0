use crate::{http::HttpTimeouts, llm::LlmConfig};
use std::{path::PathBuf, time::Duration};

const DEFAULT_PIPELINE_URL: &str = "http://localhost:3001";

/// Process configuration, read once at start-up.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub pipeline_api_url: String,
    pub poll_interval: Duration,
    pub push_retry: Duration,
    pub category_rules_path: Option<PathBuf>,
    pub redis_url: Option<String>,
    pub chat_history_limit: usize,
    pub chat_history_ttl_secs: u64,
    pub request_max_bytes: usize,
    pub metrics_key: Option<String>,
    pub http: HttpTimeouts,
    pub llm: LlmConfig,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            port: parsed_from_env("PORT", 8000),
            pipeline_api_url: string_from_env("PIPELINE_API_URL")
                .unwrap_or_else(|| DEFAULT_PIPELINE_URL.into()),
            poll_interval: millis_from_env("PIPELINE_POLL_INTERVAL_MS", 3_000),
            push_retry: millis_from_env("PIPELINE_PUSH_RETRY_MS", 15_000),
            category_rules_path: string_from_env("CATEGORY_RULES_PATH").map(PathBuf::from),
            redis_url: string_from_env("REDIS_URL"),
            chat_history_limit: positive_from_env("CHAT_HISTORY_LIMIT", 50),
            chat_history_ttl_secs: parsed_from_env("CHAT_HISTORY_TTL_SECS", 7 * 24 * 3600),
            request_max_bytes: positive_from_env("REQUEST_MAX_BYTES", 256 * 1024),
            metrics_key: string_from_env("METRICS_KEY"),
            http: HttpTimeouts {
                request: Duration::from_secs(parsed_from_env("HTTP_TIMEOUT_SECS", 15)),
                connect: Duration::from_secs(parsed_from_env("HTTP_CONNECT_TIMEOUT_SECS", 5)),
            },
            llm: LlmConfig::from_env(),
        }
    }
}

fn string_from_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed_from_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    string_from_env(key)
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn positive_from_env(key: &str, default: usize) -> usize {
    string_from_env(key)
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn millis_from_env(key: &str, default: u64) -> Duration {
    Duration::from_millis(positive_from_env(key, default as usize) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_keys_fall_back() {
        assert_eq!(parsed_from_env("STOREOPS_TEST_UNSET_PORT", 8000u16), 8000);
        assert_eq!(
            millis_from_env("STOREOPS_TEST_UNSET_POLL", 3_000),
            Duration::from_millis(3_000)
        );
        assert_eq!(string_from_env("STOREOPS_TEST_UNSET_URL"), None);
    }
}
