//! Chat engine configuration loaded from environment variables.
//!
//! Every setting has a default so a local build talks to a locally running
//! backend with zero configuration.

use std::time::Duration;

use coachchat_net::RestConfig;
use coachchat_shared::constants::{
    DEFAULT_PAGE_SIZE, DEFAULT_REQUEST_TIMEOUT_MS, TYPING_DEBOUNCE_MS, TYPING_FRESHNESS_MS,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Base URL of the managed backend.
    /// Env: `COACHCHAT_BACKEND_URL`
    /// Default: `http://localhost:54321`
    pub backend_url: String,

    /// Public API key sent with every request.
    /// Env: `COACHCHAT_API_KEY`
    pub api_key: String,

    /// Session token of the signed-in user.
    /// Env: `COACHCHAT_ACCESS_TOKEN`
    pub access_token: Option<String>,

    /// Messages per page for `load` and `load_more`.
    /// Env: `COACHCHAT_PAGE_SIZE`
    pub page_size: u32,

    /// Env: `COACHCHAT_REQUEST_TIMEOUT_MS`
    pub request_timeout: Duration,

    /// Age after which a remote typing signal is ignored.
    /// Env: `COACHCHAT_TYPING_FRESHNESS_MS`
    pub typing_freshness: Duration,

    /// Minimum spacing between outbound typing updates.
    /// Env: `COACHCHAT_TYPING_DEBOUNCE_MS`
    pub typing_debounce: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            access_token: None,
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            typing_freshness: Duration::from_millis(TYPING_FRESHNESS_MS),
            typing_debounce: Duration::from_millis(TYPING_DEBOUNCE_MS),
        }
    }
}

impl ChatConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("COACHCHAT_BACKEND_URL") {
            config.backend_url = url;
        }

        if let Some(key) = lookup("COACHCHAT_API_KEY") {
            config.api_key = key;
        }

        if let Some(token) = lookup("COACHCHAT_ACCESS_TOKEN") {
            if !token.is_empty() {
                config.access_token = Some(token);
            }
        }

        if let Some(val) = lookup("COACHCHAT_PAGE_SIZE") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.page_size = n,
                _ => tracing::warn!(value = %val, "Invalid COACHCHAT_PAGE_SIZE, using default"),
            }
        }

        let millis = |name: &str, default: Duration| match lookup(name) {
            Some(val) => match val.parse::<u64>() {
                Ok(ms) => Duration::from_millis(ms),
                Err(_) => {
                    tracing::warn!(var = name, value = %val, "Invalid duration, using default");
                    default
                }
            },
            None => default,
        };
        config.request_timeout = millis("COACHCHAT_REQUEST_TIMEOUT_MS", config.request_timeout);
        config.typing_freshness = millis("COACHCHAT_TYPING_FRESHNESS_MS", config.typing_freshness);
        config.typing_debounce = millis("COACHCHAT_TYPING_DEBOUNCE_MS", config.typing_debounce);

        // RUST_LOG is read by the EnvFilter in `init_tracing`.

        config
    }

    pub fn rest_config(&self) -> RestConfig {
        RestConfig {
            base_url: self.backend_url.clone(),
            api_key: self.api_key.clone(),
            access_token: self.access_token.clone(),
            timeout: self.request_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> ChatConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ChatConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = load(&[]);
        assert_eq!(config, ChatConfig::default());
        assert_eq!(config.page_size, 50);
        assert_eq!(config.typing_freshness, Duration::from_secs(5));
        assert_eq!(config.typing_debounce, Duration::from_millis(100));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("COACHCHAT_BACKEND_URL", "https://db.example"),
            ("COACHCHAT_ACCESS_TOKEN", "jwt"),
            ("COACHCHAT_PAGE_SIZE", "20"),
            ("COACHCHAT_TYPING_FRESHNESS_MS", "3000"),
        ]);
        assert_eq!(config.backend_url, "https://db.example");
        assert_eq!(config.access_token.as_deref(), Some("jwt"));
        assert_eq!(config.page_size, 20);
        assert_eq!(config.typing_freshness, Duration::from_secs(3));
        assert_eq!(config.rest_config().access_token.as_deref(), Some("jwt"));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = load(&[
            ("COACHCHAT_PAGE_SIZE", "0"),
            ("COACHCHAT_REQUEST_TIMEOUT_MS", "soon"),
            ("COACHCHAT_ACCESS_TOKEN", ""),
        ]);
        assert_eq!(config.page_size, 50);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.access_token, None);
    }
}
