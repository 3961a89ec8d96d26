use std::time::Duration;

use scriptreel_core::script::{GenerationOptions, DEFAULT_CONVERSATION_MODE};

const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Runner configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Base HTTP URL of the generation backend.
    pub api_url: String,
    /// Base WebSocket URL; progress streams live under `/ws/progress/{task_id}`.
    pub ws_url: String,
    /// Explicit source files to process. `None` means every source the
    /// backend lists as not yet generated.
    pub script_files: Option<Vec<String>>,
    pub options: GenerationOptions,
    /// Ask the backend to cancel the in-flight job on Ctrl-C.
    pub remote_cancel: bool,
    pub request_timeout_secs: u64,
}

impl RunnerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                               |
    /// |------------------------|---------------------------------------|
    /// | `BACKEND_API_URL`      | `http://localhost:8000`               |
    /// | `BACKEND_WS_URL`       | API URL with `http` swapped for `ws`  |
    /// | `SCRIPT_FILES`         | all sources not yet generated         |
    /// | `ENABLE_SUBTITLES`     | `true`                                |
    /// | `CONVERSATION_MODE`    | `dialogue`                            |
    /// | `REMOTE_CANCEL`        | `false`                               |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                                  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_url = var("BACKEND_API_URL")
            .unwrap_or_else(|| DEFAULT_API_URL.into())
            .trim_end_matches('/')
            .to_string();

        let ws_url = match var("BACKEND_WS_URL") {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => derive_ws_url(&api_url)?,
        };

        let script_files = var("SCRIPT_FILES").map(|list| {
            list.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        });

        let enable_subtitles = match var("ENABLE_SUBTITLES") {
            Some(v) => parse_bool("ENABLE_SUBTITLES", v)?,
            None => true,
        };

        let conversation_mode =
            var("CONVERSATION_MODE").unwrap_or_else(|| DEFAULT_CONVERSATION_MODE.into());

        let remote_cancel = match var("REMOTE_CANCEL") {
            Some(v) => parse_bool("REMOTE_CANCEL", v)?,
            None => false,
        };

        let request_timeout_secs = match var("REQUEST_TIMEOUT_SECS") {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
                var: "REQUEST_TIMEOUT_SECS",
                value: v,
                reason: "expected a whole number of seconds",
            })?,
            None => DEFAULT_REQUEST_TIMEOUT_SECS,
        };

        Ok(Self {
            api_url,
            ws_url,
            script_files,
            options: GenerationOptions {
                enable_subtitles,
                conversation_mode,
            },
            remote_cancel,
            request_timeout_secs,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn derive_ws_url(api_url: &str) -> Result<String, ConfigError> {
    if let Some(rest) = api_url.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else {
        Err(ConfigError::Invalid {
            var: "BACKEND_API_URL",
            value: api_url.to_string(),
            reason: "expected an http:// or https:// URL",
        })
    }
}

fn parse_bool(var: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value,
            reason: "expected true or false",
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<RunnerConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RunnerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.api_url, "http://localhost:8000");
        assert_eq!(config.ws_url, "ws://localhost:8000");
        assert!(config.script_files.is_none());
        assert!(config.options.enable_subtitles);
        assert_eq!(config.options.conversation_mode, "dialogue");
        assert!(!config.remote_cancel);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn ws_url_follows_https_scheme() {
        let config = load(&[("BACKEND_API_URL", "https://render.example.com/")]).unwrap();
        assert_eq!(config.api_url, "https://render.example.com");
        assert_eq!(config.ws_url, "wss://render.example.com");
    }

    #[test]
    fn explicit_ws_url_wins() {
        let config = load(&[
            ("BACKEND_API_URL", "http://api:8000"),
            ("BACKEND_WS_URL", "ws://progress:9000/"),
        ])
        .unwrap();
        assert_eq!(config.ws_url, "ws://progress:9000");
    }

    #[test]
    fn script_files_are_split_and_trimmed() {
        let config = load(&[("SCRIPT_FILES", " a.json, ,b.json ")]).unwrap();
        assert_eq!(config.script_files.unwrap(), ["a.json", "b.json"]);
    }

    #[test]
    fn flags_and_mode() {
        let config = load(&[
            ("ENABLE_SUBTITLES", "no"),
            ("CONVERSATION_MODE", "monologue"),
            ("REMOTE_CANCEL", "TRUE"),
        ])
        .unwrap();
        assert!(!config.options.enable_subtitles);
        assert_eq!(config.options.conversation_mode, "monologue");
        assert!(config.remote_cancel);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert_matches!(
            load(&[("REMOTE_CANCEL", "maybe")]),
            Err(ConfigError::Invalid { var: "REMOTE_CANCEL", .. })
        );
        assert_matches!(
            load(&[("REQUEST_TIMEOUT_SECS", "-5")]),
            Err(ConfigError::Invalid { var: "REQUEST_TIMEOUT_SECS", .. })
        );
        assert_matches!(
            load(&[("BACKEND_API_URL", "localhost:8000")]),
            Err(ConfigError::Invalid { var: "BACKEND_API_URL", .. })
        );
    }
}
