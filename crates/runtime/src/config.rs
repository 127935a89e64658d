//! Runtime configuration.

use serde::Deserialize;

/// Configuration for a [`crate::agent::RuntimeContext`].
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Deadline for an outbound call's reply, in milliseconds.
    pub reply_timeout_ms: u64,
    /// Number of concurrent workers executing due timeline actions.
    pub dispatch_workers: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            reply_timeout_ms: 30_000,
            dispatch_workers: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.reply_timeout_ms, 30_000);
        assert_eq!(config.dispatch_workers, 4);
    }

    #[test]
    fn test_config_deserializes() {
        let parsed: Result<RuntimeConfig, _> =
            serde_json::from_str(r#"{"reply_timeout_ms": 500, "dispatch_workers": 2}"#);
        assert!(parsed.is_ok());
        if let Ok(config) = parsed {
            assert_eq!(config.reply_timeout_ms, 500);
        }
    }
}
