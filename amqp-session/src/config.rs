use std::env;

/// Process-wide defaults and strict-mode switches. Sessions take this by
/// value at construction instead of reading hidden globals, so a process
/// hosting more than one connection can run different policies side by
/// side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    /// Reject anything the wire protocol's strict profile disallows
    /// (non-empty selectors, durable subscribers) instead of silently
    /// degrading them.
    pub strict_amqp: bool,
    /// When `strict_amqp` trips, fail the call instead of logging a
    /// warning and proceeding with the feature dropped.
    pub strict_amqp_fatal: bool,
    /// Subscribe with full credit immediately instead of leaving the
    /// channel suspended until the first `receive`/listener install.
    pub immediate_prefetch: bool,
    pub default_prefetch_high: u32,
    pub default_prefetch_low: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            strict_amqp: false,
            strict_amqp_fatal: true,
            immediate_prefetch: false,
            default_prefetch_high: 5000,
            default_prefetch_low: 2500,
        }
    }
}

impl SessionConfig {
    /// Reads `STRICT_AMQP`, `STRICT_AMQP_FATAL`, `IMMEDIATE_PREFETCH`,
    /// `DEFAULT_PREFETCH_HIGH` and `DEFAULT_PREFETCH_LOW`, falling back to
    /// `Default::default()` for anything unset or unparseable.
    pub fn from_env() -> Self {
        let default = Self::default();

        SessionConfig {
            strict_amqp: env_bool("STRICT_AMQP", default.strict_amqp),
            strict_amqp_fatal: env_bool("STRICT_AMQP_FATAL", default.strict_amqp_fatal),
            immediate_prefetch: env_bool("IMMEDIATE_PREFETCH", default.immediate_prefetch),
            default_prefetch_high: env_u32("DEFAULT_PREFETCH_HIGH", default.default_prefetch_high),
            default_prefetch_low: env_u32("DEFAULT_PREFETCH_LOW", default.default_prefetch_low),
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = SessionConfig::default();
        assert!(!config.strict_amqp);
        assert!(config.strict_amqp_fatal);
        assert!(!config.immediate_prefetch);
        assert_eq!(config.default_prefetch_high, 5000);
        assert_eq!(config.default_prefetch_low, 2500);
    }

    #[test]
    fn env_helpers_fall_back_on_missing_or_bad_values() {
        assert_eq!(env_bool("AMQP_SESSION_TEST_MISSING_BOOL", true), true);
        assert_eq!(env_u32("AMQP_SESSION_TEST_MISSING_U32", 7), 7);
    }
}
