//! Timing and retrieval configuration.
//!
//! Every poll loop in this crate is driven by a [`PollSettings`] value. The
//! presets below are tuned for virtual router consoles, which are slow,
//! line-buffered and give no explicit end-of-output framing.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default host of the console server (the emulator host).
pub const DEFAULT_TELNET_HOST: &str = "127.0.0.1";

/// Environment variable overriding the console server host.
pub const TELNET_HOST_ENV: &str = "TELNET_HOST";

/// Lifetime of a cached command result.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Timeout for establishing a console TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Upper bound on cached command results.
pub const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

/// Parameters of one sleep-based read loop.
///
/// A loop ends when the completion detector fires, when `max_wait` has
/// elapsed, or when both `empty_read_threshold` consecutive empty reads have
/// happened and `idle_grace` has passed since the last data arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    /// Overall wall-clock deadline for the loop.
    pub max_wait: Duration,
    /// Sleep between two reads.
    pub poll_interval: Duration,
    /// Consecutive empty reads required before an idle exit.
    pub empty_read_threshold: u32,
    /// Silence required since the last data before an idle exit.
    pub idle_grace: Duration,
}

impl PollSettings {
    /// Single interactive command.
    pub const fn command() -> Self {
        Self {
            max_wait: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            empty_read_threshold: 3,
            idle_grace: Duration::from_millis(1500),
        }
    }

    /// Full configuration in one pass. Large outputs have transmission gaps.
    pub const fn standard() -> Self {
        Self {
            max_wait: Duration::from_secs(180),
            poll_interval: Duration::from_millis(500),
            empty_read_threshold: 10,
            idle_grace: Duration::from_secs(10),
        }
    }

    /// Short section fetches used to warm a session up.
    pub const fn section_warmup() -> Self {
        Self {
            max_wait: Duration::from_secs(20),
            poll_interval: Duration::from_millis(200),
            empty_read_threshold: 3,
            idle_grace: Duration::from_secs(1),
        }
    }

    /// Maximal tolerance for very slow devices.
    pub const fn extreme_patience() -> Self {
        Self {
            max_wait: Duration::from_secs(600),
            poll_interval: Duration::from_millis(200),
            empty_read_threshold: 50,
            idle_grace: Duration::from_secs(60),
        }
    }

    /// One attempt of the repeated-attempt strategy.
    pub const fn repeated_attempt() -> Self {
        Self {
            max_wait: Duration::from_secs(100),
            poll_interval: Duration::from_millis(500),
            empty_read_threshold: 10,
            idle_grace: Duration::from_secs(10),
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::command()
    }
}

/// Delays used by the session initializer between its steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitTiming {
    /// Wait after connecting, before the wake-up newline.
    pub settle: Duration,
    /// Wait after the wake-up newline.
    pub after_wake: Duration,
    /// Wait after the privileged-mode command.
    pub after_privileged: Duration,
    /// Wait after each terminal setup command.
    pub after_terminal_command: Duration,
}

impl Default for InitTiming {
    fn default() -> Self {
        Self {
            settle: Duration::ZERO,
            after_wake: Duration::from_secs(2),
            after_privileged: Duration::from_secs(2),
            after_terminal_command: Duration::from_secs(1),
        }
    }
}

/// Named retrieval strategies, in the order they are usually tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Standard,
    Segmented,
    ExtremePatience,
    RepeatedAttempt,
}

impl StrategyKind {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Standard => "standard",
            StrategyKind::Segmented => "segmented",
            StrategyKind::ExtremePatience => "extreme_patience",
            StrategyKind::RepeatedAttempt => "repeated_attempt",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Settings of the repeated-attempt strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepeatedAttemptSettings {
    pub attempts: u32,
    /// Pause after an attempt that failed with an error.
    pub cooldown: Duration,
    pub poll: PollSettings,
}

impl Default for RepeatedAttemptSettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            cooldown: Duration::from_secs(5),
            poll: PollSettings::repeated_attempt(),
        }
    }
}

/// Rules a retrieved configuration must satisfy to be accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationRules {
    /// Minimum number of characters.
    pub min_length: usize,
    /// At least one of these tokens must appear (case-insensitive).
    pub identity_tokens: Vec<String>,
    /// At least one of these tokens must appear (case-insensitive).
    pub body_tokens: Vec<String>,
    /// Lines that terminate a complete configuration. A trailing device
    /// prompt is accepted as well.
    pub end_tokens: Vec<String>,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            min_length: 500,
            identity_tokens: vec!["version".to_string(), "hostname".to_string()],
            body_tokens: vec!["interface".to_string(), "configuration".to_string()],
            end_tokens: vec!["end".to_string(), "return".to_string()],
        }
    }
}

/// Configuration of the retrieval strategy selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Strategies in fallback order.
    pub strategies: Vec<StrategyKind>,
    pub standard: PollSettings,
    pub section_warmup: PollSettings,
    pub extreme_patience: PollSettings,
    pub repeated: RepeatedAttemptSettings,
    pub validation: ValidationRules,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            strategies: vec![
                StrategyKind::Standard,
                StrategyKind::Segmented,
                StrategyKind::ExtremePatience,
                StrategyKind::RepeatedAttempt,
            ],
            standard: PollSettings::standard(),
            section_warmup: PollSettings::section_warmup(),
            extreme_patience: PollSettings::extreme_patience(),
            repeated: RepeatedAttemptSettings::default(),
            validation: ValidationRules::default(),
        }
    }
}

/// Pacing of the batch orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    /// Pause inserted between two devices.
    pub pause_between_devices: Duration,
    /// Maximum number of simultaneous console sessions. 1 means sequential.
    pub max_concurrent: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            pause_between_devices: Duration::from_secs(3),
            max_concurrent: 1,
        }
    }
}

/// Top-level configuration of a [`crate::console::ConsoleClient`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub telnet_host: String,
    pub connect_timeout: Duration,
    pub cache_ttl: Duration,
    /// Built-in device profile name, see [`crate::templates`].
    pub profile: String,
    pub init: InitTiming,
    pub command: PollSettings,
    /// Pause between two commands of one request.
    pub command_spacing: Duration,
    pub retrieval: RetrievalConfig,
    pub batch: BatchOptions,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            telnet_host: DEFAULT_TELNET_HOST.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            cache_ttl: DEFAULT_CACHE_TTL,
            profile: "cisco_ios".to_string(),
            init: InitTiming::default(),
            command: PollSettings::command(),
            command_spacing: Duration::from_secs(1),
            retrieval: RetrievalConfig::default(),
            batch: BatchOptions::default(),
        }
    }
}

impl ConsoleConfig {
    /// Default configuration with the console host taken from `TELNET_HOST`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = std::env::var(TELNET_HOST_ENV)
            && !host.trim().is_empty()
        {
            config.telnet_host = host.trim().to_string();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_grow_more_patient() {
        let command = PollSettings::command();
        let standard = PollSettings::standard();
        let extreme = PollSettings::extreme_patience();

        assert!(command.max_wait < standard.max_wait);
        assert!(standard.max_wait < extreme.max_wait);
        assert!(standard.idle_grace < extreme.idle_grace);
        assert!(standard.empty_read_threshold < extreme.empty_read_threshold);
    }

    #[test]
    fn default_strategy_order_starts_with_standard() {
        let config = RetrievalConfig::default();
        assert_eq!(
            config.strategies,
            vec![
                StrategyKind::Standard,
                StrategyKind::Segmented,
                StrategyKind::ExtremePatience,
                StrategyKind::RepeatedAttempt,
            ]
        );
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: ConsoleConfig =
            serde_json::from_str(r#"{"telnet_host":"192.168.102.1"}"#).expect("decode config");
        assert_eq!(config.telnet_host, "192.168.102.1");
        assert_eq!(config.cache_ttl, DEFAULT_CACHE_TTL);
        assert_eq!(config.batch.max_concurrent, 1);
    }

    #[test]
    fn strategy_kind_uses_snake_case_names() {
        let kind: StrategyKind = serde_json::from_str(r#""extreme_patience""#).expect("decode");
        assert_eq!(kind, StrategyKind::ExtremePatience);
        assert_eq!(kind.to_string(), "extreme_patience");
    }
}
