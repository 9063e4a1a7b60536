//! Retrieval of complete device configurations.
//!
//! A running configuration can span thousands of lines and a single pass may
//! come back truncated. [`ConfigRetriever`] tries an ordered list of
//! strategies, validates each output and returns the first one that passes.
//!
//! | Strategy | Behavior |
//! |---|---|
//! | `standard` | one full fetch with the standard poll settings |
//! | `segmented` | warm-up section fetches, then one full fetch in the same session |
//! | `extreme_patience` | one full fetch with very long deadline and idle grace |
//! | `repeated_attempt` | several standard-style fetches, keeping the longest output |

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::{PollSettings, RetrievalConfig, StrategyKind, ValidationRules};
use crate::device::{DeviceEndpoint, DeviceMatcher};
use crate::error::ConsoleError;
use crate::session::{CommandExecutor, CommandResult, Connector, PollExit};

/// Why a retrieved configuration was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ValidationFailure {
    #[error("output too short: {length} < {min} characters")]
    TooShort { length: usize, min: usize },

    #[error("no identity marker (expected one of {expected})")]
    MissingIdentity { expected: String },

    #[error("no interface or configuration marker (expected one of {expected})")]
    MissingBody { expected: String },

    /// Neither an end line nor a trailing prompt: the output was cut.
    #[error("no end-of-configuration marker")]
    Truncated,
}

/// Checks that `text` looks like a complete device configuration.
///
/// The output must end with one of `rules.end_tokens` on its own line, or
/// with a line `matcher` recognizes as a prompt.
pub fn validate_config(
    text: &str,
    rules: &ValidationRules,
    matcher: &DeviceMatcher,
) -> Result<(), ValidationFailure> {
    let length = text.chars().count();
    if length < rules.min_length {
        return Err(ValidationFailure::TooShort {
            length,
            min: rules.min_length,
        });
    }

    let lower = text.to_lowercase();
    let contains_any = |tokens: &[String]| {
        tokens.is_empty() || tokens.iter().any(|t| lower.contains(&t.to_lowercase()))
    };
    if !contains_any(&rules.identity_tokens) {
        return Err(ValidationFailure::MissingIdentity {
            expected: rules.identity_tokens.join(", "),
        });
    }
    if !contains_any(&rules.body_tokens) {
        return Err(ValidationFailure::MissingBody {
            expected: rules.body_tokens.join(", "),
        });
    }

    let last = text.trim_end();
    let last_line = last.rsplit('\n').next().unwrap_or("").trim();
    let ends_with_marker = rules
        .end_tokens
        .iter()
        .any(|t| last_line.eq_ignore_ascii_case(t))
        || matcher.is_prompt_line(last_line);
    if !ends_with_marker {
        return Err(ValidationFailure::Truncated);
    }
    Ok(())
}

/// Output of one strategy run, before selection.
#[derive(Debug, Clone)]
pub struct RetrievalAttempt {
    pub strategy: StrategyKind,
    pub config: String,
    pub elapsed: Duration,
    pub valid: bool,
    pub exit: Option<PollExit>,
}

impl RetrievalAttempt {
    /// Report of this attempt; lengths are counted in characters.
    pub fn report(&self, status: AttemptStatus) -> AttemptReport {
        AttemptReport {
            strategy: self.strategy,
            elapsed: self.elapsed,
            output_length: self.config.chars().count(),
            status,
        }
    }
}

/// Outcome of one strategy as reported to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptStatus {
    Accepted,
    Rejected { failure: ValidationFailure },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptReport {
    pub strategy: StrategyKind,
    pub elapsed: Duration,
    pub output_length: usize,
    #[serde(flatten)]
    pub status: AttemptStatus,
}

impl std::fmt::Display for AttemptReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.status {
            AttemptStatus::Accepted => write!(f, "{}: accepted", self.strategy),
            AttemptStatus::Rejected { failure } => write!(f, "{}: rejected ({failure})", self.strategy),
            AttemptStatus::Failed { error } => write!(f, "{}: failed ({error})", self.strategy),
        }
    }
}

/// A validated configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub device: String,
    pub config: String,
    /// Strategy that produced `config`.
    pub strategy: StrategyKind,
    pub retrieved_at: DateTime<Utc>,
    /// Time spent across all strategies.
    pub elapsed: Duration,
    /// Hex SHA-256 of `config`, for drift comparison between runs.
    pub sha256: String,
    /// Every strategy tried, in order.
    pub attempts: Vec<AttemptReport>,
}

/// Hex SHA-256 digest of a configuration.
pub fn config_digest(config: &str) -> String {
    format!("{:x}", Sha256::digest(config.as_bytes()))
}

/// Runs retrieval strategies in order until one output validates.
pub struct ConfigRetriever<C: Connector> {
    executor: CommandExecutor<C>,
    config: RetrievalConfig,
}

impl<C: Connector> Clone for ConfigRetriever<C> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            config: self.config.clone(),
        }
    }
}

impl<C: Connector> ConfigRetriever<C> {
    pub fn new(executor: CommandExecutor<C>, config: RetrievalConfig) -> Self {
        Self { executor, config }
    }

    pub fn executor(&self) -> &CommandExecutor<C> {
        &self.executor
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieves and validates the full configuration of `endpoint`.
    ///
    /// The first strategy whose output validates wins, even if a later one
    /// would produce more. A strategy that errors is logged and skipped,
    /// except for connect failures: an unreachable console is reported at
    /// once instead of being dialled by every strategy.
    pub async fn retrieve(&self, endpoint: &DeviceEndpoint) -> Result<ConfigSnapshot, ConsoleError> {
        let started = Instant::now();
        let matcher = DeviceMatcher::new(self.executor.profile(), &endpoint.name)?;
        let mut reports: Vec<AttemptReport> = Vec::new();

        for &kind in &self.config.strategies {
            if self.executor.is_cancelled() {
                return Err(ConsoleError::Cancelled);
            }
            info!("{} trying {} retrieval", endpoint.name, kind);

            match self.run_strategy(kind, endpoint).await {
                Ok(mut attempt) => {
                    match validate_config(&attempt.config, &self.config.validation, &matcher) {
                        Ok(()) => {
                            attempt.valid = true;
                            let report = attempt.report(AttemptStatus::Accepted);
                            info!(
                                "{} configuration retrieved by {} ({} characters)",
                                endpoint.name, kind, report.output_length
                            );
                            reports.push(report);
                            return Ok(ConfigSnapshot {
                                device: endpoint.name.clone(),
                                sha256: config_digest(&attempt.config),
                                config: attempt.config,
                                strategy: kind,
                                retrieved_at: Utc::now(),
                                elapsed: started.elapsed(),
                                attempts: reports,
                            });
                        }
                        Err(failure) => {
                            warn!("{} {} output rejected: {}", endpoint.name, kind, failure);
                            reports.push(attempt.report(AttemptStatus::Rejected { failure }));
                        }
                    }
                }
                Err(ConsoleError::Cancelled) => return Err(ConsoleError::Cancelled),
                Err(err) if err.is_connect_error() => {
                    warn!("{} unreachable, giving up: {}", endpoint.name, err);
                    return Err(err);
                }
                Err(err) => {
                    warn!("{} {} retrieval failed: {}", endpoint.name, kind, err);
                    reports.push(AttemptReport {
                        strategy: kind,
                        elapsed: Duration::ZERO,
                        output_length: 0,
                        status: AttemptStatus::Failed {
                            error: err.to_string(),
                        },
                    });
                }
            }
        }

        let detail = if reports.is_empty() {
            "no strategies configured".to_string()
        } else {
            reports
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join("; ")
        };
        Err(ConsoleError::RetrievalExhausted {
            device: endpoint.name.clone(),
            detail,
        })
    }

    /// Runs one strategy without validating its output.
    pub async fn run_strategy(
        &self,
        kind: StrategyKind,
        endpoint: &DeviceEndpoint,
    ) -> Result<RetrievalAttempt, ConsoleError> {
        let started = Instant::now();
        let profile = self.executor.profile();
        let command = profile.config_command.clone();

        let result = match kind {
            StrategyKind::Standard => self.full_fetch(endpoint, &[], &command, &self.config.standard).await?,
            StrategyKind::Segmented => {
                let warmups = profile
                    .warmup_sections
                    .iter()
                    .map(|s| profile.section_command_for(s))
                    .collect::<Vec<_>>();
                self.full_fetch(endpoint, &warmups, &command, &self.config.standard)
                    .await?
            }
            StrategyKind::ExtremePatience => {
                self.full_fetch(endpoint, &[], &command, &self.config.extreme_patience)
                    .await?
            }
            StrategyKind::RepeatedAttempt => self.repeated(endpoint, &command).await?,
        };

        Ok(RetrievalAttempt {
            strategy: kind,
            exit: result.exit,
            config: result.clean_output,
            elapsed: started.elapsed(),
            valid: false,
        })
    }

    async fn full_fetch(
        &self,
        endpoint: &DeviceEndpoint,
        warmups: &[String],
        command: &str,
        poll: &PollSettings,
    ) -> Result<CommandResult, ConsoleError> {
        let result = self
            .executor
            .run_in_session(endpoint, warmups, &self.config.section_warmup, command, poll)
            .await?;
        if result.exit == Some(PollExit::Cancelled) {
            return Err(ConsoleError::Cancelled);
        }
        Ok(result)
    }

    /// Keeps the longest output of several attempts, pausing after failures.
    /// A connect failure ends the strategy at once.
    async fn repeated(
        &self,
        endpoint: &DeviceEndpoint,
        command: &str,
    ) -> Result<CommandResult, ConsoleError> {
        let settings = &self.config.repeated;
        let mut best: Option<CommandResult> = None;
        let mut last_error = None;

        for attempt in 1..=settings.attempts {
            if self.executor.is_cancelled() {
                return Err(ConsoleError::Cancelled);
            }
            match self.full_fetch(endpoint, &[], command, &settings.poll).await {
                Ok(result) => {
                    debug!(
                        "{} attempt {}/{} returned {} characters",
                        endpoint.name,
                        attempt,
                        settings.attempts,
                        result.clean_output.chars().count()
                    );
                    if best
                        .as_ref()
                        .is_none_or(|b| {
                            result.clean_output.chars().count() > b.clean_output.chars().count()
                        })
                    {
                        best = Some(result);
                    }
                }
                Err(ConsoleError::Cancelled) => return Err(ConsoleError::Cancelled),
                Err(err) if err.is_connect_error() => return Err(err),
                Err(err) => {
                    warn!(
                        "{} attempt {}/{} failed: {}",
                        endpoint.name, attempt, settings.attempts, err
                    );
                    last_error = Some(err);
                    if attempt < settings.attempts {
                        tokio::time::sleep(settings.cooldown).await;
                    }
                }
            }
        }

        match (best, last_error) {
            (Some(best), _) => Ok(best),
            (None, Some(err)) => Err(err),
            (None, None) => Err(ConsoleError::Internal(
                "repeated strategy configured with zero attempts".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{
        RecordingConnector, ScriptedConnector, ScriptedDevice, SessionEvent, SessionRecorder,
    };
    use crate::templates::{cisco_ios, huawei_vrp};

    fn ios() -> DeviceMatcher {
        DeviceMatcher::new(&cisco_ios(), "R1").expect("compile")
    }

    fn sample_config(lines: usize) -> String {
        let mut text = String::from("version 15.2\nhostname R1\n");
        for i in 0..lines {
            text.push_str(&format!("interface GigabitEthernet0/{i}\n no shutdown\n!\n"));
        }
        text.push_str("end");
        text
    }

    #[test]
    fn short_output_fails_regardless_of_content() {
        let text = "hostname R1\ninterface Gi0/0\n".repeat(2);
        assert!(text.len() <= 60);
        assert!(matches!(
            validate_config(&text, &ValidationRules::default(), &ios()),
            Err(ValidationFailure::TooShort { .. })
        ));
    }

    #[test]
    fn large_complete_config_passes() {
        let mut text = String::from("hostname R1\n");
        while text.len() < 10_000 {
            text.push_str("interface Loopback0\n description filler line\n");
        }
        text.push_str("end");
        assert!(validate_config(&text, &ValidationRules::default(), &ios()).is_ok());
    }

    #[test]
    fn missing_markers_are_reported() {
        let rules = ValidationRules::default();
        let no_identity = format!("{}\nend", "interface Gi0/0\n".repeat(60));
        assert!(matches!(
            validate_config(&no_identity, &rules, &ios()),
            Err(ValidationFailure::MissingIdentity { .. })
        ));

        let no_body = format!("hostname R1\n{}\nend", "ip route 0.0.0.0 0.0.0.0 Null0\n".repeat(30));
        assert!(matches!(
            validate_config(&no_body, &rules, &ios()),
            Err(ValidationFailure::MissingBody { .. })
        ));

        let truncated = sample_config(40).trim_end_matches("end").to_string();
        assert_eq!(validate_config(&truncated, &rules, &ios()), Err(ValidationFailure::Truncated));
    }

    #[test]
    fn trailing_prompt_counts_as_end_marker() {
        let text = format!("{}\nR1#", sample_config(40).trim_end_matches("end"));
        assert!(validate_config(&text, &ValidationRules::default(), &ios()).is_ok());
    }

    #[test]
    fn digest_is_hex_sha256() {
        assert_eq!(
            config_digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    fn retriever(device: ScriptedDevice) -> (ScriptedConnector, ConfigRetriever<ScriptedConnector>) {
        let connector = ScriptedConnector::new().with_device(5001, device);
        let executor = CommandExecutor::new(connector.clone(), cisco_ios(), Duration::from_secs(300));
        (connector, ConfigRetriever::new(executor, RetrievalConfig::default()))
    }

    fn full_output(config: &str) -> String {
        format!("show running-config\r\n{}\r\nR1#", config.replace('\n', "\r\n"))
    }

    #[tokio::test(start_paused = true)]
    async fn standard_strategy_wins_when_valid() {
        let config = sample_config(30);
        let (connector, retriever) = retriever(
            ScriptedDevice::new("R1#").reply("show running-config", [full_output(&config)]),
        );
        let endpoint = DeviceEndpoint::new("R1", "127.0.0.1", 5001);

        let snapshot = retriever.retrieve(&endpoint).await.expect("retrieve");
        assert_eq!(snapshot.strategy, StrategyKind::Standard);
        assert_eq!(snapshot.config, config);
        assert_eq!(snapshot.sha256, config_digest(&config));
        assert_eq!(snapshot.attempts.len(), 1);
        assert_eq!(connector.connect_count(5001), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_strategy_keeps_longest_output() {
        let short = sample_config(5);
        let long = sample_config(25);
        let (connector, retriever) = retriever(
            ScriptedDevice::new("R1#")
                .reply("show running-config", [full_output(&short)])
                .reply("show running-config", [full_output(&long)])
                .reply("show running-config", [full_output(&short)]),
        );
        let endpoint = DeviceEndpoint::new("R1", "127.0.0.1", 5001);

        let attempt = retriever
            .run_strategy(StrategyKind::RepeatedAttempt, &endpoint)
            .await
            .expect("repeated");
        assert_eq!(attempt.config, long);
        assert_eq!(connector.connect_count(5001), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_strategies_report_every_attempt() {
        let (_connector, retriever) = retriever(
            ScriptedDevice::new("R1#").reply("show running-config", ["show running-config\r\nhostname R1\r\nR1#"]),
        );
        let endpoint = DeviceEndpoint::new("R1", "127.0.0.1", 5001);

        let (device, detail) = match retriever.retrieve(&endpoint).await {
            Err(ConsoleError::RetrievalExhausted { device, detail }) => (device, detail),
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(device, "R1");
        for name in ["standard", "segmented", "extreme_patience", "repeated_attempt"] {
            assert!(detail.contains(name), "{detail}");
        }
    }

    #[test]
    fn vrp_section_separator_is_not_an_end_marker() {
        let vrp = DeviceMatcher::new(&huawei_vrp(), "R1").expect("compile");
        let mut text = String::from("!Software Version V200R003C00\n#\nsysname R1\n#\n");
        for i in 0..30 {
            text.push_str(&format!("interface GigabitEthernet0/0/{i}\n undo shutdown\n#\n"));
        }
        let rules = ValidationRules::default();
        assert_eq!(validate_config(&text, &rules, &vrp), Err(ValidationFailure::Truncated));

        assert!(validate_config(&format!("{text}return"), &rules, &vrp).is_ok());
        assert!(validate_config(&format!("{text}<R1>"), &rules, &vrp).is_ok());
    }

    #[test]
    fn reported_length_counts_characters() {
        let attempt = RetrievalAttempt {
            strategy: StrategyKind::Standard,
            config: "hostname Zürich-Ä\ninterface Gi0/0".to_string(),
            elapsed: Duration::ZERO,
            valid: false,
            exit: None,
        };
        let Err(ValidationFailure::TooShort { length, .. }) =
            validate_config(&attempt.config, &ValidationRules::default(), &ios())
        else {
            panic!("short output should be rejected");
        };
        let report = attempt.report(AttemptStatus::Accepted);
        assert_eq!(report.output_length, length);
        assert_eq!(report.output_length, 33);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_device_is_dialled_once() {
        let recorder = SessionRecorder::default();
        let connector = RecordingConnector::new(
            ScriptedConnector::new().with_device(5001, ScriptedDevice::refusing()),
            recorder.clone(),
        );
        let executor = CommandExecutor::new(connector, cisco_ios(), Duration::from_secs(300));
        let retriever = ConfigRetriever::new(executor, RetrievalConfig::default());
        let endpoint = DeviceEndpoint::new("R1", "127.0.0.1", 5001);
        let started = Instant::now();

        let err = retriever.retrieve(&endpoint).await.expect_err("refused");

        assert!(err.is_connect_error());
        let attempts = recorder
            .entries()
            .expect("entries")
            .iter()
            .filter(|e| matches!(e.event, SessionEvent::ConnectFailed { .. }))
            .count();
        assert_eq!(attempts, 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_strategy_stops_on_connect_failure() {
        let (_connector, retriever) = retriever(ScriptedDevice::refusing());
        let endpoint = DeviceEndpoint::new("R1", "127.0.0.1", 5001);
        let started = Instant::now();

        let err = retriever
            .run_strategy(StrategyKind::RepeatedAttempt, &endpoint)
            .await
            .expect_err("refused");
        assert!(err.is_connect_error());
        assert!(started.elapsed() < crate::config::RepeatedAttemptSettings::default().cooldown);
    }
}
