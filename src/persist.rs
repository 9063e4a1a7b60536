//! Configuration artifact files.
//!
//! One plain-text file per device and run:
//!
//! ```text
//! Device: R-1
//! Retrieved: 2024-05-01 12:00:00 UTC
//! Strategy: standard
//! SHA256: 3f1c...
//! ==================================================
//! <configuration>
//! ```

use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

use crate::batch::{BatchArtifact, BatchResult};
use crate::error::ConsoleError;
use crate::retrieval::ConfigSnapshot;

const RULE_WIDTH: usize = 50;

/// File name of a snapshot: `<device>_<YYYYmmdd_HHMMSS>.txt`.
pub fn artifact_file_name(snapshot: &ConfigSnapshot) -> String {
    format!(
        "{}_{}.txt",
        safe_name(&snapshot.device),
        snapshot.retrieved_at.format("%Y%m%d_%H%M%S")
    )
}

/// Header lines followed by the configuration.
pub fn render_config(snapshot: &ConfigSnapshot) -> String {
    let mut out = String::with_capacity(snapshot.config.len() + 200);
    out.push_str(&format!("Device: {}\n", snapshot.device));
    out.push_str(&format!(
        "Retrieved: {}\n",
        snapshot.retrieved_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!("Strategy: {}\n", snapshot.strategy));
    out.push_str(&format!("SHA256: {}\n", snapshot.sha256));
    out.push_str(&"=".repeat(RULE_WIDTH));
    out.push('\n');
    out.push_str(&snapshot.config);
    if !snapshot.config.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Writes `snapshot` under `dir`, creating the directory if needed.
pub fn save_config(dir: &Path, snapshot: &ConfigSnapshot) -> Result<PathBuf, ConsoleError> {
    fs::create_dir_all(dir)
        .map_err(|e| ConsoleError::Persist(format!("create {}: {e}", dir.display())))?;
    let path = dir.join(artifact_file_name(snapshot));
    fs::write(&path, render_config(snapshot))
        .map_err(|e| ConsoleError::Persist(format!("write {}: {e}", path.display())))?;
    debug!("saved configuration of {} to {}", snapshot.device, path.display());
    Ok(path)
}

/// Writes every retrieved configuration of a batch under `dir/<project>/`.
///
/// Failed devices and plain command results are not written.
pub fn save_batch(dir: &Path, project: &str, batch: &BatchResult) -> Result<Vec<PathBuf>, ConsoleError> {
    let target = dir.join(safe_name(project));
    let mut written = Vec::new();
    for entry in batch.entries() {
        if let Ok(BatchArtifact::Config(snapshot)) = &entry.outcome {
            written.push(save_config(&target, snapshot)?);
        }
    }
    info!(
        "saved {} of {} configurations to {}",
        written.len(),
        batch.len(),
        target.display()
    );
    Ok(written)
}

/// Replaces characters that are unsafe in file names.
fn safe_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "device".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchEntry, DeviceFailure, FailureKind};
    use crate::config::StrategyKind;
    use crate::retrieval::config_digest;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn snapshot(device: &str) -> ConfigSnapshot {
        let config = "hostname R1\ninterface Gi0/0\nend".to_string();
        ConfigSnapshot {
            device: device.to_string(),
            sha256: config_digest(&config),
            config,
            strategy: StrategyKind::Segmented,
            retrieved_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 5).unwrap(),
            elapsed: Duration::from_secs(12),
            attempts: Vec::new(),
        }
    }

    #[test]
    fn file_name_uses_device_and_timestamp() {
        assert_eq!(artifact_file_name(&snapshot("R-1")), "R-1_20240501_123005.txt");
        assert_eq!(artifact_file_name(&snapshot("core/sw 1")), "core_sw_1_20240501_123005.txt");
        assert_eq!(safe_name(".."), "device");
    }

    #[test]
    fn rendered_artifact_has_header_and_config() {
        let text = render_config(&snapshot("R-1"));
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "Device: R-1");
        assert_eq!(lines[1], "Retrieved: 2024-05-01 12:30:05 UTC");
        assert_eq!(lines[2], "Strategy: segmented");
        assert!(lines[3].starts_with("SHA256: ") && lines[3].len() == 8 + 64);
        assert_eq!(lines[4], "=".repeat(50));
        assert_eq!(&lines[5..], &["hostname R1", "interface Gi0/0", "end"]);
    }

    #[test]
    fn save_batch_writes_successful_configs_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let batch = BatchResult::new(vec![
            BatchEntry {
                device: "R-1".to_string(),
                outcome: Ok(BatchArtifact::Config(snapshot("R-1"))),
            },
            BatchEntry {
                device: "R-2".to_string(),
                outcome: Err(DeviceFailure {
                    kind: FailureKind::Connect,
                    reason: "connection refused".to_string(),
                }),
            },
        ]);

        let written = save_batch(dir.path(), "lab one", &batch).expect("save");
        assert_eq!(written.len(), 1);
        assert!(written[0].starts_with(dir.path().join("lab_one")));
        let content = std::fs::read_to_string(&written[0]).expect("read back");
        assert!(content.starts_with("Device: R-1\n"));
        assert!(content.ends_with("end\n"));
    }
}
