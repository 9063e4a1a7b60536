//! Fan-out of retrievals across many devices.
//!
//! Devices are processed in input order, one at a time with a pause between
//! them. With `max_concurrent > 1` devices run on separate tasks under a
//! global cap; endpoints sharing a host and port stay on one task so no two
//! sessions ever target the same console. A device failure is recorded in
//! its entry and never aborts the batch.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::BatchOptions;
use crate::device::DeviceEndpoint;
use crate::error::ConsoleError;
use crate::retrieval::{ConfigRetriever, ConfigSnapshot};
use crate::session::{CommandResult, Connector};

/// What to fetch from each device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", content = "command", rename_all = "snake_case")]
pub enum BatchJob {
    /// Full configuration through the retrieval strategies.
    FullConfig,
    /// One command through the command executor.
    Command(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum BatchArtifact {
    Command(CommandResult),
    Config(ConfigSnapshot),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Connect,
    RetrievalExhausted,
    Cancelled,
    NotFound,
    Other,
}

impl From<&ConsoleError> for FailureKind {
    fn from(err: &ConsoleError) -> Self {
        match err {
            e if e.is_connect_error() => FailureKind::Connect,
            ConsoleError::RetrievalExhausted { .. } => FailureKind::RetrievalExhausted,
            ConsoleError::Cancelled => FailureKind::Cancelled,
            ConsoleError::DeviceNotFound(_) => FailureKind::NotFound,
            _ => FailureKind::Other,
        }
    }
}

/// Failure marker of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl From<&ConsoleError> for DeviceFailure {
    fn from(err: &ConsoleError) -> Self {
        Self {
            kind: err.into(),
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub device: String,
    pub outcome: Result<BatchArtifact, DeviceFailure>,
}

impl BatchEntry {
    pub fn failed(device: &str, err: &ConsoleError) -> Self {
        Self {
            device: device.to_string(),
            outcome: Err(err.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Per-device outcomes in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    entries: Vec<BatchEntry>,
}

impl BatchResult {
    pub fn new(entries: Vec<BatchEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<BatchEntry> {
        self.entries
    }

    /// Entry of the first device called `device`.
    pub fn get(&self, device: &str) -> Option<&BatchEntry> {
        self.entries.iter().find(|e| e.device == device)
    }

    pub fn successes(&self) -> impl Iterator<Item = (&str, &BatchArtifact)> {
        self.entries
            .iter()
            .filter_map(|e| e.outcome.as_ref().ok().map(|a| (e.device.as_str(), a)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &DeviceFailure)> {
        self.entries
            .iter()
            .filter_map(|e| e.outcome.as_ref().err().map(|f| (e.device.as_str(), f)))
    }

    pub fn success_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.entries.len() - self.success_count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Runs a [`BatchJob`] over many endpoints.
pub struct BatchOrchestrator<C: Connector> {
    retriever: ConfigRetriever<C>,
    options: BatchOptions,
}

impl<C: Connector> Clone for BatchOrchestrator<C> {
    fn clone(&self) -> Self {
        Self {
            retriever: self.retriever.clone(),
            options: self.options,
        }
    }
}

impl<C: Connector> BatchOrchestrator<C> {
    pub fn new(retriever: ConfigRetriever<C>, options: BatchOptions) -> Self {
        Self { retriever, options }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Runs `job` on every endpoint. Never fails as a whole.
    pub async fn retrieve_all(&self, endpoints: &[DeviceEndpoint], job: &BatchJob) -> BatchResult {
        info!(
            "batch of {} devices started ({:?}, max {} concurrent)",
            endpoints.len(),
            job,
            self.options.max_concurrent.max(1)
        );
        let result = if self.options.max_concurrent > 1 && endpoints.len() > 1 {
            self.run_parallel(endpoints, job).await
        } else {
            self.run_sequential(endpoints, job).await
        };
        info!(
            "batch finished: {} succeeded, {} failed",
            result.success_count(),
            result.failure_count()
        );
        result
    }

    async fn run_sequential(&self, endpoints: &[DeviceEndpoint], job: &BatchJob) -> BatchResult {
        let mut entries = Vec::with_capacity(endpoints.len());
        for (index, endpoint) in endpoints.iter().enumerate() {
            if index > 0 && !self.pause().await {
                entries.push(BatchEntry::failed(&endpoint.name, &ConsoleError::Cancelled));
                continue;
            }
            entries.push(self.run_one(endpoint, job).await);
        }
        BatchResult::new(entries)
    }

    async fn run_parallel(&self, endpoints: &[DeviceEndpoint], job: &BatchJob) -> BatchResult {
        // One group per console endpoint, in order of first appearance.
        let mut groups: Vec<Vec<(usize, DeviceEndpoint)>> = Vec::new();
        let mut group_of: HashMap<(String, u16), usize> = HashMap::new();
        for (index, endpoint) in endpoints.iter().enumerate() {
            let key = (endpoint.host.clone(), endpoint.port);
            let group = *group_of.entry(key).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[group].push((index, endpoint.clone()));
        }

        let permits = Arc::new(Semaphore::new(self.options.max_concurrent));
        let mut tasks = JoinSet::new();
        for group in groups {
            let worker = self.clone();
            let permits = permits.clone();
            let job = job.clone();
            tasks.spawn(async move {
                let mut done = Vec::with_capacity(group.len());
                let Ok(_permit) = permits.acquire_owned().await else {
                    for (index, endpoint) in group {
                        done.push((
                            index,
                            BatchEntry::failed(
                                &endpoint.name,
                                &ConsoleError::Internal("batch semaphore closed".to_string()),
                            ),
                        ));
                    }
                    return done;
                };
                for (position, (index, endpoint)) in group.into_iter().enumerate() {
                    if position > 0 && !worker.pause().await {
                        done.push((index, BatchEntry::failed(&endpoint.name, &ConsoleError::Cancelled)));
                        continue;
                    }
                    done.push((index, worker.run_one(&endpoint, &job).await));
                }
                done
            });
        }

        let mut slots: Vec<Option<BatchEntry>> = vec![None; endpoints.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(done) => {
                    for (index, entry) in done {
                        slots[index] = Some(entry);
                    }
                }
                Err(err) => warn!("batch worker task failed: {}", err),
            }
        }

        let entries = slots
            .into_iter()
            .zip(endpoints)
            .map(|(slot, endpoint)| {
                slot.unwrap_or_else(|| {
                    BatchEntry::failed(
                        &endpoint.name,
                        &ConsoleError::Internal("batch worker task failed".to_string()),
                    )
                })
            })
            .collect();
        BatchResult::new(entries)
    }

    async fn run_one(&self, endpoint: &DeviceEndpoint, job: &BatchJob) -> BatchEntry {
        let executor = self.retriever.executor();
        if executor.is_cancelled() {
            return BatchEntry::failed(&endpoint.name, &ConsoleError::Cancelled);
        }
        let outcome = match job {
            BatchJob::FullConfig => self
                .retriever
                .retrieve(endpoint)
                .await
                .map(BatchArtifact::Config),
            BatchJob::Command(command) => executor
                .execute(endpoint, command)
                .await
                .map(BatchArtifact::Command),
        };
        match outcome {
            Ok(artifact) => {
                info!("{} done", endpoint.name);
                BatchEntry {
                    device: endpoint.name.clone(),
                    outcome: Ok(artifact),
                }
            }
            Err(err) => {
                warn!("{} failed: {}", endpoint.name, err);
                BatchEntry::failed(&endpoint.name, &err)
            }
        }
    }

    /// Sleeps the inter-device pause. Returns false when cancelled.
    async fn pause(&self) -> bool {
        let pause = self.options.pause_between_devices;
        match self.retriever.executor().cancellation() {
            Some(token) => {
                if token.is_cancelled() {
                    return false;
                }
                tokio::select! {
                    _ = token.cancelled() => false,
                    _ = tokio::time::sleep(pause) => true,
                }
            }
            None => {
                tokio::time::sleep(pause).await;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::session::{CommandExecutor, ScriptedConnector, ScriptedDevice};
    use crate::templates::cisco_ios;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn orchestrator(
        connector: ScriptedConnector,
        options: BatchOptions,
        cancel: Option<CancellationToken>,
    ) -> BatchOrchestrator<ScriptedConnector> {
        let mut executor = CommandExecutor::new(connector, cisco_ios(), Duration::from_secs(300));
        if let Some(token) = cancel {
            executor = executor.with_cancellation(token);
        }
        BatchOrchestrator::new(ConfigRetriever::new(executor, RetrievalConfig::default()), options)
    }

    fn devices() -> (ScriptedConnector, Vec<DeviceEndpoint>) {
        let connector = ScriptedConnector::new()
            .with_device(5001, ScriptedDevice::new("R1#"))
            .with_device(5002, ScriptedDevice::refusing())
            .with_device(5003, ScriptedDevice::new("R3#"));
        let endpoints = (1..=3)
            .map(|i| DeviceEndpoint::new(format!("R{i}"), "127.0.0.1", 5000 + i))
            .collect();
        (connector, endpoints)
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_batch_pauses_between_devices() {
        let (connector, endpoints) = devices();
        let batch = orchestrator(connector, BatchOptions::default(), None);
        let started = tokio::time::Instant::now();

        let result = batch
            .retrieve_all(&endpoints, &BatchJob::Command("show clock".to_string()))
            .await;

        assert_eq!(result.len(), 3);
        assert_eq!(result.success_count(), 2);
        let (name, failure) = result.failures().next().expect("one failure");
        assert_eq!(name, "R2");
        assert_eq!(failure.kind, FailureKind::Connect);
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_batch_keeps_input_order() {
        let (connector, mut endpoints) = devices();
        // Same console twice: both run on one worker, one after the other.
        endpoints.push(DeviceEndpoint::new("R1", "127.0.0.1", 5001));
        let options = BatchOptions {
            pause_between_devices: Duration::from_millis(100),
            max_concurrent: 3,
        };
        let batch = orchestrator(connector.clone(), options, None);

        let result = batch
            .retrieve_all(&endpoints, &BatchJob::Command("show clock".to_string()))
            .await;

        let names: Vec<_> = result.entries().iter().map(|e| e.device.as_str()).collect();
        assert_eq!(names, vec!["R1", "R2", "R3", "R1"]);
        assert!(result.get("R2").is_some_and(|e| !e.is_success()));
        assert!(result.entries()[3].is_success());
        // The second run on the same console is answered from the cache.
        assert_eq!(connector.connect_count(5001), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_batch_marks_remaining_devices() {
        let (connector, endpoints) = devices();
        let token = CancellationToken::new();
        let batch = orchestrator(connector.clone(), BatchOptions::default(), Some(token.clone()));
        token.cancel();

        let result = batch.retrieve_all(&endpoints, &BatchJob::FullConfig).await;
        assert_eq!(result.failure_count(), 3);
        assert!(result
            .failures()
            .all(|(_, f)| f.kind == FailureKind::Cancelled));
        assert_eq!(connector.connect_count(5001), 0);
    }
}
