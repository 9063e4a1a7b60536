//! Caller-facing console API.
//!
//! [`ConsoleClient`] resolves device names through an [`Inventory`] and
//! wires the command executor, the retrieval strategies and the batch
//! orchestrator from one [`ConsoleConfig`].
//!
//! ```rust,no_run
//! use rconsole::config::ConsoleConfig;
//! use rconsole::console::ConsoleClient;
//! use rconsole::device::DeviceEndpoint;
//! use rconsole::inventory::Inventory;
//!
//! # async fn run() -> Result<(), rconsole::error::ConsoleError> {
//! let config = ConsoleConfig::from_env();
//! let inventory = Inventory::new(vec![DeviceEndpoint::new("R-1", &config.telnet_host, 5004)]);
//! let client = ConsoleClient::new(config, inventory)?;
//!
//! let result = client.execute_command("R-1", "show version").await;
//! println!("{}", result.clean_output);
//! # Ok(())
//! # }
//! ```

use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::batch::{BatchEntry, BatchJob, BatchOrchestrator, BatchResult};
use crate::config::ConsoleConfig;
use crate::device::DeviceEndpoint;
use crate::error::ConsoleError;
use crate::inventory::Inventory;
use crate::retrieval::{ConfigRetriever, ConfigSnapshot};
use crate::session::{CommandExecutor, CommandResult, Connector, SessionRecorder, TelnetConnector};
use crate::templates::{self, DeviceProfile};
use tokio_util::sync::CancellationToken;

/// Commands to run on one device, as issued by an assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CommandRequest {
    /// Device name as listed in the inventory.
    pub device_name: String,
    /// Read-only commands, executed in order.
    pub commands: Vec<String>,
}

/// Console access to the devices of one inventory.
pub struct ConsoleClient<C: Connector = TelnetConnector> {
    config: ConsoleConfig,
    inventory: Inventory,
    executor: CommandExecutor<C>,
}

impl ConsoleClient<TelnetConnector> {
    /// Client speaking Telnet to real consoles.
    pub fn new(config: ConsoleConfig, inventory: Inventory) -> Result<Self, ConsoleError> {
        Self::with_connector(config, inventory, TelnetConnector)
    }
}

impl<C: Connector> ConsoleClient<C> {
    /// Client using `connector`, with the profile named by `config.profile`.
    pub fn with_connector(
        config: ConsoleConfig,
        inventory: Inventory,
        connector: C,
    ) -> Result<Self, ConsoleError> {
        let profile = templates::profile(&config.profile)?;
        let executor = CommandExecutor::new(connector, profile, config.cache_ttl)
            .with_connect_timeout(config.connect_timeout)
            .with_init(config.init)
            .with_poll(config.command);
        Ok(Self {
            config,
            inventory,
            executor,
        })
    }

    /// Replaces the device profile, e.g. one extended with lab prompts.
    pub fn with_profile(mut self, profile: DeviceProfile) -> Self {
        self.executor = self.executor.with_profile(profile);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.executor = self.executor.with_cancellation(token);
        self
    }

    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.executor = self.executor.with_recorder(recorder);
        self
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn executor(&self) -> &CommandExecutor<C> {
        &self.executor
    }

    pub fn retriever(&self) -> ConfigRetriever<C> {
        ConfigRetriever::new(self.executor.clone(), self.config.retrieval.clone())
    }

    pub fn orchestrator(&self) -> BatchOrchestrator<C> {
        BatchOrchestrator::new(self.retriever(), self.config.batch)
    }

    /// Runs `command` on `device_name`. Failures come back as a result with
    /// `success == false` and the reason as output.
    pub async fn execute_command(&self, device_name: &str, command: &str) -> CommandResult {
        match self.try_execute_command(device_name, command).await {
            Ok(result) => result,
            Err(err) => CommandResult::failed(command, &err),
        }
    }

    pub async fn try_execute_command(
        &self,
        device_name: &str,
        command: &str,
    ) -> Result<CommandResult, ConsoleError> {
        let endpoint = self.inventory.resolve(device_name)?;
        self.executor.execute(endpoint, command).await
    }

    /// Validates and runs every command of `request`, pausing between them.
    ///
    /// A rejected command yields a failed result and is not sent.
    pub async fn execute_request(&self, request: &CommandRequest) -> Vec<CommandResult> {
        let mut results = Vec::with_capacity(request.commands.len());
        for (index, command) in request.commands.iter().enumerate() {
            if let Err(err) = templates::validate_read_only_command(command) {
                debug!("rejected '{}' for {}: {}", command, request.device_name, err);
                results.push(CommandResult::failed(command, &err));
                continue;
            }
            if index > 0 && !self.config.command_spacing.is_zero() {
                tokio::time::sleep(self.config.command_spacing).await;
            }
            results.push(self.execute_command(&request.device_name, command).await);
        }
        results
    }

    /// Retrieves and validates the full configuration of one device.
    pub async fn retrieve_full_config(&self, device_name: &str) -> Result<ConfigSnapshot, ConsoleError> {
        let endpoint = self.inventory.resolve(device_name)?;
        self.retriever().retrieve(endpoint).await
    }

    /// Retrieves the configurations of `device_names`, in order.
    ///
    /// Names missing from the inventory get a `NotFound` entry.
    pub async fn retrieve_batch(&self, device_names: &[&str]) -> BatchResult {
        let mut known: Vec<DeviceEndpoint> = Vec::new();
        let mut slots: Vec<Option<BatchEntry>> = Vec::with_capacity(device_names.len());
        for name in device_names {
            match self.inventory.resolve(name) {
                Ok(endpoint) => {
                    known.push(endpoint.clone());
                    slots.push(None);
                }
                Err(err) => slots.push(Some(BatchEntry::failed(name, &err))),
            }
        }

        let mut retrieved = self
            .orchestrator()
            .retrieve_all(&known, &BatchJob::FullConfig)
            .await
            .into_entries()
            .into_iter();
        let entries = slots
            .into_iter()
            .filter_map(|slot| slot.or_else(|| retrieved.next()))
            .collect();
        BatchResult::new(entries)
    }

    /// Retrieves the configuration of every inventory device.
    pub async fn retrieve_all_configs(&self) -> BatchResult {
        info!("retrieving configurations of {} devices", self.inventory.len());
        self.orchestrator()
            .retrieve_all(self.inventory.devices(), &BatchJob::FullConfig)
            .await
    }

    pub async fn clear_cache(&self) {
        self.executor.cache().clear();
    }
}
