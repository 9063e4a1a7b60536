//! Console sessions and command execution.
//!
//! This module drives interactive CLI sessions over a line-oriented console
//! transport. Consoles give no framing: the end of a command's output is
//! inferred from prompts and end markers, pagination prompts are answered on
//! the fly, and every read loop is bounded by the [`PollSettings`] it runs with.
//!
//! # Main Components
//!
//! - [`Transport`] / [`Connector`] - Byte stream to one console, and its factory
//! - [`TelnetConnector`] - Plain Telnet transport used against real consoles
//! - [`Session`] - One open console with initializer and polling routine
//! - [`CommandExecutor`] - Runs one command per session, with a [`ResultCache`]
//! - [`SessionRecorder`] / [`ReplayConnector`] - Offline recordings of sessions
//! - `ScriptedConnector` - Deterministic mock consoles for tests (feature `testing`)

use chrono::{DateTime, Utc};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{InitTiming, PollSettings};
use crate::device::{DeviceEndpoint, DeviceMatcher};
use crate::error::ConsoleError;
use crate::sanitize::sanitize;
use crate::templates::DeviceProfile;

pub use cache::{CacheKey, ResultCache};
pub use client::Session;
pub use manager::CommandExecutor;
pub use recording::{
    NormalizeOptions, RecordingConnector, RecordingTransport, ReplayConnector, ReplayTransport,
    SessionEvent, SessionRecordEntry, SessionRecordLevel, SessionRecorder,
};
#[cfg(any(test, feature = "testing"))]
pub use scripted::{ScriptedConnector, ScriptedDevice, ScriptedTransport};
pub use transport::{Connector, TelnetConnector, TelnetTransport, Transport};

/// Why a poll loop stopped reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollExit {
    /// A completion marker was seen.
    Completed,
    /// Enough empty reads and enough silence since the last data.
    Idle,
    /// The overall deadline expired.
    Deadline,
    /// The caller cancelled the operation.
    Cancelled,
    /// The peer closed the connection after sending some output.
    Disconnected,
}

/// Raw result of one poll loop.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    /// Everything received, decoded as text, pagination prompts included.
    pub raw: String,
    pub exit: PollExit,
    /// Number of non-empty reads.
    pub chunks: usize,
    /// Number of pagination prompts answered.
    pub pages: usize,
    pub elapsed: Duration,
}

impl PollOutcome {
    pub fn completed(&self) -> bool {
        self.exit == PollExit::Completed
    }
}

/// The result of executing one command on one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub command: String,
    /// Unprocessed output decoded as text.
    pub raw_output: String,
    /// Output without echo, prompts and pager artifacts. Holds the error
    /// message when `success` is false.
    pub clean_output: String,
    pub success: bool,
    /// True when a completion marker ended the read loop.
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub exit: Option<PollExit>,
    pub timestamp: DateTime<Utc>,
    pub raw_length: usize,
}

impl CommandResult {
    /// Builds a successful result from a finished poll loop.
    pub fn from_outcome(command: &str, outcome: PollOutcome, clean_output: String) -> Self {
        Self {
            command: command.to_string(),
            raw_length: outcome.raw.len(),
            completed: outcome.completed(),
            exit: Some(outcome.exit),
            raw_output: outcome.raw,
            clean_output,
            success: true,
            timestamp: Utc::now(),
        }
    }

    /// Builds a failed result carrying the error message as output.
    pub fn failed(command: &str, err: &ConsoleError) -> Self {
        Self {
            command: command.to_string(),
            raw_output: String::new(),
            clean_output: err.to_string(),
            success: false,
            completed: false,
            exit: None,
            timestamp: Utc::now(),
            raw_length: 0,
        }
    }

    /// Cancelled partial output is kept out of the cache.
    pub fn is_cacheable(&self) -> bool {
        self.success && self.exit != Some(PollExit::Cancelled)
    }
}

mod cache;
mod client;
mod manager;
mod recording;
#[cfg(any(test, feature = "testing"))]
mod scripted;
mod telnet;
mod transport;
