//! Error types for console sessions and configuration retrieval.
//!
//! This module defines all errors that can occur while connecting to a device
//! console, running commands, retrieving configurations and persisting them.
//! Slow or silent devices are not errors: poll loops report them through
//! [`crate::session::PollExit`] instead.

use thiserror::Error;

/// Errors that can occur during console sessions and retrieval.
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// The console endpoint refused or failed the TCP connection.
    #[error("connect to {addr} failed: {reason}")]
    Connect { addr: String, reason: String },

    /// The TCP connection was not established within the connect timeout.
    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    /// The peer closed the console connection.
    ///
    /// Virtual consoles drop the connection when the node is stopped or when
    /// another client takes over the console line.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// An I/O error occurred on an open connection.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A device profile contains a pattern that does not compile.
    #[error("invalid device profile config: {0}")]
    InvalidProfileConfig(String),

    /// No built-in device profile has the requested name.
    #[error("device profile not found: {0}")]
    ProfileNotFound(String),

    /// The device name is not present in the inventory.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// The command was rejected before being sent to a device.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Inventory data could not be decoded.
    #[error("inventory decode error: {0}")]
    InventoryDecode(#[from] serde_json::Error),

    /// Every retrieval strategy failed or produced an invalid configuration.
    #[error("all retrieval strategies failed for {device}: {detail}")]
    RetrievalExhausted { device: String, detail: String },

    /// A configuration artifact could not be written.
    #[error("persist error: {0}")]
    Persist(String),

    /// A replayed session diverged from its recording.
    #[error("replay mismatch: {0}")]
    ReplayMismatch(String),

    /// The operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// An internal invariant failed (poisoned lock, encoder failure).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ConsoleError {
    /// Returns true for failures to establish the console connection.
    pub fn is_connect_error(&self) -> bool {
        matches!(
            self,
            ConsoleError::Connect { .. } | ConsoleError::ConnectTimeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::ConsoleError;

    #[test]
    fn connect_errors_are_classified() {
        let refused = ConsoleError::Connect {
            addr: "127.0.0.1:5004".to_string(),
            reason: "connection refused".to_string(),
        };
        assert!(refused.is_connect_error());
        assert!(ConsoleError::ConnectTimeout("127.0.0.1:5004".to_string()).is_connect_error());
        assert!(!ConsoleError::ConnectionClosed.is_connect_error());
    }

    #[test]
    fn messages_name_the_endpoint() {
        let err = ConsoleError::Connect {
            addr: "10.0.0.1:5006".to_string(),
            reason: "refused".to_string(),
        };
        assert_eq!(err.to_string(), "connect to 10.0.0.1:5006 failed: refused");
    }
}
