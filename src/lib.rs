//! # rconsole - Console Scraping for Virtual Lab Devices
//!
//! `rconsole` drives the Telnet consoles of emulated routers and switches
//! (GNS3-style labs) and turns their unframed CLI output into clean text.
//! Consoles give no message boundaries, paginate long output and are often
//! slow, so every read loop is bounded and the end of a command is inferred
//! from prompts and end markers.
//!
//! ## Features
//!
//! - **Completion detection**: prompt and end-marker matching across read chunks
//! - **Pagination**: `--More--` style prompts are answered automatically
//! - **Sanitization**: echo, prompts and pager artifacts removed from output
//! - **Result cache**: TTL-bounded per device and command
//! - **Resilient retrieval**: ordered strategies with validation of the result
//! - **Batch retrieval**: sequential or bounded-parallel, one session per console
//! - **Recording/replay**: JSONL session recordings for offline regression tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rconsole::config::ConsoleConfig;
//! use rconsole::console::ConsoleClient;
//! use rconsole::inventory::{Inventory, parse_nodes};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConsoleConfig::from_env();
//!     let nodes = parse_nodes(r#"[{"name": "R-1", "console": 5004, "status": "started", "node_type": "dynamips"}]"#)?;
//!     let (inventory, _skipped) = Inventory::from_nodes(&nodes, &config.telnet_host);
//!
//!     let client = ConsoleClient::new(config, inventory)?;
//!     let snapshot = client.retrieve_full_config("R-1").await?;
//!     println!("{} ({} via {})", snapshot.device, snapshot.sha256, snapshot.strategy);
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`console::ConsoleClient`] - Name-based facade over everything below
//! - [`session::CommandExecutor`] - One command per console session, cached
//! - [`retrieval::ConfigRetriever`] - Strategy fallback for full configurations
//! - [`batch::BatchOrchestrator`] - Many devices, failures isolated per device
//! - [`error::ConsoleError`] - Error type of every fallible operation

pub mod batch;
pub mod config;
pub mod console;
pub mod device;
pub mod error;
pub mod inventory;
pub mod persist;
pub mod retrieval;
pub mod sanitize;
pub mod session;
pub mod templates;
