//! Retrieves the configuration of lab devices and writes one file per device.
//!
//! ```text
//! TELNET_HOST=192.168.56.101 cargo run --example fetch_config -- nodes.json configs/ [--record session.jsonl]
//! ```
//!
//! `nodes.json` is the node list of a project as returned by the topology API.
//! Files land in `<output-dir>/<PROJECT_NAME>/` (`lab` when unset).

use anyhow::{Context, Result, bail};
use rconsole::config::ConsoleConfig;
use rconsole::console::ConsoleClient;
use rconsole::inventory::{Inventory, parse_nodes};
use rconsole::persist::save_batch;
use rconsole::session::{RecordingConnector, SessionRecordLevel, SessionRecorder, TelnetConnector};
use std::env;
use std::fs;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        bail!("usage: fetch_config <nodes.json> <output-dir> [--record <session.jsonl>]");
    }
    let nodes_path = &args[1];
    let output_dir = PathBuf::from(&args[2]);
    let record_path = match args.get(3).map(String::as_str) {
        Some("--record") => Some(args.get(4).context("--record needs a file name")?.clone()),
        Some(other) => bail!("unknown argument '{other}'"),
        None => None,
    };

    let config = ConsoleConfig::from_env();
    let json = fs::read_to_string(nodes_path).with_context(|| format!("read {nodes_path}"))?;
    let nodes = parse_nodes(&json)?;
    let (inventory, skipped) = Inventory::from_nodes(&nodes, &config.telnet_host);
    for node in &skipped {
        println!("skip {:<16} {}", node.name, node.reason);
    }
    if inventory.is_empty() {
        bail!("no configurable running nodes in {nodes_path}");
    }

    let recorder = SessionRecorder::new(SessionRecordLevel::Full);
    let connector = RecordingConnector::new(TelnetConnector, recorder.clone());
    let client = ConsoleClient::with_connector(config, inventory, connector)?;

    let project = env::var("PROJECT_NAME").unwrap_or_else(|_| "lab".to_string());
    let result = client.retrieve_all_configs().await;
    let written = save_batch(&output_dir, &project, &result)?;

    for path in &written {
        println!("saved {}", path.display());
    }
    for (device, failure) in result.failures() {
        println!("failed {device}: {}", failure.reason);
    }

    if let Some(path) = record_path {
        fs::write(&path, recorder.to_jsonl()?).with_context(|| format!("write {path}"))?;
        println!("session recording written to {path}");
    }
    Ok(())
}
