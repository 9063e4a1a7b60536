//! Lab inventory: which nodes have a console worth scraping.
//!
//! Node descriptors come from the topology API as JSON. Only running nodes
//! with a console port and a configurable node type become
//! [`DeviceEndpoint`]s; everything else is reported as skipped.

use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::device::DeviceEndpoint;
use crate::error::ConsoleError;

/// Node types without a configurable CLI.
pub const NON_CONFIGURABLE_TYPES: &[&str] = &[
    "ethernet_switch",
    "ethernet_hub",
    "frame_relay_switch",
    "atm_switch",
    "cloud",
    "nat",
    "builtin",
];

/// Node types known to expose a router or switch CLI on their console.
pub const CONFIGURABLE_TYPES: &[&str] = &["dynamips", "qemu", "vpcs", "iou", "docker"];

/// Status of a running node.
pub const RUNNING_STATUS: &str = "started";

/// One node as reported by the topology API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InventoryNode {
    pub name: String,
    /// Console TCP port.
    #[serde(default)]
    pub console: Option<u16>,
    /// Console host, when the API reports one.
    #[serde(default)]
    pub console_host: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub node_type: Option<String>,
    /// Short form used by some API versions.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl InventoryNode {
    /// Node type from whichever field the API filled in.
    pub fn node_type(&self) -> Option<&str> {
        self.node_type.as_deref().or(self.kind.as_deref())
    }
}

/// Why a node was not turned into an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    NonConfigurableType { node_type: String },
    NotRunning { status: String },
    NoConsole,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NonConfigurableType { node_type } => {
                write!(f, "node type '{node_type}' has no configurable CLI")
            }
            SkipReason::NotRunning { status } => write!(f, "node is not running (status '{status}')"),
            SkipReason::NoConsole => f.write_str("node has no console port"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SkippedNode {
    pub name: String,
    pub reason: SkipReason,
}

/// Eligible endpoints and the nodes left out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteredInventory {
    pub devices: Vec<DeviceEndpoint>,
    pub skipped: Vec<SkippedNode>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NodeList {
    Bare(Vec<InventoryNode>),
    Wrapped { nodes: Vec<InventoryNode> },
}

/// Decodes a node list, either a bare array or `{"nodes": [...]}`.
pub fn parse_nodes(json: &str) -> Result<Vec<InventoryNode>, ConsoleError> {
    let list: NodeList = serde_json::from_str(json)?;
    Ok(match list {
        NodeList::Bare(nodes) | NodeList::Wrapped { nodes } => nodes,
    })
}

/// Keeps running nodes with a console and a configurable type.
///
/// Unknown node types are kept and logged. `default_host` is used when a
/// node reports no console host or a wildcard bind address.
pub fn filter_configurable(nodes: &[InventoryNode], default_host: &str) -> FilteredInventory {
    let mut filtered = FilteredInventory::default();

    for node in nodes {
        let reason = match (node.node_type(), node.console) {
            (Some(t), _) if NON_CONFIGURABLE_TYPES.contains(&t) => {
                Some(SkipReason::NonConfigurableType {
                    node_type: t.to_string(),
                })
            }
            _ if !node.status.eq_ignore_ascii_case(RUNNING_STATUS) => Some(SkipReason::NotRunning {
                status: node.status.clone(),
            }),
            (_, None) => Some(SkipReason::NoConsole),
            _ => None,
        };
        if let Some(reason) = reason {
            debug!("skipping node {}: {}", node.name, reason);
            filtered.skipped.push(SkippedNode {
                name: node.name.clone(),
                reason,
            });
            continue;
        }

        let Some(port) = node.console else {
            continue;
        };
        if let Some(t) = node.node_type()
            && !CONFIGURABLE_TYPES.contains(&t)
        {
            info!("node {} has unknown type '{}', attempting anyway", node.name, t);
        }

        let host = match node.console_host.as_deref().map(str::trim) {
            Some(h) if !h.is_empty() && h != "0.0.0.0" && h != "::" => h.to_string(),
            _ => default_host.to_string(),
        };
        let mut endpoint = DeviceEndpoint::new(node.name.clone(), host, port);
        if let Some(t) = node.node_type() {
            endpoint = endpoint.with_type_hint(t);
        }
        filtered.devices.push(endpoint);
    }

    filtered
}

/// Device endpoints addressable by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    devices: Vec<DeviceEndpoint>,
}

impl Inventory {
    pub fn new(devices: Vec<DeviceEndpoint>) -> Self {
        Self { devices }
    }

    /// Builds an inventory from the eligible nodes of a topology.
    pub fn from_nodes(nodes: &[InventoryNode], default_host: &str) -> (Self, Vec<SkippedNode>) {
        let filtered = filter_configurable(nodes, default_host);
        (Self::new(filtered.devices), filtered.skipped)
    }

    pub fn get(&self, name: &str) -> Option<&DeviceEndpoint> {
        self.devices.iter().find(|d| d.name == name)
    }

    pub fn resolve(&self, name: &str) -> Result<&DeviceEndpoint, ConsoleError> {
        self.get(name)
            .ok_or_else(|| ConsoleError::DeviceNotFound(name.to_string()))
    }

    pub fn devices(&self) -> &[DeviceEndpoint] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPOLOGY: &str = r#"{"nodes": [
        {"name": "R-1", "console": 5004, "status": "started", "node_type": "dynamips", "console_host": "0.0.0.0"},
        {"name": "SW-1", "console": 5005, "status": "started", "node_type": "ethernet_switch"},
        {"name": "R-2", "console": 5006, "status": "stopped", "node_type": "dynamips"},
        {"name": "Cloud1", "status": "started", "type": "cloud"},
        {"name": "PC-1", "console": 5008, "status": "started", "type": "vpcs", "console_host": "192.168.102.1"},
        {"name": "X-1", "status": "started", "node_type": "qemu"},
        {"name": "FW-1", "console": 5010, "status": "started", "node_type": "fortinet_vm"}
    ]}"#;

    #[test]
    fn parses_wrapped_and_bare_lists() {
        let nodes = parse_nodes(TOPOLOGY).expect("wrapped");
        assert_eq!(nodes.len(), 7);
        assert_eq!(nodes[3].node_type(), Some("cloud"));

        let bare = parse_nodes(r#"[{"name": "R1", "console": 5000, "status": "started"}]"#)
            .expect("bare");
        assert_eq!(bare[0].console, Some(5000));
    }

    #[test]
    fn malformed_input_is_a_decode_error() {
        assert!(matches!(
            parse_nodes("{\"nodes\": 5}"),
            Err(ConsoleError::InventoryDecode(_))
        ));
    }

    #[test]
    fn filter_keeps_running_configurable_nodes() {
        let nodes = parse_nodes(TOPOLOGY).expect("parse");
        let filtered = filter_configurable(&nodes, "127.0.0.1");

        let names: Vec<_> = filtered.devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["R-1", "PC-1", "FW-1"]);
        assert_eq!(filtered.devices[0].host, "127.0.0.1");
        assert_eq!(filtered.devices[0].device_type_hint.as_deref(), Some("dynamips"));
        assert_eq!(filtered.devices[1].host, "192.168.102.1");

        let reasons: Vec<_> = filtered
            .skipped
            .iter()
            .map(|s| (s.name.as_str(), &s.reason))
            .collect();
        assert_eq!(reasons.len(), 4);
        assert!(matches!(reasons[0], ("SW-1", SkipReason::NonConfigurableType { .. })));
        assert!(matches!(reasons[1], ("R-2", SkipReason::NotRunning { .. })));
        assert!(matches!(reasons[2], ("Cloud1", SkipReason::NonConfigurableType { .. })));
        assert!(matches!(reasons[3], ("X-1", SkipReason::NoConsole)));
    }

    #[test]
    fn inventory_resolves_names() {
        let inventory = Inventory::new(vec![DeviceEndpoint::new("R-1", "127.0.0.1", 5004)]);
        assert_eq!(inventory.resolve("R-1").expect("known").port, 5004);
        assert!(matches!(
            inventory.resolve("R-9"),
            Err(ConsoleError::DeviceNotFound(_))
        ));
    }
}
