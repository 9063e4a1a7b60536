//! Predefined device profiles.
//!
//! A [`DeviceProfile`] carries everything that differs between device
//! families: prompt shapes, pager markers, end-of-configuration markers, the
//! privileged-mode command and the terminal commands that disable paging.
//! Profiles are plain data; [`crate::device::DeviceMatcher`] compiles them.

use crate::error::ConsoleError;
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Built-in profile names supported by this crate.
pub const BUILTIN_TEMPLATES: &[&str] = &["cisco_ios", "huawei_vrp", "generic"];

/// Placeholder replaced by the device name in `device_prompts`.
pub const NAME_PLACEHOLDER: &str = "{name}";

/// Placeholder replaced by the section name in `section_command`.
pub const SECTION_PLACEHOLDER: &str = "{section}";

/// Capability tags used to describe profile behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TemplateCapability {
    PrivilegedMode,
    PagingDisable,
    SectionFilter,
    EndMarker,
}

/// Metadata for a built-in profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TemplateMetadata {
    pub name: String,
    pub vendor: String,
    pub family: String,
    pub template_version: String,
    pub capabilities: Vec<TemplateCapability>,
}

/// Prompt, pager and setup conventions of one device family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeviceProfile {
    pub name: String,
    /// Appended to every line sent to the device.
    pub line_ending: String,
    /// Command entering privileged mode, if the family has one.
    pub privileged_command: Option<String>,
    /// Commands disabling pagination and line wrap. Each is best-effort.
    pub terminal_commands: Vec<String>,
    /// Case-insensitive regexes matching pagination prompts.
    pub pager_patterns: Vec<String>,
    /// Keystroke sent to continue a paginated output.
    pub pager_keystroke: String,
    /// Regexes matched against whole lines that terminate a configuration.
    pub end_markers: Vec<String>,
    /// Prompt templates built from the device name, e.g. `{name}#`.
    pub device_prompts: Vec<String>,
    /// Literal prompts of devices whose hostname was never customized.
    pub generic_prompts: Vec<String>,
    /// Unanchored regex matching any bare prompt of this family.
    pub prompt_pattern: String,
    /// Command printing the full running configuration.
    pub config_command: String,
    /// Command printing one configuration section, with `{section}`.
    pub section_command: String,
    /// Sections fetched by the segmented strategy before the full fetch.
    pub warmup_sections: Vec<String>,
}

impl DeviceProfile {
    /// Renders the section command for one section.
    pub fn section_command_for(&self, section: &str) -> String {
        self.section_command.replace(SECTION_PLACEHOLDER, section)
    }

    /// Renders the device-specific prompts for a device name.
    pub fn prompts_for(&self, device_name: &str) -> Vec<String> {
        self.device_prompts
            .iter()
            .map(|p| p.replace(NAME_PLACEHOLDER, device_name))
            .collect()
    }

    /// Adds fallback prompts to the generic list, skipping duplicates.
    pub fn with_generic_prompts<I, S>(mut self, prompts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for prompt in prompts {
            let prompt = prompt.into();
            if !self.generic_prompts.contains(&prompt) {
                self.generic_prompts.push(prompt);
            }
        }
        self
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        cisco_ios()
    }
}

/// Cisco IOS / IOS-XE style consoles, the usual dynamips and IOU images.
pub fn cisco_ios() -> DeviceProfile {
    let mut generic_prompts = vec!["Router#".to_string(), "Switch#".to_string()];
    generic_prompts.extend((1..=6).map(|i| format!("R{i}#")));

    DeviceProfile {
        name: "cisco_ios".to_string(),
        line_ending: "\r\n".to_string(),
        privileged_command: Some("enable".to_string()),
        terminal_commands: vec![
            "terminal length 0".to_string(),
            "terminal width 0".to_string(),
            "terminal no monitor".to_string(),
        ],
        pager_patterns: vec![r"-+\s*more\s*-+".to_string(), r"\(more\)".to_string()],
        pager_keystroke: " ".to_string(),
        end_markers: vec![r"^end$".to_string()],
        device_prompts: vec!["{name}#".to_string(), "{name}>".to_string()],
        generic_prompts,
        prompt_pattern: r"[A-Za-z0-9][A-Za-z0-9._\-/:@]*(?:\([A-Za-z0-9._\-/: ]+\))?[#>]"
            .to_string(),
        config_command: "show running-config".to_string(),
        section_command: "show running-config | section {section}".to_string(),
        warmup_sections: ["version", "interface", "router", "access-list", "line"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    }
}

/// Huawei VRP consoles.
pub fn huawei_vrp() -> DeviceProfile {
    DeviceProfile {
        name: "huawei_vrp".to_string(),
        line_ending: "\r\n".to_string(),
        privileged_command: None,
        terminal_commands: vec!["screen-length 0 temporary".to_string()],
        pager_patterns: vec![r"-+\s*more\s*-+".to_string()],
        pager_keystroke: " ".to_string(),
        end_markers: vec![r"^return$".to_string()],
        device_prompts: vec!["<{name}>".to_string(), "[{name}]".to_string()],
        generic_prompts: vec!["<Huawei>".to_string(), "[Huawei]".to_string()],
        prompt_pattern: r"(?:<[A-Za-z0-9._\-]+>|\[[A-Za-z0-9._\-~/]+\])".to_string(),
        config_command: "display current-configuration".to_string(),
        section_command: "display current-configuration | begin {section}".to_string(),
        warmup_sections: ["interface", "ospf", "acl"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    }
}

/// Minimal profile for consoles with unknown conventions.
pub fn generic() -> DeviceProfile {
    DeviceProfile {
        name: "generic".to_string(),
        line_ending: "\r\n".to_string(),
        privileged_command: None,
        terminal_commands: Vec::new(),
        pager_patterns: vec![r"-+\s*more\s*-+".to_string(), r"\(more\)".to_string()],
        pager_keystroke: " ".to_string(),
        end_markers: Vec::new(),
        device_prompts: vec!["{name}#".to_string(), "{name}>".to_string()],
        generic_prompts: Vec::new(),
        prompt_pattern: r"[A-Za-z0-9][A-Za-z0-9._\-/:@~]*(?:\([A-Za-z0-9._\-/: ]+\))?[#>$%]"
            .to_string(),
        config_command: "show running-config".to_string(),
        section_command: "show running-config | section {section}".to_string(),
        warmup_sections: Vec::new(),
    }
}

fn metadata_for(name: &str) -> Option<TemplateMetadata> {
    let meta = match name {
        "cisco_ios" => TemplateMetadata {
            name: "cisco_ios".to_string(),
            vendor: "Cisco".to_string(),
            family: "IOS/IOS-XE".to_string(),
            template_version: "1.0.0".to_string(),
            capabilities: vec![
                TemplateCapability::PrivilegedMode,
                TemplateCapability::PagingDisable,
                TemplateCapability::SectionFilter,
                TemplateCapability::EndMarker,
            ],
        },
        "huawei_vrp" => TemplateMetadata {
            name: "huawei_vrp".to_string(),
            vendor: "Huawei".to_string(),
            family: "VRP".to_string(),
            template_version: "1.0.0".to_string(),
            capabilities: vec![
                TemplateCapability::PagingDisable,
                TemplateCapability::SectionFilter,
                TemplateCapability::EndMarker,
            ],
        },
        "generic" => TemplateMetadata {
            name: "generic".to_string(),
            vendor: "Generic".to_string(),
            family: "line-oriented CLI".to_string(),
            template_version: "1.0.0".to_string(),
            capabilities: Vec::new(),
        },
        _ => return None,
    };
    Some(meta)
}

/// Returns names of all built-in profiles.
pub fn available_templates() -> &'static [&'static str] {
    BUILTIN_TEMPLATES
}

/// Returns metadata for all built-in profiles.
pub fn template_catalog() -> Vec<TemplateMetadata> {
    BUILTIN_TEMPLATES
        .iter()
        .filter_map(|name| metadata_for(name))
        .collect()
}

/// Returns metadata for one profile by name (case-insensitive).
pub fn template_metadata(name: &str) -> Result<TemplateMetadata, ConsoleError> {
    let key = name.to_ascii_lowercase();
    metadata_for(&key).ok_or_else(|| ConsoleError::ProfileNotFound(name.to_string()))
}

/// Returns a built-in profile by name (case-insensitive).
pub fn profile(name: &str) -> Result<DeviceProfile, ConsoleError> {
    match name.to_ascii_lowercase().as_str() {
        "cisco_ios" | "cisco" => Ok(cisco_ios()),
        "huawei_vrp" | "huawei" => Ok(huawei_vrp()),
        "generic" => Ok(generic()),
        _ => Err(ConsoleError::ProfileNotFound(name.to_string())),
    }
}

const READ_ONLY_PREFIXES: &[&str] = &["show ", "display ", "ping ", "traceroute ", "debug "];

static ALLOWED_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9 \t\-./_|:]+$").expect("static regex"));

static PLACEHOLDERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"\.\.\.+", r"(?i)x\.x\.x\.x", r"___+"]
        .iter()
        .map(|p| Regex::new(p).expect("static regex"))
        .collect()
});

/// Checks that a command is a complete read-only command.
///
/// Commands produced by a language model sometimes carry placeholders
/// (`x.x.x.x`, `...`) or wildcards; those are rejected before a session is
/// opened.
pub fn validate_read_only_command(command: &str) -> Result<(), ConsoleError> {
    let cmd = command.trim();
    if cmd.is_empty() {
        return Err(ConsoleError::InvalidCommand("empty command".to_string()));
    }

    let lower = cmd.to_ascii_lowercase();
    if !READ_ONLY_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return Err(ConsoleError::InvalidCommand(format!(
            "'{cmd}' is not a read-only command"
        )));
    }

    if !ALLOWED_CHARS.is_match(cmd) {
        return Err(ConsoleError::InvalidCommand(format!(
            "'{cmd}' contains unsupported characters"
        )));
    }

    if cmd.ends_with("..") || PLACEHOLDERS.iter().any(|re| re.is_match(cmd)) {
        return Err(ConsoleError::InvalidCommand(format!(
            "'{cmd}' contains a placeholder"
        )));
    }

    Ok(())
}
