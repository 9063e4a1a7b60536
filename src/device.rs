//! Device identity and output pattern matching.
//!
//! [`DeviceMatcher`] compiles a [`DeviceProfile`] for one device name into the
//! regex sets used while polling a console: completion markers (an `end`
//! line, the device prompt, fallback prompts of unconfigured devices),
//! pagination prompts, and bare prompt lines for sanitization.
//!
//! Completion detection is heuristic. A missed marker only costs more polling
//! while a false match truncates output, so every completion pattern is
//! anchored to a whole line: `Rout` never matches `Router#`, and an echoed
//! `R1#show version` line never matches `R1#`.

use log::trace;
use regex::{Regex, RegexSet};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ConsoleError;
use crate::templates::DeviceProfile;

/// Longest line still considered a bare prompt.
const MAX_PROMPT_LEN: usize = 64;

/// One manageable device console.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct DeviceEndpoint {
    /// Unique display name, usually the hostname configured on the device.
    pub name: String,
    pub host: String,
    /// Console TCP port.
    pub port: u16,
    /// Node type reported by the inventory (`dynamips`, `iou`, `qemu`...).
    #[serde(default)]
    pub device_type_hint: Option<String>,
}

impl DeviceEndpoint {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            device_type_hint: None,
        }
    }

    pub fn with_type_hint(mut self, hint: impl Into<String>) -> Self {
        self.device_type_hint = Some(hint.into());
        self
    }

    /// `host:port` of the console.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Compiled completion, pager and prompt patterns for one device.
pub struct DeviceMatcher {
    device_name: String,

    /// Line-anchored completion markers.
    completion: RegexSet,

    /// Human-readable label per `completion` pattern, for diagnostics.
    completion_labels: Vec<String>,

    /// A bare prompt on the final, unterminated line of the text.
    trailing_prompt: Regex,

    /// Pagination markers, case-insensitive.
    pager: Regex,

    /// A whole line consisting of a prompt.
    prompt_line: Regex,

    /// A prompt at the start of a line, followed by anything.
    prompt_prefix: Regex,
}

impl DeviceMatcher {
    /// Compiles `profile` for the device called `device_name`.
    pub fn new(profile: &DeviceProfile, device_name: &str) -> Result<Self, ConsoleError> {
        let mut patterns = Vec::new();
        let mut labels = Vec::new();

        for marker in &profile.end_markers {
            let inner = marker.trim_start_matches('^').trim_end_matches('$');
            patterns.push(format!(r"(?m)^\x00*(?:{inner})[ \t]*\r?$"));
            labels.push(format!("end marker '{inner}'"));
        }

        let device_prompts = if device_name.is_empty() {
            Vec::new()
        } else {
            profile.prompts_for(device_name)
        };
        for prompt in device_prompts.iter().chain(profile.generic_prompts.iter()) {
            patterns.push(format!(r"(?m)^\x00*{}[ \t]*\r?$", regex::escape(prompt)));
            labels.push(format!("prompt '{prompt}'"));
        }

        let completion = RegexSet::new(&patterns).map_err(|err| {
            ConsoleError::InvalidProfileConfig(format!(
                "failed to build completion regex set for '{}': {}",
                profile.name, err
            ))
        })?;

        let prompt = &profile.prompt_pattern;
        let trailing_prompt = compile(
            &format!(r"(?:\A|\n)\x00*\r?{prompt}[ \t]?\z"),
            "prompt_pattern",
        )?;
        let prompt_line = compile(&format!(r"^\x00*{prompt}[ \t]*$"), "prompt_pattern")?;
        let prompt_prefix = compile(&format!(r"^\x00*{prompt}[ \t]*"), "prompt_pattern")?;

        let pager_source = if profile.pager_patterns.is_empty() {
            // Never matches.
            r"[^\s\S]".to_string()
        } else {
            let alternatives = profile
                .pager_patterns
                .iter()
                .map(|p| format!("(?:{p})"))
                .collect::<Vec<_>>()
                .join("|");
            format!("(?i){alternatives}")
        };
        let pager = compile(&pager_source, "pager_patterns")?;

        Ok(Self {
            device_name: device_name.to_string(),
            completion,
            completion_labels: labels,
            trailing_prompt,
            pager,
            prompt_line,
            prompt_prefix,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Returns the label of the first completion marker found in `window`.
    pub fn completion_marker(&self, window: &str) -> Option<&str> {
        if let Some(index) = self.completion.matches(window).into_iter().next() {
            return self.completion_labels.get(index).map(|s| s.as_str());
        }
        if self.trailing_prompt.is_match(window) {
            return Some("trailing prompt");
        }
        None
    }

    /// Returns true if `window` shows the output is fully received.
    pub fn is_complete(&self, window: &str) -> bool {
        let marker = self.completion_marker(window);
        if let Some(label) = marker {
            trace!("{} completion matched {}", self.device_name, label);
        }
        marker.is_some()
    }

    /// Returns true if `chunk` contains a pagination prompt.
    pub fn has_pager(&self, chunk: &str) -> bool {
        self.pager.is_match(chunk)
    }

    /// Removes every pagination prompt from `chunk`.
    pub fn strip_pager(&self, chunk: &str) -> String {
        self.pager.replace_all(chunk, "").into_owned()
    }

    /// Returns true if `line` is nothing but a prompt.
    pub fn is_prompt_line(&self, line: &str) -> bool {
        let line = line.trim_end_matches(['\r', '\n']);
        let trimmed = line.trim();
        !trimmed.is_empty() && trimmed.len() <= MAX_PROMPT_LEN && self.prompt_line.is_match(trimmed)
    }

    /// Returns true if `line` is a prompt immediately followed by `command`.
    pub fn is_prompt_echo(&self, line: &str, command: &str) -> bool {
        let line = line.trim();
        match self.prompt_prefix.find(line) {
            Some(m) => line[m.end()..].trim() == command.trim(),
            None => false,
        }
    }

    /// Returns true if `line` contains a pagination marker.
    pub fn is_pager_line(&self, line: &str) -> bool {
        self.pager.is_match(line)
    }

    /// Returns the last bare prompt line found in `text`.
    pub fn last_prompt(&self, text: &str) -> Option<String> {
        text.lines()
            .rev()
            .map(|line| line.trim_matches(|c: char| c.is_whitespace() || c == '\0'))
            .find(|line| self.is_prompt_line(line))
            .map(|line| line.to_string())
    }
}

fn compile(pattern: &str, field: &str) -> Result<Regex, ConsoleError> {
    Regex::new(pattern).map_err(|err| {
        ConsoleError::InvalidProfileConfig(format!("invalid {field} regex: {err}"))
    })
}
