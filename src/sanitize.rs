//! Output sanitization.
//!
//! Turns the raw text of one command into its semantic content: everything
//! up to and including the echoed command line is dropped, then prompt lines,
//! pager artifacts and repeats of the command are removed.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::device::DeviceMatcher;

static ANSI_CSI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("static regex"));

/// Cleans the raw output of `command`.
///
/// Content starts after the first line containing the command. If the
/// console never echoed it, the whole buffer is treated as content.
pub fn sanitize(raw: &str, command: &str, matcher: &DeviceMatcher) -> String {
    let command = command.trim();
    let lines: Vec<CleanLine> = raw.split('\n').map(|l| clean_line(l, matcher)).collect();

    let start = if command.is_empty() {
        0
    } else {
        lines
            .iter()
            .position(|l| l.text.contains(command))
            .map(|i| i + 1)
            .unwrap_or(0)
    };

    let mut kept: Vec<&str> = lines[start..]
        .iter()
        .filter(|line| !is_noise(line, command, matcher))
        .map(|line| line.text.as_str())
        .collect();

    while kept
        .first()
        .is_some_and(|l| l.trim().is_empty() || matcher.is_prompt_line(l))
    {
        kept.remove(0);
    }
    while kept
        .last()
        .is_some_and(|l| l.trim().is_empty() || matcher.is_prompt_line(l))
    {
        kept.pop();
    }

    kept.join("\n")
}

struct CleanLine {
    text: String,
    had_pager: bool,
}

/// Applies backspaces and removes terminal control sequences and pager text.
fn clean_line(line: &str, matcher: &DeviceMatcher) -> CleanLine {
    let line = line.trim_end_matches('\r');
    let line = ANSI_CSI.replace_all(line, "");

    // Consoles erase the pager prompt with backspaces once it is answered.
    let mut text = String::with_capacity(line.len());
    for c in line.chars() {
        match c {
            '\u{8}' => {
                text.pop();
            }
            '\0' => {}
            c => text.push(c),
        }
    }

    let had_pager = matcher.is_pager_line(&text);
    if had_pager {
        text = matcher.strip_pager(&text).trim_start().to_string();
    }
    CleanLine {
        text: text.trim_end_matches('\r').to_string(),
        had_pager,
    }
}

fn is_noise(line: &CleanLine, command: &str, matcher: &DeviceMatcher) -> bool {
    let trimmed = line.text.trim();
    if line.had_pager && trimmed.is_empty() {
        return true;
    }
    if !command.is_empty() && (trimmed == command || matcher.is_prompt_echo(trimmed, command)) {
        return true;
    }
    matcher.is_prompt_line(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::cisco_ios;

    fn matcher(name: &str) -> DeviceMatcher {
        DeviceMatcher::new(&cisco_ios(), name).expect("compile")
    }

    #[test]
    fn echo_and_trailing_prompt_are_removed() {
        let m = matcher("Router");
        assert_eq!(
            sanitize("show version\r\nCisco IOS ...\r\nRouter#", "show version", &m),
            "Cisco IOS ..."
        );
    }

    #[test]
    fn device_prompt_output_is_cleaned() {
        let m = matcher("R-1");
        assert_eq!(
            sanitize("show version\r\nIOS v15.2\r\nR-1#", "show version", &m),
            "IOS v15.2"
        );
    }

    #[test]
    fn lines_before_the_echo_are_dropped() {
        let m = matcher("R1");
        let raw = "\r\nR1#\r\nleftover noise\r\nR1#show clock\r\n*10:00:00.000 UTC\r\nR1#";
        assert_eq!(sanitize(raw, "show clock", &m), "*10:00:00.000 UTC");
    }

    #[test]
    fn indentation_and_blank_lines_inside_content_are_kept() {
        let m = matcher("R1");
        let raw = "show run\r\n\r\ninterface Gi0/0\r\n ip address 10.0.0.1 255.255.255.0\r\n!\r\n\r\nend\r\n\r\nR1#";
        assert_eq!(
            sanitize(raw, "show run", &m),
            "interface Gi0/0\n ip address 10.0.0.1 255.255.255.0\n!\n\nend"
        );
    }

    #[test]
    fn pager_prompts_and_erasure_disappear() {
        let m = matcher("R1");
        let erase = "\u{8}".repeat(10);
        let raw = format!(
            "show run\r\nline one\r\n --More-- {erase}          {erase}line two\r\n --More-- \r\nline three\r\nR1#"
        );
        assert_eq!(sanitize(&raw, "show run", &m), "line one\nline two\nline three");
    }

    #[test]
    fn missing_echo_keeps_whole_buffer() {
        let m = matcher("R1");
        assert_eq!(
            sanitize("Gi0/0 up\r\nGi0/1 down\r\nR1#", "show ip interface brief", &m),
            "Gi0/0 up\nGi0/1 down"
        );
    }

    #[test]
    fn repeated_command_and_ansi_sequences_are_removed() {
        let m = matcher("R1");
        let raw = "show clock\r\n\x1b[K12:00\r\nshow clock\r\nR1#show clock\r\nR1#";
        assert_eq!(sanitize(raw, "show clock", &m), "12:00");
    }
}
