//! Operating-system identification.
//!
//! Resolves a human-readable OS name via a per-platform cascade of files and
//! commands. Every branch degrades to the generic `uname -sr` fallback and,
//! at worst, the literal `"Unknown"`; this module never errors.

use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

/// Terminal fallback when every identification source fails.
const UNKNOWN: &str = "Unknown";

/// Detect the OS distribution/version for the current platform.
pub async fn os_name() -> String {
    match std::env::consts::OS {
        "linux" => linux_os().await,
        "macos" => darwin_os().await,
        "windows" => windows_os().await,
        _ => generic_os().await,
    }
}

/// Linux: `/etc/issue`, then `/etc/redhat-release`, then generic.
async fn linux_os() -> String {
    match tokio::fs::read_to_string("/etc/issue").await {
        Ok(issue) => match parse_issue(&issue) {
            Some(name) => name,
            None => match tokio::fs::read_to_string("/etc/redhat-release").await {
                Ok(release) => match parse_redhat_release(&release) {
                    Some(name) => name,
                    None => generic_os().await,
                },
                Err(_) => generic_os().await,
            },
        },
        Err(_) => generic_os().await,
    }
}

/// Darwin: `sw_vers` product name + version.
async fn darwin_os() -> String {
    match run_command("sw_vers", &[]).await {
        Some(out) => match parse_sw_vers(&out) {
            Some(name) => name,
            None => generic_os().await,
        },
        None => generic_os().await,
    }
}

/// Windows: `wmic os get Caption /value`.
async fn windows_os() -> String {
    match run_command("wmic", &["os", "get", "Caption", "/value"]).await {
        Some(out) => match parse_wmic_caption(&out) {
            Some(name) => name,
            None => generic_os().await,
        },
        None => generic_os().await,
    }
}

/// Generic fallback: kernel name and release via `uname -sr`.
async fn generic_os() -> String {
    match run_command("uname", &["-sr"]).await {
        Some(out) => {
            let trimmed = out.trim();
            if trimmed.is_empty() {
                UNKNOWN.to_string()
            } else {
                trimmed.to_string()
            }
        }
        None => UNKNOWN.to_string(),
    }
}

/// Run a command and capture stdout, swallowing every failure mode.
async fn run_command(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .output()
        .await;

    match output {
        Ok(output) if !output.stdout.is_empty() => {
            Some(String::from_utf8_lossy(&output.stdout).to_string())
        }
        Ok(_) => {
            debug!(command = program, "Command produced no output");
            None
        }
        Err(err) => {
            debug!(command = program, error = %err, "Command failed");
            None
        }
    }
}

/// Parse `/etc/issue` content into a distribution name.
///
/// Returns `None` when the leading token is empty, signalling the
/// `/etc/redhat-release` fallback.
fn parse_issue(issue: &str) -> Option<String> {
    let distribution = leading_word(issue);
    if distribution.is_empty() {
        return None;
    }

    match find_version(issue) {
        Some(version) => Some(format!("{} {}", distribution, version)),
        None => Some(distribution.to_string()),
    }
}

/// Parse `/etc/redhat-release` content into `"Red Hat <version>"`.
fn parse_redhat_release(release: &str) -> Option<String> {
    find_version(release).map(|version| format!("Red Hat {}", version))
}

/// Parse `sw_vers` output into `"<ProductName> <ProductVersion>"`.
///
/// Both values must be present; a partial match falls through to the
/// generic cascade.
fn parse_sw_vers(out: &str) -> Option<String> {
    let name = line_value(out, "ProductName:")?;
    let version = line_value(out, "ProductVersion:")?;
    Some(format!("{} {}", name, version))
}

/// Parse `wmic os get Caption /value` output into the caption string.
fn parse_wmic_caption(out: &str) -> Option<String> {
    line_value(out, "Caption=")
}

/// Extract the trimmed remainder of the first line starting with `prefix`.
fn line_value(out: &str, prefix: &str) -> Option<String> {
    for line in out.lines() {
        if let Some(rest) = line.trim_start().strip_prefix(prefix) {
            let value = rest.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Take the leading run of word characters (alphanumerics and underscore).
fn leading_word(text: &str) -> &str {
    let end = text
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(text.len());
    &text[..end]
}

/// Find the first version-looking pattern: digits, optionally followed by a
/// dot and one or two more digits.
fn find_version(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            let mut end = i;
            if i < bytes.len() && bytes[i] == b'.' {
                let frac_start = i + 1;
                let mut j = frac_start;
                while j < bytes.len() && bytes[j].is_ascii_digit() && j - frac_start < 2 {
                    j += 1;
                }
                if j > frac_start {
                    end = j;
                }
            }
            return Some(text[start..end].to_string());
        }
        i += 1;
    }

    None
}
