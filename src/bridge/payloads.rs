//! Remote payload registry
//!
//! One payload entry per target OS, loaded once from the embedded
//! `files/payloads.toml`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use anyhow::Context;
use serde::Deserialize;

/// Operating system family of a remote target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsFamily {
    Linux,
    Windows,
}

impl OsFamily {
    /// Classify the text printed by an OS fingerprint command
    pub fn classify(fingerprint: &str) -> Option<Self> {
        let lower = fingerprint.to_lowercase();
        if lower.contains("linux") {
            Some(OsFamily::Linux)
        } else if lower.contains("windows") || lower.contains("microsoft") {
            Some(OsFamily::Windows)
        } else {
            None
        }
    }

    fn key(&self) -> &'static str {
        match self {
            OsFamily::Linux => "linux",
            OsFamily::Windows => "windows",
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Package a payload may need, and how to put it into the target
#[derive(Debug, Clone)]
pub struct Dependency {
    pub package: String,
    pub install_command: Vec<String>,
}

/// Everything the bridge needs to drive one OS
#[derive(Debug, Clone)]
pub struct OsPayload {
    /// Interpreter command the capture script is piped into
    pub capture_command: Vec<String>,
    pub capture_script: String,
    /// Interpreter command a generated action script is piped into
    pub action_command: Vec<String>,
    /// Helpers injected ahead of GUI action code
    pub action_prelude: String,
    /// Installed once when a payload exits with the missing-dependency code
    pub dependency: Option<Dependency>,
}

/// Expected header of capture payload output
#[derive(Debug, Clone)]
pub struct CaptureFormat {
    pub name: String,
    pub magic: Vec<u8>,
}

impl CaptureFormat {
    pub fn matches(&self, data: &[u8]) -> bool {
        data.starts_with(&self.magic)
    }
}

#[derive(Debug, Clone)]
pub struct PayloadRegistry {
    entries: HashMap<OsFamily, OsPayload>,
    capture: CaptureFormat,
}

#[derive(Debug, Deserialize)]
struct RawRegistry {
    capture: RawCapture,
    linux: Option<RawPayload>,
    windows: Option<RawPayload>,
}

#[derive(Debug, Deserialize)]
struct RawCapture {
    format: String,
    magic: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    capture_command: String,
    capture_script: String,
    action_command: String,
    #[serde(default)]
    action_prelude: String,
    dependency: Option<RawDependency>,
}

#[derive(Debug, Deserialize)]
struct RawDependency {
    package: String,
    install_command: String,
}

const EMBEDDED_PAYLOADS: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/payloads.toml"));

static PAYLOADS: OnceLock<Arc<PayloadRegistry>> = OnceLock::new();

impl PayloadRegistry {
    /// The registry shipped with the binary, parsed on first use
    pub fn embedded() -> anyhow::Result<Arc<Self>> {
        if let Some(registry) = PAYLOADS.get() {
            return Ok(Arc::clone(registry));
        }
        let registry = Arc::new(Self::from_toml(EMBEDDED_PAYLOADS)?);
        Ok(Arc::clone(PAYLOADS.get_or_init(|| registry)))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let raw: RawRegistry = toml::from_str(content).context("Invalid payload registry")?;
        anyhow::ensure!(
            !raw.capture.magic.is_empty(),
            "Capture format {} has an empty magic header",
            raw.capture.format
        );

        let mut entries = HashMap::new();
        for (os, payload) in [(OsFamily::Linux, raw.linux), (OsFamily::Windows, raw.windows)] {
            let Some(payload) = payload else { continue };
            let entry = OsPayload {
                capture_command: into_command(&payload.capture_command),
                capture_script: payload.capture_script,
                action_command: into_command(&payload.action_command),
                action_prelude: payload.action_prelude,
                dependency: payload.dependency.map(|dep| Dependency {
                    package: dep.package,
                    install_command: into_command(&dep.install_command),
                }),
            };
            anyhow::ensure!(
                !entry.capture_command.is_empty() && !entry.action_command.is_empty(),
                "Payload for {} has an empty command",
                os
            );
            entries.insert(os, entry);
        }

        Ok(Self {
            entries,
            capture: CaptureFormat {
                name: raw.capture.format,
                magic: raw.capture.magic,
            },
        })
    }

    pub fn get(&self, os: OsFamily) -> Option<&OsPayload> {
        self.entries.get(&os)
    }

    pub fn capture_format(&self) -> &CaptureFormat {
        &self.capture
    }
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}
