//! Load config from file and environment; CLI flags are applied on top in main.

use std::path::{Path, PathBuf};

use anyhow::Context;
use rumor_core::CoreConfig;
use serde::Deserialize;

/// First port of the default range.
const PORT_BASE: u16 = 32768;
/// Ports per identity in the default range.
const PORTS_PER_IDENTITY: u16 = 4;

/// Node configuration. File: ~/.config/rumor/config.toml or /etc/rumor/config.toml.
/// Env overrides: RUMOR_PORT, RUMOR_ORIGIN, RUMOR_NOFORWARD, RUMOR_DOWNLOAD_DIR.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Fixed UDP port. Unset: try the four ports derived from `identity`.
    #[serde(default)]
    pub port: Option<u16>,
    /// Numeric identity for the default port range (default: the user id).
    #[serde(default)]
    pub identity: Option<u32>,
    /// Origin name (default: random).
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default = "default_forwarding")]
    pub forwarding: bool,
    /// Initial peers, `host:port`.
    #[serde(default)]
    pub peers: Vec<String>,
    /// Files shared at startup.
    #[serde(default)]
    pub share: Vec<PathBuf>,
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Length of one core tick in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default)]
    pub max_rumor_resends: Option<u32>,
    #[serde(default)]
    pub max_block_retransmits: Option<u32>,
}

fn default_forwarding() -> bool {
    true
}
fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}
fn default_tick_ms() -> u64 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: None,
            identity: None,
            origin: None,
            forwarding: default_forwarding(),
            peers: Vec::new(),
            share: Vec::new(),
            download_dir: default_download_dir(),
            tick_ms: default_tick_ms(),
            max_rumor_resends: None,
            max_block_retransmits: None,
        }
    }
}

impl Config {
    pub fn core_config(&self) -> CoreConfig {
        CoreConfig {
            origin: self.origin.clone(),
            forwarding: self.forwarding,
            max_rumor_resends: self.max_rumor_resends,
            max_block_retransmits: self.max_block_retransmits,
            ..CoreConfig::default()
        }
    }

    /// Ports to try binding, in order.
    pub fn candidate_ports(&self) -> Vec<u16> {
        if let Some(port) = self.port {
            return vec![port];
        }
        let identity = self.identity.unwrap_or_else(local_identity);
        let base = PORT_BASE + (identity % 4096) as u16 * PORTS_PER_IDENTITY;
        (base..base + PORTS_PER_IDENTITY).collect()
    }

    /// The other ports of the default range, registered as local peers once bound.
    pub fn sibling_ports(&self, bound: u16) -> Vec<u16> {
        if self.port.is_some() {
            return Vec::new();
        }
        self.candidate_ports().into_iter().filter(|p| *p != bound).collect()
    }
}

#[cfg(unix)]
fn local_identity() -> u32 {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata("/proc/self").map_or(0, |m| m.uid())
}

#[cfg(not(unix))]
fn local_identity() -> u32 {
    0
}

/// Load config: merge default, then config file, then env vars.
/// An explicit path must exist and parse; the default locations are best-effort.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let mut c = match explicit {
        Some(path) => read_file(path)?,
        None => load_file().unwrap_or_default(),
    };
    apply_env(&mut c, |key| std::env::var(key).ok());
    Ok(c)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("RUMOR_PORT") {
        match s.parse::<u16>() {
            Ok(p) => c.port = Some(p),
            Err(_) => tracing::warn!(value = %s, "ignoring invalid RUMOR_PORT"),
        }
    }
    if let Some(s) = var("RUMOR_ORIGIN") {
        c.origin = Some(s);
    }
    if let Some(s) = var("RUMOR_NOFORWARD") {
        if matches!(s.as_str(), "1" | "true" | "yes") {
            c.forwarding = false;
        }
    }
    if let Some(s) = var("RUMOR_DOWNLOAD_DIR") {
        c.download_dir = PathBuf::from(s);
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/rumor/config.toml"));
    }
    out.push(PathBuf::from("/etc/rumor/config.toml"));
    out
}

fn read_file(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&s).with_context(|| format!("parsing {}", path.display()))
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match read_file(&p) {
                Ok(c) => return Some(c),
                Err(e) => tracing::warn!(path = %p.display(), error = %format!("{e:#}"), "ignoring config file"),
            }
            break;
        }
    }
    None
}
