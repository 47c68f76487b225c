//! TOML configuration: a document store with typed sections.
//!
//! Each consumer owns one `[section]` and decodes it through
//! [`Configurable`]. Missing sections fall back to the type's defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::client::ClientType;

// ============================================================================
// Sections
// ============================================================================

/// A typed view of one top-level TOML table
///
/// ```ignore
/// #[derive(Debug, Default, serde::Deserialize)]
/// #[serde(default)]
/// pub struct StorePaths {
///     pub machines: String,
/// }
///
/// impl Configurable for StorePaths {
///     const PREFIX: &'static str = "store";
/// }
/// ```
pub trait Configurable: DeserializeOwned + Default {
    /// Name of the table this type is read from
    const PREFIX: &'static str;
}

// ============================================================================
// Store
// ============================================================================

/// A parsed TOML document and, when read from disk, its location
#[derive(Debug, Clone)]
pub struct ConfigStore {
    root: toml::Table,
    path: Option<PathBuf>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::empty()
    }
}

impl ConfigStore {
    /// A store with no sections; every lookup yields defaults
    pub fn empty() -> Self {
        Self {
            root: toml::Table::new(),
            path: None,
        }
    }

    /// Parse a TOML document held in memory
    pub fn parse(content: &str) -> Result<Self> {
        Ok(Self {
            root: parse_document(content, "<memory>")?,
            path: None,
        })
    }

    /// Load a TOML document from disk, remembering where it came from
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Reading configuration {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read configuration {}", path.display()))?;

        Ok(Self {
            root: parse_document(&content, &path.display().to_string())?,
            path: Some(path.to_path_buf()),
        })
    }

    /// Decode the section named by `C::PREFIX`, or `C::default()` values when
    /// it is absent.
    pub fn get<C: Configurable>(&self) -> Result<C> {
        let Some(section) = self.root.get(C::PREFIX) else {
            debug!("No [{}] section, using defaults", C::PREFIX);
            return Ok(C::default());
        };

        section
            .clone()
            .try_into()
            .map_err(|e| anyhow!("Invalid [{}] section: {}", C::PREFIX, e))
    }

    pub fn has_section(&self, prefix: &str) -> bool {
        self.root.contains_key(prefix)
    }

    /// File this store was loaded from, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Overlay `other` onto this store. Nested tables merge key by key;
    /// any other value in `other` replaces ours.
    pub fn merge(&mut self, other: &ConfigStore) {
        overlay(&mut self.root, &other.root);
    }
}

fn parse_document(content: &str, origin: &str) -> Result<toml::Table> {
    content
        .parse::<toml::Table>()
        .map_err(|e| anyhow!("Invalid TOML in {}: {}", origin, e))
}

fn overlay(base: &mut toml::Table, top: &toml::Table) {
    for (key, value) in top {
        match (base.get_mut(key), value) {
            (Some(toml::Value::Table(ours)), toml::Value::Table(theirs)) => overlay(ours, theirs),
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

// ============================================================================
// Client Options
// ============================================================================

/// Client configuration section
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Which client variant `new_api_client` builds from configuration
    pub client_type: ClientType,

    /// Root of the machine store
    pub store_path: PathBuf,

    /// Directory holding TLS certificates for provisioned machines
    pub certs_dir: PathBuf,

    /// Executable re-invoked in plugin mode; defaults to the current binary
    pub plugin_binary: Option<PathBuf>,

    /// How long to wait for a plugin's address line and the first dial
    pub handshake_timeout_ms: u64,

    /// Upper bound on a single RPC round trip; must outlast the slowest
    /// driver operation, e.g. a restart that waits for power-off
    pub rpc_timeout_ms: u64,

    /// Grace period between asking a plugin to close and killing it
    pub shutdown_timeout_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            client_type: ClientType::Local,
            store_path: PathBuf::from(".machina"),
            certs_dir: PathBuf::from(".machina/certs"),
            plugin_binary: None,
            handshake_timeout_ms: 10_000,
            rpc_timeout_ms: 180_000,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl ClientOptions {
    pub fn new(store_path: impl Into<PathBuf>, certs_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
            certs_dir: certs_dir.into(),
            ..Default::default()
        }
    }

    pub fn plugin_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.plugin_binary = Some(path.into());
        self
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Configurable for ClientOptions {
    const PREFIX: &'static str = "client";
}
