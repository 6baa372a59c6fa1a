//! Publisher configuration (`cairn.yaml`).
//!
//! # Lookup order
//!
//! 1. `--config <path>` (must exist)
//! 2. `./cairn.yaml`
//! 3. `<config_dir>/cairn/config.yaml`
//! 4. built-in defaults
//!
//! Every field is optional in the file; missing fields take the defaults
//! below.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};
use crate::types::is_reserved_link;

pub const CONFIG_FILE: &str = "cairn.yaml";

/// Per-call store timeouts.
///
/// Metadata and resolution calls are short; content-bearing add/pin calls
/// are long.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub resolve_secs: u64,
    pub fetch_secs: u64,
    pub publish_secs: u64,
    pub add_secs: u64,
    pub pin_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            resolve_secs: 5,
            fetch_secs: 5,
            publish_secs: 60,
            add_secs: 600,
            pin_secs: 600,
        }
    }
}

impl Timeouts {
    pub fn resolve(&self) -> Duration {
        Duration::from_secs(self.resolve_secs)
    }

    pub fn fetch(&self) -> Duration {
        Duration::from_secs(self.fetch_secs)
    }

    pub fn publish(&self) -> Duration {
        Duration::from_secs(self.publish_secs)
    }

    pub fn add(&self) -> Duration {
        Duration::from_secs(self.add_secs)
    }

    pub fn pin(&self) -> Duration {
        Duration::from_secs(self.pin_secs)
    }
}

/// How far an emptied directory propagates upward when purging dead builds
/// from the production tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollapseMode {
    /// Only a directory whose own builds were purged is dropped.
    #[default]
    Single,
    /// Parents emptied by a dropped child are dropped as well.
    Transitive,
}

/// One deployable product aggregated into the production tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductConfig {
    /// Link name of the product under the production root.
    pub name: String,
    /// Key whose published raw tree feeds this product.
    pub raw_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Kubo RPC endpoint.
    pub api_url: String,
    /// HTTP gateway used for warm fetches.
    pub gateway_url: String,
    /// Key holding the raw history tree.
    pub raw_key: String,
    /// Key holding the production tree.
    pub production_key: String,
    /// Manage pins on published roots.
    pub pin: bool,
    /// Warm the gateway after publishing production.
    pub warm: bool,
    /// Allow name publication while the node has no peers.
    pub allow_offline: bool,
    pub staging_dir: PathBuf,
    pub descriptor: PathBuf,
    /// Empty means a single product named after `raw_key`.
    pub products: Vec<ProductConfig>,
    /// Purge collapse depth; `--collapse` overrides it.
    pub collapse: CollapseMode,
    pub timeouts: Timeouts,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:5001".to_string(),
            gateway_url: "https://ipfs.io".to_string(),
            raw_key: "cairn-raw".to_string(),
            production_key: "cairn-production".to_string(),
            pin: true,
            warm: false,
            allow_offline: true,
            staging_dir: PathBuf::from("build"),
            descriptor: PathBuf::from(crate::descriptor::DESCRIPTOR_FILE),
            products: Vec::new(),
            collapse: CollapseMode::default(),
            timeouts: Timeouts::default(),
        }
    }
}

impl Config {
    /// Products to aggregate, falling back to the raw key itself.
    pub fn products(&self) -> Vec<ProductConfig> {
        if self.products.is_empty() {
            vec![ProductConfig {
                name: self.raw_key.clone(),
                raw_key: self.raw_key.clone(),
            }]
        } else {
            self.products.clone()
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.api_url.trim().is_empty() {
            return Err(CoreError::InvalidConfig("api_url must not be empty".into()));
        }
        if self.raw_key.trim().is_empty() || self.production_key.trim().is_empty() {
            return Err(CoreError::InvalidConfig(
                "raw_key and production_key must not be empty".into(),
            ));
        }
        if self.raw_key == self.production_key {
            return Err(CoreError::InvalidConfig(format!(
                "raw_key and production_key must differ (both `{}`)",
                self.raw_key
            )));
        }
        let t = &self.timeouts;
        if [t.resolve_secs, t.fetch_secs, t.publish_secs, t.add_secs, t.pin_secs].contains(&0) {
            return Err(CoreError::InvalidConfig("timeouts must be non-zero".into()));
        }
        // covers the raw_key fallback too
        let products = self.products();
        let mut seen = HashSet::new();
        for product in &products {
            if product.name.is_empty() || product.name.contains('/') {
                return Err(CoreError::InvalidConfig(format!(
                    "invalid product name `{}`",
                    product.name
                )));
            }
            if is_reserved_link(&product.name) {
                return Err(CoreError::InvalidConfig(format!(
                    "product name `{}` is reserved for tree links",
                    product.name
                )));
            }
            if !seen.insert(product.name.as_str()) {
                return Err(CoreError::InvalidConfig(format!(
                    "duplicate product `{}`",
                    product.name
                )));
            }
        }
        Ok(())
    }
}

/// Parse and validate the config file at `path`.
pub fn load_from(path: &Path) -> Result<Config, CoreError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let config: Config = if contents.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(&contents).map_err(|e| CoreError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })?
    };
    config.validate()?;
    Ok(config)
}

/// First existing config file among `<cwd>/cairn.yaml` and
/// `<config_dir>/cairn/config.yaml`. Pure lookup, no parsing.
pub fn discover_at(cwd: &Path, config_dir: Option<&Path>) -> Option<PathBuf> {
    let local = cwd.join(CONFIG_FILE);
    if local.is_file() {
        return Some(local);
    }
    let global = config_dir?.join("cairn").join("config.yaml");
    global.is_file().then_some(global)
}

/// Load config following the documented lookup order.
pub fn load(explicit: Option<&Path>) -> Result<Config, CoreError> {
    if let Some(path) = explicit {
        return load_from(path);
    }
    let cwd = std::env::current_dir().map_err(|e| io_err(".", e))?;
    match discover_at(&cwd, dirs::config_dir().as_deref()) {
        Some(path) => load_from(&path),
        None => Ok(Config::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_products_fall_back_to_raw_key() {
        let config = Config::default();
        let products = config.products();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].name, "cairn-raw");
        assert_eq!(products[0].raw_key, "cairn-raw");
    }

    #[test]
    fn timeouts_are_short_for_metadata_and_long_for_content() {
        let t = Timeouts::default();
        assert!(t.resolve() < Duration::from_secs(10));
        assert!(t.add() >= Duration::from_secs(60));
        assert!(t.pin() >= Duration::from_secs(60));
    }

    #[test]
    fn same_keys_are_rejected() {
        let config = Config {
            production_key: "cairn-raw".into(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut config = Config::default();
        config.timeouts.resolve_secs = 0;
        assert!(config.validate().is_err());
    }
}
