//! Request filter configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{FilterError, Result};

/// Options controlling which destination addresses are admitted.
///
/// Serialized keys use the established camelCase names
/// (`allowPrivateIPAddress`, `allowIPAddressList`, ...), so existing
/// configuration files keep working.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    /// Admit addresses outside the unicast range (loopback, private, ...).
    #[serde(default, rename = "allowPrivateIPAddress")]
    pub allow_private_ip_address: bool,

    /// Admit meta addresses (`0.0.0.0`, `::`).
    #[serde(default, rename = "allowMetaIPAddress")]
    pub allow_meta_ip_address: bool,

    /// Addresses or CIDR ranges that are always admitted.
    #[serde(default, rename = "allowIPAddressList")]
    pub allow_ip_address_list: Vec<String>,

    /// Addresses or CIDR ranges that are denied.
    #[serde(default, rename = "denyIPAddressList")]
    pub deny_ip_address_list: Vec<String>,

    /// Refuse literal non-unicast targets before connecting, so redirects
    /// cannot scan internal ports.
    #[serde(default, rename = "stopPortScanningByUrlRedirection")]
    pub stop_port_scanning_by_url_redirection: bool,

    /// How long a rejected socket gets to half-close before it is destroyed.
    #[serde(default = "default_teardown_grace_ms")]
    pub teardown_grace_ms: u64,
}

fn default_teardown_grace_ms() -> u64 {
    1000
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            allow_private_ip_address: false,
            allow_meta_ip_address: false,
            allow_ip_address_list: Vec::new(),
            deny_ip_address_list: Vec::new(),
            stop_port_scanning_by_url_redirection: false,
            teardown_grace_ms: default_teardown_grace_ms(),
        }
    }
}

impl FilterOptions {
    /// Create the default (strict) options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for options.
    pub fn builder() -> FilterOptionsBuilder {
        FilterOptionsBuilder::new()
    }

    /// Load options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            FilterError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse options from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| FilterError::Config(e.to_string()))
    }

    /// Serialize options to TOML text.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| FilterError::Config(e.to_string()))
    }

    /// Grace period for the half-close during teardown.
    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }
}

/// Builder for FilterOptions.
#[derive(Debug, Default)]
pub struct FilterOptionsBuilder {
    options: FilterOptions,
}

impl FilterOptionsBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            options: FilterOptions::new(),
        }
    }

    /// Set whether non-unicast addresses are admitted.
    pub fn allow_private(mut self, allow: bool) -> Self {
        self.options.allow_private_ip_address = allow;
        self
    }

    /// Set whether meta addresses are admitted.
    pub fn allow_meta(mut self, allow: bool) -> Self {
        self.options.allow_meta_ip_address = allow;
        self
    }

    /// Add an allowed address or CIDR range.
    pub fn allow_ip(mut self, entry: impl Into<String>) -> Self {
        self.options.allow_ip_address_list.push(entry.into());
        self
    }

    /// Add multiple allowed addresses or CIDR ranges.
    pub fn allow_ips(mut self, entries: impl IntoIterator<Item = impl Into<String>>) -> Self {
        for entry in entries {
            self.options.allow_ip_address_list.push(entry.into());
        }
        self
    }

    /// Add a denied address or CIDR range.
    pub fn deny_ip(mut self, entry: impl Into<String>) -> Self {
        self.options.deny_ip_address_list.push(entry.into());
        self
    }

    /// Add multiple denied addresses or CIDR ranges.
    pub fn deny_ips(mut self, entries: impl IntoIterator<Item = impl Into<String>>) -> Self {
        for entry in entries {
            self.options.deny_ip_address_list.push(entry.into());
        }
        self
    }

    /// Set the port-scanning guard.
    pub fn stop_port_scanning(mut self, stop: bool) -> Self {
        self.options.stop_port_scanning_by_url_redirection = stop;
        self
    }

    /// Set the teardown grace period.
    pub fn teardown_grace(mut self, grace: Duration) -> Self {
        self.options.teardown_grace_ms = grace.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    /// Build the options.
    pub fn build(self) -> FilterOptions {
        self.options
    }
}
