//! Environment configuration.
//!
//! One JSON record per environment lives at `<config dir>/<selector>.json`.
//! Individual fields can be overridden with `DARKMARKET_*` environment
//! variables, e.g. `DARKMARKET_NODE_URL`.

use std::{collections::HashMap, path::PathBuf, time::Duration};

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Json},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DeployError, Result};

/// The selector used when none is given.
pub const DEFAULT_SELECTOR: &str = "local";

/// Prefix for environment variable overrides of record fields.
pub const ENV_OVERRIDE_PREFIX: &str = "DARKMARKET_";

/// Kind of network a configuration targets.
///
/// The kind alone decides how an identity is provisioned.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentKind {
    /// Ephemeral local test network with pre-funded fixture accounts.
    #[strum(to_string = "local", serialize = "sandbox")]
    #[serde(alias = "sandbox")]
    Local,
    /// Persistent remote network, accounts derived from a secret.
    #[strum(to_string = "remote", serialize = "devnet")]
    #[serde(alias = "devnet")]
    Remote,
}

/// Network section of a configuration record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRecord {
    pub node_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l1_rpc_url: Option<String>,
}

/// Timeout section of a configuration record, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutsRecord {
    pub deploy_timeout: u64,
    pub tx_timeout: u64,
    pub wait_timeout: u64,
}

/// A configuration record as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentRecord {
    pub name: String,
    pub environment: String,
    pub network: NetworkRecord,
    pub timeouts: TimeoutsRecord,
}

/// Timeouts applied to network operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// How long to wait for the provider to become ready.
    pub connect: Duration,
    /// How long to wait for a plain transaction to be confirmed.
    pub transaction: Duration,
    /// How long to wait for a deployment or registration to be confirmed.
    pub confirmation: Duration,
}

impl From<&TimeoutsRecord> for Timeouts {
    fn from(record: &TimeoutsRecord) -> Self {
        Self {
            connect: Duration::from_millis(record.wait_timeout),
            transaction: Duration::from_millis(record.tx_timeout),
            confirmation: Duration::from_millis(record.deploy_timeout),
        }
    }
}

/// Resolved, validated configuration for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentConfig {
    pub name: String,
    pub kind: EnvironmentKind,
    pub network_endpoint: Url,
    pub l1_rpc_url: Option<Url>,
    pub timeouts: Timeouts,
}

impl EnvironmentConfig {
    /// Validate a raw record. Performs no network access.
    pub fn from_record(selector: &str, record: &EnvironmentRecord) -> Result<Self> {
        let invalid = |reason: String| DeployError::InvalidConfig {
            selector: selector.to_string(),
            reason,
        };

        let kind: EnvironmentKind = record
            .environment
            .parse()
            .map_err(|_| invalid(format!("unknown environment '{}'", record.environment)))?;

        let network_endpoint = Url::parse(&record.network.node_url)
            .map_err(|e| invalid(format!("bad nodeUrl '{}': {e}", record.network.node_url)))?;

        let l1_rpc_url = record
            .network
            .l1_rpc_url
            .as_deref()
            .map(|raw| Url::parse(raw).map_err(|e| invalid(format!("bad l1RpcUrl '{raw}': {e}"))))
            .transpose()?;

        let t = &record.timeouts;
        if t.deploy_timeout == 0 || t.tx_timeout == 0 || t.wait_timeout == 0 {
            return Err(invalid("timeouts must be greater than zero".to_string()));
        }

        Ok(Self {
            name: record.name.clone(),
            kind,
            network_endpoint,
            l1_rpc_url,
            timeouts: Timeouts::from(t),
        })
    }

    pub fn is_local(&self) -> bool {
        self.kind == EnvironmentKind::Local
    }
}

/// Somewhere configuration records can be loaded from.
pub trait ConfigSource {
    /// Human readable location of the record for `selector`, for error messages.
    fn location(&self, selector: &str) -> String;

    /// Load the record for `selector`, or `None` if there is none.
    fn load(&self, selector: &str) -> anyhow::Result<Option<EnvironmentRecord>>;
}

/// Records stored as `<dir>/<selector>.json`, layered with env overrides.
#[derive(Debug, Clone)]
pub struct ConfigDir {
    pub dir: PathBuf,
}

impl ConfigDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, selector: &str) -> PathBuf {
        self.dir.join(format!("{selector}.json"))
    }

    /// Env overrides keyed onto the camelCase record fields.
    ///
    /// Lowercasing is disabled so the mapped paths keep their case; the
    /// variable names themselves match case-insensitively.
    fn env_overrides() -> Env {
        Env::prefixed(ENV_OVERRIDE_PREFIX)
            .only(&["name", "node_url", "l1_rpc_url", "deploy_timeout", "tx_timeout", "wait_timeout"])
            .map(|key| match key.as_str().to_ascii_lowercase().as_str() {
                "node_url" => "network.nodeUrl".into(),
                "l1_rpc_url" => "network.l1RpcUrl".into(),
                "deploy_timeout" => "timeouts.deployTimeout".into(),
                "tx_timeout" => "timeouts.txTimeout".into(),
                "wait_timeout" => "timeouts.waitTimeout".into(),
                other => other.to_string().into(),
            })
            .lowercase(false)
    }
}

impl ConfigSource for ConfigDir {
    fn location(&self, selector: &str) -> String {
        self.path(selector).display().to_string()
    }

    fn load(&self, selector: &str) -> anyhow::Result<Option<EnvironmentRecord>> {
        let path = self.path(selector);
        if !path.exists() {
            return Ok(None);
        }

        let record = Figment::new()
            .merge(Json::file(&path))
            .merge(Self::env_overrides())
            .extract()
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        Ok(Some(record))
    }
}

/// In-memory records keyed by selector.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigSource {
    records: HashMap<String, EnvironmentRecord>,
}

impl StaticConfigSource {
    pub fn with(mut self, selector: impl Into<String>, record: EnvironmentRecord) -> Self {
        self.records.insert(selector.into().to_ascii_lowercase(), record);
        self
    }
}

impl ConfigSource for StaticConfigSource {
    fn location(&self, selector: &str) -> String {
        format!("<memory>/{selector}")
    }

    fn load(&self, selector: &str) -> anyhow::Result<Option<EnvironmentRecord>> {
        Ok(self.records.get(selector).cloned())
    }
}

/// Resolves a selector to an [`EnvironmentConfig`].
#[derive(Debug, Clone)]
pub struct ConfigResolver<S> {
    source: S,
}

impl<S: ConfigSource> ConfigResolver<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Load the configuration for `selector` (case-insensitive).
    pub fn load(&self, selector: &str) -> Result<EnvironmentConfig> {
        let selector = selector.trim().to_ascii_lowercase();

        let record = self
            .source
            .load(&selector)
            .map_err(|e| DeployError::InvalidConfig {
                selector: selector.clone(),
                reason: format!("{e:#}"),
            })?
            .ok_or_else(|| DeployError::ConfigNotFound {
                selector: selector.clone(),
                location: self.source.location(&selector),
            })?;

        let config = EnvironmentConfig::from_record(&selector, &record)?;

        tracing::info!(
            name = %config.name,
            kind = %config.kind,
            endpoint = %config.network_endpoint,
            "Loaded configuration"
        );

        Ok(config)
    }
}
