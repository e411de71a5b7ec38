//! Persisted deployment manifests.
//!
//! One manifest per environment kind, stored as `deployment-<kind>.json` in
//! the manifest directory, so local and remote runs never overwrite each
//! other. Files are written to a temporary sibling and renamed into place,
//! so a manifest on disk is always complete.
//!
//! Concurrent runs against the same environment are not supported. The
//! advisory lock taken while writing only protects the write itself.

use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
};

use alloy_core::primitives::Address;
use anyhow::Context;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    artifacts::ContractRole,
    config::EnvironmentKind,
    error::{DeployError, Result},
    pipeline::{Confirmation, DeployedContract},
};

/// Lock file guarding writes inside a manifest directory.
pub const LOCK_FILENAME: &str = ".darkmarket.lock";

/// The token deployment together with its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenContract {
    #[serde(flatten)]
    pub contract: DeployedContract,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    /// Written as a decimal string, e.g. `"1000000"`, so values past 2^53
    /// survive JSON readers that parse numbers as doubles.
    #[serde(with = "crate::serde_u128")]
    pub initial_supply: u128,
}

/// The deployed contracts, keyed by role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestContracts {
    pub token: TokenContract,
    pub escrow: DeployedContract,
    pub order_book: DeployedContract,
}

impl ManifestContracts {
    pub fn get(&self, role: ContractRole) -> &DeployedContract {
        match role {
            ContractRole::Token => &self.token.contract,
            ContractRole::Escrow => &self.escrow,
            ContractRole::OrderBook => &self.order_book,
        }
    }
}

/// Record of a completed deployment. Only ever produced by a run in which
/// all three contracts and the authorization were confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentManifest {
    /// Name of the environment configuration.
    pub environment: String,
    pub kind: EnvironmentKind,
    /// Provider endpoint the contracts were deployed through.
    pub network: String,
    pub deployer: Address,
    pub timestamp: DateTime<Utc>,
    pub contracts: ManifestContracts,
    /// Confirmation of the escrow authorizing the order book.
    pub authorization: Confirmation,
}

/// Contracts confirmed so far by an unfinished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentCheckpoint {
    pub kind: EnvironmentKind,
    pub network: String,
    pub deployer: Address,
    /// Confirmed contracts, in deployment order.
    pub contracts: Vec<DeployedContract>,
}

impl DeploymentCheckpoint {
    pub fn new(kind: EnvironmentKind, network: String, deployer: Address) -> Self {
        Self {
            kind,
            network,
            deployer,
            contracts: Vec::new(),
        }
    }

    pub fn get(&self, role: ContractRole) -> Option<&DeployedContract> {
        self.contracts.iter().find(|c| c.role == role)
    }

    /// Record a confirmed contract. Entries for the same or later roles are
    /// dropped, since they were deployed against a previous version of it.
    pub fn record(&mut self, contract: DeployedContract) {
        self.contracts.retain(|c| c.role < contract.role);
        self.contracts.push(contract);
    }

    /// Whether this checkpoint was taken by the same deployer on the same network.
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        self.kind == other.kind && self.network == other.network && self.deployer == other.deployer
    }
}

/// Reads and writes manifests and checkpoints in one directory.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    dir: PathBuf,
}

impl ManifestStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest_path(&self, kind: EnvironmentKind) -> PathBuf {
        self.dir.join(format!("deployment-{kind}.json"))
    }

    pub fn checkpoint_path(&self, kind: EnvironmentKind) -> PathBuf {
        self.dir.join(format!("checkpoint-{kind}.json"))
    }

    pub fn exists(&self, kind: EnvironmentKind) -> bool {
        self.manifest_path(kind).exists()
    }

    /// Persist `manifest`, replacing any previous manifest of the same kind,
    /// and discard that kind's checkpoint.
    pub fn write(&self, manifest: &DeploymentManifest) -> Result<PathBuf> {
        let path = self.manifest_path(manifest.kind);
        self.write_json(&path, manifest)?;

        // The manifest is in place; a stale checkpoint only affects `--resume`.
        if let Err(e) = self.clear_checkpoint(manifest.kind) {
            tracing::warn!(error = %e, "Failed to remove checkpoint after saving manifest");
        }

        tracing::info!(path = %path.display(), kind = %manifest.kind, "Deployment manifest saved");
        Ok(path)
    }

    /// Load the manifest for `kind`.
    pub fn read(&self, kind: EnvironmentKind) -> Result<DeploymentManifest> {
        let path = self.manifest_path(kind);
        if !path.exists() {
            return Err(DeployError::ManifestNotFound { kind, path });
        }

        let manifest: DeploymentManifest = Self::read_json(&path)?;
        if manifest.kind != kind {
            return Err(DeployError::persist(
                &path,
                anyhow::anyhow!("manifest is for a {} environment", manifest.kind),
            ));
        }
        Ok(manifest)
    }

    pub fn read_checkpoint(&self, kind: EnvironmentKind) -> Result<Option<DeploymentCheckpoint>> {
        let path = self.checkpoint_path(kind);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_json(&path).map(Some)
    }

    pub fn write_checkpoint(&self, checkpoint: &DeploymentCheckpoint) -> Result<()> {
        let path = self.checkpoint_path(checkpoint.kind);
        self.write_json(&path, checkpoint)?;
        tracing::debug!(path = %path.display(), confirmed = checkpoint.contracts.len(), "Checkpoint saved");
        Ok(())
    }

    pub fn clear_checkpoint(&self, kind: EnvironmentKind) -> Result<()> {
        let path = self.checkpoint_path(kind);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DeployError::persist(&path, e)),
        }
    }

    fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))
            .map_err(|e| DeployError::persist(path, e))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
            .map_err(|e| DeployError::persist(path, e))
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        self.write_atomic(path, value)
            .map_err(|e| DeployError::persist(path, e))
    }

    fn write_atomic<T: Serialize>(&self, path: &Path, value: &T) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.dir.join(LOCK_FILENAME))
            .context("Failed to open lock file")?;
        lock.try_lock_exclusive()
            .context("Another run is writing to this manifest directory")?;

        let json = serde_json::to_string_pretty(value).context("Failed to serialize")?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move {} into place", tmp.display()))?;

        Ok(())
    }
}
