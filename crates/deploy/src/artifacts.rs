//! Compiled contract artifacts.
//!
//! Artifacts are opaque JSON payloads produced by the contract compiler. The
//! only structure relied upon is a top-level `name` and, when present, the
//! `functions` list.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{DeployError, Result};

/// Entry point on the escrow that grants another contract access to escrowed funds.
pub const AUTHORIZE_METHOD: &str = "authorize_contract";

/// Role a contract plays in the market. Deployed in declaration order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ContractRole {
    Token,
    Escrow,
    OrderBook,
}

impl ContractRole {
    /// File name of the role's artifact inside the artifacts directory.
    pub fn artifact_file(&self) -> &'static str {
        match self {
            ContractRole::Token => "private_token.json",
            ContractRole::Escrow => "private_escrow.json",
            ContractRole::OrderBook => "private_orderbook.json",
        }
    }
}

/// A contract artifact ready to be deployed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContractArtifact {
    pub name: String,
    /// Hex SHA-256 of the artifact file.
    pub digest: String,
    pub payload: Value,
    #[serde(skip)]
    pub path: PathBuf,
}

impl ContractArtifact {
    /// Parse an artifact from its raw bytes. `origin` names it in errors.
    pub fn from_json(origin: impl Into<PathBuf>, bytes: &[u8]) -> Result<Self> {
        let path = origin.into();
        let malformed = |reason: String| DeployError::ArtifactMissing {
            name: path.display().to_string(),
            path: path.clone(),
            reason,
        };

        let payload: Value =
            serde_json::from_slice(bytes).map_err(|e| malformed(format!("invalid JSON: {e}")))?;

        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| malformed("missing top-level \"name\"".to_string()))?
            .to_string();

        if let Some(functions) = payload.get("functions") {
            if !functions.is_array() {
                return Err(malformed("\"functions\" is not an array".to_string()));
            }
        }

        Ok(Self {
            name,
            digest: hex::encode(Sha256::digest(bytes)),
            payload,
            path,
        })
    }

    /// Read and parse an artifact file.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| DeployError::ArtifactMissing {
            name: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_json(path, &bytes)
    }

    /// Whether the artifact declares `function`. Artifacts without a
    /// function list are treated as declaring everything.
    pub fn has_function(&self, function: &str) -> bool {
        match self.payload.get("functions").and_then(Value::as_array) {
            Some(functions) => functions
                .iter()
                .any(|f| f.get("name").and_then(Value::as_str) == Some(function)),
            None => true,
        }
    }
}

/// The three artifacts a deployment needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactSet {
    pub token: ContractArtifact,
    pub escrow: ContractArtifact,
    pub order_book: ContractArtifact,
}

impl ArtifactSet {
    /// Load and check every artifact in `dir`. Performs no network access.
    pub fn load(dir: &Path) -> Result<Self> {
        let load = |role: ContractRole| ContractArtifact::load(&dir.join(role.artifact_file()));

        let set = Self {
            token: load(ContractRole::Token)?,
            escrow: load(ContractRole::Escrow)?,
            order_book: load(ContractRole::OrderBook)?,
        };
        set.check()?;

        tracing::debug!(
            dir = %dir.display(),
            token = %set.token.name,
            escrow = %set.escrow.name,
            order_book = %set.order_book.name,
            "Loaded contract artifacts"
        );

        Ok(set)
    }

    /// Check that the escrow exposes the authorization entry point.
    pub fn check(&self) -> Result<()> {
        if !self.escrow.has_function(AUTHORIZE_METHOD) {
            return Err(DeployError::ArtifactMissing {
                name: self.escrow.name.clone(),
                path: self.escrow.path.clone(),
                reason: format!("escrow artifact does not declare `{AUTHORIZE_METHOD}`"),
            });
        }
        Ok(())
    }

    pub fn get(&self, role: ContractRole) -> &ContractArtifact {
        match role {
            ContractRole::Token => &self.token,
            ContractRole::Escrow => &self.escrow,
            ContractRole::OrderBook => &self.order_book,
        }
    }
}
