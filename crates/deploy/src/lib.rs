//! darkmarket-deploy - Deployment library for the dark market contracts.
//!
//! This crate provisions a signing identity for a local or remote network,
//! deploys the token, escrow and order book contracts in order, authorizes
//! the order book on the escrow, and persists a manifest that later tooling
//! reattaches to.

pub mod artifacts;
pub mod config;
pub mod credentials;
mod deployer;
pub mod error;
pub mod identity;
pub mod manifest;
pub mod pipeline;
pub mod provider;
pub mod rpc;

pub use alloy_core::primitives::Address;
pub use artifacts::{ArtifactSet, ContractArtifact, ContractRole};
pub use config::{
    ConfigDir, ConfigResolver, ConfigSource, DEFAULT_SELECTOR, EnvironmentConfig, EnvironmentKind,
    StaticConfigSource, Timeouts,
};
pub use credentials::{CredentialSource, EnvCredential, StaticCredential};
pub use deployer::{DEFAULT_ARTIFACTS_DIR, Deployer};
pub use error::DeployError;
pub use identity::{Identity, IdentityProvisioner};
pub use manifest::{DeploymentCheckpoint, DeploymentManifest, ManifestStore};
pub use pipeline::{DeployStep, DeployedContract, DeploymentPipeline, TokenParams};
pub use provider::{InMemoryProvider, JsonRpcProvider, ProviderClient, RegistrationState};

/// (De)serialize a `u128` as a decimal string.
pub(crate) mod serde_u128 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
