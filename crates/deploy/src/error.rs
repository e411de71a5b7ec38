//! Error taxonomy for the provisioning and deployment pipeline.
//!
//! Every variant is fatal to the current run. None are retried and none are
//! downgraded to warnings.

use std::path::PathBuf;

use crate::{EnvironmentKind, pipeline::DeployStep};

/// Errors surfaced by the deployment library.
#[derive(Debug, thiserror::Error, strum::IntoStaticStr)]
pub enum DeployError {
    /// No configuration record exists for the selector.
    #[error("configuration not found for environment '{selector}' (looked in {location})")]
    ConfigNotFound { selector: String, location: String },

    /// The configuration record exists but cannot be used.
    #[error("invalid configuration for environment '{selector}': {reason}")]
    InvalidConfig { selector: String, reason: String },

    /// A contract artifact is missing or malformed. Raised before any network call.
    #[error("contract artifact '{name}' missing or malformed at {}: {reason}", path.display())]
    ArtifactMissing {
        name: String,
        path: PathBuf,
        reason: String,
    },

    /// The provider could not be reached or could not serve the request.
    #[error("provider unavailable: {0:#}")]
    ProviderUnavailable(anyhow::Error),

    /// The remote signing secret was not supplied.
    #[error(
        "{var} not set. A {kind} deployment needs a signing secret.\n\
         Set it in the environment (e.g. `export {var}=0x...`) before running."
    )]
    MissingCredential { var: String, kind: EnvironmentKind },

    /// The remote signing secret is not a usable key.
    #[error("{var} is not a valid signing secret: {reason}")]
    InvalidCredential { var: String, reason: String },

    /// The account registration transaction was rejected or never confirmed.
    #[error("account registration failed for {address}: {reason:#}")]
    RegistrationFailed {
        address: String,
        reason: anyhow::Error,
    },

    /// One of the four ordered pipeline steps failed.
    #[error("deployment failed at step '{step}': {reason:#}")]
    DeploymentFailed {
        step: DeployStep,
        reason: anyhow::Error,
    },

    /// Reading or writing persisted state failed.
    #[error("failed to persist {}: {reason:#}", path.display())]
    PersistError {
        path: PathBuf,
        reason: anyhow::Error,
    },

    /// No manifest has been written for the environment.
    #[error("no {kind} deployment manifest at {}", path.display())]
    ManifestNotFound { kind: EnvironmentKind, path: PathBuf },
}

impl DeployError {
    /// The category name of this error, e.g. `"DeploymentFailed"`.
    pub fn category(&self) -> &'static str {
        self.into()
    }

    /// The pipeline step the error occurred at, if it is a deployment failure.
    pub fn step(&self) -> Option<DeployStep> {
        match self {
            Self::DeploymentFailed { step, .. } => Some(*step),
            _ => None,
        }
    }

    pub(crate) fn deployment(step: DeployStep, reason: impl Into<anyhow::Error>) -> Self {
        Self::DeploymentFailed {
            step,
            reason: reason.into(),
        }
    }

    pub(crate) fn persist(path: impl Into<PathBuf>, reason: impl Into<anyhow::Error>) -> Self {
        Self::PersistError {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = DeployError> = std::result::Result<T, E>;
