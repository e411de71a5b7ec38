use std::{path::PathBuf, time::Duration};

use crate::{
    ArtifactSet, CredentialSource, DeploymentManifest, DeploymentPipeline, EnvironmentConfig,
    IdentityProvisioner, InMemoryProvider, ManifestStore, ProviderClient, TokenParams,
    error::{DeployError, Result},
};

/// Default directory holding the compiled contract artifacts.
pub const DEFAULT_ARTIFACTS_DIR: &str = "target";

/// Runs a complete deployment: artifact pre-flight, identity provisioning,
/// the contract pipeline, and finally the manifest write.
///
/// The manifest is only written once every step has been confirmed.
#[derive(Debug, Clone)]
pub struct Deployer {
    /// Resolved environment configuration.
    pub config: EnvironmentConfig,
    /// Directory holding the compiled contract artifacts.
    pub artifacts_dir: PathBuf,
    /// Directory manifests and checkpoints are written to.
    pub manifest_dir: PathBuf,
    /// Token constructor parameters.
    pub token: TokenParams,
    /// Fixture account to deploy from on local networks.
    pub fixture_index: usize,
    /// Continue after the contracts confirmed by a previous, failed run.
    pub resume: bool,
    /// Overall bound on the contract pipeline.
    pub deadline: Option<Duration>,
}

impl Deployer {
    pub fn new(config: EnvironmentConfig) -> Self {
        Self {
            config,
            artifacts_dir: PathBuf::from(DEFAULT_ARTIFACTS_DIR),
            manifest_dir: PathBuf::from("."),
            token: TokenParams::default(),
            fixture_index: 0,
            resume: false,
            deadline: None,
        }
    }

    pub fn manifest_store(&self) -> ManifestStore {
        ManifestStore::new(&self.manifest_dir)
    }

    pub async fn deploy<P, C>(&self, provider: &P, credentials: &C) -> Result<DeploymentManifest>
    where
        P: ProviderClient,
        C: CredentialSource,
    {
        tracing::info!(
            environment = %self.config.name,
            kind = %self.config.kind,
            "Starting deployment process..."
        );

        let artifacts = ArtifactSet::load(&self.artifacts_dir)?;

        let identity = IdentityProvisioner::new()
            .fixture_index(self.fixture_index)
            .provision(provider, &self.config, credentials)
            .await?;

        tracing::info!(deployer = %identity.address(), state = %identity.state(), "Deployer ready");

        let store = self.manifest_store();
        let mut pipeline = DeploymentPipeline::new(provider, &self.config)
            .token_params(self.token.clone())
            .checkpoints(&store, self.resume);
        if let Some(deadline) = self.deadline {
            pipeline = pipeline.deadline(deadline);
        }

        let manifest = pipeline.deploy(&identity, &artifacts).await?;
        store.write(&manifest)?;

        tracing::info!("✓ Deployment complete!");
        tracing::info!("");
        tracing::info!("=== Contract addresses ===");
        tracing::info!("Private Token:      {}", manifest.contracts.token.contract.address);
        tracing::info!("Private Escrow:     {}", manifest.contracts.escrow.address);
        tracing::info!("Private Order Book: {}", manifest.contracts.order_book.address);

        Ok(manifest)
    }

    /// Run the whole deployment against an in-process network.
    ///
    /// Checkpoints and the manifest go to a scratch directory that is removed
    /// afterwards; nothing under `manifest_dir` is read or written.
    pub async fn dry_run<C: CredentialSource>(&self, credentials: &C) -> Result<DeploymentManifest> {
        let scratch = tempdir::TempDir::new("darkmarket-dry-run")
            .map_err(|e| DeployError::persist(std::env::temp_dir(), e))?;

        tracing::info!(scratch = %scratch.path().display(), "Dry run, persisting to a scratch directory");

        let deployer = Self {
            manifest_dir: scratch.path().to_path_buf(),
            resume: false,
            ..self.clone()
        };
        deployer.deploy(&InMemoryProvider::new(), credentials).await
    }
}
