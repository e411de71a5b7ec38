//! Ordered deployment of the market contracts.
//!
//! The order is fixed: Token, Escrow, OrderBook, then the Escrow authorizes
//! the OrderBook. Each step waits for confirmation before the next one is
//! submitted, and any failure aborts the run.

use std::{future::Future, time::Duration};

use alloy_core::primitives::Address;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::{
    artifacts::{AUTHORIZE_METHOD, ArtifactSet, ContractArtifact, ContractRole},
    config::EnvironmentConfig,
    error::{DeployError, Result},
    identity::Identity,
    manifest::{DeploymentCheckpoint, DeploymentManifest, ManifestContracts, ManifestStore, TokenContract},
    provider::{
        self, CallRequest, DeployRequest, FieldValue, ProviderClient, TxHash, TxReceipt,
    },
};

/// One step of the pipeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum DeployStep {
    Token,
    Escrow,
    OrderBook,
    Authorization,
}

impl From<ContractRole> for DeployStep {
    fn from(role: ContractRole) -> Self {
        match role {
            ContractRole::Token => DeployStep::Token,
            ContractRole::Escrow => DeployStep::Escrow,
            ContractRole::OrderBook => DeployStep::OrderBook,
        }
    }
}

/// Where a transaction was confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    pub tx_hash: TxHash,
    pub block_number: u64,
}

impl From<TxReceipt> for Confirmation {
    fn from(receipt: TxReceipt) -> Self {
        Self {
            tx_hash: receipt.tx_hash,
            block_number: receipt.block_number,
        }
    }
}

/// A confirmed contract deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployedContract {
    pub role: ContractRole,
    pub address: Address,
    pub constructor_args: Vec<FieldValue>,
    pub artifact_digest: String,
    pub confirmation: Confirmation,
}

/// Token constructor parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenParams {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub initial_supply: u128,
}

impl Default for TokenParams {
    fn default() -> Self {
        Self {
            name: "DarkToken".to_string(),
            symbol: "DARK".to_string(),
            decimals: 18,
            initial_supply: 1_000_000,
        }
    }
}

impl TokenParams {
    /// `(owner, name, symbol, decimals, initial_supply)`.
    pub fn constructor_args(&self, owner: Address) -> Vec<FieldValue> {
        vec![
            FieldValue::Address(owner),
            FieldValue::Text(self.name.clone()),
            FieldValue::Text(self.symbol.clone()),
            FieldValue::Integer(self.decimals.into()),
            FieldValue::Integer(self.initial_supply),
        ]
    }
}

/// Deploys the market contracts with a provisioned identity.
///
/// The pipeline itself is not idempotent: every successful run creates a new
/// set of contracts. With a [`ManifestStore`] attached, confirmed contracts are
/// checkpointed so that a run started with `resume` continues after the last
/// confirmed deployment instead of starting over.
pub struct DeploymentPipeline<'a, P> {
    provider: &'a P,
    config: &'a EnvironmentConfig,
    token: TokenParams,
    deadline: Option<Duration>,
    checkpoints: Option<&'a ManifestStore>,
    resume: bool,
}

impl<'a, P: ProviderClient> DeploymentPipeline<'a, P> {
    pub fn new(provider: &'a P, config: &'a EnvironmentConfig) -> Self {
        Self {
            provider,
            config,
            token: TokenParams::default(),
            deadline: None,
            checkpoints: None,
            resume: false,
        }
    }

    pub fn token_params(mut self, token: TokenParams) -> Self {
        self.token = token;
        self
    }

    /// Bound the whole run. The step in progress when it expires fails.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Record confirmed deployments in `store`, and reuse them when `resume` is set.
    pub fn checkpoints(mut self, store: &'a ManifestStore, resume: bool) -> Self {
        self.checkpoints = Some(store);
        self.resume = resume;
        self
    }

    /// Run the four steps in order and return the resulting manifest.
    ///
    /// Nothing is persisted here apart from checkpoints; the caller writes the manifest.
    pub async fn deploy(
        &self,
        identity: &Identity,
        artifacts: &ArtifactSet,
    ) -> Result<DeploymentManifest> {
        artifacts.check()?;

        let owner = identity.address();
        let deadline = self.deadline.map(|d| Instant::now() + d);
        let mut checkpoint = self.starting_checkpoint(owner)?;

        tracing::info!(
            environment = %self.config.name,
            deployer = %owner,
            resumed = checkpoint.contracts.len(),
            "Starting contract deployment..."
        );

        let token = self
            .ensure_deployed(
                ContractRole::Token,
                &artifacts.token,
                self.token.constructor_args(owner),
                owner,
                &mut checkpoint,
                deadline,
            )
            .await?;

        let escrow = self
            .ensure_deployed(
                ContractRole::Escrow,
                &artifacts.escrow,
                vec![FieldValue::Address(owner)],
                owner,
                &mut checkpoint,
                deadline,
            )
            .await?;

        let order_book = self
            .ensure_deployed(
                ContractRole::OrderBook,
                &artifacts.order_book,
                vec![FieldValue::Address(owner)],
                owner,
                &mut checkpoint,
                deadline,
            )
            .await?;

        tracing::info!(
            escrow = %escrow.address,
            order_book = %order_book.address,
            "Authorizing order book on escrow..."
        );
        let authorization = run_step(
            DeployStep::Authorization,
            deadline,
            self.authorize(owner, &escrow, &order_book),
        )
        .await?;
        tracing::info!(block = authorization.block_number, "Order book authorized");

        Ok(DeploymentManifest {
            environment: self.config.name.clone(),
            kind: self.config.kind,
            network: self.config.network_endpoint.to_string(),
            deployer: owner,
            timestamp: chrono::Utc::now(),
            contracts: ManifestContracts {
                token: TokenContract {
                    contract: token,
                    name: self.token.name.clone(),
                    symbol: self.token.symbol.clone(),
                    decimals: self.token.decimals,
                    initial_supply: self.token.initial_supply,
                },
                escrow,
                order_book,
            },
            authorization,
        })
    }

    /// The checkpoint this run starts from: the stored one when resuming a
    /// compatible run, an empty one otherwise.
    fn starting_checkpoint(&self, owner: Address) -> Result<DeploymentCheckpoint> {
        let fresh = DeploymentCheckpoint::new(
            self.config.kind,
            self.config.network_endpoint.to_string(),
            owner,
        );

        let Some(store) = self.checkpoints.filter(|_| self.resume) else {
            return Ok(fresh);
        };

        match store.read_checkpoint(self.config.kind)? {
            Some(stored) if stored.is_compatible_with(&fresh) => {
                tracing::info!(
                    confirmed = stored.contracts.len(),
                    "Resuming from checkpoint"
                );
                Ok(stored)
            }
            Some(_) => {
                tracing::warn!("Checkpoint belongs to another deployer or network, starting over");
                Ok(fresh)
            }
            None => Ok(fresh),
        }
    }

    async fn ensure_deployed(
        &self,
        role: ContractRole,
        artifact: &ContractArtifact,
        args: Vec<FieldValue>,
        owner: Address,
        checkpoint: &mut DeploymentCheckpoint,
        deadline: Option<Instant>,
    ) -> Result<DeployedContract> {
        if let Some(existing) = checkpoint.get(role) {
            if existing.artifact_digest == artifact.digest && existing.constructor_args == args {
                tracing::info!(role = %role, address = %existing.address, "Reusing checkpointed contract");
                return Ok(existing.clone());
            }
        }

        tracing::info!(role = %role, artifact = %artifact.name, "Deploying contract...");
        let contract = run_step(
            role.into(),
            deadline,
            self.deploy_contract(role, artifact, args, owner),
        )
        .await?;
        tracing::info!(
            role = %role,
            address = %contract.address,
            block = contract.confirmation.block_number,
            "Contract deployed"
        );

        checkpoint.record(contract.clone());
        if let Some(store) = self.checkpoints {
            store.write_checkpoint(checkpoint)?;
        }

        Ok(contract)
    }

    async fn deploy_contract(
        &self,
        role: ContractRole,
        artifact: &ContractArtifact,
        args: Vec<FieldValue>,
        owner: Address,
    ) -> anyhow::Result<DeployedContract> {
        let pending = self
            .provider
            .deploy_contract(&DeployRequest {
                deployer: owner,
                artifact,
                args: &args,
            })
            .await
            .with_context(|| format!("{} deployment was rejected", artifact.name))?;

        tracing::debug!(
            role = %role,
            address = %pending.address,
            tx_hash = %pending.tx_hash,
            "Deployment submitted, awaiting confirmation"
        );

        let receipt =
            provider::await_confirmation(self.provider, &pending.tx_hash, self.config.timeouts.confirmation)
                .await?;

        Ok(DeployedContract {
            role,
            address: pending.address,
            constructor_args: args,
            artifact_digest: artifact.digest.clone(),
            confirmation: receipt.into(),
        })
    }

    async fn authorize(
        &self,
        owner: Address,
        escrow: &DeployedContract,
        order_book: &DeployedContract,
    ) -> anyhow::Result<Confirmation> {
        let args = [FieldValue::Address(order_book.address)];
        let tx_hash = self
            .provider
            .send_call(&CallRequest {
                from: owner,
                contract: escrow.address,
                method: AUTHORIZE_METHOD,
                args: &args,
            })
            .await
            .context("Authorization call was rejected")?;

        let receipt =
            provider::await_confirmation(self.provider, &tx_hash, self.config.timeouts.transaction)
                .await?;

        Ok(receipt.into())
    }
}

/// Run one step, attributing any failure (or an expired deadline) to it.
async fn run_step<T>(
    step: DeployStep,
    deadline: Option<Instant>,
    fut: impl Future<Output = anyhow::Result<T>>,
) -> Result<T> {
    let outcome = match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, fut).await {
            Ok(outcome) => outcome,
            Err(_) => Err(anyhow::anyhow!("pipeline deadline exceeded")),
        },
        None => fut.await,
    };

    outcome.map_err(|e| DeployError::deployment(step, e))
}
