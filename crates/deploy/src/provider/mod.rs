//! Boundary to the execution network.
//!
//! Everything the pipeline needs from the network goes through
//! [`ProviderClient`]. Two implementations ship with the crate: a JSON-RPC
//! client for real nodes and an in-process network for dry runs and tests.

mod json_rpc;
pub mod memory;

use std::{future::Future, time::Duration};

use alloy_core::primitives::Address;
use anyhow::Context;
use serde::{Deserialize, Serialize};

pub use json_rpc::JsonRpcProvider;
pub use memory::{Fault, InMemoryProvider, TxKind, TxRecord};

use crate::{
    artifacts::ContractArtifact,
    config::EnvironmentConfig,
    error::{DeployError, Result},
    rpc,
};

/// Hash identifying a submitted transaction.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display, derive_more::From,
)]
#[serde(transparent)]
pub struct TxHash(pub String);

/// On-chain registration state of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "kebab-case")]
pub enum RegistrationState {
    NotRegistered,
    Registered,
}

/// Final status of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "kebab-case")]
pub enum TxStatus {
    Success,
    Reverted,
    Dropped,
}

/// Receipt of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub status: TxStatus,
    pub block_number: u64,
}

/// A deployment that was accepted by the provider but not yet confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDeployment {
    pub address: Address,
    pub tx_hash: TxHash,
}

/// A constructor or call argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum FieldValue {
    Address(Address),
    Text(String),
    Integer(#[serde(with = "crate::serde_u128")] u128),
}

/// Public registration data of an account. Never carries the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRegistration {
    pub address: Address,
    pub public_key: String,
}

/// A contract deployment request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest<'a> {
    pub deployer: Address,
    pub artifact: &'a ContractArtifact,
    pub args: &'a [FieldValue],
}

/// A state-changing call on a deployed contract.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest<'a> {
    pub from: Address,
    pub contract: Address,
    pub method: &'a str,
    pub args: &'a [FieldValue],
}

/// Client for the execution network.
///
/// Submissions return as soon as the provider accepts the transaction;
/// confirmation is observed separately through [`ProviderClient::receipt`].
pub trait ProviderClient: Send + Sync {
    /// Succeeds once the provider is able to serve requests.
    fn ready(&self) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Addresses of the first `count` pre-funded fixture accounts.
    fn fixture_accounts(
        &self,
        count: usize,
    ) -> impl Future<Output = anyhow::Result<Vec<Address>>> + Send;

    fn registration_state(
        &self,
        address: Address,
    ) -> impl Future<Output = anyhow::Result<RegistrationState>> + Send;

    fn register_account(
        &self,
        registration: &AccountRegistration,
    ) -> impl Future<Output = anyhow::Result<TxHash>> + Send;

    fn deploy_contract(
        &self,
        request: &DeployRequest<'_>,
    ) -> impl Future<Output = anyhow::Result<PendingDeployment>> + Send;

    fn send_call(
        &self,
        request: &CallRequest<'_>,
    ) -> impl Future<Output = anyhow::Result<TxHash>> + Send;

    /// The receipt of `tx_hash`, or `None` while it is still pending.
    fn receipt(
        &self,
        tx_hash: &TxHash,
    ) -> impl Future<Output = anyhow::Result<Option<TxReceipt>>> + Send;
}

/// Wait until the provider is ready, bounded by the connect timeout.
pub async fn connect<P: ProviderClient>(provider: &P, config: &EnvironmentConfig) -> Result<()> {
    tracing::info!(endpoint = %config.network_endpoint, "Connecting to provider...");

    rpc::wait_until_ready("provider", config.timeouts.connect, || provider.ready())
        .await
        .with_context(|| format!("Provider at {} is not reachable", config.network_endpoint))
        .map_err(DeployError::ProviderUnavailable)?;

    tracing::info!(endpoint = %config.network_endpoint, "Connected to provider");
    Ok(())
}

/// Poll for the receipt of `tx_hash` until it is mined or `timeout` elapses.
///
/// Fails if the transaction did not succeed.
pub async fn await_confirmation<P: ProviderClient>(
    provider: &P,
    tx_hash: &TxHash,
    timeout: Duration,
) -> anyhow::Result<TxReceipt> {
    let receipt = rpc::poll_until(&format!("confirmation of {tx_hash}"), timeout, || {
        provider.receipt(tx_hash)
    })
    .await?;

    match receipt.status {
        TxStatus::Success => {
            tracing::debug!(tx_hash = %tx_hash, block = receipt.block_number, "Transaction confirmed");
            Ok(receipt)
        }
        status => anyhow::bail!("Transaction {} was {}", tx_hash, status),
    }
}
