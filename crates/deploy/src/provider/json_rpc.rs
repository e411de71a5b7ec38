//! JSON-RPC client for a private execution environment node.

use alloy_core::primitives::Address;
use serde_json::{Value, json};
use url::Url;

use super::{
    AccountRegistration, CallRequest, DeployRequest, PendingDeployment, ProviderClient,
    RegistrationState, TxHash, TxReceipt,
};
use crate::rpc;

/// [`ProviderClient`] speaking JSON-RPC over HTTP.
#[derive(Debug, Clone)]
pub struct JsonRpcProvider {
    client: reqwest::Client,
    url: Url,
}

impl JsonRpcProvider {
    pub fn new(url: Url) -> anyhow::Result<Self> {
        Ok(Self {
            client: rpc::create_client()?,
            url,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> anyhow::Result<T> {
        rpc::json_rpc_call(&self.client, self.url.as_str(), method, params).await
    }
}

impl ProviderClient for JsonRpcProvider {
    async fn ready(&self) -> anyhow::Result<()> {
        let info: Value = self.call("node_getInfo", vec![]).await?;
        tracing::debug!(node_info = %info, "Provider answered");
        Ok(())
    }

    async fn fixture_accounts(&self, count: usize) -> anyhow::Result<Vec<Address>> {
        self.call("pxe_getTestAccounts", vec![json!(count)]).await
    }

    async fn registration_state(&self, address: Address) -> anyhow::Result<RegistrationState> {
        self.call("pxe_getAccountState", vec![json!(address)]).await
    }

    async fn register_account(&self, registration: &AccountRegistration) -> anyhow::Result<TxHash> {
        self.call("pxe_registerAccount", vec![json!(registration)])
            .await
    }

    async fn deploy_contract(
        &self,
        request: &DeployRequest<'_>,
    ) -> anyhow::Result<PendingDeployment> {
        self.call("pxe_deployContract", vec![json!(request)]).await
    }

    async fn send_call(&self, request: &CallRequest<'_>) -> anyhow::Result<TxHash> {
        self.call("pxe_sendTx", vec![json!(request)]).await
    }

    async fn receipt(&self, tx_hash: &TxHash) -> anyhow::Result<Option<TxReceipt>> {
        self.call("pxe_getTxReceipt", vec![json!(tx_hash)]).await
    }
}
