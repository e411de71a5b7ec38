//! Signing identity provisioning.
//!
//! A local network hands out pre-funded fixture accounts. A remote network
//! needs an account derived from a secret, registered on chain exactly once:
//!
//! ```text
//! Unknown --query--> NotRegistered --register, confirm--> Registered
//!         \--query--------------------------------------> Registered
//! ```

use std::fmt;

use alloy_core::primitives::{Address, keccak256};
use k256::{AffinePoint, ecdsa::SigningKey, elliptic_curve::sec1::ToEncodedPoint};

use crate::{
    config::{EnvironmentConfig, EnvironmentKind},
    credentials::CredentialSource,
    error::{DeployError, Result},
    provider::{self, AccountRegistration, ProviderClient, RegistrationState},
};

/// Number of fixture accounts requested from a local network.
pub const FIXTURE_POOL_SIZE: usize = 3;

/// Key material behind an identity.
#[derive(Clone)]
pub enum SigningMaterial {
    /// A fixture account, signed for by the local network.
    Fixture { index: usize },
    /// A key derived from the remote secret.
    Secret(SigningKey),
}

impl fmt::Debug for SigningMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixture { index } => f.debug_struct("Fixture").field("index", index).finish(),
            Self::Secret(_) => f.write_str("Secret(..)"),
        }
    }
}

/// An account able to submit transactions through the provider it was provisioned with.
#[derive(Debug, Clone)]
pub struct Identity {
    address: Address,
    signer: SigningMaterial,
    state: RegistrationState,
}

impl Identity {
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn signer(&self) -> &SigningMaterial {
        &self.signer
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    /// Compressed SEC1 public key, hex encoded. `None` for fixtures.
    pub fn public_key(&self) -> Option<String> {
        match &self.signer {
            SigningMaterial::Secret(key) => Some(public_key_hex(key)),
            SigningMaterial::Fixture { .. } => None,
        }
    }
}

/// Parse a 32-byte hex secret (optionally `0x` prefixed) into a signing key.
pub fn derive_signing_key(secret: &str) -> anyhow::Result<SigningKey> {
    let secret = secret.trim();
    let bytes = hex::decode(secret.strip_prefix("0x").unwrap_or(secret))?;
    if bytes.len() != 32 {
        anyhow::bail!("expected 32 bytes, got {}", bytes.len());
    }
    Ok(SigningKey::from_slice(&bytes)?)
}

/// Address of a key: the last 20 bytes of the keccak256 of its uncompressed public key.
pub fn derive_address(key: &SigningKey) -> Address {
    let affine: &AffinePoint = key.verifying_key().as_ref();
    let encoded = affine.to_encoded_point(false);
    let hash = keccak256(&encoded.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

fn public_key_hex(key: &SigningKey) -> String {
    let affine: &AffinePoint = key.verifying_key().as_ref();
    format!("0x{}", hex::encode(affine.to_encoded_point(true).as_bytes()))
}

/// Resolves a ready-to-use [`Identity`] for an environment.
#[derive(Debug, Clone, Default)]
pub struct IdentityProvisioner {
    fixture_index: usize,
}

impl IdentityProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the fixture at `index` instead of the first one (local networks only).
    pub fn fixture_index(mut self, index: usize) -> Self {
        self.fixture_index = index;
        self
    }

    /// Provision an identity, branching on the environment kind.
    pub async fn provision<P, C>(
        &self,
        provider: &P,
        config: &EnvironmentConfig,
        credentials: &C,
    ) -> Result<Identity>
    where
        P: ProviderClient,
        C: CredentialSource,
    {
        match config.kind {
            EnvironmentKind::Local => self.provision_fixture(provider, config).await,
            EnvironmentKind::Remote => self.provision_remote(provider, config, credentials).await,
        }
    }

    async fn provision_fixture<P: ProviderClient>(
        &self,
        provider: &P,
        config: &EnvironmentConfig,
    ) -> Result<Identity> {
        provider::connect(provider, config).await?;

        let pool_size = FIXTURE_POOL_SIZE.max(self.fixture_index.saturating_add(1));
        let fixtures = provider
            .fixture_accounts(pool_size)
            .await
            .map_err(DeployError::ProviderUnavailable)?;

        let address = *fixtures.get(self.fixture_index).ok_or_else(|| {
            DeployError::ProviderUnavailable(anyhow::anyhow!(
                "Provider returned {} fixture accounts, need index {}",
                fixtures.len(),
                self.fixture_index
            ))
        })?;

        tracing::info!(address = %address, index = self.fixture_index, "Using fixture account");

        Ok(Identity {
            address,
            signer: SigningMaterial::Fixture {
                index: self.fixture_index,
            },
            state: RegistrationState::Registered,
        })
    }

    async fn provision_remote<P, C>(
        &self,
        provider: &P,
        config: &EnvironmentConfig,
        credentials: &C,
    ) -> Result<Identity>
    where
        P: ProviderClient,
        C: CredentialSource,
    {
        // Checked before touching the network.
        let secret = credentials
            .secret()
            .ok_or_else(|| DeployError::MissingCredential {
                var: credentials.name().to_string(),
                kind: config.kind,
            })?;

        let key = derive_signing_key(&secret).map_err(|e| DeployError::InvalidCredential {
            var: credentials.name().to_string(),
            reason: e.to_string(),
        })?;
        let address = derive_address(&key);
        tracing::info!(address = %address, "Derived account from secret");

        provider::connect(provider, config).await?;

        let state = provider
            .registration_state(address)
            .await
            .map_err(DeployError::ProviderUnavailable)?;

        let state = match state {
            RegistrationState::Registered => {
                tracing::info!(address = %address, "Account already registered, reusing it");
                RegistrationState::Registered
            }
            RegistrationState::NotRegistered => {
                self.register(provider, config, address, &key).await?
            }
        };

        Ok(Identity {
            address,
            signer: SigningMaterial::Secret(key),
            state,
        })
    }

    async fn register<P: ProviderClient>(
        &self,
        provider: &P,
        config: &EnvironmentConfig,
        address: Address,
        key: &SigningKey,
    ) -> Result<RegistrationState> {
        let failed = |reason: anyhow::Error| DeployError::RegistrationFailed {
            address: address.to_string(),
            reason,
        };

        tracing::info!(address = %address, "Registering account...");

        let registration = AccountRegistration {
            address,
            public_key: public_key_hex(key),
        };
        let tx_hash = provider.register_account(&registration).await.map_err(failed)?;

        tracing::info!(address = %address, tx_hash = %tx_hash, "Registration submitted, awaiting confirmation");

        let receipt =
            provider::await_confirmation(provider, &tx_hash, config.timeouts.confirmation)
                .await
                .map_err(failed)?;

        tracing::info!(
            address = %address,
            block = receipt.block_number,
            "Account registered"
        );

        Ok(RegistrationState::Registered)
    }
}
