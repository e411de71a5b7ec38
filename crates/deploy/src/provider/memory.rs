//! In-process execution network.
//!
//! Transactions are mined as soon as they are submitted, one block each, so
//! block numbers order every confirmed transaction. Faults can be injected to
//! exercise failure paths without a node.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
};

use alloy_core::primitives::Address;
use rand::Rng;

use super::{
    AccountRegistration, CallRequest, DeployRequest, FieldValue, PendingDeployment,
    ProviderClient, RegistrationState, TxHash, TxReceipt, TxStatus,
};

/// Number of fixture accounts the network is seeded with.
pub const DEFAULT_FIXTURE_COUNT: usize = 3;

/// A failure the network should produce.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Every request fails.
    Offline,
    /// Submitting a deployment of the named artifact is rejected.
    RejectDeployment(String),
    /// A deployment of the named artifact is mined but reverts.
    RevertDeployment(String),
    /// A deployment of the named artifact is never mined.
    StallDeployment(String),
    /// A call to the named method reverts.
    RevertCall(String),
    /// A call to the named method is never mined.
    StallCall(String),
    /// Account registrations revert.
    RevertRegistration,
}

/// What a recorded transaction did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxKind {
    Registration { address: Address },
    Deployment { artifact: String, address: Address },
    Call { contract: Address, method: String },
}

/// A transaction submitted to the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRecord {
    pub tx_hash: TxHash,
    pub kind: TxKind,
}

/// A contract living on the in-process network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractRecord {
    pub artifact: String,
    pub deployer: Address,
    pub args: Vec<FieldValue>,
    /// Contracts authorized through `authorize_contract`.
    pub authorized: Vec<Address>,
}

#[derive(Debug, Default)]
struct NetworkState {
    block: u64,
    fixtures: Vec<Address>,
    registered: HashSet<Address>,
    contracts: HashMap<Address, ContractRecord>,
    receipts: HashMap<TxHash, TxReceipt>,
    transactions: Vec<TxRecord>,
    faults: HashSet<Fault>,
}

impl NetworkState {
    fn has(&self, fault: &Fault) -> bool {
        self.faults.contains(fault)
    }

    /// Record a submitted transaction and, unless it stalls, mine it.
    fn submit(&mut self, kind: TxKind, status: Option<TxStatus>) -> TxHash {
        let tx_hash = TxHash(format!("0x{}", hex::encode(rand::rng().random::<[u8; 32]>())));

        if let Some(status) = status {
            self.block += 1;
            self.receipts.insert(
                tx_hash.clone(),
                TxReceipt {
                    tx_hash: tx_hash.clone(),
                    status,
                    block_number: self.block,
                },
            );
        }

        self.transactions.push(TxRecord {
            tx_hash: tx_hash.clone(),
            kind,
        });

        tx_hash
    }
}

/// [`ProviderClient`] backed by an in-process network.
#[derive(Debug)]
pub struct InMemoryProvider {
    state: Mutex<NetworkState>,
    requests: AtomicUsize,
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProvider {
    /// A network seeded with [`DEFAULT_FIXTURE_COUNT`] fixture accounts
    /// `0xaaaa..`, `0xbbbb..` and `0xcccc..`.
    pub fn new() -> Self {
        Self::with_fixtures(vec![
            Address::repeat_byte(0xaa),
            Address::repeat_byte(0xbb),
            Address::repeat_byte(0xcc),
        ])
    }

    pub fn with_fixtures(fixtures: Vec<Address>) -> Self {
        let state = NetworkState {
            registered: fixtures.iter().copied().collect(),
            fixtures,
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
            requests: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, NetworkState> {
        // A panic while holding the lock cannot leave the state half-updated.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count a request and fail it if the network is offline.
    fn begin(&self) -> anyhow::Result<MutexGuard<'_, NetworkState>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if state.has(&Fault::Offline) {
            anyhow::bail!("connection refused");
        }
        Ok(state)
    }

    pub fn inject(&self, fault: Fault) {
        self.state().faults.insert(fault);
    }

    pub fn clear_faults(&self) {
        self.state().faults.clear();
    }

    /// Number of requests served so far, successful or not.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// All transactions submitted so far, in submission order.
    pub fn transactions(&self) -> Vec<TxRecord> {
        self.state().transactions.clone()
    }

    pub fn registration_count(&self, address: Address) -> usize {
        self.state()
            .transactions
            .iter()
            .filter(|tx| matches!(tx.kind, TxKind::Registration { address: a } if a == address))
            .count()
    }

    pub fn is_registered(&self, address: Address) -> bool {
        self.state().registered.contains(&address)
    }

    pub fn contract(&self, address: Address) -> Option<ContractRecord> {
        self.state().contracts.get(&address).cloned()
    }

    pub fn block_number(&self) -> u64 {
        self.state().block
    }
}

impl ProviderClient for InMemoryProvider {
    async fn ready(&self) -> anyhow::Result<()> {
        self.begin().map(|_| ())
    }

    async fn fixture_accounts(&self, count: usize) -> anyhow::Result<Vec<Address>> {
        let state = self.begin()?;
        Ok(state.fixtures.iter().take(count).copied().collect())
    }

    async fn registration_state(&self, address: Address) -> anyhow::Result<RegistrationState> {
        let state = self.begin()?;
        Ok(if state.registered.contains(&address) {
            RegistrationState::Registered
        } else {
            RegistrationState::NotRegistered
        })
    }

    async fn register_account(&self, registration: &AccountRegistration) -> anyhow::Result<TxHash> {
        let mut state = self.begin()?;
        let address = registration.address;

        if state.registered.contains(&address) {
            anyhow::bail!("Account {} is already registered", address);
        }

        let status = if state.has(&Fault::RevertRegistration) {
            TxStatus::Reverted
        } else {
            state.registered.insert(address);
            TxStatus::Success
        };

        Ok(state.submit(TxKind::Registration { address }, Some(status)))
    }

    async fn deploy_contract(
        &self,
        request: &DeployRequest<'_>,
    ) -> anyhow::Result<PendingDeployment> {
        let mut state = self.begin()?;
        let name = request.artifact.name.clone();

        if state.has(&Fault::RejectDeployment(name.clone())) {
            anyhow::bail!("Deployment of {} rejected by the network", name);
        }
        if !state.registered.contains(&request.deployer) {
            anyhow::bail!("Deployer {} is not a registered account", request.deployer);
        }

        let address = Address::from(rand::rng().random::<[u8; 20]>());
        let status = if state.has(&Fault::StallDeployment(name.clone())) {
            None
        } else if state.has(&Fault::RevertDeployment(name.clone())) {
            Some(TxStatus::Reverted)
        } else {
            state.contracts.insert(
                address,
                ContractRecord {
                    artifact: name.clone(),
                    deployer: request.deployer,
                    args: request.args.to_vec(),
                    authorized: Vec::new(),
                },
            );
            Some(TxStatus::Success)
        };

        let tx_hash = state.submit(
            TxKind::Deployment {
                artifact: name,
                address,
            },
            status,
        );

        Ok(PendingDeployment { address, tx_hash })
    }

    async fn send_call(&self, request: &CallRequest<'_>) -> anyhow::Result<TxHash> {
        let mut state = self.begin()?;
        let method = request.method.to_string();

        if !state.contracts.contains_key(&request.contract) {
            anyhow::bail!("No contract at {}", request.contract);
        }

        let status = if state.has(&Fault::StallCall(method.clone())) {
            None
        } else if state.has(&Fault::RevertCall(method.clone())) {
            Some(TxStatus::Reverted)
        } else {
            if method == crate::artifacts::AUTHORIZE_METHOD {
                let target = match request.args.first() {
                    Some(FieldValue::Address(target)) => *target,
                    other => anyhow::bail!("{} expects an address, got {:?}", method, other),
                };
                if let Some(contract) = state.contracts.get_mut(&request.contract) {
                    contract.authorized.push(target);
                }
            }
            Some(TxStatus::Success)
        };

        Ok(state.submit(
            TxKind::Call {
                contract: request.contract,
                method,
            },
            status,
        ))
    }

    async fn receipt(&self, tx_hash: &TxHash) -> anyhow::Result<Option<TxReceipt>> {
        let state = self.begin()?;
        Ok(state.receipts.get(tx_hash).cloned())
    }
}
