//! End-to-end tests for provisioning and deployment against the in-process network.
//!
//! Run with: cargo test --test pipeline_test

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use darkmarket_deploy::{
    Address, ArtifactSet, ContractRole, DeployError, DeployStep, Deployer, EnvironmentConfig,
    EnvironmentKind, IdentityProvisioner, InMemoryProvider, ManifestStore, RegistrationState,
    StaticCredential, Timeouts, TokenParams,
    provider::{Fault, TxKind},
};
use tempdir::TempDir;
use url::Url;

const SECRET: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

/// Test setup context containing common test infrastructure.
struct TestContext {
    _dir: TempDir,
    artifacts_dir: std::path::PathBuf,
    manifest_dir: std::path::PathBuf,
}

impl TestContext {
    fn new(test_prefix: &str) -> Self {
        init_test_tracing();

        let dir = TempDir::new(&format!("darkmarket-{test_prefix}")).expect("Failed to create temp dir");
        let artifacts_dir = dir.path().join("target");
        let manifest_dir = dir.path().join("deployments");
        std::fs::create_dir_all(&artifacts_dir).expect("Failed to create artifacts dir");
        write_artifacts(&artifacts_dir);

        Self {
            _dir: dir,
            artifacts_dir,
            manifest_dir,
        }
    }

    fn deployer(&self, kind: EnvironmentKind) -> Deployer {
        let mut deployer = Deployer::new(config(kind));
        deployer.artifacts_dir = self.artifacts_dir.clone();
        deployer.manifest_dir = self.manifest_dir.clone();
        deployer
    }

    fn store(&self) -> ManifestStore {
        ManifestStore::new(&self.manifest_dir)
    }
}

fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn config(kind: EnvironmentKind) -> EnvironmentConfig {
    EnvironmentConfig {
        name: format!("Dark Market {kind}"),
        kind,
        network_endpoint: Url::parse("http://localhost:8080").unwrap(),
        l1_rpc_url: None,
        timeouts: Timeouts {
            connect: Duration::from_millis(200),
            transaction: Duration::from_millis(200),
            confirmation: Duration::from_millis(200),
        },
    }
}

fn write_artifacts(dir: &Path) {
    let artifacts = [
        ("private_token.json", r#"{"name":"PrivateToken","functions":[{"name":"transfer"}]}"#),
        (
            "private_escrow.json",
            r#"{"name":"PrivateEscrow","functions":[{"name":"authorize_contract"}]}"#,
        ),
        ("private_orderbook.json", r#"{"name":"PrivateOrderBook","functions":[]}"#),
    ];
    for (file, json) in artifacts {
        std::fs::write(dir.join(file), json).expect("Failed to write artifact");
    }
}

fn deployments_of(provider: &InMemoryProvider, artifact: &str) -> usize {
    provider
        .transactions()
        .iter()
        .filter(|tx| matches!(&tx.kind, TxKind::Deployment { artifact: a, .. } if a == artifact))
        .count()
}

#[tokio::test]
async fn test_local_deployment_writes_manifest() -> Result<()> {
    let ctx = TestContext::new("local");
    let provider = InMemoryProvider::new();

    let mut deployer = ctx.deployer(EnvironmentKind::Local);
    deployer.token = TokenParams {
        initial_supply: 1_000_000,
        ..TokenParams::default()
    };

    let manifest = deployer.deploy(&provider, &StaticCredential::none()).await?;

    let fixture = Address::repeat_byte(0xaa);
    assert_eq!(manifest.deployer, fixture);
    assert_eq!(manifest.kind, EnvironmentKind::Local);
    assert_eq!(manifest.contracts.token.initial_supply, 1_000_000);

    let token = manifest.contracts.token.contract.address;
    let escrow = manifest.contracts.escrow.address;
    let order_book = manifest.contracts.order_book.address;
    assert_ne!(token, escrow);
    assert_ne!(escrow, order_book);
    assert_ne!(token, order_book);

    // Escrow authorized the order book on chain.
    let escrow_record = provider.contract(escrow).expect("escrow deployed");
    assert_eq!(escrow_record.authorized, vec![order_book]);

    // Persisted manifest matches the returned one.
    assert_eq!(ctx.store().read(EnvironmentKind::Local)?, manifest);

    // Fixture accounts are never registered by the deployer.
    assert_eq!(provider.registration_count(fixture), 0);

    Ok(())
}

#[tokio::test]
async fn test_steps_confirm_in_order() -> Result<()> {
    let ctx = TestContext::new("order");
    let provider = InMemoryProvider::new();

    let manifest = ctx
        .deployer(EnvironmentKind::Local)
        .deploy(&provider, &StaticCredential::none())
        .await?;

    let contracts = &manifest.contracts;
    let blocks = [
        contracts.get(ContractRole::Token).confirmation.block_number,
        contracts.get(ContractRole::Escrow).confirmation.block_number,
        contracts.get(ContractRole::OrderBook).confirmation.block_number,
        manifest.authorization.block_number,
    ];
    assert!(blocks.windows(2).all(|w| w[0] < w[1]), "blocks out of order: {blocks:?}");

    let kinds: Vec<_> = provider.transactions().into_iter().map(|tx| tx.kind).collect();
    assert!(matches!(&kinds[0], TxKind::Deployment { artifact, .. } if artifact == "PrivateToken"));
    assert!(matches!(&kinds[1], TxKind::Deployment { artifact, .. } if artifact == "PrivateEscrow"));
    assert!(matches!(&kinds[2], TxKind::Deployment { artifact, .. } if artifact == "PrivateOrderBook"));
    assert!(matches!(&kinds[3], TxKind::Call { method, .. } if method == "authorize_contract"));

    Ok(())
}

#[tokio::test]
async fn test_second_run_deploys_new_contracts_with_same_identity() -> Result<()> {
    let ctx = TestContext::new("rerun");
    let provider = InMemoryProvider::new();
    let deployer = ctx.deployer(EnvironmentKind::Local);

    let first = deployer.deploy(&provider, &StaticCredential::none()).await?;
    let second = deployer.deploy(&provider, &StaticCredential::none()).await?;

    assert_eq!(first.deployer, second.deployer);
    for role in [ContractRole::Token, ContractRole::Escrow, ContractRole::OrderBook] {
        assert_ne!(first.contracts.get(role).address, second.contracts.get(role).address);
    }
    assert_eq!(deployments_of(&provider, "PrivateToken"), 2);

    // The second manifest replaced the first.
    assert_eq!(ctx.store().read(EnvironmentKind::Local)?, second);

    Ok(())
}

#[tokio::test]
async fn test_remote_identity_is_deterministic_and_registered_once() -> Result<()> {
    init_test_tracing();
    let provider = InMemoryProvider::new();
    let config = config(EnvironmentKind::Remote);
    let credentials = StaticCredential::new(SECRET);
    let provisioner = IdentityProvisioner::new();

    let first = provisioner.provision(&provider, &config, &credentials).await?;
    let second = provisioner.provision(&provider, &config, &credentials).await?;

    assert_eq!(first.address(), second.address());
    assert_eq!(first.state(), RegistrationState::Registered);
    assert_eq!(second.state(), RegistrationState::Registered);
    assert!(provider.is_registered(first.address()));
    assert_eq!(provider.registration_count(first.address()), 1);
    assert!(first.public_key().is_some());

    Ok(())
}

#[tokio::test]
async fn test_remote_missing_credential_fails_before_network() {
    let ctx = TestContext::new("nocred");
    let provider = InMemoryProvider::new();

    let err = IdentityProvisioner::new()
        .provision(&provider, &config(EnvironmentKind::Remote), &StaticCredential::none())
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::MissingCredential { .. }), "got: {err}");
    assert_eq!(provider.request_count(), 0);

    let err = ctx
        .deployer(EnvironmentKind::Remote)
        .deploy(&provider, &StaticCredential::new("   "))
        .await
        .unwrap_err();
    assert_eq!(err.category(), "MissingCredential");
    assert_eq!(provider.request_count(), 0);
    assert!(!ctx.store().exists(EnvironmentKind::Remote));
}

#[tokio::test]
async fn test_invalid_secret_is_rejected() {
    let provider = InMemoryProvider::new();
    let err = IdentityProvisioner::new()
        .provision(
            &provider,
            &config(EnvironmentKind::Remote),
            &StaticCredential::new("not-a-key"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.category(), "InvalidCredential");
    assert_eq!(provider.request_count(), 0);
}

#[tokio::test]
async fn test_fixture_index_selects_account() -> Result<()> {
    init_test_tracing();
    let provider = InMemoryProvider::new();
    let config = config(EnvironmentKind::Local);

    let identity = IdentityProvisioner::new()
        .fixture_index(2)
        .provision(&provider, &config, &StaticCredential::none())
        .await?;
    assert_eq!(identity.address(), Address::repeat_byte(0xcc));

    let err = IdentityProvisioner::new()
        .fixture_index(5)
        .provision(&provider, &config, &StaticCredential::none())
        .await
        .unwrap_err();
    assert_eq!(err.category(), "ProviderUnavailable");

    Ok(())
}

#[tokio::test]
async fn test_offline_provider_is_unavailable() {
    let ctx = TestContext::new("offline");
    let provider = InMemoryProvider::new();
    provider.inject(Fault::Offline);

    let err = ctx
        .deployer(EnvironmentKind::Local)
        .deploy(&provider, &StaticCredential::none())
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::ProviderUnavailable(_)), "got: {err}");
    assert!(!ctx.store().exists(EnvironmentKind::Local));
}

#[tokio::test]
async fn test_rejected_registration_fails() {
    init_test_tracing();
    let provider = InMemoryProvider::new();
    provider.inject(Fault::RevertRegistration);

    let err = IdentityProvisioner::new()
        .provision(
            &provider,
            &config(EnvironmentKind::Remote),
            &StaticCredential::new(SECRET),
        )
        .await
        .unwrap_err();

    assert_eq!(err.category(), "RegistrationFailed");
}

#[tokio::test]
async fn test_any_failed_step_leaves_no_manifest() {
    let cases = [
        (Fault::RejectDeployment("PrivateToken".to_string()), DeployStep::Token),
        (Fault::RevertDeployment("PrivateEscrow".to_string()), DeployStep::Escrow),
        (Fault::StallDeployment("PrivateOrderBook".to_string()), DeployStep::OrderBook),
        (Fault::RevertCall("authorize_contract".to_string()), DeployStep::Authorization),
        (Fault::StallCall("authorize_contract".to_string()), DeployStep::Authorization),
    ];

    for (fault, step) in cases {
        let ctx = TestContext::new("failure");
        let provider = InMemoryProvider::new();
        provider.inject(fault.clone());

        let err = ctx
            .deployer(EnvironmentKind::Local)
            .deploy(&provider, &StaticCredential::none())
            .await
            .unwrap_err();

        assert_eq!(err.category(), "DeploymentFailed", "{fault:?}: {err}");
        assert_eq!(err.step(), Some(step), "{fault:?}: {err}");
        assert!(!ctx.store().exists(EnvironmentKind::Local), "{fault:?} left a manifest");
    }
}

#[tokio::test]
async fn test_failed_run_keeps_previous_manifest() -> Result<()> {
    let ctx = TestContext::new("keep");
    let provider = InMemoryProvider::new();
    let deployer = ctx.deployer(EnvironmentKind::Local);

    let first = deployer.deploy(&provider, &StaticCredential::none()).await?;

    provider.inject(Fault::RevertCall("authorize_contract".to_string()));
    assert!(deployer.deploy(&provider, &StaticCredential::none()).await.is_err());

    assert_eq!(ctx.store().read(EnvironmentKind::Local)?, first);
    Ok(())
}

#[tokio::test]
async fn test_environments_are_isolated() -> Result<()> {
    let ctx = TestContext::new("isolation");
    let provider = InMemoryProvider::new();

    let local = ctx
        .deployer(EnvironmentKind::Local)
        .deploy(&provider, &StaticCredential::none())
        .await?;
    let remote = ctx
        .deployer(EnvironmentKind::Remote)
        .deploy(&provider, &StaticCredential::new(SECRET))
        .await?;

    assert_ne!(local.deployer, remote.deployer);
    assert_eq!(ctx.store().read(EnvironmentKind::Local)?, local);
    assert_eq!(ctx.store().read(EnvironmentKind::Remote)?, remote);

    Ok(())
}

#[tokio::test]
async fn test_resume_continues_after_last_confirmed_step() -> Result<()> {
    let ctx = TestContext::new("resume");
    let provider = InMemoryProvider::new();
    let mut deployer = ctx.deployer(EnvironmentKind::Local);
    deployer.resume = true;

    provider.inject(Fault::StallDeployment("PrivateOrderBook".to_string()));
    let err = deployer
        .deploy(&provider, &StaticCredential::none())
        .await
        .unwrap_err();
    assert_eq!(err.step(), Some(DeployStep::OrderBook));

    let checkpoint = ctx
        .store()
        .read_checkpoint(EnvironmentKind::Local)?
        .expect("checkpoint written");
    assert_eq!(checkpoint.contracts.len(), 2);

    provider.clear_faults();
    let manifest = deployer.deploy(&provider, &StaticCredential::none()).await?;

    assert_eq!(
        manifest.contracts.token.contract.address,
        checkpoint.get(ContractRole::Token).unwrap().address
    );
    assert_eq!(manifest.contracts.escrow.address, checkpoint.get(ContractRole::Escrow).unwrap().address);
    assert_eq!(deployments_of(&provider, "PrivateToken"), 1);
    assert_eq!(deployments_of(&provider, "PrivateEscrow"), 1);
    assert_eq!(deployments_of(&provider, "PrivateOrderBook"), 2);

    // Success removes the checkpoint.
    assert!(ctx.store().read_checkpoint(EnvironmentKind::Local)?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_without_resume_a_failed_run_starts_over() -> Result<()> {
    let ctx = TestContext::new("noresume");
    let provider = InMemoryProvider::new();
    let deployer = ctx.deployer(EnvironmentKind::Local);

    provider.inject(Fault::RevertDeployment("PrivateEscrow".to_string()));
    assert!(deployer.deploy(&provider, &StaticCredential::none()).await.is_err());

    provider.clear_faults();
    deployer.deploy(&provider, &StaticCredential::none()).await?;

    assert_eq!(deployments_of(&provider, "PrivateToken"), 2);
    Ok(())
}

#[tokio::test]
async fn test_dry_run_leaves_persisted_state_alone() -> Result<()> {
    let ctx = TestContext::new("dryrun");
    let provider = InMemoryProvider::new();
    let mut deployer = ctx.deployer(EnvironmentKind::Local);
    deployer.resume = true;

    let real = deployer.deploy(&provider, &StaticCredential::none()).await?;

    // Leave a checkpoint behind from a failed follow-up run.
    provider.inject(Fault::StallDeployment("PrivateEscrow".to_string()));
    assert!(deployer.deploy(&provider, &StaticCredential::none()).await.is_err());
    let checkpoint = ctx.store().read_checkpoint(EnvironmentKind::Local)?;
    assert!(checkpoint.is_some());

    // Resume is ignored: the real checkpoint's addresses do not exist in memory.
    let dry = deployer.dry_run(&StaticCredential::none()).await?;

    assert_ne!(dry.contracts.token.contract.address, real.contracts.token.contract.address);
    assert_eq!(ctx.store().read(EnvironmentKind::Local)?, real);
    assert_eq!(ctx.store().read_checkpoint(EnvironmentKind::Local)?, checkpoint);
    assert_eq!(deployments_of(&provider, "PrivateToken"), 2);

    Ok(())
}

#[tokio::test]
async fn test_pipeline_deadline_fails_step_in_progress() {
    let ctx = TestContext::new("deadline");
    let provider = InMemoryProvider::new();
    provider.inject(Fault::StallDeployment("PrivateToken".to_string()));

    let mut config = config(EnvironmentKind::Local);
    config.timeouts.confirmation = Duration::from_secs(30);
    let mut deployer = ctx.deployer(EnvironmentKind::Local);
    deployer.config = config;
    deployer.deadline = Some(Duration::from_millis(100));

    let started = std::time::Instant::now();
    let err = deployer
        .deploy(&provider, &StaticCredential::none())
        .await
        .unwrap_err();

    assert_eq!(err.step(), Some(DeployStep::Token));
    assert!(err.to_string().contains("deadline"), "got: {err}");
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_missing_artifact_fails_before_network() {
    let ctx = TestContext::new("artifact");
    std::fs::remove_file(ctx.artifacts_dir.join("private_escrow.json")).unwrap();
    let provider = InMemoryProvider::new();

    let err = ctx
        .deployer(EnvironmentKind::Local)
        .deploy(&provider, &StaticCredential::none())
        .await
        .unwrap_err();

    assert_eq!(err.category(), "ArtifactMissing");
    assert_eq!(provider.request_count(), 0);
    assert!(ArtifactSet::load(&ctx.artifacts_dir).is_err());
}
