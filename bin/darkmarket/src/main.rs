//! darkmarket provisions a deployer identity and deploys the dark market contracts.

mod cli;

use std::{process::ExitCode, time::Duration};

use anyhow::Result;
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};

use cli::{Cli, Command, DeployArgs, ShowArgs};
use darkmarket_deploy::{
    ConfigDir, ConfigResolver, ContractRole, DeployError, Deployer, DeploymentManifest,
    EnvCredential, EnvironmentConfig, JsonRpcProvider, ManifestStore,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<DeployError>() {
                Some(deploy_err) => tracing::error!(
                    category = deploy_err.category(),
                    step = ?deploy_err.step(),
                    "{deploy_err}"
                ),
                None => tracing::error!("{err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = ConfigResolver::new(ConfigDir::new(&cli.config_dir)).load(&cli.env)?;

    match cli.command.unwrap_or_else(|| Command::Deploy(DeployArgs::default())) {
        Command::Deploy(args) => deploy(config, &cli.manifest_dir, args).await,
        Command::Show(args) => show(&config, &cli.manifest_dir, &args),
    }
}

async fn deploy(
    config: EnvironmentConfig,
    manifest_dir: &std::path::Path,
    args: DeployArgs,
) -> Result<()> {
    let mut deployer = Deployer::new(config);
    deployer.artifacts_dir = args.artifacts.clone();
    deployer.manifest_dir = manifest_dir.to_path_buf();
    deployer.token = args.token_params();
    deployer.fixture_index = args.fixture_index;
    deployer.resume = args.resume;
    deployer.deadline = args.deadline_secs.map(Duration::from_secs);

    let credentials = EnvCredential::default();

    if args.dry_run {
        tracing::warn!("Dry run: deploying to an in-process network, nothing reaches the configured node");
        deployer.dry_run(&credentials).await?;
        tracing::info!("Dry run complete, no manifest written");
        return Ok(());
    }

    let provider = JsonRpcProvider::new(deployer.config.network_endpoint.clone())?;
    deployer.deploy(&provider, &credentials).await?;

    tracing::info!(
        path = %deployer.manifest_store().manifest_path(deployer.config.kind).display(),
        "Manifest written"
    );

    Ok(())
}

fn show(config: &EnvironmentConfig, manifest_dir: &std::path::Path, args: &ShowArgs) -> Result<()> {
    let manifest = ManifestStore::new(manifest_dir).read(config.kind)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
    } else {
        println!("{}", manifest_table(&manifest));
    }

    Ok(())
}

fn manifest_table(manifest: &DeploymentManifest) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Contract", "Address", "Tx hash", "Block"]);

    for role in [ContractRole::Token, ContractRole::Escrow, ContractRole::OrderBook] {
        let contract = manifest.contracts.get(role);
        table.add_row(vec![
            role.to_string(),
            contract.address.to_string(),
            contract.confirmation.tx_hash.to_string(),
            contract.confirmation.block_number.to_string(),
        ]);
    }
    table.add_row(vec![
        "authorization".to_string(),
        manifest.contracts.escrow.address.to_string(),
        manifest.authorization.tx_hash.to_string(),
        manifest.authorization.block_number.to_string(),
    ]);

    table.add_row(vec![
        "deployer".to_string(),
        manifest.deployer.to_string(),
        format!("{} ({})", manifest.environment, manifest.kind),
        manifest.timestamp.to_rfc3339(),
    ]);

    table
}
