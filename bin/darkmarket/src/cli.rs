use std::path::PathBuf;

use clap::{Parser, Subcommand};
use darkmarket_deploy::{DEFAULT_ARTIFACTS_DIR, DEFAULT_SELECTOR, TokenParams};
use tracing::level_filters::LevelFilter;

/// Default directory holding one JSON file per environment.
const DEFAULT_CONFIG_DIR: &str = "config";

#[derive(Parser)]
#[command(name = "darkmarket")]
#[command(
    author,
    version,
    about = "Provision a deployer and deploy the dark market contracts"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "DARKMARKET_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// The environment to target, e.g. `local` or `remote`.
    ///
    /// Resolved to `<config-dir>/<env>.json`.
    #[arg(short, long, env = "ENV", default_value = DEFAULT_SELECTOR)]
    pub env: String,

    /// Directory holding the environment configuration files.
    #[arg(long, env = "DARKMARKET_CONFIG_DIR", default_value = DEFAULT_CONFIG_DIR)]
    pub config_dir: PathBuf,

    /// Directory the deployment manifests are written to.
    #[arg(long, env = "DARKMARKET_MANIFEST_DIR", default_value = ".")]
    pub manifest_dir: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Provision the deployer and deploy the contracts (default).
    Deploy(DeployArgs),
    /// Print the manifest of the last successful deployment.
    Show(ShowArgs),
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct ShowArgs {
    /// Print the raw manifest JSON instead of a table.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct DeployArgs {
    /// Directory holding the compiled contract artifacts.
    #[arg(long, env = "DARKMARKET_ARTIFACTS_DIR", default_value = DEFAULT_ARTIFACTS_DIR)]
    pub artifacts: PathBuf,

    /// Token name.
    #[arg(long, default_value_t = TokenParams::default().name)]
    pub token_name: String,

    /// Token symbol.
    #[arg(long, default_value_t = TokenParams::default().symbol)]
    pub token_symbol: String,

    /// Token decimals.
    #[arg(long, default_value_t = TokenParams::default().decimals)]
    pub token_decimals: u8,

    /// Initial token supply, minted to the deployer.
    #[arg(long, default_value_t = TokenParams::default().initial_supply)]
    pub initial_supply: u128,

    /// Which fixture account to deploy from on local networks.
    #[arg(long, default_value_t = 0)]
    pub fixture_index: usize,

    /// Continue after the contracts confirmed by a previous failed run.
    #[arg(long, default_value_t = false)]
    pub resume: bool,

    /// Overall bound on the contract deployment, in seconds.
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// Run against an in-process network instead of the configured endpoint.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

impl Default for DeployArgs {
    fn default() -> Self {
        let token = TokenParams::default();
        Self {
            artifacts: PathBuf::from(DEFAULT_ARTIFACTS_DIR),
            token_name: token.name,
            token_symbol: token.symbol,
            token_decimals: token.decimals,
            initial_supply: token.initial_supply,
            fixture_index: 0,
            resume: false,
            deadline_secs: None,
            dry_run: false,
        }
    }
}

impl DeployArgs {
    pub fn token_params(&self) -> TokenParams {
        TokenParams {
            name: self.token_name.clone(),
            symbol: self.token_symbol.clone(),
            decimals: self.token_decimals,
            initial_supply: self.initial_supply,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["darkmarket"]).unwrap();
        assert_eq!(cli.config_dir, PathBuf::from("config"));
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_deploy_args() {
        let cli = Cli::try_parse_from([
            "darkmarket",
            "--env",
            "remote",
            "deploy",
            "--initial-supply",
            "5000",
            "--resume",
            "--deadline-secs",
            "60",
        ])
        .unwrap();

        assert_eq!(cli.env, "remote");
        let Some(Command::Deploy(args)) = cli.command else {
            panic!("expected deploy");
        };
        assert!(args.resume);
        assert_eq!(args.deadline_secs, Some(60));
        let token = args.token_params();
        assert_eq!(token.initial_supply, 5000);
        assert_eq!(token.symbol, "DARK");
    }
}
