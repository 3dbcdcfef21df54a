//! CULT Wallet CLI
//!
//! Sign in with a signing app and inspect ledger accounts.

use anyhow::Result;
use clap::{Parser, Subcommand};
use cult_wallet::WalletConfig;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "cult-wallet")]
#[command(about = "CULT wallet - sign in and inspect ledger accounts")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "CULT_CONFIG")]
    config: Option<PathBuf>,

    /// Comma separated ledger endpoints, overriding the config file
    #[arg(long, global = true, env = "CULT_LEDGER_ENDPOINTS")]
    endpoints: Option<String>,

    /// Signing backend base URL, overriding the config file
    #[arg(long, global = true, env = "CULT_SIGNING_BACKEND_URL")]
    backend_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the health of every ledger endpoint
    Nodes,

    /// Sign in with the signing app
    Login {
        /// Hand the request to the signer app instead of showing a QR code
        #[arg(long)]
        mobile: bool,

        /// With --mobile, point at the App Store rather than Google Play
        #[arg(long, requires = "mobile")]
        ios: bool,
    },

    /// Show the signed-in address
    Whoami,

    /// Forget the stored session
    Logout,

    /// Show NFTs, trust lines and sequence of an account
    Account {
        /// Ledger account address
        address: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = WalletConfig::load(cli.config.as_deref())?;
    if let Some(endpoints) = &cli.endpoints {
        config.override_endpoints(endpoints);
    }
    if let Some(url) = cli.backend_url {
        config.auth.backend_url = url;
    }
    config.validate()?;

    match cli.command {
        Commands::Nodes => commands::nodes::run(&config).await,
        Commands::Login { mobile, ios } => commands::login::run(&config, mobile, ios).await,
        Commands::Whoami => commands::whoami::run(&config).await,
        Commands::Logout => commands::logout::run(&config).await,
        Commands::Account { address } => commands::account::run(&config, &address).await,
    }
}
