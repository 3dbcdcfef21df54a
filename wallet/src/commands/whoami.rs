//! Show the signed-in address

use anyhow::Result;
use cult_wallet::WalletConfig;

use super::passive_auth_manager;

/// Run the whoami command
pub async fn run(config: &WalletConfig) -> Result<()> {
    let auth = passive_auth_manager(config)?;

    match auth.restore().await {
        Some(address) => println!("{}", address),
        None => println!("Not signed in. Run 'cult-wallet login' first."),
    }

    Ok(())
}
