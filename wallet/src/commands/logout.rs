//! Sign out

use anyhow::Result;
use cult_wallet::WalletConfig;

use super::{passive_auth_manager, print_success};

/// Run the logout command
pub async fn run(config: &WalletConfig) -> Result<()> {
    let auth = passive_auth_manager(config)?;
    auth.sign_out();
    print_success("Signed out");
    Ok(())
}
