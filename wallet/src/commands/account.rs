//! Account overview command

use anyhow::{Context, Result};
use cult_wallet::WalletConfig;

use super::{ledger_client, print_error};

/// Run the account command
pub async fn run(config: &WalletConfig, address: &str) -> Result<()> {
    let client = ledger_client(config);

    let root = match client.account_info(address, "validated").await {
        Ok(root) => root,
        Err(e) if e.rpc_code() == Some("actNotFound") => {
            print_error(&format!("Account {} not found", address));
            client.executor().manager().disconnect().await;
            return Ok(());
        }
        Err(e) => {
            client.executor().manager().disconnect().await;
            return Err(e).context("Failed to fetch account info");
        }
    };

    println!();
    println!("Account:  {}", root.account);
    println!("Sequence: {}", root.sequence);
    if let Some(balance) = &root.balance {
        println!("Balance:  {} drops", balance);
    }

    let lines = client
        .account_lines(address, None)
        .await
        .context("Failed to fetch trust lines")?;
    println!();
    println!("Trust lines ({}):", lines.len());
    for line in &lines {
        println!("  {} {} (issuer {})", line.balance, line.currency, line.account);
    }

    let tokens = client
        .account_nfts(address)
        .await
        .context("Failed to fetch NFTs")?;
    println!();
    println!("NFTs ({}):", tokens.len());
    for token in &tokens {
        println!(
            "  {} taxon {} issuer {}",
            token.token_id, token.taxon, token.issuer
        );
    }

    client.executor().manager().disconnect().await;
    Ok(())
}
