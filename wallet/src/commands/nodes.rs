//! Ledger endpoint health command

use anyhow::Result;
use cult_connection::{check_endpoints, WsTransport};
use cult_wallet::WalletConfig;

use super::{print_error, print_success};

/// Run the nodes command
pub async fn run(config: &WalletConfig) -> Result<()> {
    let ledger = &config.ledger;
    let transport = WsTransport::new(ledger.request_timeout());

    println!();
    println!("Checking {} ledger endpoints...", ledger.endpoints.len());

    let report = check_endpoints(&transport, &ledger.endpoints, ledger.connect_timeout()).await;
    let available = report.iter().filter(|h| h.is_available()).count();

    println!();
    for health in &report {
        let status = if health.is_available() {
            "\x1b[32mavailable\x1b[0m"
        } else {
            "\x1b[31munavailable\x1b[0m"
        };
        println!("  {} [{}]", health.url, status);

        if health.is_available() {
            println!(
                "    version: {}, peers: {}, latency: {}ms",
                health.server_version.as_deref().unwrap_or("unknown"),
                health
                    .peers
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "?".to_string()),
                health.latency.map(|l| l.as_millis()).unwrap_or_default()
            );
        } else if let Some(error) = &health.error {
            println!("    {}", error);
        }
    }

    println!();
    if available == 0 {
        print_error("No ledger endpoint is reachable");
    } else {
        print_success(&format!(
            "{} of {} endpoints available",
            available,
            report.len()
        ));
    }

    Ok(())
}
