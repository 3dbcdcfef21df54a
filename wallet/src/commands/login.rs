//! Sign in with the signing app

use anyhow::Result;
use cult_wallet::{
    dispatch::CommandOpener, AuthEvent, DeepLinkDispatcher, DispatchOutcome, Dispatcher,
    Platform, QrDispatcher, WalletConfig,
};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use super::{auth_manager, print_error, print_success, print_warning};

/// Run the login command
pub async fn run(config: &WalletConfig, mobile: bool, ios: bool) -> Result<()> {
    let dispatcher: Arc<dyn Dispatcher> = if mobile {
        let platform = if ios { Platform::Ios } else { Platform::Android };
        Arc::new(DeepLinkDispatcher::new(
            platform,
            Arc::new(CommandOpener::system()),
            config.auth.app_detect(),
        ))
    } else {
        Arc::new(QrDispatcher)
    };
    let auth = auth_manager(config, dispatcher)?;

    if let Some(address) = auth.restore().await {
        print_success(&format!("Already signed in as {}", address));
        return Ok(());
    }

    let mut events = auth.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(AuthEvent::Dispatched { outcome, .. }) => print_dispatch(&outcome),
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let handle = match auth.start_authentication().await {
        Ok(handle) => handle,
        Err(e) => {
            printer.abort();
            print_error(&e.to_string());
            return Err(e.into());
        }
    };

    let request = handle.request();
    println!();
    println!(
        "Waiting for sign request {} (expires {})...",
        request.id,
        request.expires_at.format("%H:%M:%S UTC")
    );
    println!("Press Ctrl-C to cancel.");

    let result = tokio::select! {
        result = handle.outcome() => result,
        _ = tokio::signal::ctrl_c() => {
            auth.cancel();
            handle.outcome().await
        }
    };
    printer.abort();

    match result {
        Ok(address) => {
            println!();
            print_success(&format!("Signed in as {}", address));
            Ok(())
        }
        Err(e) => {
            print_error(&e.to_string());
            Err(e.into())
        }
    }
}

fn print_dispatch(outcome: &DispatchOutcome) {
    println!();
    match outcome {
        DispatchOutcome::QrDisplayed { qr_url, deep_link } => {
            if let Some(qr_url) = qr_url {
                println!("Scan the QR code with your signing app:");
                println!("  {}", qr_url);
            }
            println!("Or open:");
            println!("  {}", deep_link);
        }
        DispatchOutcome::DeepLinkOpened { deep_link } => {
            println!("Opened the signing app ({})", deep_link);
        }
        DispatchOutcome::SignerAppMissing { store_url } => {
            print_warning("The signing app did not respond. Install it from:");
            println!("  {}", store_url);
        }
    }
}
