//! CLI Commands
//!
//! Implementation of all wallet CLI commands.

pub mod account;
pub mod login;
pub mod logout;
pub mod nodes;
pub mod whoami;

use anyhow::{Context, Result};
use cult_connection::{ConnectionManager, LedgerClient, RequestExecutor, WsTransport};
use cult_wallet::{
    dispatch::Dispatcher, AuthSessionManager, HttpSigningBackend, QrDispatcher, SessionStore,
    WalletConfig,
};
use std::sync::Arc;

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("\x1b[31mError:\x1b[0m {}", message);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("\x1b[32m{}\x1b[0m", message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("\x1b[33mWarning:\x1b[0m {}", message);
}

/// Session store under the configured data directory.
pub fn session_store(config: &WalletConfig) -> Arc<SessionStore> {
    Arc::new(SessionStore::open(
        &config.session.data_dir(),
        config.session.max_age(),
    ))
}

/// Auth manager talking to the configured signing backend.
pub fn auth_manager(
    config: &WalletConfig,
    dispatcher: Arc<dyn Dispatcher>,
) -> Result<AuthSessionManager> {
    let backend = HttpSigningBackend::new(&config.auth.backend_url)
        .context("Failed to create signing backend client")?;
    Ok(AuthSessionManager::new(
        config.auth.clone(),
        Arc::new(backend),
        dispatcher,
        session_store(config),
    ))
}

/// Auth manager for commands that never start a sign-in.
pub fn passive_auth_manager(config: &WalletConfig) -> Result<AuthSessionManager> {
    auth_manager(config, Arc::new(QrDispatcher))
}

/// Ledger client over WebSocket with the configured failover policy.
pub fn ledger_client(config: &WalletConfig) -> LedgerClient {
    let transport = WsTransport::new(config.ledger.request_timeout());
    let manager = ConnectionManager::new(config.ledger.clone(), Arc::new(transport));
    LedgerClient::new(RequestExecutor::new(manager))
}
