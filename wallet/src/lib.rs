//! CULT Wallet
//!
//! Signs a wallet holder in through a remote signing service and queries the
//! ledger for their account.
//!
//! ## Components
//!
//! - [`AuthSessionManager`] runs the sign-in handshake: payload creation,
//!   dispatch to the user, status polling
//! - [`SessionStore`] keeps the signed-in address across restarts
//! - [`WalletConfig`] ties the ledger, auth and session settings together
//!
//! Ledger access lives in `cult_connection`.

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod session;
pub mod signing;

pub use auth::{AuthEvent, AuthHandle, AuthSessionManager, AuthState, SignRequest, SignRequestStatus};
pub use config::WalletConfig;
pub use dispatch::{DeepLinkDispatcher, DispatchOutcome, Dispatcher, Platform, QrDispatcher};
pub use error::{AuthError, SigningError};
pub use session::SessionStore;
pub use signing::{HttpSigningBackend, SigningBackend};
