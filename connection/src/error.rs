// Copyright (c) 2024 Botho Foundation

//! Errors produced by the ledger connection layer.

use displaydoc::Display;
use thiserror::Error;

/// Ledger error codes that depend only on the request. Every endpoint
/// answers them the same way, so retrying elsewhere cannot help.
const DETERMINISTIC_RPC_CODES: &[&str] = &[
    "actMalformed",
    "actNotFound",
    "invalidParams",
    "unknownCmd",
];

/// Errors that can occur while connecting to or querying a ledger endpoint.
///
/// The type is `Clone` so that the outcome of a single shared connect attempt
/// can be handed to every caller waiting on it.
#[derive(Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum Error {
    /// Endpoint {url} is unavailable: {reason}
    EndpointUnavailable { url: String, reason: String },

    /// Timed out after {0:?}
    Timeout(std::time::Duration),

    /// Transport error: {0}
    Transport(String),

    /// Connection closed
    Closed,

    /// Ledger returned error {code}: {message}
    Rpc { code: String, message: String },

    /// Failed to decode ledger response: {0}
    Decode(String),

    /// No ledger endpoints configured
    NoEndpoints,

    /// Request failed after {attempts} attempts: {last}
    RequestExhausted { attempts: u32, last: Box<Error> },
}

impl Error {
    /// Whether this error came from the transport rather than from the ledger
    /// rejecting a well-formed request.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::EndpointUnavailable { .. }
                | Error::Timeout(_)
                | Error::Transport(_)
                | Error::Closed
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(src: serde_json::Error) -> Self {
        Error::Decode(src.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(src: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match src {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Error::Closed,
            other => Error::Transport(other.to_string()),
        }
    }
}

impl Error {
    /// Whether another attempt, possibly on another endpoint, could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Rpc { code, .. } => !DETERMINISTIC_RPC_CODES.contains(&code.as_str()),
            _ => true,
        }
    }

    /// The ledger error code, looking through an exhausted retry budget.
    pub fn rpc_code(&self) -> Option<&str> {
        match self {
            Error::Rpc { code, .. } => Some(code),
            Error::RequestExhausted { last, .. } => last.rpc_code(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_display() {
        let err = Error::EndpointUnavailable {
            url: "wss://s1.ripple.com".to_string(),
            reason: "refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Endpoint wss://s1.ripple.com is unavailable: refused"
        );

        let err = Error::RequestExhausted {
            attempts: 3,
            last: Box::new(Error::Closed),
        };
        assert_eq!(
            err.to_string(),
            "Request failed after 3 attempts: Connection closed"
        );
    }

    #[test]
    fn test_is_transport() {
        assert!(Error::Timeout(Duration::from_secs(15)).is_transport());
        assert!(Error::Closed.is_transport());
        assert!(!Error::Rpc {
            code: "actNotFound".to_string(),
            message: "Account not found.".to_string(),
        }
        .is_transport());
        assert!(!Error::NoEndpoints.is_transport());
    }

    #[test]
    fn test_retryable() {
        let rpc = |code: &str| Error::Rpc {
            code: code.to_string(),
            message: String::new(),
        };
        assert!(!rpc("actNotFound").is_retryable());
        assert!(!rpc("invalidParams").is_retryable());
        assert!(rpc("tooBusy").is_retryable());
        assert!(rpc("noNetwork").is_retryable());
        assert!(Error::Closed.is_retryable());
    }

    #[test]
    fn test_rpc_code_through_exhaustion() {
        let err = Error::RequestExhausted {
            attempts: 1,
            last: Box::new(Error::Rpc {
                code: "actNotFound".to_string(),
                message: "Account not found.".to_string(),
            }),
        };
        assert_eq!(err.rpc_code(), Some("actNotFound"));
        assert_eq!(Error::Closed.rpc_code(), None);
    }
}
