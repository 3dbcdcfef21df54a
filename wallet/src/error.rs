//! Error types for the wallet authentication layer.

use displaydoc::Display;
use thiserror::Error;

/// Terminal failure of an authentication handshake.
///
/// `Clone` so one outcome can be delivered to every holder of the handle.
#[derive(Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Sign request expired before it was signed
    Expired,

    /// Sign request was rejected
    Rejected,

    /// Signing service unreachable: {0}
    Transport(String),

    /// Signing service error: {0}
    Backend(String),
}

/// Errors from the signing backend client.
#[derive(Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum SigningError {
    /// HTTP request failed: {0}
    Http(String),

    /// Signing backend returned status {status}: {body}
    Status { status: u16, body: String },

    /// Malformed signing backend response: {0}
    Malformed(String),
}

impl From<reqwest::Error> for SigningError {
    fn from(src: reqwest::Error) -> Self {
        if src.is_decode() {
            SigningError::Malformed(src.to_string())
        } else {
            SigningError::Http(src.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            AuthError::Expired.to_string(),
            "Sign request expired before it was signed"
        );
        assert_eq!(AuthError::Rejected.to_string(), "Sign request was rejected");
    }
}
