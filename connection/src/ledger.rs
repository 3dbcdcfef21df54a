// Copyright (c) 2024 Botho Foundation

//! Ledger RPC commands and typed query helpers.
//!
//! Requests serialise to the ledger's JSON command shape
//! (`{"command": "account_info", "account": ..., ...}`); the transport adds
//! the `id` field.
//!
//! # Example
//!
//! ```ignore
//! let client = LedgerClient::new(executor);
//! let tokens = client.account_nfts("rExampleAccount").await?;
//! for token in tokens {
//!     println!("{} taxon {}", token.token_id, token.taxon);
//! }
//! ```

use crate::{error::Result, executor::RequestExecutor, Error};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// A ledger RPC command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum LedgerRequest {
    AccountNfts {
        account: String,
    },
    AccountLines {
        account: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ledger_index: Option<String>,
    },
    AccountInfo {
        account: String,
        ledger_index: String,
    },
    ServerInfo,
}

impl LedgerRequest {
    /// The command name as sent on the wire.
    pub fn command(&self) -> &'static str {
        match self {
            LedgerRequest::AccountNfts { .. } => "account_nfts",
            LedgerRequest::AccountLines { .. } => "account_lines",
            LedgerRequest::AccountInfo { .. } => "account_info",
            LedgerRequest::ServerInfo => "server_info",
        }
    }

    /// Serialise into a request frame carrying `id`.
    pub fn to_frame(&self, id: u64) -> Result<Value> {
        let mut frame = serde_json::to_value(self)?;
        match frame.as_object_mut() {
            Some(map) => {
                map.insert("id".to_string(), Value::from(id));
                Ok(frame)
            }
            None => Err(Error::Decode(format!(
                "{} did not serialise to an object",
                self.command()
            ))),
        }
    }
}

/// Extract `result` from a response frame, or the ledger's error.
pub fn parse_response(frame: Value) -> Result<Value> {
    #[derive(Deserialize)]
    struct Frame {
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        error_message: Option<String>,
    }

    let frame: Frame = serde_json::from_value(frame)?;
    if frame.status.as_deref() == Some("error") || frame.error.is_some() {
        let code = frame.error.unwrap_or_else(|| "unknown".to_string());
        let message = frame.error_message.unwrap_or_else(|| code.clone());
        return Err(Error::Rpc { code, message });
    }
    frame
        .result
        .ok_or_else(|| Error::Decode("response has neither result nor error".to_string()))
}

/// A non-fungible token held by an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NfToken {
    #[serde(rename = "NFTokenID")]
    pub token_id: String,
    #[serde(rename = "URI", default)]
    pub uri: Option<String>,
    #[serde(rename = "Flags", default)]
    pub flags: u32,
    #[serde(rename = "Issuer")]
    pub issuer: String,
    #[serde(rename = "NFTokenTaxon")]
    pub taxon: u32,
}

/// A trust line between the queried account and a counterparty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustLine {
    pub currency: String,
    pub balance: String,
    /// The counterparty
    pub account: String,
    #[serde(default)]
    pub limit: Option<String>,
}

/// The subset of an account root the client consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRoot {
    #[serde(rename = "Account")]
    pub account: String,
    #[serde(rename = "Sequence")]
    pub sequence: u32,
    #[serde(rename = "Balance", default)]
    pub balance: Option<String>,
    #[serde(rename = "OwnerCount", default)]
    pub owner_count: Option<u32>,
}

/// Server version and peer count reported by `server_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub build_version: String,
    #[serde(default)]
    pub peers: Option<u32>,
    #[serde(default)]
    pub server_state: Option<String>,
}

impl ServerInfo {
    pub fn from_result(result: Value) -> Result<Self> {
        let info = result
            .get("info")
            .cloned()
            .ok_or_else(|| Error::Decode("server_info result has no info".to_string()))?;
        Ok(serde_json::from_value(info)?)
    }
}

/// Typed ledger queries, routed through the request executor.
#[derive(Clone)]
pub struct LedgerClient {
    executor: RequestExecutor,
}

impl LedgerClient {
    pub fn new(executor: RequestExecutor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub async fn account_nfts(&self, account: &str) -> Result<Vec<NfToken>> {
        let request = LedgerRequest::AccountNfts {
            account: account.to_string(),
        };
        self.fetch_field(&request, "account_nfts").await
    }

    pub async fn account_lines(&self, account: &str, peer: Option<&str>) -> Result<Vec<TrustLine>> {
        let request = LedgerRequest::AccountLines {
            account: account.to_string(),
            peer: peer.map(str::to_string),
            ledger_index: None,
        };
        self.fetch_field(&request, "lines").await
    }

    /// Account root at `ledger_index` ("validated", "current" or a number).
    pub async fn account_info(&self, account: &str, ledger_index: &str) -> Result<AccountRoot> {
        let request = LedgerRequest::AccountInfo {
            account: account.to_string(),
            ledger_index: ledger_index.to_string(),
        };
        self.fetch_field(&request, "account_data").await
    }

    pub async fn server_info(&self) -> Result<ServerInfo> {
        let result = self.executor.execute(&LedgerRequest::ServerInfo).await?;
        ServerInfo::from_result(result)
    }

    async fn fetch_field<T: DeserializeOwned>(
        &self,
        request: &LedgerRequest,
        field: &str,
    ) -> Result<T> {
        let mut result = self.executor.execute(request).await?;
        let value = result
            .get_mut(field)
            .map(Value::take)
            .ok_or_else(|| {
                Error::Decode(format!("{} result has no {}", request.command(), field))
            })?;
        Ok(serde_json::from_value(value)?)
    }
}
