//! Signing backend client
//!
//! The signing backend proxies a remote signing service. Two calls are used:
//! - `POST {base}/xaman/sign-request` creates a sign-in payload
//! - `GET {base}/xaman/payload/{id}` reports its status

use crate::error::SigningError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Timeout for a single backend HTTP call
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// How the signer should present the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForceType {
    App,
    Web,
}

/// Parameters for a sign-in payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInRequest {
    /// Payload lifetime in minutes, as the signing service counts it
    pub expire_minutes: u64,
    pub return_url: Option<String>,
    pub force_type: ForceType,
}

#[derive(Debug, Serialize)]
struct CreateBody<'a> {
    txjson: TxJson,
    options: CreateOptions<'a>,
}

#[derive(Debug, Serialize)]
struct TxJson {
    #[serde(rename = "TransactionType")]
    transaction_type: &'static str,
}

#[derive(Debug, Serialize)]
struct CreateOptions<'a> {
    expire: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    return_url: Option<ReturnUrl<'a>>,
    #[serde(rename = "forceType")]
    force_type: ForceType,
}

#[derive(Debug, Serialize)]
struct ReturnUrl<'a> {
    app: &'a str,
    web: &'a str,
}

impl SignInRequest {
    fn body(&self) -> CreateBody<'_> {
        CreateBody {
            txjson: TxJson {
                transaction_type: "SignIn",
            },
            options: CreateOptions {
                expire: self.expire_minutes,
                return_url: self
                    .return_url
                    .as_deref()
                    .map(|url| ReturnUrl { app: url, web: url }),
                force_type: self.force_type,
            },
        }
    }
}

/// Response to a payload creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedPayload {
    pub uuid: String,
    pub refs: PayloadRefs,
    pub next: PayloadNext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadRefs {
    #[serde(default)]
    pub qr_png: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadNext {
    pub always: String,
    #[serde(default)]
    pub app: Option<String>,
}

/// Status of a payload as reported by the signing service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadStatus {
    pub meta: PayloadMeta,
    #[serde(default)]
    pub response: Option<PayloadResponse>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadMeta {
    #[serde(default)]
    pub signed: bool,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub expired: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadResponse {
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl PayloadStatus {
    /// The signing account, if the payload was signed.
    pub fn account(&self) -> Option<&str> {
        self.response
            .as_ref()
            .and_then(|r| r.account.as_deref())
            .filter(|a| !a.is_empty())
    }
}

/// Client for the remote signing service.
#[async_trait]
pub trait SigningBackend: Send + Sync {
    async fn create_sign_request(
        &self,
        request: &SignInRequest,
    ) -> Result<CreatedPayload, SigningError>;

    async fn payload_status(&self, id: &str) -> Result<PayloadStatus, SigningError>;
}

/// [`SigningBackend`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSigningBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSigningBackend {
    pub fn new(base_url: &str) -> Result<Self, SigningError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| SigningError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SigningError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SigningError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl SigningBackend for HttpSigningBackend {
    async fn create_sign_request(
        &self,
        request: &SignInRequest,
    ) -> Result<CreatedPayload, SigningError> {
        let url = format!("{}/xaman/sign-request", self.base_url);
        debug!("Creating sign request at {}", url);

        let response = self.client.post(&url).json(&request.body()).send().await?;
        let payload: CreatedPayload = Self::check(response).await?.json().await?;

        if payload.uuid.is_empty() {
            return Err(SigningError::Malformed(
                "sign request response has no uuid".to_string(),
            ));
        }
        debug!("Created sign request {}", payload.uuid);
        Ok(payload)
    }

    async fn payload_status(&self, id: &str) -> Result<PayloadStatus, SigningError> {
        let url = format!("{}/xaman/payload/{}", self.base_url, id);
        let response = self.client.get(&url).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_body() {
        let request = SignInRequest {
            expire_minutes: 10,
            return_url: Some("https://app.example/?signed=true".to_string()),
            force_type: ForceType::App,
        };
        let body = serde_json::to_value(request.body()).unwrap();
        assert_eq!(
            body,
            json!({
                "txjson": {"TransactionType": "SignIn"},
                "options": {
                    "expire": 10,
                    "return_url": {
                        "app": "https://app.example/?signed=true",
                        "web": "https://app.example/?signed=true"
                    },
                    "forceType": "app"
                }
            })
        );
    }

    #[test]
    fn test_create_body_without_return_url() {
        let request = SignInRequest {
            expire_minutes: 10,
            return_url: None,
            force_type: ForceType::Web,
        };
        let body = serde_json::to_value(request.body()).unwrap();
        assert!(body["options"].get("return_url").is_none());
        assert_eq!(body["options"]["forceType"], "web");
    }

    #[test]
    fn test_decode_created_payload() {
        let payload: CreatedPayload = serde_json::from_value(json!({
            "uuid": "e7b2",
            "refs": {"qr_png": "https://xumm.app/sign/e7b2_q.png", "websocket_status": "wss://x"},
            "next": {"always": "https://xumm.app/sign/e7b2"},
            "pushed": false
        }))
        .unwrap();
        assert_eq!(payload.uuid, "e7b2");
        assert_eq!(payload.next.app, None);
    }

    #[test]
    fn test_decode_status() {
        let status: PayloadStatus = serde_json::from_value(json!({
            "meta": {"signed": true, "cancelled": false, "expired": false, "resolved": true},
            "response": {"account": "rAlice", "txid": "ABCD", "error": null}
        }))
        .unwrap();
        assert!(status.meta.signed);
        assert_eq!(status.account(), Some("rAlice"));

        let pending: PayloadStatus = serde_json::from_value(json!({
            "meta": {"signed": false},
            "response": null
        }))
        .unwrap();
        assert_eq!(pending.account(), None);
    }

    #[test]
    fn test_decode_cancelled_status() {
        let status: PayloadStatus =
            serde_json::from_value(json!({"meta": {"cancelled": true}})).unwrap();
        assert!(status.meta.cancelled);
        assert!(!status.meta.signed);
        assert!(!status.meta.expired);
        assert_eq!(status.response, None);
    }

    #[test]
    fn test_status_without_meta_is_malformed() {
        let result: Result<PayloadStatus, _> =
            serde_json::from_value(json!({"response": {"account": "rAlice"}}));
        assert!(result.is_err());
    }
}
