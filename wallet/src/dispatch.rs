//! Sign request dispatch
//!
//! How a sign request reaches the user depends on the platform, chosen once
//! when the auth manager is built:
//! - on mobile, the deep link is handed to the signer app, and if no app picks
//!   it up within the detection window the user is pointed at the app store
//! - on desktop, the QR code and link are surfaced for the user to scan

use crate::{auth::SignRequest, signing::ForceType};
use async_trait::async_trait;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

pub const APP_STORE_URL: &str = "https://apps.apple.com/app/xaman-xumm-wallet/id1492302343";
pub const PLAY_STORE_URL: &str = "https://play.google.com/store/apps/details?id=com.xrpllabs.xumm";

/// Platform the wallet holder is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
    Desktop,
}

impl Platform {
    /// Classify a browser-style user agent string.
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_lowercase();
        if ["iphone", "ipad", "ipod"].iter().any(|d| ua.contains(d)) {
            Platform::Ios
        } else if ua.contains("android") {
            Platform::Android
        } else {
            Platform::Desktop
        }
    }

    pub fn is_mobile(self) -> bool {
        self != Platform::Desktop
    }

    pub fn force_type(self) -> ForceType {
        if self.is_mobile() {
            ForceType::App
        } else {
            ForceType::Web
        }
    }

    /// Where to get the signer app.
    pub fn store_url(self) -> &'static str {
        match self {
            Platform::Ios => APP_STORE_URL,
            _ => PLAY_STORE_URL,
        }
    }
}

/// What the user was shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchOutcome {
    DeepLinkOpened { deep_link: String },
    SignerAppMissing { store_url: String },
    QrDisplayed { qr_url: Option<String>, deep_link: String },
}

/// Presents a freshly created sign request to the user.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    fn platform(&self) -> Platform;

    async fn dispatch(&self, request: &SignRequest) -> DispatchOutcome;
}

/// Hands URLs to whatever handles them on this device.
#[async_trait]
pub trait LinkOpener: Send + Sync {
    /// Open `url`, returning whether an app took it within `window`.
    async fn open(&self, url: &str, window: Duration) -> bool;
}

/// Mobile dispatch: open the deep link, fall back to the store link.
pub struct DeepLinkDispatcher {
    platform: Platform,
    opener: Arc<dyn LinkOpener>,
    detect_window: Duration,
}

impl DeepLinkDispatcher {
    pub fn new(platform: Platform, opener: Arc<dyn LinkOpener>, detect_window: Duration) -> Self {
        Self {
            platform,
            opener,
            detect_window,
        }
    }
}

#[async_trait]
impl Dispatcher for DeepLinkDispatcher {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn dispatch(&self, request: &SignRequest) -> DispatchOutcome {
        if self.opener.open(&request.deep_link, self.detect_window).await {
            debug!("Signer app took sign request {}", request.id);
            DispatchOutcome::DeepLinkOpened {
                deep_link: request.deep_link.clone(),
            }
        } else {
            info!(
                "No signer app answered within {:?}, pointing at the store",
                self.detect_window
            );
            DispatchOutcome::SignerAppMissing {
                store_url: self.platform.store_url().to_string(),
            }
        }
    }
}

/// Desktop dispatch: surface the QR code for scanning.
#[derive(Debug, Default)]
pub struct QrDispatcher;

#[async_trait]
impl Dispatcher for QrDispatcher {
    fn platform(&self) -> Platform {
        Platform::Desktop
    }

    async fn dispatch(&self, request: &SignRequest) -> DispatchOutcome {
        DispatchOutcome::QrDisplayed {
            qr_url: request.qr_url.clone(),
            deep_link: request.deep_link.clone(),
        }
    }
}

/// [`LinkOpener`] that runs the operating system's URL handler.
#[derive(Debug, Clone)]
pub struct CommandOpener {
    program: String,
}

impl CommandOpener {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// `open` on macOS, `xdg-open` elsewhere.
    pub fn system() -> Self {
        if cfg!(target_os = "macos") {
            Self::new("open")
        } else {
            Self::new("xdg-open")
        }
    }
}

#[async_trait]
impl LinkOpener for CommandOpener {
    async fn open(&self, url: &str, window: Duration) -> bool {
        let status = tokio::process::Command::new(&self.program)
            .arg(url)
            .status();
        match tokio::time::timeout(window, status).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                debug!("Failed to run {}: {}", self.program, e);
                false
            }
            Err(_) => false,
        }
    }
}
