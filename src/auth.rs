use anyhow::{Context, Result};
use async_trait::async_trait;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use tracing::{debug, info, warn};
use yup_oauth2::authenticator::DefaultAuthenticator;
use yup_oauth2::authenticator_delegate::InstalledFlowDelegate;
use yup_oauth2::storage::{TokenInfo, TokenStorage};
use yup_oauth2::{
    ApplicationSecret, InstalledFlowAuthenticator, InstalledFlowReturnMethod,
    read_application_secret,
};

const APP_NAME: &str = "inbox-triage";
const TOKEN_KEY: &str = "gmail_token";

/// Read and label mail, and send replies.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/gmail.send",
];

/// Token persisted in the keyring together with the scopes it was granted for.
#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    scopes: Vec<String>,
    token: TokenInfo,
}

fn scopes_cover(granted: &[String], requested: &[&str]) -> bool {
    requested.iter().all(|scope| granted.iter().any(|g| g == scope))
}

fn keyring_entry() -> Result<Entry> {
    Entry::new(APP_NAME, TOKEN_KEY).map_err(keyring_error)
}

fn keyring_error(e: keyring::Error) -> anyhow::Error {
    anyhow::anyhow!("Keyring error: {e}")
}

/// Keeps the OAuth token in the OS keyring instead of a file on disk.
pub struct RingStorage;

impl RingStorage {
    fn load(&self) -> Result<Option<StoredToken>> {
        match keyring_entry()?.get_password() {
            Ok(serialized) => serde_json::from_str(&serialized)
                .map(Some)
                .context("Stored Gmail token is unreadable"),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(keyring_error(e)),
        }
    }

    pub async fn clear_token(&self) -> Result<()> {
        match keyring_entry()?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(keyring_error(e)),
        }
    }
}

#[async_trait]
impl TokenStorage for RingStorage {
    async fn set(&self, scopes: &[&str], token: TokenInfo) -> Result<()> {
        let stored = StoredToken {
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            token,
        };
        let serialized = serde_json::to_string(&stored).context("Failed to serialize token")?;
        keyring_entry()?.set_password(&serialized).map_err(keyring_error)
    }

    /// A token granted for fewer scopes than requested forces a new consent.
    async fn get(&self, scopes: &[&str]) -> Option<TokenInfo> {
        match self.load() {
            Ok(Some(stored)) if scopes_cover(&stored.scopes, scopes) => Some(stored.token),
            Ok(Some(_)) => {
                debug!("stored token lacks requested scopes");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "could not read stored token");
                None
            }
        }
    }
}

/// Opens the consent page in the default browser, printing the URL as a
/// fallback for headless machines.
pub struct BrowserDelegate;

impl InstalledFlowDelegate for BrowserDelegate {
    fn present_user_url<'a>(
        &'a self,
        url: &'a str,
        need_code: bool,
    ) -> Pin<Box<dyn Future<Output = Result<String, String>> + Send + 'a>> {
        Box::pin(async move {
            info!("Gmail authorization required");
            if let Err(e) = open::that(url) {
                warn!(error = %e, "could not open a browser");
            }
            eprintln!("If no browser opened, visit this URL to authorize:\n{url}");

            if !need_code {
                return Ok(String::new());
            }

            eprintln!("Paste the authorization code:");
            let mut code = String::new();
            std::io::stdin()
                .read_line(&mut code)
                .map_err(|e| format!("could not read authorization code: {e}"))?;
            Ok(code.trim().to_string())
        })
    }
}

pub struct Authenticator;

impl Authenticator {
    pub async fn load_secret<P: AsRef<Path>>(path: P) -> Result<ApplicationSecret> {
        read_application_secret(path)
            .await
            .context("Failed to read application secret")
    }

    pub async fn authenticate(secret: ApplicationSecret) -> Result<DefaultAuthenticator> {
        let auth = InstalledFlowAuthenticator::builder(
            secret,
            InstalledFlowReturnMethod::HTTPRedirect,
        )
        .with_storage(Box::new(RingStorage))
        .flow_delegate(Box::new(BrowserDelegate))
        .build()
        .await
        .context("Failed to build authenticator")?;

        Ok(auth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_must_cover_every_requested_scope() {
        let granted = vec![SCOPES[0].to_string()];
        assert!(scopes_cover(&granted, &SCOPES[..1]));
        assert!(!scopes_cover(&granted, SCOPES));

        let all: Vec<String> = SCOPES.iter().map(|s| s.to_string()).collect();
        assert!(scopes_cover(&all, SCOPES));
        assert!(scopes_cover(&all, &[]));
    }
}
