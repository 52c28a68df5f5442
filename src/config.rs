use crate::models::Importance;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "settings.toml";
const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gmail: GmailSettings,
    #[serde(default)]
    pub classifier: ClassifierSettings,
    #[serde(default)]
    pub reply: ReplySettings,
    #[serde(default)]
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub workflow: WorkflowSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GmailSettings {
    pub credentials_path: String,
    pub query: String,
    pub label_ids: Vec<String>,
    pub max_messages: u32,
}

impl Default for GmailSettings {
    fn default() -> Self {
        Self {
            credentials_path: "credentials.json".to_string(),
            query: "is:unread".to_string(),
            label_ids: vec!["INBOX".to_string()],
            max_messages: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_body_chars: usize,
    pub request_timeout_secs: u64,
    pub max_wait_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4.1-nano".to_string(),
            max_body_chars: 4000,
            request_timeout_secs: 30,
            max_wait_secs: 90,
            poll_interval_ms: 2000,
        }
    }
}

impl ClassifierSettings {
    /// The configured key wins over the environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplySettings {
    pub enabled: bool,
    pub importances: Vec<Importance>,
    pub sign_off: Option<String>,
}

impl Default for ReplySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            importances: Importance::ALL.to_vec(),
            sign_off: None,
        }
    }
}

impl ReplySettings {
    pub fn applies_to(&self, importance: Importance) -> bool {
        self.enabled && self.importances.contains(&importance)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    pub database_url: String,
    pub lock_ttl_secs: u64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            database_url: "sqlite:processed_emails.db?mode=rwc".to_string(),
            lock_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    pub concurrency: usize,
    pub call_timeout_secs: u64,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            call_timeout_secs: 120,
        }
    }
}

impl WorkflowSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        use std::fs;
        let path = path.as_ref();
        if let Ok(content) = fs::read_to_string(path) {
            match toml::from_str(&content) {
                Ok(config) => return config,
                Err(e) => warn!(path = %path.display(), error = %e, "ignoring malformed settings file"),
            }
        }
        Self::default()
    }
}
