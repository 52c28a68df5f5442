use crate::error::ClassifyError;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An unread message as listed by the provider, before its content is fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    pub message_id: String,
    pub thread_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub received_at: DateTime<Utc>,
    pub sender: Option<String>, // raw From header, may carry a display name
    pub subject: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    High,
    Medium,
    Low,
}

impl Importance {
    pub const ALL: [Importance; 3] = [Importance::High, Importance::Medium, Importance::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Importance::High => "high",
            Importance::Medium => "medium",
            Importance::Low => "low",
        }
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Importance {
    type Err = ClassifyError;

    /// Accepts the bare level name in any case, tolerating surrounding
    /// whitespace, quotes and periods.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s
            .trim()
            .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '.') || c.is_whitespace())
            .to_lowercase();

        match normalized.as_str() {
            "high" => Ok(Importance::High),
            "medium" => Ok(Importance::Medium),
            "low" => Ok(Importance::Low),
            _ => Err(ClassifyError::OutOfRange(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProcessedRecord {
    pub thread_id: String,
    pub importance: Option<String>,
    pub processed_at: NaiveDateTime,
}

/// Counts reported at the end of a classification pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub replies_sent: usize,
    pub replies_failed: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed: {}, skipped: {}, errors: {}",
            self.processed, self.skipped, self.errors
        )?;
        if self.replies_sent > 0 || self.replies_failed > 0 {
            write!(
                f,
                ", replies sent: {}, replies failed: {}",
                self.replies_sent, self.replies_failed
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_importance_parses_any_case() {
        assert_eq!("HIGH".parse::<Importance>().unwrap(), Importance::High);
        assert_eq!(" Medium\n".parse::<Importance>().unwrap(), Importance::Medium);
        assert_eq!("\"low\".".parse::<Importance>().unwrap(), Importance::Low);
        assert_eq!("'High.'".parse::<Importance>().unwrap(), Importance::High);
        assert_eq!("`medium`.\n".parse::<Importance>().unwrap(), Importance::Medium);
    }

    #[test]
    fn test_importance_rejects_other_values() {
        let err = "urgent".parse::<Importance>().unwrap_err();
        assert!(matches!(err, ClassifyError::OutOfRange(ref v) if v == "urgent"));
        assert!("high priority".parse::<Importance>().is_err());
        assert!("".parse::<Importance>().is_err());
    }

    #[test]
    fn test_importance_serde_is_lowercase() {
        let json = serde_json::to_string(&Importance::Medium).unwrap();
        assert_eq!(json, "\"medium\"");
        let back: Importance = serde_json::from_str("\"low\"").unwrap();
        assert_eq!(back, Importance::Low);
    }

    #[test]
    fn test_run_summary_display() {
        let summary = RunSummary {
            processed: 1,
            skipped: 1,
            ..Default::default()
        };
        assert_eq!(summary.to_string(), "processed: 1, skipped: 1, errors: 0");
    }
}
