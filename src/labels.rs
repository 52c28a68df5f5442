use crate::error::GatewayError;
use async_trait::async_trait;
use inflections::case::to_title_case;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub id: String,
    pub name: String,
}

/// Provider label operations needed to tag a thread.
#[async_trait]
pub trait LabelApi: Send + Sync {
    async fn list_labels(&self) -> Result<Vec<Label>, GatewayError>;

    /// Creates a label shown in both the label list and the message list.
    async fn create_label(&self, name: &str) -> Result<Label, GatewayError>;

    /// Adds without removing anything already on the thread.
    async fn add_label_to_thread(&self, thread_id: &str, label_id: &str)
        -> Result<(), GatewayError>;
}

/// "high" and "HIGH" both become "High".
pub fn display_label_name(importance: &str) -> String {
    to_title_case(&importance.trim().to_lowercase())
}

pub fn find_label<'a>(labels: &'a [Label], name: &str) -> Option<&'a Label> {
    let wanted = name.to_lowercase();
    labels.iter().find(|l| l.name.to_lowercase() == wanted)
}

/// Resolves (or creates) the importance label and attaches it to the thread.
/// Returns the label name that was applied.
pub async fn apply_importance_label<A: LabelApi + ?Sized>(
    api: &A,
    thread_id: &str,
    importance: &str,
) -> Result<String, GatewayError> {
    let label_name = display_label_name(importance);

    let labels = api.list_labels().await.map_err(into_label_error)?;
    let label_id = match find_label(&labels, &label_name) {
        Some(existing) => {
            debug!(label = %existing.name, label_id = %existing.id, "reusing label");
            existing.id.clone()
        }
        None => {
            let created = api.create_label(&label_name).await.map_err(into_label_error)?;
            info!(label = %created.name, label_id = %created.id, "created label");
            created.id
        }
    };

    api.add_label_to_thread(thread_id, &label_id)
        .await
        .map_err(into_label_error)?;

    info!(thread_id, label = %label_name, "thread labeled");
    Ok(label_name)
}

fn into_label_error(err: GatewayError) -> GatewayError {
    match err {
        GatewayError::Transport(msg) => GatewayError::Label(msg),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashMap};
    use std::sync::Mutex;

    /// Label store with the provider's set semantics for thread labels.
    #[derive(Default)]
    struct FakeLabels {
        labels: Mutex<Vec<Label>>,
        threads: Mutex<HashMap<String, BTreeSet<String>>>,
        creates: Mutex<usize>,
        fail_attach: bool,
        auth_expired: bool,
    }

    #[async_trait]
    impl LabelApi for FakeLabels {
        async fn list_labels(&self) -> Result<Vec<Label>, GatewayError> {
            if self.auth_expired {
                return Err(GatewayError::Auth("token revoked".into()));
            }
            Ok(self.labels.lock().unwrap().clone())
        }

        async fn create_label(&self, name: &str) -> Result<Label, GatewayError> {
            let mut labels = self.labels.lock().unwrap();
            *self.creates.lock().unwrap() += 1;
            let label = Label {
                id: format!("Label_{}", labels.len() + 1),
                name: name.to_string(),
            };
            labels.push(label.clone());
            Ok(label)
        }

        async fn add_label_to_thread(
            &self,
            thread_id: &str,
            label_id: &str,
        ) -> Result<(), GatewayError> {
            if self.fail_attach {
                return Err(GatewayError::Transport("503 backend error".into()));
            }
            self.threads
                .lock()
                .unwrap()
                .entry(thread_id.to_string())
                .or_default()
                .insert(label_id.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_display_label_name_capitalizes() {
        assert_eq!(display_label_name("high"), "High");
        assert_eq!(display_label_name("MEDIUM"), "Medium");
        assert_eq!(display_label_name("low"), "Low");
    }

    #[test]
    fn test_find_label_ignores_case() {
        let labels = vec![
            Label { id: "INBOX".into(), name: "INBOX".into() },
            Label { id: "Label_7".into(), name: "HIGH".into() },
        ];
        assert_eq!(find_label(&labels, "High").map(|l| l.id.as_str()), Some("Label_7"));
        assert!(find_label(&labels, "Low").is_none());
    }

    #[tokio::test]
    async fn test_applying_twice_yields_one_label() {
        let api = FakeLabels::default();

        apply_importance_label(&api, "t-1", "high").await.unwrap();
        apply_importance_label(&api, "t-1", "high").await.unwrap();

        let labels = api.labels.lock().unwrap();
        let high: Vec<_> = labels.iter().filter(|l| l.name == "High").collect();
        assert_eq!(high.len(), 1);
        assert_eq!(*api.creates.lock().unwrap(), 1);

        let threads = api.threads.lock().unwrap();
        let on_thread = &threads["t-1"];
        assert_eq!(on_thread.len(), 1);
        assert!(on_thread.contains(&high[0].id));
    }

    #[tokio::test]
    async fn test_existing_label_is_reused_case_insensitively() {
        let api = FakeLabels::default();
        api.labels.lock().unwrap().push(Label {
            id: "Label_42".into(),
            name: "medium".into(),
        });

        let applied = apply_importance_label(&api, "t-9", "Medium").await.unwrap();

        assert_eq!(applied, "Medium");
        assert_eq!(*api.creates.lock().unwrap(), 0);
        assert!(api.threads.lock().unwrap()["t-9"].contains("Label_42"));
    }

    #[tokio::test]
    async fn test_existing_thread_labels_are_kept() {
        let api = FakeLabels::default();
        api.threads
            .lock()
            .unwrap()
            .entry("t-1".into())
            .or_default()
            .insert("INBOX".into());

        apply_importance_label(&api, "t-1", "low").await.unwrap();

        let threads = api.threads.lock().unwrap();
        assert!(threads["t-1"].contains("INBOX"));
        assert_eq!(threads["t-1"].len(), 2);
    }

    #[tokio::test]
    async fn test_transport_failure_becomes_label_error() {
        let api = FakeLabels {
            fail_attach: true,
            ..Default::default()
        };
        let err = apply_importance_label(&api, "t-1", "high").await.unwrap_err();
        assert!(matches!(err, GatewayError::Label(_)));
    }

    #[tokio::test]
    async fn test_auth_failure_is_preserved() {
        let api = FakeLabels {
            auth_expired: true,
            ..Default::default()
        };
        let err = apply_importance_label(&api, "t-1", "high").await.unwrap_err();
        assert!(err.is_auth());
    }
}
