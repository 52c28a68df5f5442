use crate::config::GmailSettings;
use crate::error::GatewayError;
use crate::extract::{extract_body, header_value};
use crate::gateway::MailGateway;
use crate::labels::{self, Label, LabelApi};
use crate::models::{Message, MessageSummary};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use chrono::{TimeZone, Utc};
use google_gmail1::Gmail;
use google_gmail1::api::Scope;
use hyper::StatusCode;
use hyper::client::HttpConnector;
use hyper_rustls::HttpsConnector;
use tracing::{debug, info, warn};

const USER: &str = "me";

#[derive(Clone)]
pub struct GmailClient {
    hub: Gmail<HttpsConnector<HttpConnector>>,
    settings: GmailSettings,
}

impl GmailClient {
    pub fn new(hub: Gmail<HttpsConnector<HttpConnector>>, settings: GmailSettings) -> Self {
        Self { hub, settings }
    }

    async fn list_page(
        &self,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<(Vec<MessageSummary>, Option<String>), GatewayError> {
        let mut req = self
            .hub
            .users()
            .messages_list(USER)
            .q(&self.settings.query)
            .max_results(page_size)
            .add_scope(Scope::Modify);

        for label_id in &self.settings.label_ids {
            req = req.add_label_ids(label_id);
        }

        if let Some(token) = page_token {
            req = req.page_token(token);
        }

        let (_, message_list) = req.doit().await.map_err(map_api_error)?;

        let summaries = summaries_from(message_list.messages.unwrap_or_default());
        Ok((summaries, message_list.next_page_token))
    }
}

/// Entries missing either id cannot be tracked in the ledger and are dropped.
fn summaries_from(messages: Vec<google_gmail1::api::Message>) -> Vec<MessageSummary> {
    messages
        .into_iter()
        .filter_map(|m| {
            Some(MessageSummary {
                message_id: m.id?,
                thread_id: m.thread_id?,
            })
        })
        .collect()
}

#[async_trait]
impl MailGateway for GmailClient {
    async fn fetch_unread_summaries(&self) -> Result<Vec<MessageSummary>, GatewayError> {
        let limit = self.settings.max_messages as usize;
        let mut summaries = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let remaining = limit.saturating_sub(summaries.len());
            if remaining == 0 {
                break;
            }
            let page_size = remaining.min(500) as u32;

            let (page, next) = self.list_page(page_token.as_deref(), page_size).await?;
            debug!(count = page.len(), has_more = next.is_some(), "listed unread page");
            summaries.extend(page);

            match next {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        summaries.truncate(limit);
        Ok(summaries)
    }

    async fn fetch_message(&self, message_id: &str) -> Result<Message, GatewayError> {
        let (_, msg) = self
            .hub
            .users()
            .messages_get(USER, message_id)
            .format("full")
            .add_scope(Scope::Modify)
            .doit()
            .await
            .map_err(map_api_error)?;

        let payload = msg.payload.as_ref();
        let received_at = Utc
            .timestamp_millis_opt(msg.internal_date.unwrap_or(0))
            .single()
            .unwrap_or_default();

        Ok(Message {
            id: msg.id.clone().unwrap_or_else(|| message_id.to_string()),
            thread_id: msg.thread_id.clone().unwrap_or_default(),
            received_at,
            sender: header_value(payload, "From"),
            subject: header_value(payload, "Subject"),
            body: extract_body(&msg),
        })
    }

    async fn apply_label(&self, thread_id: &str, importance: &str) -> Result<(), GatewayError> {
        labels::apply_importance_label(self, thread_id, importance).await?;
        Ok(())
    }

    async fn send_message(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        thread_id: Option<&str>,
    ) -> Option<String> {
        let raw_message = build_rfc822(to, subject, body);
        debug!(to, subject, body_len = body.len(), "sending message");

        let metadata = google_gmail1::api::Message {
            thread_id: thread_id.map(String::from),
            ..Default::default()
        };

        let mime_type = match "message/rfc822".parse() {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "invalid upload mime type");
                return None;
            }
        };

        use std::io::Cursor;
        let cursor = Cursor::new(raw_message.into_bytes());

        let result = self
            .hub
            .users()
            .messages_send(metadata, USER)
            .add_scope(Scope::Send)
            .upload(cursor, mime_type)
            .await;

        match result {
            Ok((_, sent)) => {
                let id = sent.id;
                info!(to, message_id = ?id, "email sent");
                id
            }
            Err(e) => {
                warn!(to, error = %e, "failed to send email");
                None
            }
        }
    }
}

#[async_trait]
impl LabelApi for GmailClient {
    async fn list_labels(&self) -> Result<Vec<Label>, GatewayError> {
        let (_, label_list) = self
            .hub
            .users()
            .labels_list(USER)
            .add_scope(Scope::Modify)
            .doit()
            .await
            .map_err(map_api_error)?;

        let labels = label_list
            .labels
            .unwrap_or_default()
            .into_iter()
            .map(|l| Label {
                id: l.id.unwrap_or_default(),
                name: l.name.unwrap_or_default(),
            })
            .collect();

        Ok(labels)
    }

    async fn create_label(&self, name: &str) -> Result<Label, GatewayError> {
        let req = google_gmail1::api::Label {
            name: Some(name.to_string()),
            label_list_visibility: Some("labelShow".to_string()),
            message_list_visibility: Some("show".to_string()),
            ..Default::default()
        };
        let (_, created) = self
            .hub
            .users()
            .labels_create(req, USER)
            .add_scope(Scope::Modify)
            .doit()
            .await
            .map_err(map_api_error)?;

        let id = created
            .id
            .ok_or_else(|| GatewayError::Label(format!("created label {name} has no id")))?;
        Ok(Label {
            id,
            name: created.name.unwrap_or_else(|| name.to_string()),
        })
    }

    async fn add_label_to_thread(
        &self,
        thread_id: &str,
        label_id: &str,
    ) -> Result<(), GatewayError> {
        let req = google_gmail1::api::ModifyThreadRequest {
            add_label_ids: Some(vec![label_id.to_string()]),
            remove_label_ids: None,
        };
        self.hub
            .users()
            .threads_modify(req, USER, thread_id)
            .add_scope(Scope::Modify)
            .doit()
            .await
            .map_err(map_api_error)?;
        Ok(())
    }
}

/// Sorts client failures into the workflow's error kinds. Only a missing or
/// rejected token counts as an auth failure.
fn map_api_error(err: google_gmail1::Error) -> GatewayError {
    use google_gmail1::Error;

    match &err {
        Error::MissingToken(_) | Error::MissingAPIKey => GatewayError::Auth(err.to_string()),
        Error::Failure(response) if response.status() == StatusCode::UNAUTHORIZED => {
            GatewayError::Auth(err.to_string())
        }
        Error::BadRequest(value) if value["error"]["code"] == 401 => {
            GatewayError::Auth(err.to_string())
        }
        _ => GatewayError::Transport(err.to_string()),
    }
}

/// Single-part UTF-8 text message. CR and LF are stripped from header
/// values; a non-ASCII subject is written as an RFC 2047 encoded word.
pub fn build_rfc822(to: &str, subject: &str, body: &str) -> String {
    format!(
        "To: {}\r\nSubject: {}\r\nMIME-Version: 1.0\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\nContent-Transfer-Encoding: 8bit\r\n\r\n{}",
        sanitize_header(to),
        encode_header_value(&sanitize_header(subject)),
        body
    )
}

fn sanitize_header(value: &str) -> String {
    value.replace(['\r', '\n'], " ").trim().to_string()
}

fn encode_header_value(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", general_purpose::STANDARD.encode(value))
    }
}
