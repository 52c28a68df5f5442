use crate::error::GatewayError;
use crate::models::{Message, MessageSummary};
use async_trait::async_trait;

/// The operations the classification workflow needs from an authenticated
/// mail session.
#[async_trait]
pub trait MailGateway: Send + Sync {
    /// Unread messages in provider order. An empty list is not an error.
    async fn fetch_unread_summaries(&self) -> Result<Vec<MessageSummary>, GatewayError>;

    async fn fetch_message(&self, message_id: &str) -> Result<Message, GatewayError>;

    /// Adds the label named after `importance` to the thread, creating the
    /// label first if needed. Existing labels on the thread are kept.
    async fn apply_label(&self, thread_id: &str, importance: &str) -> Result<(), GatewayError>;

    /// Sends a plain-text message. Failures are logged and reported as `None`.
    async fn send_message(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        thread_id: Option<&str>,
    ) -> Option<String>;
}
