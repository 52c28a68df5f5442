use crate::error::ClassifyError;
use crate::llm::{ChatCompletion, ChatMessage, ChatRequest};
use crate::models::Importance;
use async_trait::async_trait;
use tracing::debug;

const CLASSIFY_SYSTEM_PROMPT: &str = "You are an email triage assistant. \
Decide how important an email is for its recipient. \
Answer with exactly one word: high, medium, or low.";

const REPLY_SYSTEM_PROMPT: &str = "You are a helpful email assistant.";

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        subject: &str,
        body: &str,
        sender: &str,
    ) -> Result<Importance, ClassifyError>;
}

#[async_trait]
pub trait ReplyDrafter: Send + Sync {
    async fn draft_reply(&self, subject: &str, body: &str, sender: &str)
        -> Result<String, ClassifyError>;
}

pub struct LlmClassifier<C> {
    client: C,
    model: String,
    max_body_chars: usize,
}

impl<C: ChatCompletion> LlmClassifier<C> {
    pub fn new(client: C, model: impl Into<String>, max_body_chars: usize) -> Self {
        Self {
            client,
            model: model.into(),
            max_body_chars,
        }
    }

    fn request(&self, subject: &str, body: &str, sender: &str) -> ChatRequest {
        let body_preview = truncate_chars(body, self.max_body_chars);
        let prompt = format!(
            "From: {sender}\nSubject: {subject}\n\nBody:\n{body_preview}\n\n\
             How important is this email? Reply with high, medium, or low."
        );

        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(CLASSIFY_SYSTEM_PROMPT),
                ChatMessage::user(prompt),
            ],
            temperature: 0.0,
            max_tokens: 5,
        }
    }
}

#[async_trait]
impl<C: ChatCompletion> Classifier for LlmClassifier<C> {
    async fn classify(
        &self,
        subject: &str,
        body: &str,
        sender: &str,
    ) -> Result<Importance, ClassifyError> {
        let answer = self.client.complete(&self.request(subject, body, sender)).await?;
        debug!(answer = %answer.trim(), "classifier answered");
        answer.parse()
    }
}

pub struct LlmReplyDrafter<C> {
    client: C,
    model: String,
    sign_off: Option<String>,
    max_body_chars: usize,
}

impl<C: ChatCompletion> LlmReplyDrafter<C> {
    pub fn new(
        client: C,
        model: impl Into<String>,
        sign_off: Option<String>,
        max_body_chars: usize,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            sign_off,
            max_body_chars,
        }
    }

    fn request(&self, subject: &str, body: &str, sender: &str) -> ChatRequest {
        let system = match &self.sign_off {
            Some(sign_off) => format!("{REPLY_SYSTEM_PROMPT} You can sign off with {sign_off}"),
            None => REPLY_SYSTEM_PROMPT.to_string(),
        };
        let prompt = format!(
            "You received an email from {sender}.\n\n\
             Subject: {subject}\n\n\
             Body:\n{}\n\n\
             Write a clear, concise, and professional reply.",
            truncate_chars(body, self.max_body_chars)
        );

        ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(prompt)],
            temperature: 0.7,
            max_tokens: 500,
        }
    }
}

#[async_trait]
impl<C: ChatCompletion> ReplyDrafter for LlmReplyDrafter<C> {
    async fn draft_reply(
        &self,
        subject: &str,
        body: &str,
        sender: &str,
    ) -> Result<String, ClassifyError> {
        let reply = self.client.complete(&self.request(subject, body, sender)).await?;
        Ok(reply.trim().to_string())
    }
}

/// "RE: " prefix unless the subject already carries one.
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    let already_reply = trimmed
        .get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("re:"));
    if already_reply {
        trimmed.to_string()
    } else {
        format!("RE: {trimmed}")
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
