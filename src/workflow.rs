//! The per-thread classification loop.
//!
//! Each unread thread moves through fetch, classify, label and commit. The
//! ledger commit is always the last step, after the label is on the thread,
//! so an interrupted run can only lead to the (idempotent) label being
//! applied again on the next run.

use crate::classifier::{Classifier, ReplyDrafter, reply_subject};
use crate::config::{Config, ReplySettings};
use crate::error::{GatewayError, WorkflowError};
use crate::gateway::MailGateway;
use crate::ledger::ThreadLedger;
use crate::models::{Importance, Message, MessageSummary, RunSummary};
use crate::sync::ThreadClaims;
use futures::StreamExt;
use futures::stream;
use std::fmt;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    pub concurrency: usize,
    pub call_timeout: Duration,
    pub reply: ReplySettings,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl WorkflowOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.workflow.concurrency.max(1),
            call_timeout: config.workflow.call_timeout(),
            reply: config.reply.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyProcessed,
    InFlight,
    LedgerUnavailable,
    FetchFailed,
    ClassificationFailed,
    LabelFailed,
    CommitFailed,
}

impl SkipReason {
    /// Whether the skip counts against the run as a failure.
    pub fn is_error(&self) -> bool {
        !matches!(self, SkipReason::AlreadyProcessed | SkipReason::InFlight)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AlreadyProcessed => "already-processed",
            SkipReason::InFlight => "in-flight",
            SkipReason::LedgerUnavailable => "ledger-unavailable",
            SkipReason::FetchFailed => "fetch-failed",
            SkipReason::ClassificationFailed => "classification-failed",
            SkipReason::LabelFailed => "label-failed",
            SkipReason::CommitFailed => "commit-failed",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    NotAttempted,
    Sent(String),
    Failed,
}

/// Terminal state of one thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadOutcome {
    Processed {
        importance: Importance,
        reply: ReplyOutcome,
    },
    Skipped(SkipReason),
}

impl RunSummary {
    pub fn record(&mut self, outcome: &ThreadOutcome) {
        match outcome {
            ThreadOutcome::Processed { reply, .. } => {
                self.processed += 1;
                match reply {
                    ReplyOutcome::Sent(_) => self.replies_sent += 1,
                    ReplyOutcome::Failed => self.replies_failed += 1,
                    ReplyOutcome::NotAttempted => {}
                }
            }
            ThreadOutcome::Skipped(reason) if reason.is_error() => self.errors += 1,
            ThreadOutcome::Skipped(_) => self.skipped += 1,
        }
    }
}

pub struct Controller<'a> {
    gateway: &'a dyn MailGateway,
    classifier: &'a dyn Classifier,
    ledger: &'a dyn ThreadLedger,
    drafter: Option<&'a dyn ReplyDrafter>,
    options: WorkflowOptions,
    claims: ThreadClaims,
}

impl<'a> Controller<'a> {
    pub fn new(
        gateway: &'a dyn MailGateway,
        classifier: &'a dyn Classifier,
        ledger: &'a dyn ThreadLedger,
        options: WorkflowOptions,
    ) -> Self {
        Self {
            gateway,
            classifier,
            ledger,
            drafter: None,
            options,
            claims: ThreadClaims::default(),
        }
    }

    pub fn with_reply_drafter(mut self, drafter: &'a dyn ReplyDrafter) -> Self {
        self.drafter = Some(drafter);
        self
    }

    /// One pass over the unread inbox. Only an auth failure, or failing to
    /// list the inbox at all, ends the run with an error.
    pub async fn run(&self) -> Result<RunSummary, WorkflowError> {
        let summaries = self
            .gateway
            .fetch_unread_summaries()
            .await
            .map_err(|e| match e {
                GatewayError::Auth(msg) => WorkflowError::Auth(msg),
                other => WorkflowError::Listing(other),
            })?;

        let mut summary = RunSummary::default();
        if summaries.is_empty() {
            info!("No unread messages found");
            return Ok(summary);
        }
        info!(count = summaries.len(), concurrency = self.options.concurrency, "processing unread messages");

        let mut outcomes = stream::iter(summaries)
            .map(|s| self.process_thread(s))
            .buffered(self.options.concurrency.max(1));

        while let Some(outcome) = outcomes.next().await {
            summary.record(&outcome?);
        }

        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            errors = summary.errors,
            replies_sent = summary.replies_sent,
            replies_failed = summary.replies_failed,
            "classification pass finished"
        );
        Ok(summary)
    }

    async fn process_thread(&self, summary: MessageSummary) -> Result<ThreadOutcome, WorkflowError> {
        let thread_id = summary.thread_id.as_str();

        let Some(_claim) = self.claims.claim(thread_id) else {
            debug!(thread_id, "thread held by another worker");
            return Ok(ThreadOutcome::Skipped(SkipReason::InFlight));
        };

        match self.ledger.is_processed(thread_id).await {
            Ok(true) => {
                info!(thread_id, "already processed, skipping");
                return Ok(ThreadOutcome::Skipped(SkipReason::AlreadyProcessed));
            }
            Ok(false) => {}
            Err(e) => return Ok(skip(thread_id, SkipReason::LedgerUnavailable, &e)),
        }

        let message = match timeout(self.options.call_timeout, self.gateway.fetch_message(&summary.message_id)).await {
            Ok(Ok(message)) => message,
            Ok(Err(e)) => return gateway_failure(thread_id, SkipReason::FetchFailed, e),
            Err(_) => return Ok(timed_out(thread_id, SkipReason::FetchFailed, self.options.call_timeout)),
        };
        debug!(thread_id, message_id = %message.id, "content loaded");

        let subject = message.subject.as_deref().unwrap_or("");
        let sender = message.sender.as_deref().unwrap_or("");
        let importance = match timeout(
            self.options.call_timeout,
            self.classifier.classify(subject, &message.body, sender),
        )
        .await
        {
            Ok(Ok(importance)) => importance,
            Ok(Err(e)) => return Ok(skip(thread_id, SkipReason::ClassificationFailed, &e)),
            Err(_) => {
                return Ok(timed_out(thread_id, SkipReason::ClassificationFailed, self.options.call_timeout));
            }
        };
        info!(thread_id, %importance, "classified");

        match timeout(self.options.call_timeout, self.gateway.apply_label(thread_id, importance.as_str())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return gateway_failure(thread_id, SkipReason::LabelFailed, e),
            Err(_) => return Ok(timed_out(thread_id, SkipReason::LabelFailed, self.options.call_timeout)),
        }

        if let Err(e) = self.ledger.mark_processed(thread_id, Some(importance)).await {
            return Ok(skip(thread_id, SkipReason::CommitFailed, &e));
        }
        info!(thread_id, %importance, "thread processed");

        let reply = self.reply_if_enabled(&message, importance).await;
        Ok(ThreadOutcome::Processed { importance, reply })
    }

    /// Runs after the ledger commit, so a reply is sent at most once.
    async fn reply_if_enabled(&self, message: &Message, importance: Importance) -> ReplyOutcome {
        let Some(drafter) = self.drafter else {
            return ReplyOutcome::NotAttempted;
        };
        if !self.options.reply.applies_to(importance) {
            return ReplyOutcome::NotAttempted;
        }
        let Some(sender) = message.sender.as_deref().filter(|s| !s.trim().is_empty()) else {
            warn!(thread_id = %message.thread_id, "no sender to reply to");
            return ReplyOutcome::NotAttempted;
        };
        let subject = message.subject.as_deref().unwrap_or("");

        let body = match timeout(
            self.options.call_timeout,
            drafter.draft_reply(subject, &message.body, sender),
        )
        .await
        {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                warn!(thread_id = %message.thread_id, error = %e, "could not draft reply");
                return ReplyOutcome::Failed;
            }
            Err(_) => {
                warn!(thread_id = %message.thread_id, "reply drafting timed out");
                return ReplyOutcome::Failed;
            }
        };

        let subject_line = reply_subject(subject);
        let send = self.gateway.send_message(
            sender,
            &subject_line,
            &body,
            Some(message.thread_id.as_str()),
        );
        match timeout(self.options.call_timeout, send).await {
            Ok(Some(id)) => ReplyOutcome::Sent(id),
            Ok(None) => ReplyOutcome::Failed,
            Err(_) => {
                warn!(thread_id = %message.thread_id, "sending reply timed out");
                ReplyOutcome::Failed
            }
        }
    }
}

fn skip(thread_id: &str, reason: SkipReason, error: &dyn fmt::Display) -> ThreadOutcome {
    warn!(thread_id, %reason, error = %error, "thread skipped");
    ThreadOutcome::Skipped(reason)
}

fn timed_out(thread_id: &str, reason: SkipReason, after: Duration) -> ThreadOutcome {
    warn!(thread_id, %reason, timeout = ?after, "thread skipped, call timed out");
    ThreadOutcome::Skipped(reason)
}

fn gateway_failure(
    thread_id: &str,
    reason: SkipReason,
    error: GatewayError,
) -> Result<ThreadOutcome, WorkflowError> {
    if let GatewayError::Auth(msg) = error {
        warn!(thread_id, "mail session rejected, aborting run");
        return Err(WorkflowError::Auth(msg));
    }
    warn!(thread_id, %reason, kind = error.kind(), error = %error, "thread skipped");
    Ok(ThreadOutcome::Skipped(reason))
}
