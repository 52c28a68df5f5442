mod auth;
mod classifier;
mod config;
mod error;
mod extract;
mod gateway;
mod gmail;
mod labels;
mod ledger;
mod llm;
mod models;
mod sync;
mod workflow;

use crate::classifier::{LlmClassifier, LlmReplyDrafter};
use crate::config::{Config, DEFAULT_CONFIG_PATH};
use crate::gmail::GmailClient;
use crate::ledger::{SqliteLedger, ThreadLedger};
use crate::llm::OpenAiClient;
use crate::models::RunSummary;
use crate::workflow::{Controller, WorkflowOptions};
use anyhow::{Context, bail};
use google_gmail1::Gmail;
use tracing::{Level, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let debug_logging = args.iter().any(|arg| arg == "--debug");
    tracing_subscriber::fmt()
        .with_max_level(if debug_logging { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_PATH);
    let config = Config::load(config_path);

    // Handle token reset
    if args.iter().any(|arg| arg == "--reset-token") {
        auth::RingStorage.clear_token().await?;
        println!("Token cleared. Run again without --reset-token to re-authenticate.");
        return Ok(());
    }

    let ledger = SqliteLedger::new(&config.ledger.database_url)
        .await
        .context("Failed to open processed-thread ledger")?;
    ledger.run_migrations().await?;

    if args.iter().any(|arg| arg == "--clear-ledger") {
        let removed = ledger.clear_all().await?;
        println!("Cleared {removed} processed thread(s).");
        return Ok(());
    }

    if let Some(i) = args.iter().position(|arg| arg == "--list") {
        let search = args.get(i + 1).filter(|a| !a.starts_with("--")).map(String::as_str);
        let records = ledger.records(search, 50).await?;
        for record in &records {
            println!(
                "{}  {:<6}  {}",
                record.processed_at,
                record.importance.as_deref().unwrap_or("-"),
                record.thread_id
            );
        }
        println!("{} of {} processed thread(s) shown.", records.len(), ledger.count().await?);
        return Ok(());
    }

    let holder = format!("pid-{}-{}", std::process::id(), chrono::Utc::now().timestamp());
    let lock_ttl = std::time::Duration::from_secs(config.ledger.lock_ttl_secs);
    if !ledger.try_acquire_run_lock(&holder, lock_ttl).await? {
        bail!("Another classification run is in progress (ledger lock held)");
    }

    let result = run_pass(&config, &ledger).await;

    if let Err(e) = ledger.release_run_lock(&holder).await {
        warn!(error = %e, "failed to release ledger lock");
    }

    let summary = result?;
    println!("{summary}");
    Ok(())
}

async fn run_pass(config: &Config, ledger: &SqliteLedger) -> anyhow::Result<RunSummary> {
    let api_key = config
        .classifier
        .resolve_api_key()
        .context("No classifier API key: set classifier.api_key or OPENAI_API_KEY")?;
    let llm = OpenAiClient::new(&config.classifier, api_key)?;
    let classifier = LlmClassifier::new(
        llm.clone(),
        config.classifier.model.clone(),
        config.classifier.max_body_chars,
    );
    let drafter = LlmReplyDrafter::new(
        llm,
        config.classifier.model.clone(),
        config.reply.sign_off.clone(),
        config.classifier.max_body_chars,
    );

    let secret = auth::Authenticator::load_secret(&config.gmail.credentials_path).await?;
    let authenticator = auth::Authenticator::authenticate(secret).await?;
    authenticator
        .token(auth::SCOPES)
        .await
        .context("Gmail authorization failed")?;
    info!("Gmail session ready");

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .context("Failed to load native roots")?
        .https_only()
        .enable_http1()
        .build();
    let hub = Gmail::new(hyper::Client::builder().build(https), authenticator);
    let gmail = GmailClient::new(hub, config.gmail.clone());

    let mut controller = Controller::new(
        &gmail,
        &classifier,
        ledger,
        WorkflowOptions::from_config(config),
    );
    if config.reply.enabled {
        controller = controller.with_reply_drafter(&drafter);
    }

    let summary = controller.run().await?;
    Ok(summary)
}
