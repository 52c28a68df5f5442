use sqlx::Row;
use sqlx::sqlite::SqlitePoolOptions;
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <thread_id> [database_url]", args[0]);
        eprintln!("Shows the ledger entry and run lock state for one thread.");
        std::process::exit(1);
    }

    let thread_id = &args[1];
    let database_url = args
        .get(2)
        .map(String::as_str)
        .unwrap_or("sqlite:processed_emails.db");
    let pool = SqlitePoolOptions::new()
        .connect(database_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    let row = sqlx::query(
        "SELECT thread_id, importance, processed_at
         FROM processed_threads
         WHERE thread_id = ?",
    )
    .bind(thread_id)
    .fetch_optional(&pool)
    .await?;

    match row {
        Some(row) => {
            let importance: Option<String> = row.get("importance");
            let processed_at: chrono::NaiveDateTime = row.get("processed_at");
            println!("Thread:       {}", thread_id);
            println!("Importance:   {}", importance.as_deref().unwrap_or("(none)"));
            println!("Processed at: {}", processed_at);
        }
        None => println!("Thread '{}' has not been processed", thread_id),
    }

    let lock = sqlx::query("SELECT holder, acquired_at FROM run_lock WHERE id = 1")
        .fetch_optional(&pool)
        .await?;
    if let Some(lock) = lock {
        let holder: String = lock.get("holder");
        let acquired_at: chrono::NaiveDateTime = lock.get("acquired_at");
        println!("Run lock held by {} since {}", holder, acquired_at);
    }

    Ok(())
}
