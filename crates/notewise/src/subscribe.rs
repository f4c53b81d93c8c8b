//! Subscribe command: store a user's browser push subscription.

use miette::Result;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::info;

use notewise_push::parse_subscription;
use notewise_store::NoteDb;

use crate::config::Settings;

pub async fn run(
    settings: &Settings,
    user_id: i64,
    source: Option<&str>,
    clear: bool,
) -> Result<()> {
    let db = settings.open_database()?;

    if clear {
        db.clear_push_subscription(user_id)
            .map_err(|e| miette::miette!("{}", e))?;
        info!(user_id, "push subscription removed");
        return Ok(());
    }

    let source = source.ok_or_else(|| miette::miette!("no subscription given"))?;
    let blob = read_source(source, tokio::io::stdin()).await?;
    store_subscription(&db, user_id, &blob)?;

    info!(user_id, "push subscription stored");
    Ok(())
}

/// Read the subscription JSON from a file, or from `stdin` for `-`.
async fn read_source(source: &str, mut stdin: impl AsyncRead + Unpin) -> Result<String> {
    if source == "-" {
        let mut blob = String::new();
        stdin
            .read_to_string(&mut blob)
            .await
            .map_err(|e| miette::miette!("failed to read subscription from stdin: {}", e))?;
        Ok(blob)
    } else {
        tokio::fs::read_to_string(source)
            .await
            .map_err(|e| miette::miette!("failed to read subscription {}: {}", source, e))
    }
}

/// Validate a subscription blob and store it for `user_id`.
fn store_subscription(db: &NoteDb, user_id: i64, blob: &str) -> Result<()> {
    let blob = blob.trim();
    parse_subscription(blob).map_err(|e| miette::miette!("{}", e))?;
    db.set_push_subscription(user_id, blob)
        .map_err(|e| miette::miette!("{}", e))
}
