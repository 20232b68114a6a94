//! postwatch - Entry point for one mailbox mining run

use anyhow::Context;

use postwatch::config::Settings;
use postwatch::run_pipeline;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "settings.json".to_string());
    let settings =
        Settings::load(&path).with_context(|| format!("failed to load settings from {path}"))?;

    tracing::info!(mailbox = %settings.imap.username, "starting postwatch run");
    let snapshot = run_pipeline(&settings).await;

    let json = serde_json::to_string_pretty(&snapshot).context("failed to encode snapshot")?;
    println!("{json}");
    Ok(())
}
