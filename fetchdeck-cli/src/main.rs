//! `fetchdeck` -- headless host for a single remote download job.
//!
//! Usage: `fetchdeck <url> [video|audio] [resolution] [filename]`
//!
//! | Variable           | Default          | Description                         |
//! |--------------------|------------------|-------------------------------------|
//! | `API_URL`          | from config file | Base URL of the download service    |
//! | `FETCHDECK_CONFIG` | `fetchdeck.json` | Path of the JSON config file        |
//! | `RUST_LOG`         | `fetchdeck=info` | Log filter                          |

use anyhow::{Result, bail};
use fetchdeck_core::{
    Config, DirectorySaver, HttpJobClient, JobParameters, JobSession, MediaKind, SessionEvent,
};
use std::{path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn parse_args(mut args: impl Iterator<Item = String>) -> JobParameters {
    let url = args.next().unwrap_or_default();
    let kind = match args.next().as_deref() {
        Some("audio") => MediaKind::Audio,
        _ => MediaKind::Video,
    };
    let non_empty = |s: String| (!s.is_empty()).then_some(s);

    JobParameters {
        url,
        kind,
        resolution: args.next().and_then(non_empty),
        requested_filename: args.next().and_then(non_empty),
        folder: None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fetchdeck=info,fetchdeck_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("FETCHDECK_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("fetchdeck.json"));
    let config = Config::load(&config_path).await?.with_env();
    config.validate()?;
    tracing::info!(api_url = %config.api_url, download_dir = %config.download_dir.display(), "Configuration loaded");

    let client = Arc::new(HttpJobClient::new(&config)?);
    match client.default_folder().await {
        Ok(folder) => tracing::info!(folder = %folder, "Service default folder"),
        Err(e) => tracing::debug!(error = %e, "Default folder lookup failed"),
    }

    let owner = CancellationToken::new();
    let saver = Arc::new(DirectorySaver::new(config.download_dir.clone()));
    let (session, mut events) = JobSession::new(client, saver, &config, &owner);

    if let Err(e) = session.start(parse_args(std::env::args().skip(1))).await {
        println!("{}", session.state().await.status_message);
        return Err(e.into());
    }

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                session.cancel().await;
                break Err(anyhow::anyhow!("interrupted"));
            }
            event = events.recv() => match event {
                Some(SessionEvent::StatusChanged(ui)) if !ui.status_message.is_empty() => {
                    println!("[{:>5.1}%] {}", ui.progress_percent, ui.status_message);
                }
                Some(SessionEvent::ArtifactSaved { filename, size, .. }) => {
                    println!("Saved {filename} ({size} bytes)");
                    break Ok(());
                }
                Some(SessionEvent::JobFailed { reason, .. }) => break Err(anyhow::anyhow!(reason)),
                Some(SessionEvent::SessionReset) | None => break Ok(()),
                Some(_) => {}
            }
        }
    };

    session.shutdown().await;
    owner.cancel();

    if let Err(e) = outcome {
        bail!("download did not finish: {e}");
    }
    Ok(())
}
