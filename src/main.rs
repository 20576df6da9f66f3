use miette::{Context, IntoDiagnostic};
use schedule_ingest::{CancellationFlag, Config, Store, run_ingestion};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> miette::Result<()> {
  tracing_subscriber::registry()
    .with(fmt::layer())
    .with(EnvFilter::from_default_env())
    .init();

  let config =
    Config::from_env().context("failed to gather config from env")?;
  info!(?config, "loaded config");

  let store =
    Store::connect(&config.database_url, config.store_connect_attempts)
      .await
      .context("failed to open lesson store")?;

  let cancel = CancellationFlag::new();
  tokio::spawn({
    let cancel = cancel.clone();
    async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupt received, stopping after the current document");
        cancel.cancel();
      }
    }
  });

  let report = run_ingestion(&store, &config, &cancel).await;
  store.close().await;
  let report = report.context("ingestion run failed")?;

  println!(
    "{}",
    serde_json::to_string_pretty(&report).into_diagnostic()?
  );
  Ok(())
}
