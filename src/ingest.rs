//! Entry points for one ingestion run and for the retention purge.

use std::{
  collections::HashSet,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use calamine::{Data, Range};
use chrono::NaiveDate;
use miette::{Context, IntoDiagnostic};
use reqwest::Url;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::{
  config::Config,
  discover::{
    DiscoveredDocument, discover_from_feed, discover_from_index, fetch_feed,
    fetch_index,
  },
  lesson::SlotEntry,
  reconcile::{ReconciliationSummary, reconcile_slots},
  state::DocumentState,
  store::{Store, StoreResult},
  walk_table::{TableShape, table_source},
};

/// Shared stop request, checked between documents.
#[derive(Clone, Debug, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
  pub fn new() -> Self { Self::default() }

  pub fn cancel(&self) { self.0.store(true, Ordering::SeqCst) }

  pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::SeqCst) }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IngestionReport {
  pub purged:     u64,
  pub discovered: usize,
  pub ingested:   usize,
  pub skipped:    usize,
  pub cancelled:  bool,
  pub lessons:    ReconciliationSummary,
}

/// Deletes every lesson dated strictly before `cutoff`.
pub async fn purge_before(
  store: &Store,
  cutoff: NaiveDate,
) -> StoreResult<u64> {
  store.purge_before(cutoff).await
}

/// One full run: purge expired lessons, discover current documents, then
/// fetch, walk and reconcile them one at a time.
///
/// Problems with a single document are logged and the document skipped. The
/// run fails only when the store becomes unreachable.
#[instrument(skip_all)]
pub async fn run_ingestion(
  store: &Store,
  config: &Config,
  cancel: &CancellationFlag,
) -> miette::Result<IngestionReport> {
  let today = config.today();
  let mut report = IngestionReport::default();

  match purge_before(store, config.retention_cutoff(today)).await {
    Ok(purged) => report.purged = purged,
    Err(e) if e.is_connectivity() => {
      return Err(e).context("lesson store unreachable during purge");
    }
    Err(e) => {
      error!(error = ?miette::Report::new(e), "retention purge failed")
    }
  }

  let documents = discover_all(config, today).await;
  report.discovered = documents.len();
  info!(count = documents.len(), "discovered schedule documents");

  for document in documents {
    if cancel.is_cancelled() {
      warn!("ingestion cancelled, leaving remaining documents");
      report.cancelled = true;
      break;
    }

    let url = document.url.clone();
    let (document, slots) = match DocumentState::new(document)
      .run(config.group_grid_year)
      .await
    {
      Ok(walked) => walked,
      Err(e) => {
        error!(url, error = ?e, "skipping schedule document");
        report.skipped += 1;
        continue;
      }
    };

    match ingest_slots(store, &document, &slots).await {
      Ok(summary) => {
        info!(url, ?summary, "ingested schedule document");
        report.lessons += summary;
        report.ingested += 1;
      }
      Err(e) if e.is_connectivity() => {
        return Err(e).context(format!(
          "lesson store unreachable while ingesting {url}"
        ));
      }
      Err(e) => {
        error!(
          url,
          error = ?miette::Report::new(e),
          "failed to reconcile schedule document"
        );
        report.skipped += 1;
      }
    }
  }

  info!(?report, "ingestion run finished");
  Ok(report)
}

/// Reconciles the slots walked out of one document.
pub async fn ingest_slots(
  store: &Store,
  document: &DiscoveredDocument,
  slots: &[SlotEntry],
) -> StoreResult<ReconciliationSummary> {
  reconcile_slots(store, slots, document.department()).await
}

/// Walks an already-loaded worksheet and reconciles what it lists.
pub async fn ingest_worksheet(
  store: &Store,
  range: &Range<Data>,
  shape: TableShape,
  department: Option<&str>,
  group_grid_year: i32,
) -> miette::Result<ReconciliationSummary> {
  let slots = table_source(shape, range, group_grid_year)
    .slots()
    .context(format!("failed to walk {shape:?} worksheet"))?;
  reconcile_slots(store, &slots, department)
    .await
    .context("failed to reconcile worksheet")
}

/// Documents from the index page and, when configured, the social feed.
/// Either source failing leaves the other's documents in place.
async fn discover_all(
  config: &Config,
  today: NaiveDate,
) -> Vec<DiscoveredDocument> {
  let mut documents = Vec::new();

  match discover_index(config, today).await {
    Ok(found) => documents.extend(found),
    Err(e) => error!(error = ?e, "index discovery failed"),
  }

  if let Some(feed) = &config.feed {
    let found = fetch_feed(feed)
      .await
      .and_then(|payload| {
        discover_from_feed(&payload, today, config.horizon_days)
      });
    match found {
      Ok(found) => documents.extend(found),
      Err(e) => error!(error = ?e, "feed discovery failed"),
    }
  }

  let mut seen = HashSet::new();
  documents.retain(|d| seen.insert(d.url.clone()));
  documents
}

async fn discover_index(
  config: &Config,
  today: NaiveDate,
) -> miette::Result<Vec<DiscoveredDocument>> {
  let base = Url::parse(&config.index_url)
    .into_diagnostic()
    .context(format!("invalid index url {:?}", config.index_url))?;
  let html = fetch_index(&config.index_url).await?;
  Ok(discover_from_index(&html, &base, today, config.horizon_days))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cancellation_is_shared_between_clones() {
    let flag = CancellationFlag::new();
    let other = flag.clone();
    assert!(!other.is_cancelled());
    flag.cancel();
    assert!(other.is_cancelled());
  }
}
