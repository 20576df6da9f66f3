//! Ingests published class-schedule spreadsheets into a lesson store.
//!
//! Documents are discovered on the room occupancy index page and, when
//! configured, on a social feed; each is downloaded, converted to `.xlsx`,
//! walked cell by cell, and reconciled against the lessons already stored
//! for every (date, time slot, room) it covers.

pub mod config;
pub mod discover;
pub mod fetch_sheet;
pub mod ingest;
pub mod lesson;
pub mod normalize;
pub mod parse_cell;
pub mod reconcile;
pub mod state;
pub mod store;
pub mod walk_table;

use std::sync::LazyLock;

pub use self::{
  config::Config,
  ingest::{CancellationFlag, IngestionReport, purge_before, run_ingestion},
  store::Store,
};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
  reqwest::Client::builder()
    .user_agent(USER_AGENT)
    .build()
    .unwrap_or_default()
});
