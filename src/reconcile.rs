use std::ops::AddAssign;

use serde::Serialize;
use tracing::{debug, instrument, trace};

use crate::{
  lesson::{LessonRecord, SlotContent, SlotEntry, SlotKey, StoredLesson},
  store::{Store, StoreResult, UnitOfWork},
};

/// What to do with one slot key, decided from the rows already stored for
/// it and the lessons the source now lists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotPlan {
  /// Nothing to write.
  Unchanged,
  /// The slot is free now; drop whatever was there.
  Clear,
  /// Nothing stored yet; insert every lesson.
  InsertAll(Vec<LessonRecord>),
  /// One stored row, one incoming lesson: overwrite the row's fields.
  UpdateInPlace { id: i64, record: LessonRecord },
  /// Delete every stored row, then insert every incoming lesson. Never a
  /// merge, so a changed group list cannot leave stale rows behind.
  ReplaceAll(Vec<LessonRecord>),
}

/// Chooses the reconciliation policy for one key. An empty `intended` slice
/// means the source shows the slot as free.
pub fn plan_slot(
  existing: &[StoredLesson],
  intended: Vec<LessonRecord>,
) -> SlotPlan {
  if intended.is_empty() {
    return if existing.is_empty() {
      SlotPlan::Unchanged
    } else {
      SlotPlan::Clear
    };
  }
  if existing.is_empty() {
    return SlotPlan::InsertAll(intended);
  }

  match (existing, <[LessonRecord; 1]>::try_from(intended)) {
    ([only], Ok([record])) if only.record.same_lesson(&record) => {
      SlotPlan::Unchanged
    }
    ([only], Ok([record])) => SlotPlan::UpdateInPlace {
      id: only.id,
      record,
    },
    // several stored rows collapse down to the single incoming one
    (_, Ok(single)) => SlotPlan::ReplaceAll(single.into()),
    (_, Err(many)) => SlotPlan::ReplaceAll(many),
  }
}

/// Persisted shape of what a walker found for a slot.
pub fn intended_records(
  entry: &SlotEntry,
  department: Option<&str>,
) -> Vec<LessonRecord> {
  match &entry.content {
    SlotContent::Vacant => Vec::new(),
    SlotContent::Lessons(fragments) => fragments
      .iter()
      .map(|f| LessonRecord::from_fragment(&entry.key, f, department))
      .collect(),
  }
}

/// Row counts touched while reconciling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationSummary {
  pub slots:     u64,
  pub unchanged: u64,
  pub inserted:  u64,
  pub updated:   u64,
  pub deleted:   u64,
}

impl AddAssign for ReconciliationSummary {
  fn add_assign(&mut self, rhs: Self) {
    self.slots += rhs.slots;
    self.unchanged += rhs.unchanged;
    self.inserted += rhs.inserted;
    self.updated += rhs.updated;
    self.deleted += rhs.deleted;
  }
}

async fn apply_plan(
  uow: &mut UnitOfWork,
  key: &SlotKey,
  plan: SlotPlan,
) -> StoreResult<ReconciliationSummary> {
  let mut summary = ReconciliationSummary {
    slots: 1,
    ..Default::default()
  };

  match plan {
    SlotPlan::Unchanged => summary.unchanged = 1,
    SlotPlan::Clear => summary.deleted = uow.delete(key).await?,
    SlotPlan::InsertAll(records) => {
      for record in &records {
        uow.insert(record).await?;
      }
      summary.inserted = records.len() as u64;
    }
    SlotPlan::UpdateInPlace { id, record } => {
      summary.updated = uow.update(id, &record).await?;
    }
    SlotPlan::ReplaceAll(records) => {
      summary.deleted = uow.delete(key).await?;
      for record in &records {
        uow.insert(record).await?;
      }
      summary.inserted = records.len() as u64;
    }
  }

  Ok(summary)
}

/// Reconciles one slot inside its own unit of work. Either every mutation
/// for the key lands or none does.
#[instrument(skip(store, entry), fields(key = ?entry.key))]
pub async fn reconcile_slot(
  store: &Store,
  entry: &SlotEntry,
  department: Option<&str>,
) -> StoreResult<ReconciliationSummary> {
  let mut uow = store.begin().await?;
  let existing = uow.select(&entry.key).await?;
  let plan = plan_slot(&existing, intended_records(entry, department));
  trace!(existing = existing.len(), ?plan, "planned slot reconciliation");

  let summary = apply_plan(&mut uow, &entry.key, plan).await?;
  uow.commit().await?;
  Ok(summary)
}

/// Reconciles every slot of one document, in order. Stops at the first
/// store failure; slots already committed stay committed.
pub async fn reconcile_slots(
  store: &Store,
  slots: &[SlotEntry],
  department: Option<&str>,
) -> StoreResult<ReconciliationSummary> {
  let mut total = ReconciliationSummary::default();
  for entry in slots {
    total += reconcile_slot(store, entry, department).await?;
  }
  debug!(?total, "reconciled document slots");
  Ok(total)
}
