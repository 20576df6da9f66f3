//! Lesson persistence over a pooled SQLite connection.
//!
//! Every mutation goes through a [`UnitOfWork`], which owns one pooled
//! connection inside a transaction. Dropping it without calling
//! [`UnitOfWork::commit`] rolls the transaction back and returns the
//! connection to the pool.

use std::{str::FromStr, time::Duration};

use chrono::NaiveDate;
use sqlx::{
  Sqlite, SqlitePool, Transaction,
  sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tracing::{debug, info, instrument, warn};

use crate::lesson::{LessonRecord, SlotKey, StoredLesson};

const SCHEMA: [&str; 3] = [
  "CREATE TABLE IF NOT EXISTS lessons (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    date        TEXT NOT NULL,
    time_slot   TEXT NOT NULL,
    room        TEXT NOT NULL,
    group_name  TEXT NOT NULL,
    teacher     TEXT NOT NULL,
    discipline  TEXT NOT NULL,
    department  TEXT
  )",
  "CREATE INDEX IF NOT EXISTS lessons_slot_key
    ON lessons (date, time_slot, room)",
  "CREATE INDEX IF NOT EXISTS lessons_group_date
    ON lessons (group_name, date)",
];

const SELECT_COLUMNS: &str = "SELECT id, date, time_slot, room, group_name, \
                              teacher, discipline, department FROM lessons";

const MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum StoreError {
  #[error("invalid database url {url:?}")]
  #[diagnostic(code(store::invalid_url))]
  InvalidUrl {
    url:    String,
    #[source]
    source: sqlx::Error,
  },
  #[error("failed to connect to the lesson store after {attempts} attempts")]
  #[diagnostic(code(store::connect))]
  Connect {
    attempts: u32,
    #[source]
    source:   sqlx::Error,
  },
  #[error("lesson store operation failed: {operation}")]
  #[diagnostic(code(store::query))]
  Query {
    operation: &'static str,
    #[source]
    source:    sqlx::Error,
  },
}

impl StoreError {
  fn query(operation: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
    move |source| Self::Query { operation, source }
  }

  /// Whether the store itself is unreachable, as opposed to one statement
  /// failing. Connectivity failures are fatal to an ingestion run.
  pub fn is_connectivity(&self) -> bool {
    match self {
      Self::InvalidUrl { .. } => false,
      Self::Connect { .. } => true,
      Self::Query { source, .. } => matches!(
        source,
        sqlx::Error::Io(_)
          | sqlx::Error::PoolTimedOut
          | sqlx::Error::PoolClosed
          | sqlx::Error::WorkerCrashed
      ),
    }
  }
}

#[derive(sqlx::FromRow)]
struct LessonRow {
  id:         i64,
  date:       NaiveDate,
  time_slot:  String,
  room:       String,
  group_name: String,
  teacher:    String,
  discipline: String,
  department: Option<String>,
}

impl From<LessonRow> for StoredLesson {
  fn from(row: LessonRow) -> Self {
    StoredLesson {
      id:     row.id,
      record: LessonRecord {
        date:       row.date,
        time_slot:  row.time_slot,
        room:       row.room,
        group:      row.group_name,
        teacher:    row.teacher,
        discipline: row.discipline,
        department: row.department,
      },
    }
  }
}

/// Process-wide handle to the lesson store. Cheap to clone; all clones share
/// one pool.
#[derive(Clone, Debug)]
pub struct Store {
  pool: SqlitePool,
}

impl Store {
  /// Connects to `url`, retrying with exponential backoff up to `attempts`
  /// times, then makes sure the schema exists.
  #[instrument]
  pub async fn connect(url: &str, attempts: u32) -> StoreResult<Self> {
    let options = SqliteConnectOptions::from_str(url)
      .map_err(|source| StoreError::InvalidUrl {
        url: url.to_owned(),
        source,
      })?
      .create_if_missing(true);

    let attempts = attempts.max(1);
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt = 1;
    let pool = loop {
      let result = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(options.clone())
        .await;
      match result {
        Ok(pool) => break pool,
        Err(source) if attempt >= attempts => {
          return Err(StoreError::Connect { attempts, source });
        }
        Err(e) => {
          warn!(
            attempt,
            ?backoff,
            error = %e,
            "store connection failed, retrying"
          );
          tokio::time::sleep(backoff).await;
          backoff *= 2;
          attempt += 1;
        }
      }
    };

    let store = Self { pool };
    store.bootstrap().await?;
    info!(attempt, "connected to lesson store");
    Ok(store)
  }

  /// A private in-memory store on a single shared connection.
  pub async fn connect_in_memory() -> StoreResult<Self> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(
      |source| StoreError::InvalidUrl {
        url: "sqlite::memory:".to_owned(),
        source,
      },
    )?;
    // every connection to `:memory:` is a separate database, so pin one
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .min_connections(1)
      .idle_timeout(None)
      .max_lifetime(None)
      .connect_with(options)
      .await
      .map_err(|source| StoreError::Connect {
        attempts: 1,
        source,
      })?;

    let store = Self { pool };
    store.bootstrap().await?;
    Ok(store)
  }

  async fn bootstrap(&self) -> StoreResult<()> {
    for statement in SCHEMA {
      sqlx::query(statement)
        .execute(&self.pool)
        .await
        .map_err(StoreError::query("bootstrap schema"))?;
    }
    debug!("lesson schema ready");
    Ok(())
  }

  /// Opens a unit of work on a pooled connection.
  pub async fn begin(&self) -> StoreResult<UnitOfWork> {
    let tx = self
      .pool
      .begin()
      .await
      .map_err(StoreError::query("begin transaction"))?;
    Ok(UnitOfWork { tx })
  }

  /// Deletes every lesson dated strictly before `cutoff`.
  #[instrument(skip(self))]
  pub async fn purge_before(&self, cutoff: NaiveDate) -> StoreResult<u64> {
    let mut uow = self.begin().await?;
    let deleted = uow.delete_before(cutoff).await?;
    uow.commit().await?;
    info!(deleted, %cutoff, "purged expired lessons");
    Ok(deleted)
  }

  /// Lessons of a group between two dates (inclusive), in timetable order.
  /// Rows of the group's lab subgroups, stored as `"<group> (<subgroup>)"`,
  /// are included.
  pub async fn lessons_for_group(
    &self,
    group: &str,
    start: NaiveDate,
    end: NaiveDate,
  ) -> StoreResult<Vec<StoredLesson>> {
    let sql = format!(
      "{SELECT_COLUMNS} WHERE (group_name = ? OR group_name LIKE ? ESCAPE \
       '\\') AND date BETWEEN ? AND ? ORDER BY date, time_slot, room, id"
    );
    let rows = sqlx::query_as::<_, LessonRow>(&sql)
      .bind(group)
      .bind(format!("{} (%", escape_like(group)))
      .bind(start)
      .bind(end)
      .fetch_all(&self.pool)
      .await
      .map_err(StoreError::query("select lessons by group"))?;
    Ok(rows.into_iter().map(Into::into).collect())
  }

  /// Lessons of a teacher between two dates (inclusive), in timetable order.
  pub async fn lessons_for_teacher(
    &self,
    teacher: &str,
    start: NaiveDate,
    end: NaiveDate,
  ) -> StoreResult<Vec<StoredLesson>> {
    let sql = format!(
      "{SELECT_COLUMNS} WHERE teacher = ? AND date BETWEEN ? AND ? ORDER BY \
       date, time_slot, room, id"
    );
    let rows = sqlx::query_as::<_, LessonRow>(&sql)
      .bind(teacher)
      .bind(start)
      .bind(end)
      .fetch_all(&self.pool)
      .await
      .map_err(StoreError::query("select lessons by teacher"))?;
    Ok(rows.into_iter().map(Into::into).collect())
  }

  /// Every stored lesson ordered by key, then id.
  pub async fn all_lessons(&self) -> StoreResult<Vec<StoredLesson>> {
    let sql = format!("{SELECT_COLUMNS} ORDER BY date, time_slot, room, id");
    let rows = sqlx::query_as::<_, LessonRow>(&sql)
      .fetch_all(&self.pool)
      .await
      .map_err(StoreError::query("select all lessons"))?;
    Ok(rows.into_iter().map(Into::into).collect())
  }

  pub async fn close(&self) { self.pool.close().await }
}

/// Escapes `LIKE` wildcards so a group name matches only literally.
fn escape_like(value: &str) -> String {
  let mut escaped = String::with_capacity(value.len());
  for c in value.chars() {
    if matches!(c, '%' | '_' | '\\') {
      escaped.push('\\');
    }
    escaped.push(c);
  }
  escaped
}

/// One transaction. Rolls back on drop unless committed.
pub struct UnitOfWork {
  tx: Transaction<'static, Sqlite>,
}

impl UnitOfWork {
  pub async fn select(
    &mut self,
    key: &SlotKey,
  ) -> StoreResult<Vec<StoredLesson>> {
    let sql = format!(
      "{SELECT_COLUMNS} WHERE date = ? AND time_slot = ? AND room = ? ORDER \
       BY id"
    );
    let rows = sqlx::query_as::<_, LessonRow>(&sql)
      .bind(key.date)
      .bind(&key.time_slot)
      .bind(&key.room)
      .fetch_all(&mut *self.tx)
      .await
      .map_err(StoreError::query("select slot"))?;
    Ok(rows.into_iter().map(Into::into).collect())
  }

  /// Inserts a lesson and returns its new id.
  pub async fn insert(&mut self, record: &LessonRecord) -> StoreResult<i64> {
    let result = sqlx::query(
      "INSERT INTO lessons (date, time_slot, room, group_name, teacher, \
       discipline, department) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(record.date)
    .bind(&record.time_slot)
    .bind(&record.room)
    .bind(&record.group)
    .bind(&record.teacher)
    .bind(&record.discipline)
    .bind(&record.department)
    .execute(&mut *self.tx)
    .await
    .map_err(StoreError::query("insert lesson"))?;
    Ok(result.last_insert_rowid())
  }

  /// Overwrites every field of the lesson with `id`.
  pub async fn update(
    &mut self,
    id: i64,
    record: &LessonRecord,
  ) -> StoreResult<u64> {
    let result = sqlx::query(
      "UPDATE lessons SET date = ?, time_slot = ?, room = ?, group_name = ?, \
       teacher = ?, discipline = ?, department = ? WHERE id = ?",
    )
    .bind(record.date)
    .bind(&record.time_slot)
    .bind(&record.room)
    .bind(&record.group)
    .bind(&record.teacher)
    .bind(&record.discipline)
    .bind(&record.department)
    .bind(id)
    .execute(&mut *self.tx)
    .await
    .map_err(StoreError::query("update lesson"))?;
    Ok(result.rows_affected())
  }

  /// Deletes every lesson in the slot; returns how many went.
  pub async fn delete(&mut self, key: &SlotKey) -> StoreResult<u64> {
    let result = sqlx::query(
      "DELETE FROM lessons WHERE date = ? AND time_slot = ? AND room = ?",
    )
    .bind(key.date)
    .bind(&key.time_slot)
    .bind(&key.room)
    .execute(&mut *self.tx)
    .await
    .map_err(StoreError::query("delete slot"))?;
    Ok(result.rows_affected())
  }

  pub async fn delete_before(&mut self, cutoff: NaiveDate) -> StoreResult<u64> {
    let result = sqlx::query("DELETE FROM lessons WHERE date < ?")
      .bind(cutoff)
      .execute(&mut *self.tx)
      .await
      .map_err(StoreError::query("delete expired lessons"))?;
    Ok(result.rows_affected())
  }

  pub async fn commit(self) -> StoreResult<()> {
    self
      .tx
      .commit()
      .await
      .map_err(StoreError::query("commit transaction"))
  }
}
