mod common;

use calamine::{Data, Range};
use chrono::{Days, NaiveDate};
use common::{Route, serve};
use schedule_ingest::{
  CancellationFlag, Config, IngestionReport, Store,
  fetch_sheet::write_range_as_xlsx,
  lesson::{LessonRecord, StoredLesson},
  run_ingestion,
};

const XLSX: &str =
  "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

fn sheet(rows: &[&[&str]]) -> Range<Data> {
  let height = rows.len() as u32;
  let width = rows.iter().map(|r| r.len()).max().unwrap() as u32;
  let mut range = Range::new((0, 0), (height - 1, width - 1));
  for (r, row) in rows.iter().enumerate() {
    for (c, value) in row.iter().enumerate() {
      if !value.is_empty() {
        range.set_value((r as u32, c as u32), Data::String((*value).into()));
      }
    }
  }
  range
}

/// An `.xlsx` room grid with two lessons on `day`.
fn report_workbook(day: NaiveDate) -> Vec<u8> {
  let marker = day.format("%d.%m.%y").to_string();
  let range = sheet(&[
    &["Занятость аудиторий", "", ""],
    &["", "", "1-101"],
    &[marker.as_str(), "1 пара", "ИЭ-21 Математика Иванов И.И."],
    &["", "2 пара", "ИЭ-22 Физика Петров П.П."],
  ]);
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("report.xlsx");
  write_range_as_xlsx(&range, &path).unwrap();
  std::fs::read(path).unwrap()
}

/// An index page linking one valid report and one link that serves HTML.
async fn serve_reports(config: &mut Config) {
  let today = config.today();
  let stamp = (today + Days::new(30)).format("%d%m%Y");
  let good = format!("/reports/a_{stamp}.xlsx");
  let broken = format!("/reports/b_{stamp}.xlsx");
  let index = format!(
    r#"<html><body>
      <a href="{good}">Корпус 1</a>
      <a href="{broken}">Корпус 2</a>
    </body></html>"#
  );

  let addr = serve(vec![
    Route::ok("/index.html", "text/html", index.into_bytes()),
    Route::ok(&good, XLSX, report_workbook(today + Days::new(3))),
    Route::ok(&broken, "text/html", b"<html>moved</html>".to_vec()),
  ])
  .await;
  config.index_url = format!("http://{addr}/index.html");
  config.feed = None;
}

fn records(lessons: Vec<StoredLesson>) -> Vec<LessonRecord> {
  lessons.into_iter().map(|l| l.record).collect()
}

#[tokio::test]
async fn broken_document_is_skipped_and_reruns_are_stable() {
  let mut config = Config::with_defaults();
  serve_reports(&mut config).await;
  let store = Store::connect_in_memory().await.unwrap();
  let cancel = CancellationFlag::new();

  let report = run_ingestion(&store, &config, &cancel).await.unwrap();
  assert_eq!(report.discovered, 2);
  assert_eq!(report.ingested, 1);
  assert_eq!(report.skipped, 1);
  assert!(!report.cancelled);
  assert_eq!(report.lessons.inserted, 2);

  let first = records(store.all_lessons().await.unwrap());
  assert_eq!(first.len(), 2);
  assert!(
    first
      .iter()
      .all(|r| r.department.as_deref() == Some("Корпус 1"))
  );

  let again = run_ingestion(&store, &config, &cancel).await.unwrap();
  assert_eq!(again.ingested, 1);
  assert_eq!(again.lessons.inserted + again.lessons.deleted, 0);
  assert_eq!(records(store.all_lessons().await.unwrap()), first);
}

#[tokio::test]
async fn cancelled_run_ingests_nothing() {
  let mut config = Config::with_defaults();
  serve_reports(&mut config).await;
  let store = Store::connect_in_memory().await.unwrap();
  let cancel = CancellationFlag::new();
  cancel.cancel();

  let report = run_ingestion(&store, &config, &cancel).await.unwrap();
  assert!(report.cancelled);
  assert_eq!(report.discovered, 2);
  assert_eq!(report.ingested, 0);
  assert!(store.all_lessons().await.unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_store_fails_the_run() {
  let mut config = Config::with_defaults();
  serve_reports(&mut config).await;
  let store = Store::connect_in_memory().await.unwrap();
  store.close().await;

  let result =
    run_ingestion(&store, &config, &CancellationFlag::new()).await;
  assert!(result.is_err());
}

#[tokio::test]
async fn failed_discovery_is_an_empty_run() {
  let mut config = Config::with_defaults();
  let addr = serve(vec![Route::status("/index.html", 503)]).await;
  config.index_url = format!("http://{addr}/index.html");
  config.feed = None;
  let store = Store::connect_in_memory().await.unwrap();

  let report = run_ingestion(&store, &config, &CancellationFlag::new())
    .await
    .unwrap();
  assert_eq!(report, IngestionReport::default());
}
