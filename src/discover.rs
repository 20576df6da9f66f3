pub mod model;

use std::{collections::HashSet, sync::LazyLock};

use chrono::NaiveDate;
use miette::{Context, IntoDiagnostic, bail};
use regex::Regex;
use reqwest::Url;
use scraper::{Html, Selector};
use serde::Serialize;
use tracing::{debug, error, info, instrument, trace};

use self::model::{VkEnvelope, WallPage};
use crate::{HTTP_CLIENT, config::FeedConfig, walk_table::TableShape};

const VK_API_URL: &str = "https://api.vk.com/method/wall.get";
const VK_API_VERSION: &str = "5.199";
const REPORTS_PATH: &str = "/reports/";

static COMPACT_DATE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"(?i)(\d{2})(\d{2})(\d{4})\.xlsx?$").expect("valid regex")
});
static DOTTED_DATE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"\b(\d{2})\.(\d{2})\.(\d{4})\b").expect("valid regex")
});
static LINKS: LazyLock<Selector> =
  LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

/// A schedule document found during discovery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DiscoveredDocument {
  pub url:         String,
  /// Link text or document title.
  pub label:       Option<String>,
  /// Heading of the post the document was attached to.
  pub group_label: Option<String>,
  pub shape:       TableShape,
  /// Last day the document covers, as encoded in its name.
  pub valid_until: NaiveDate,
}

impl DiscoveredDocument {
  /// Department recorded against every lesson from this document.
  pub fn department(&self) -> Option<&str> {
    self.group_label.as_deref().or(self.label.as_deref())
  }
}

/// The validity date a document name carries: a `ddmmyyyy` stamp right
/// before the extension, or else the last `dd.mm.yyyy` in the text.
pub fn embedded_validity_date(name: &str) -> Option<NaiveDate> {
  let path = name.split(['?', '#']).next().unwrap_or(name);
  let caps = COMPACT_DATE
    .captures(path)
    .or_else(|| DOTTED_DATE.captures_iter(name).last())?;
  let day = caps[1].parse().ok()?;
  let month = caps[2].parse().ok()?;
  let year = caps[3].parse().ok()?;
  NaiveDate::from_ymd_opt(year, month, day)
}

/// Documents are ingested only while still in the future and no further
/// ahead than the horizon.
pub fn within_horizon(
  valid_until: NaiveDate,
  today: NaiveDate,
  horizon_days: u32,
) -> bool {
  valid_until > today
    && (valid_until - today).num_days() < i64::from(horizon_days)
}

/// Room-grid report links on the occupancy index page.
pub fn discover_from_index(
  html: &str,
  base: &Url,
  today: NaiveDate,
  horizon_days: u32,
) -> Vec<DiscoveredDocument> {
  let document = Html::parse_document(html);
  let mut seen = HashSet::new();
  let mut documents = Vec::new();

  for link in document.select(&LINKS) {
    let Some(href) = link.value().attr("href") else {
      continue;
    };
    let lowered = href.to_lowercase();
    if !lowered.contains(REPORTS_PATH)
      || !(lowered.ends_with(".xls") || lowered.ends_with(".xlsx"))
    {
      continue;
    }

    let url = match base.join(href) {
      Ok(url) => url.to_string(),
      Err(e) => {
        error!(href, error = %e, "failed to resolve report link");
        continue;
      }
    };
    let Some(valid_until) = embedded_validity_date(&url) else {
      error!(url, "report link carries no validity date");
      continue;
    };
    if !within_horizon(valid_until, today, horizon_days) {
      trace!(url, %valid_until, "report outside validity window");
      continue;
    }
    if !seen.insert(url.clone()) {
      continue;
    }

    let label = link.text().collect::<Vec<_>>().join(" ");
    let label = label.split_whitespace().collect::<Vec<_>>().join(" ");
    info!(url, %valid_until, "found current report");
    documents.push(DiscoveredDocument {
      url,
      label: (!label.is_empty()).then_some(label),
      group_label: None,
      shape: TableShape::RoomGrid,
      valid_until,
    });
  }

  documents
}

/// Group-grid spreadsheets attached to wall posts.
pub fn discover_from_feed(
  payload: &str,
  today: NaiveDate,
  horizon_days: u32,
) -> miette::Result<Vec<DiscoveredDocument>> {
  let jd = &mut serde_json::Deserializer::from_str(payload);
  let envelope: VkEnvelope<WallPage> = serde_path_to_error::deserialize(jd)
    .into_diagnostic()
    .context("failed to parse wall feed response")
    .inspect_err(|_| {
      error!(payload, "failed to parse wall feed response");
    })?;

  if let Some(e) = envelope.error {
    bail!("wall feed returned error {}: {}", e.error_code, e.error_msg);
  }
  let Some(page) = envelope.response else {
    bail!("wall feed response has neither `response` nor `error`");
  };
  trace!(
    count = page.count,
    fetched = page.items.len(),
    "parsed wall feed page"
  );

  let mut seen = HashSet::new();
  let mut documents = Vec::new();
  for post in page.items {
    let heading = post
      .text
      .lines()
      .map(str::trim)
      .find(|l| !l.is_empty())
      .map(str::to_owned);

    for doc in post.attachments.into_iter().filter_map(|a| {
      (a.kind == "doc").then_some(a.doc).flatten()
    }) {
      let ext = match &doc.ext {
        Some(ext) => ext.to_lowercase(),
        None => doc.title.rsplit('.').next().unwrap_or_default().to_lowercase(),
      };
      if ext != "xls" && ext != "xlsx" {
        continue;
      }

      let valid_until = embedded_validity_date(&doc.title)
        .or_else(|| embedded_validity_date(&doc.url));
      let Some(valid_until) = valid_until else {
        debug!(post = post.id, title = doc.title, "document carries no date");
        continue;
      };
      if !within_horizon(valid_until, today, horizon_days) {
        trace!(title = doc.title, %valid_until, "document outside window");
        continue;
      }
      if !seen.insert(doc.url.clone()) {
        continue;
      }

      info!(
        post = post.id,
        title = doc.title,
        %valid_until,
        "found feed document"
      );
      documents.push(DiscoveredDocument {
        url: doc.url,
        label: Some(doc.title),
        group_label: heading.clone(),
        shape: TableShape::GroupGrid,
        valid_until,
      });
    }
  }

  Ok(documents)
}

#[instrument]
pub async fn fetch_index(url: &str) -> miette::Result<String> {
  debug!("requesting schedule index page");
  let resp = HTTP_CLIENT
    .get(url)
    .send()
    .await
    .into_diagnostic()
    .context("failed to send request for schedule index page")?
    .error_for_status()
    .into_diagnostic()
    .context("got error response for schedule index page")?;
  let body = resp
    .text()
    .await
    .into_diagnostic()
    .context("failed to read schedule index page body")?;
  debug!(length = body.len(), "received schedule index page");
  Ok(body)
}

/// Latest wall posts of the configured community.
pub async fn fetch_feed(feed: &FeedConfig) -> miette::Result<String> {
  fetch_feed_from(VK_API_URL, feed).await
}

/// Requests `wall.get` from `endpoint`. The token travels in the form body
/// and errors are stripped of their URL, so neither reaches the logs.
#[instrument(skip(feed), fields(owner_id = feed.owner_id))]
pub async fn fetch_feed_from(
  endpoint: &str,
  feed: &FeedConfig,
) -> miette::Result<String> {
  debug!("requesting wall feed");
  let resp = HTTP_CLIENT
    .post(endpoint)
    .form(&[
      ("owner_id", feed.owner_id.to_string()),
      ("count", feed.post_count.to_string()),
      ("access_token", feed.access_token.clone()),
      ("v", VK_API_VERSION.to_owned()),
    ])
    .send()
    .await
    .map_err(reqwest::Error::without_url)
    .into_diagnostic()
    .context("failed to send request for wall feed")?
    .error_for_status()
    .map_err(reqwest::Error::without_url)
    .into_diagnostic()
    .context("got error response for wall feed")?;
  resp
    .text()
    .await
    .map_err(reqwest::Error::without_url)
    .into_diagnostic()
    .context("failed to read wall feed body")
}

#[cfg(test)]
mod tests {
  use super::*;

  fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
  }

  #[test]
  fn validity_date_from_report_name() {
    let url = "https://x.ru/reports/schedule/34_1_01092025_14092025.xls";
    assert_eq!(embedded_validity_date(url), Some(date(2025, 9, 14)));
    assert_eq!(
      embedded_validity_date("Расписание 01.09.2025-07.09.2025.xlsx"),
      Some(date(2025, 9, 7))
    );
    assert_eq!(embedded_validity_date("schedule.xls"), None);
    assert_eq!(embedded_validity_date("x_32132025.xls"), None);
  }

  #[test]
  fn horizon_is_exclusive_on_both_ends() {
    let today = date(2025, 9, 1);
    assert!(!within_horizon(today, today, 180));
    assert!(within_horizon(date(2025, 9, 2), today, 180));
    assert!(within_horizon(today + chrono::Days::new(179), today, 180));
    assert!(!within_horizon(today + chrono::Days::new(180), today, 180));
    assert!(!within_horizon(date(2025, 8, 31), today, 180));
  }

  #[test]
  fn index_links_are_filtered_and_resolved() {
    let html = r#"
      <html><body>
        <a href="/reports/schedule/Group/1_01092025_14092025.xls">
          Корпус 1
        </a>
        <a href="/reports/schedule/Group/1_01092025_14092025.xls">again</a>
        <a href="/reports/schedule/Group/2_01032025_14032025.xls">old</a>
        <a href="/reports/schedule/Group/3_01092026_14092026.xls">far</a>
        <a href="/news/15092025.xls">not a report</a>
        <a href="/reports/readme.pdf">pdf</a>
      </body></html>
    "#;
    let base =
      Url::parse("https://www.vyatsu.ru/studentu-1/index.html").unwrap();
    let documents = discover_from_index(html, &base, date(2025, 9, 1), 180);
    assert_eq!(documents.len(), 1);
    assert_eq!(
      documents[0].url,
      "https://www.vyatsu.ru/reports/schedule/Group/1_01092025_14092025.xls"
    );
    assert_eq!(documents[0].label.as_deref(), Some("Корпус 1"));
    assert_eq!(documents[0].department(), Some("Корпус 1"));
    assert_eq!(documents[0].shape, TableShape::RoomGrid);
  }

  #[test]
  fn feed_documents_are_discovered() {
    let payload = r#"{
      "response": {
        "count": 2,
        "items": [
          {
            "id": 10,
            "text": "Колледж\nРасписание на неделю",
            "attachments": [
              {"type": "photo"},
              {"type": "doc", "doc": {
                "title": "Расписание 08.09.2025-13.09.2025.xlsx",
                "url": "https://vk.com/doc1_2",
                "ext": "xlsx"
              }},
              {"type": "doc", "doc": {
                "title": "Приказ.pdf",
                "url": "https://vk.com/doc1_3",
                "ext": "pdf"
              }}
            ]
          },
          {"id": 11, "text": ""}
        ]
      }
    }"#;
    let documents =
      discover_from_feed(payload, date(2025, 9, 1), 180).unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].url, "https://vk.com/doc1_2");
    assert_eq!(documents[0].valid_until, date(2025, 9, 13));
    assert_eq!(documents[0].group_label.as_deref(), Some("Колледж"));
    assert_eq!(documents[0].department(), Some("Колледж"));
    assert_eq!(documents[0].shape, TableShape::GroupGrid);
  }

  #[test]
  fn feed_errors_surface() {
    let payload =
      r#"{"error": {"error_code": 5, "error_msg": "auth failed"}}"#;
    let err = discover_from_feed(payload, date(2025, 9, 1), 180).unwrap_err();
    assert!(err.to_string().contains("auth failed"));
    assert!(discover_from_feed("{", date(2025, 9, 1), 180).is_err());
  }
}
