use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveTime};
use miette::{Context, bail, miette};
use regex::Regex;
use tracing::trace;

/// Fixed pair-label table. Ranges are stored in canonical `HH:MM-HH:MM` form.
pub const PAIR_TIMES: [(&str, &str); 7] = [
  ("1 пара", "08:20-09:50"),
  ("2 пара", "10:00-11:30"),
  ("3 пара", "11:45-13:15"),
  ("4 пара", "14:00-15:30"),
  ("5 пара", "15:45-17:15"),
  ("6 пара", "17:20-18:50"),
  ("7 пара", "18:55-20:15"),
];

static FULL_DATE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"\b\d{1,2}\.\d{1,2}\.(?:\d{4}|\d{2})\b").expect("valid regex")
});
static ISO_DATE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").expect("valid regex"));
static DAY_MONTH: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"\b(\d{1,2})\.(\d{1,2})\b").expect("valid regex")
});
static TIME_RANGE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^(\d{1,2})[:.](\d{2})\s*[-–—]\s*(\d{1,2})[:.](\d{2})$")
    .expect("valid regex")
});

/// Looks a pair label up in [`PAIR_TIMES`], tolerating case and spacing
/// differences (`"3  Пара"`).
pub fn pair_time(label: &str) -> Option<&'static str> {
  let label = label
    .split_whitespace()
    .collect::<Vec<_>>()
    .join(" ")
    .to_lowercase();
  PAIR_TIMES
    .iter()
    .find(|(pair, _)| *pair == label)
    .map(|(_, range)| *range)
}

/// Normalizes an explicit `H:MM-H:MM` / `H.MM - H.MM` range.
pub fn parse_time_range(raw: &str) -> Option<String> {
  let caps = TIME_RANGE.captures(raw.trim())?;
  let number = |i: usize| caps[i].parse::<u32>().ok();
  let start = NaiveTime::from_hms_opt(number(1)?, number(2)?, 0)?;
  let end = NaiveTime::from_hms_opt(number(3)?, number(4)?, 0)?;
  if start >= end {
    return None;
  }
  Some(format!("{}-{}", start.format("%H:%M"), end.format("%H:%M")))
}

/// Resolves a pair label or explicit range into a canonical time slot.
/// Anything else is rejected rather than guessed.
pub fn normalize_time_slot(raw: &str) -> miette::Result<String> {
  if let Some(range) = pair_time(raw) {
    return Ok(range.to_owned());
  }
  if let Some(range) = parse_time_range(raw) {
    return Ok(range);
  }
  bail!("unknown time label: {raw:?}")
}

/// Parses a date token, trying `dd.mm.yy`, then `dd.mm.yyyy`, then ISO. The
/// token may be embedded in a longer header such as `"Понедельник
/// 01.09.25"`; the last date-looking token wins.
pub fn parse_date(raw: &str) -> miette::Result<NaiveDate> {
  if let Some(token) = FULL_DATE.find_iter(raw).last() {
    let token = token.as_str();
    let date = NaiveDate::parse_from_str(token, "%d.%m.%y")
      .or_else(|_| NaiveDate::parse_from_str(token, "%d.%m.%Y"))
      .map_err(|e| miette!("invalid date {token:?}: {e}"))?;
    trace!(raw, %date, "parsed dotted date");
    return Ok(date);
  }
  if let Some(token) = ISO_DATE.find(raw) {
    let token = token.as_str();
    return NaiveDate::parse_from_str(token, "%Y-%m-%d")
      .map_err(|e| miette!("invalid ISO date {token:?}: {e}"));
  }
  bail!("no date found in {raw:?}")
}

/// Parses a `dd.mm` day marker, taking the year from configuration. A full
/// date in the same text takes precedence over the configured year.
pub fn parse_day_month(raw: &str, year: i32) -> Option<NaiveDate> {
  if FULL_DATE.is_match(raw) || ISO_DATE.is_match(raw) {
    return parse_date(raw).ok();
  }
  let caps = DAY_MONTH.captures(raw)?;
  let day = caps[1].parse().ok()?;
  let month = caps[2].parse().ok()?;
  NaiveDate::from_ymd_opt(year, month, day)
}

/// Builds a date from spreadsheet date-time components.
pub fn date_from_ymd(y: i32, m: u32, d: u32) -> miette::Result<NaiveDate> {
  NaiveDate::from_ymd_opt(y, m, d)
    .ok_or(miette!("invalid date: y = {y}, m = {m}, d = {d}"))
}

/// Walks from `row` up to `first_row` (inclusive) and returns the first row
/// for which `value_at` yields something. Models a date cell merged across
/// several lesson rows.
pub fn find_upward<T>(
  row: u32,
  first_row: u32,
  mut value_at: impl FnMut(u32) -> Option<T>,
) -> Option<(u32, T)> {
  (first_row..=row)
    .rev()
    .find_map(|r| value_at(r).map(|value| (r, value)))
}

/// Canonical `(date, time slot)` pair for one cell.
pub fn normalize(
  raw_date: &str,
  raw_time: &str,
) -> miette::Result<(NaiveDate, String)> {
  let date = parse_date(raw_date).context("failed to normalize date")?;
  let time_slot =
    normalize_time_slot(raw_time).context("failed to normalize time slot")?;
  Ok((date, time_slot))
}
