use std::{fmt, str::FromStr};

use chrono::{Datelike, NaiveDate, Utc};
use miette::{Context, miette};

const DEFAULT_DATABASE_URL: &str = "sqlite://schedule.db?mode=rwc";
const DEFAULT_INDEX_URL: &str = "https://www.vyatsu.ru/studentu-1/\
                                 spravochnaya-informatsiya/\
                                 zanyatost-auditoriy.html";
const DEFAULT_TIMEZONE: chrono_tz::Tz = chrono_tz::Europe::Moscow;

#[derive(Debug, Clone)]
pub struct Config {
  pub database_url:           String,
  pub index_url:              String,
  pub feed:                   Option<FeedConfig>,
  /// Lessons dated more than this many days before today are purged.
  pub retention_days:         u32,
  /// Documents valid further ahead than this are not ingested.
  pub horizon_days:           u32,
  /// Year assumed for `dd.mm` day markers in group-grid sheets.
  pub group_grid_year:        i32,
  pub timezone:               chrono_tz::Tz,
  pub store_connect_attempts: u32,
}

/// Social feed (VK wall) discovery settings. Present only when both the
/// token and the owner id are configured.
#[derive(Clone)]
pub struct FeedConfig {
  pub access_token: String,
  pub owner_id:     i64,
  pub post_count:   u32,
}

impl fmt::Debug for FeedConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FeedConfig")
      .field("access_token", &"<redacted>")
      .field("owner_id", &self.owner_id)
      .field("post_count", &self.post_count)
      .finish()
  }
}

impl Config {
  /// Configuration with every optional setting at its default.
  pub fn with_defaults() -> Self {
    let timezone = DEFAULT_TIMEZONE;
    Self {
      database_url: DEFAULT_DATABASE_URL.to_owned(),
      index_url: DEFAULT_INDEX_URL.to_owned(),
      feed: None,
      retention_days: 14,
      horizon_days: 180,
      group_grid_year: today_in(timezone).year(),
      timezone,
      store_connect_attempts: 5,
    }
  }

  pub fn from_env() -> miette::Result<Self> {
    let mut config = Self::with_defaults();

    let timezone = optional_env::<chrono_tz::Tz>("SCHEDULE_TIMEZONE")?;
    if let Some(timezone) = timezone {
      config.timezone = timezone;
      config.group_grid_year = today_in(timezone).year();
    }
    if let Some(url) = optional_env("DATABASE_URL")? {
      config.database_url = url;
    }
    if let Some(url) = optional_env("INDEX_URL")? {
      config.index_url = url;
    }
    if let Some(days) = optional_env("RETENTION_DAYS")? {
      config.retention_days = days;
    }
    if let Some(days) = optional_env("HORIZON_DAYS")? {
      config.horizon_days = days;
    }
    if let Some(year) = optional_env("GROUP_GRID_YEAR")? {
      config.group_grid_year = year;
    }
    if let Some(attempts) = optional_env("STORE_CONNECT_ATTEMPTS")? {
      config.store_connect_attempts = attempts;
    }

    let access_token = optional_env::<String>("VK_ACCESS_TOKEN")?;
    let owner_id = optional_env::<i64>("VK_OWNER_ID")?;
    config.feed = match (access_token, owner_id) {
      (Some(access_token), Some(owner_id)) => Some(FeedConfig {
        access_token,
        owner_id,
        post_count: optional_env("VK_POST_COUNT")?.unwrap_or(20),
      }),
      (None, None) => None,
      _ => {
        return Err(miette!(
          "`VK_ACCESS_TOKEN` and `VK_OWNER_ID` must be set together"
        ));
      }
    };

    Ok(config)
  }

  /// Today's date in the institution's timezone.
  pub fn today(&self) -> NaiveDate { today_in(self.timezone) }

  /// Lessons dated before this are expired as of `today`.
  pub fn retention_cutoff(&self, today: NaiveDate) -> NaiveDate {
    today - chrono::Days::new(self.retention_days.into())
  }
}

fn today_in(timezone: chrono_tz::Tz) -> NaiveDate {
  Utc::now().with_timezone(&timezone).date_naive()
}

/// Reads and parses an env var, treating unset or blank as `None`.
fn optional_env<T>(name: &str) -> miette::Result<Option<T>>
where
  T: FromStr,
  T::Err: fmt::Display,
{
  let Ok(raw) = std::env::var(name) else {
    return Ok(None);
  };
  let raw = raw.trim();
  if raw.is_empty() {
    return Ok(None);
  }
  raw
    .parse::<T>()
    .map(Some)
    .map_err(|e| miette!("{e}"))
    .context(format!("failed to parse `{name}` env var, got {raw:?}"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn retention_cutoff_counts_back_from_today() {
    let config = Config::with_defaults();
    let today = NaiveDate::from_ymd_opt(2025, 9, 20).unwrap();
    assert_eq!(
      config.retention_cutoff(today),
      NaiveDate::from_ymd_opt(2025, 9, 6).unwrap()
    );
  }

  #[test]
  fn feed_token_is_not_logged() {
    let feed = FeedConfig {
      access_token: "secret".into(),
      owner_id:     -1,
      post_count:   20,
    };
    assert!(!format!("{feed:?}").contains("secret"));
  }
}
