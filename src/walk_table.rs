//! Worksheet walkers. Each supported sheet layout implements [`TableSource`]
//! and yields [`SlotEntry`] values, so reconciliation never needs to know
//! which layout a slot came from.

pub mod group_grid;
pub mod room_grid;

use calamine::{Data, Range};
use chrono::NaiveDate;
use serde::Serialize;

pub use self::{group_grid::GroupGrid, room_grid::RoomGrid};
use crate::{
  lesson::SlotEntry,
  normalize::{date_from_ymd, parse_date},
};

/// The two spreadsheet layouts we know how to read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum TableShape {
  /// Columns are rooms, rows are pairs within a day.
  RoomGrid,
  /// Day/time column pairs followed by fixed-width group blocks.
  GroupGrid,
}

pub trait TableSource {
  fn shape(&self) -> TableShape;

  /// Every slot found in the sheet. Cell-level problems are logged and
  /// skipped; an error means the sheet as a whole has an unexpected
  /// structure.
  fn slots(&self) -> miette::Result<Vec<SlotEntry>>;
}

/// Picks the walker for a sheet layout.
pub fn table_source<'a>(
  shape: TableShape,
  range: &'a Range<Data>,
  group_grid_year: i32,
) -> Box<dyn TableSource + 'a> {
  match shape {
    TableShape::RoomGrid => Box::new(RoomGrid::new(range)),
    TableShape::GroupGrid => Box::new(GroupGrid::new(range, group_grid_year)),
  }
}

/// Trimmed text of a cell, or `None` for anything that means "no value":
/// empty cells, blank strings, `NaN`, and spreadsheet error values.
pub fn cell_text(cell: &Data) -> Option<String> {
  let text = match cell {
    Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => {
      s.trim().to_owned()
    }
    Data::Float(f) if f.is_nan() => return None,
    Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => {
      format!("{}", *f as i64)
    }
    Data::Float(f) => f.to_string(),
    Data::Int(i) => i.to_string(),
    Data::Bool(b) => b.to_string(),
    Data::DateTime(dt) => {
      let (y, m, d, ..) = dt.to_ymd_hms_milli();
      format!("{d:02}.{m:02}.{y:04}")
    }
    _ => return None,
  };

  if text.is_empty() || text.eq_ignore_ascii_case("nan") {
    None
  } else {
    Some(text)
  }
}

/// The date a cell carries, if it carries anything. Date-typed cells convert
/// directly; text cells go through the date normalizer.
pub fn cell_date(cell: &Data) -> Option<miette::Result<NaiveDate>> {
  match cell {
    Data::DateTime(dt) => {
      let (y, m, d, ..) = dt.to_ymd_hms_milli();
      Some(date_from_ymd(y as _, m as _, d as _))
    }
    other => cell_text(other).map(|text| parse_date(&text)),
  }
}

/// Text of the cell at an absolute `(row, column)` position.
pub(crate) fn text_at(
  range: &Range<Data>,
  row: u32,
  col: u32,
) -> Option<String> {
  range.get_value((row, col)).and_then(cell_text)
}
