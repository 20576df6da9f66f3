use calamine::{Data, Range};
use chrono::NaiveDate;
use miette::{Context, bail, ensure};
use tracing::{debug, instrument, trace, warn};

use super::{TableShape, TableSource, cell_date, text_at};
use crate::{
  lesson::{SlotContent, SlotEntry, SlotKey, is_vacant_cell},
  normalize::{find_upward, normalize_time_slot},
  parse_cell::parse_positional_cell,
};

// zero-indexed positions; the sheet reads as rooms across, pairs down
const ROOM_HEADER_ROW: u32 = 1;
const FIRST_LESSON_ROW: u32 = 2;
const DATE_COLUMN: u32 = 0;
const TIME_COLUMN: u32 = 1;
const FIRST_ROOM_COLUMN: u32 = 2;

/// Room-indexed occupancy grid: row 2 names the rooms, column 1 carries the
/// (possibly merged) day, column 2 the pair label.
pub struct RoomGrid<'a> {
  range: &'a Range<Data>,
}

impl<'a> RoomGrid<'a> {
  pub fn new(range: &'a Range<Data>) -> Self { Self { range } }

  fn rooms(&self, last_col: u32) -> Vec<(u32, String)> {
    (FIRST_ROOM_COLUMN..=last_col)
      .filter_map(|col| {
        text_at(self.range, ROOM_HEADER_ROW, col).map(|room| (col, room))
      })
      .collect()
  }

  /// The date for a lesson row, walking upward past blank (merged) date
  /// cells. Stops at the first sheet row.
  fn row_date(&self, row: u32) -> miette::Result<NaiveDate> {
    let found = find_upward(row, 0, |r| {
      self.range.get_value((r, DATE_COLUMN)).and_then(cell_date)
    });
    match found {
      Some((date_row, date)) => {
        date.context(format!("failed to parse date cell at row {date_row}"))
      }
      None => bail!("no date cell found at or above row {row}"),
    }
  }
}

impl TableSource for RoomGrid<'_> {
  fn shape(&self) -> TableShape { TableShape::RoomGrid }

  #[instrument(skip(self))]
  fn slots(&self) -> miette::Result<Vec<SlotEntry>> {
    let Some((last_row, last_col)) = self.range.end() else {
      bail!("worksheet is empty");
    };
    ensure!(
      last_row >= FIRST_LESSON_ROW && last_col >= FIRST_ROOM_COLUMN,
      "worksheet is too small for a room grid: last cell is ({last_row}, \
       {last_col})"
    );

    let rooms = self.rooms(last_col);
    ensure!(!rooms.is_empty(), "found no room names in the header row");
    debug!(count = rooms.len(), "found room columns");

    let mut slots = Vec::new();
    for row in FIRST_LESSON_ROW..=last_row {
      let Some(label) = text_at(self.range, row, TIME_COLUMN) else {
        trace!(row, "skipping row without a pair label");
        continue;
      };
      let time_slot = match normalize_time_slot(&label) {
        Ok(time_slot) => time_slot,
        Err(e) => {
          warn!(row, label, error = %e, "skipping row with unknown pair label");
          continue;
        }
      };
      let date = match self.row_date(row) {
        Ok(date) => date,
        Err(e) => {
          warn!(row, error = ?e, "skipping row without a usable date");
          continue;
        }
      };

      for (col, room) in &rooms {
        let content = match text_at(self.range, row, *col) {
          Some(value) if !is_vacant_cell(&value) => {
            let fragments = parse_positional_cell(&value);
            if fragments.is_empty() {
              SlotContent::Vacant
            } else {
              SlotContent::Lessons(fragments)
            }
          }
          _ => SlotContent::Vacant,
        };
        slots.push(SlotEntry {
          key: SlotKey::new(date, time_slot.clone(), room.clone()),
          content,
        });
      }
    }

    debug!(count = slots.len(), "walked room grid");
    Ok(slots)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::walk_table::test_sheet::sheet;

  fn date(d: u32) -> NaiveDate { NaiveDate::from_ymd_opt(2025, 9, d).unwrap() }

  fn fixture() -> Range<Data> {
    sheet(&[
      &["Занятость аудиторий", "", "", ""],
      &["", "", "1-101", "1-102"],
      &[
        "Понедельник 01.09.25",
        "1 пара",
        "ИЭ-21, Иванов И.И. Математика",
        "",
      ],
      &["", "2 пара", "Резервирование", "ИЭ-22 Физика Петров П.П."],
      &["", "3 пара", "", "ИЭ-22 Физика Петров П.П.\nИЭ-23 Химия"],
      &["Вторник 02.09.25", "перерыв", "ИЭ-21 Лишнее", ""],
      &["", "1 пара", "ЭК-11 Экономика", ""],
    ])
  }

  #[test]
  fn walks_every_room_for_every_pair() {
    let range = fixture();
    let slots = RoomGrid::new(&range).slots().unwrap();
    // 4 labelled rows x 2 rooms; the "перерыв" row is skipped
    assert_eq!(slots.len(), 8);

    let first = &slots[0];
    assert_eq!(first.key, SlotKey::new(date(1), "08:20-09:50", "1-101"));
    let SlotContent::Lessons(fragments) = &first.content else {
      panic!("expected lessons, got {:?}", first.content);
    };
    assert_eq!(fragments[0].group.as_deref(), Some("ИЭ-21"));
    assert_eq!(fragments[0].teacher.as_deref(), Some("Иванов И.И."));
    assert_eq!(fragments[0].discipline, "Математика");
  }

  #[test]
  fn blank_and_reserved_cells_are_vacant() {
    let range = fixture();
    let slots = RoomGrid::new(&range).slots().unwrap();
    let vacant = slots
      .iter()
      .filter(|s| s.content == SlotContent::Vacant)
      .map(|s| (s.key.time_slot.as_str(), s.key.room.as_str()))
      .collect::<Vec<_>>();
    assert!(vacant.contains(&("08:20-09:50", "1-102")));
    assert!(vacant.contains(&("10:00-11:30", "1-101")));
    assert!(vacant.contains(&("11:45-13:15", "1-101")));
  }

  #[test]
  fn merged_date_cells_resolve_upward() {
    let range = fixture();
    let slots = RoomGrid::new(&range).slots().unwrap();
    let multi = slots
      .iter()
      .find(|s| s.key == SlotKey::new(date(1), "11:45-13:15", "1-102"))
      .unwrap();
    let SlotContent::Lessons(fragments) = &multi.content else {
      panic!("expected lessons");
    };
    assert_eq!(fragments.len(), 2);

    assert!(
      slots
        .iter()
        .any(|s| s.key == SlotKey::new(date(2), "08:20-09:50", "1-101"))
    );
  }

  #[test]
  fn row_without_any_date_is_skipped() {
    let range = sheet(&[
      &["", "", ""],
      &["", "", "1-101"],
      &["", "1 пара", "ИЭ-21 Математика"],
    ]);
    let slots = RoomGrid::new(&range).slots().unwrap();
    assert!(slots.is_empty());
  }

  #[test]
  fn missing_room_header_is_a_structural_error() {
    let range = sheet(&[
      &["", "", ""],
      &["", "", ""],
      &["01.09.25", "1 пара", "x"],
    ]);
    assert!(RoomGrid::new(&range).slots().is_err());
  }
}
