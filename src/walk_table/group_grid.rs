use std::collections::BTreeMap;

use calamine::{Data, Range};
use chrono::NaiveDate;
use miette::{bail, ensure};
use tracing::{debug, instrument, trace, warn};

use super::{TableShape, TableSource, text_at};
use crate::{
  lesson::{ParsedFragment, SlotContent, SlotEntry, SlotKey, is_vacant_cell},
  normalize::{normalize_time_slot, parse_day_month},
  parse_cell::parse_keyword_cell,
};

/// Header text of the day column (case-insensitive, trimmed).
const DAY_HEADER: &str = "день недели";
/// Header text of the time column, right of the day column.
const TIME_HEADER: &str = "время";
/// At most this many group blocks follow one day/time column pair.
const MAX_GROUP_BLOCKS: u32 = 3;
/// Width of one group block.
const BLOCK_STRIDE: u32 = 4;
/// Distance from the day column to the first group block.
const FIRST_BLOCK_OFFSET: u32 = 2;
/// Block-relative columns concatenated into one lesson description.
const CONTENT_OFFSETS: [u32; 3] = [0, 1, 2];

/// Group-indexed grid as posted to the social feed: one or more header rows
/// with a day column, a time column and up to three group blocks each.
pub struct GroupGrid<'a> {
  range: &'a Range<Data>,
  year:  i32,
}

/// One group block under a header: its first column and the group it
/// belongs to.
#[derive(Debug)]
struct GroupBlock {
  column: u32,
  group:  String,
}

#[derive(Debug)]
struct DaySection {
  day_column:  u32,
  time_column: u32,
  blocks:      Vec<GroupBlock>,
}

impl<'a> GroupGrid<'a> {
  pub fn new(range: &'a Range<Data>, year: i32) -> Self { Self { range, year } }

  /// A day column header: the cell reads "день недели" (or just "день")
  /// and the next cell is the time header. Lesson text that merely mentions
  /// a day, such as "День здоровья", never qualifies.
  fn is_day_header(&self, row: u32, col: u32) -> bool {
    let header_text = |col| {
      text_at(self.range, row, col).map(|t| t.trim().to_lowercase())
    };
    let is_day = header_text(col)
      .is_some_and(|t| t == "день" || t.starts_with(DAY_HEADER));
    is_day
      && header_text(col + 1).is_some_and(|t| t.starts_with(TIME_HEADER))
  }

  fn header_rows(&self, last_row: u32, last_col: u32) -> Vec<u32> {
    (0..=last_row)
      .filter(|&row| (0..=last_col).any(|col| self.is_day_header(row, col)))
      .collect()
  }

  fn sections(&self, header_row: u32, last_col: u32) -> Vec<DaySection> {
    (0..=last_col)
      .filter(|&col| self.is_day_header(header_row, col))
      .map(|day_column| {
        let blocks = (0..MAX_GROUP_BLOCKS)
          .map(|k| day_column + FIRST_BLOCK_OFFSET + k * BLOCK_STRIDE)
          .filter(|&col| col <= last_col)
          .filter_map(|column| {
            // group names sit in the row just above the header
            let group = header_row
              .checked_sub(1)
              .and_then(|above| text_at(self.range, above, column))?;
            Some(GroupBlock { column, group })
          })
          .collect();
        DaySection {
          day_column,
          time_column: day_column + 1,
          blocks,
        }
      })
      .collect()
  }

  /// The composite description for one block on one row, or `None` when
  /// every content column is blank.
  fn composite_cell(&self, row: u32, block: &GroupBlock) -> Option<String> {
    let parts = CONTENT_OFFSETS
      .iter()
      .filter_map(|offset| text_at(self.range, row, block.column + offset))
      .collect::<Vec<_>>();
    if parts.is_empty() {
      None
    } else {
      Some(parts.join("\n"))
    }
  }

  fn walk_section(
    &self,
    section: &DaySection,
    rows: std::ops::RangeInclusive<u32>,
    lessons: &mut BTreeMap<SlotKey, Vec<ParsedFragment>>,
  ) {
    let mut current_date: Option<NaiveDate> = None;

    for row in rows {
      let day_date = text_at(self.range, row, section.day_column)
        .and_then(|day| parse_day_month(&day, self.year));
      if let Some(date) = day_date {
        trace!(row, %date, "starting new day");
        current_date = Some(date);
      }
      let Some(date) = current_date else {
        continue;
      };
      let Some(raw_time) = text_at(self.range, row, section.time_column) else {
        continue;
      };
      let time_slot = match normalize_time_slot(&raw_time) {
        Ok(time_slot) => time_slot,
        Err(e) => {
          warn!(row, raw_time, error = %e, "skipping row with unknown time");
          continue;
        }
      };

      for block in &section.blocks {
        let Some(cell) = self.composite_cell(row, block) else {
          continue;
        };
        if is_vacant_cell(&cell) {
          continue;
        }
        let Some(mut fragment) = parse_keyword_cell(&cell) else {
          continue;
        };
        let Some(room) = fragment.room.clone() else {
          debug!(
            row,
            column = block.column,
            cell,
            "skipping entry without a valid cabinet number"
          );
          continue;
        };
        fragment.group = Some(block.group.clone());
        lessons
          .entry(SlotKey::new(date, time_slot.clone(), room))
          .or_default()
          .push(fragment);
      }
    }
  }
}

impl TableSource for GroupGrid<'_> {
  fn shape(&self) -> TableShape { TableShape::GroupGrid }

  #[instrument(skip(self), fields(year = self.year))]
  fn slots(&self) -> miette::Result<Vec<SlotEntry>> {
    let Some((last_row, last_col)) = self.range.end() else {
      bail!("worksheet is empty");
    };

    let header_rows = self.header_rows(last_row, last_col);
    ensure!(
      !header_rows.is_empty(),
      "found no header row containing a day-of-week column"
    );
    debug!(?header_rows, "found group grid header rows");

    // co-scheduled groups share a key and must reconcile together
    let mut lessons = BTreeMap::<SlotKey, Vec<ParsedFragment>>::new();
    for (i, &header_row) in header_rows.iter().enumerate() {
      let section_end = header_rows
        .get(i + 1)
        .map(|next| next.saturating_sub(1))
        .unwrap_or(last_row);
      if header_row >= section_end {
        continue;
      }

      for section in self.sections(header_row, last_col) {
        if section.blocks.is_empty() {
          warn!(
            header_row,
            day_column = section.day_column,
            "day column has no named group blocks"
          );
          continue;
        }
        self.walk_section(&section, header_row + 1..=section_end, &mut lessons);
      }
    }

    let slots = lessons
      .into_iter()
      .map(|(key, fragments)| SlotEntry {
        key,
        content: SlotContent::Lessons(fragments),
      })
      .collect::<Vec<_>>();
    debug!(count = slots.len(), "walked group grid");
    Ok(slots)
  }
}
