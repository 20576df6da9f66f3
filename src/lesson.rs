use serde::Serialize;

/// Placeholder stored when a group, teacher or discipline could not be
/// recovered from the source cell.
pub const UNKNOWN: &str = "Unknown";

/// Substring marking a slot that is administratively held rather than taught.
pub const RESERVATION_MARKER: &str = "Резервирование";

/// The reconciliation key: one room during one time slot on one day.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SlotKey {
  pub date:      chrono::NaiveDate,
  pub time_slot: String,
  pub room:      String,
}

impl SlotKey {
  pub fn new(
    date: chrono::NaiveDate,
    time_slot: impl Into<String>,
    room: impl Into<String>,
  ) -> Self {
    Self {
      date,
      time_slot: time_slot.into(),
      room: room.into(),
    }
  }
}

/// One line of a lesson cell broken into its parts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ParsedFragment {
  pub group:       Option<String>,
  pub teacher:     Option<String>,
  pub discipline:  String,
  pub room:        Option<String>,
  pub subgroup:    Option<String>,
  /// Lecture / practice / lab marker. Informational only, never persisted.
  pub lesson_type: Option<String>,
}

/// What a walker found for one slot key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotContent {
  /// The cell was blank or reserved: the slot is free.
  Vacant,
  Lessons(Vec<ParsedFragment>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotEntry {
  pub key:     SlotKey,
  pub content: SlotContent,
}

/// The canonical per-lesson record as persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LessonRecord {
  pub date:       chrono::NaiveDate,
  pub time_slot:  String,
  pub room:       String,
  pub group:      String,
  pub teacher:    String,
  pub discipline: String,
  pub department: Option<String>,
}

impl LessonRecord {
  /// Builds the persisted shape of a fragment, filling the `Unknown`
  /// defaults. A subgroup is folded into the group label so lab subgroups
  /// sharing a room stay distinct rows.
  pub fn from_fragment(
    key: &SlotKey,
    fragment: &ParsedFragment,
    department: Option<&str>,
  ) -> Self {
    let group = non_blank(fragment.group.as_deref()).unwrap_or(UNKNOWN);
    let group = match non_blank(fragment.subgroup.as_deref()) {
      Some(subgroup) => format!("{group} ({subgroup})"),
      None => group.to_owned(),
    };

    Self {
      date: key.date,
      time_slot: key.time_slot.clone(),
      room: key.room.clone(),
      group,
      teacher: non_blank(fragment.teacher.as_deref())
        .unwrap_or(UNKNOWN)
        .to_owned(),
      discipline: non_blank(Some(&fragment.discipline))
        .unwrap_or(UNKNOWN)
        .to_owned(),
      department: department.map(str::to_owned),
    }
  }

  pub fn key(&self) -> SlotKey {
    SlotKey::new(self.date, self.time_slot.clone(), self.room.clone())
  }

  /// Whether the lesson-describing fields match, ignoring the slot key.
  pub fn same_lesson(&self, other: &LessonRecord) -> bool {
    self.group == other.group
      && self.teacher == other.teacher
      && self.discipline == other.discipline
      && self.department == other.department
  }
}

/// A lesson row as read back from the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoredLesson {
  pub id:     i64,
  #[serde(flatten)]
  pub record: LessonRecord,
}

/// True when a raw cell value should be treated as an empty slot.
pub fn is_vacant_cell(value: &str) -> bool {
  value.trim().is_empty() || value.contains(RESERVATION_MARKER)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
  value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn key() -> SlotKey {
    SlotKey::new(
      chrono::NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
      "08:20-09:50",
      "1-101",
    )
  }

  #[test]
  fn missing_fields_default_to_unknown() {
    let fragment = ParsedFragment {
      discipline: "  ".into(),
      ..Default::default()
    };
    let record = LessonRecord::from_fragment(&key(), &fragment, None);
    assert_eq!(record.group, UNKNOWN);
    assert_eq!(record.teacher, UNKNOWN);
    assert_eq!(record.discipline, UNKNOWN);
    assert_eq!(record.department, None);
  }

  #[test]
  fn subgroup_is_folded_into_group() {
    let fragment = ParsedFragment {
      group: Some("ИВТб-2301".into()),
      subgroup: Some("1 подгруппа".into()),
      discipline: "Физика".into(),
      ..Default::default()
    };
    let record =
      LessonRecord::from_fragment(&key(), &fragment, Some("Колледж"));
    assert_eq!(record.group, "ИВТб-2301 (1 подгруппа)");
    assert_eq!(record.department.as_deref(), Some("Колледж"));
    assert_eq!(record.key(), key());
  }

  #[test]
  fn reservation_marker_is_vacant() {
    assert!(is_vacant_cell("Резервирование кафедры"));
    assert!(is_vacant_cell("   "));
    assert!(!is_vacant_cell("ИЭ-21 Математика"));
  }
}
