use std::sync::LazyLock;

use regex::Regex;
use tracing::{trace, warn};

use super::cell_lines;
use crate::lesson::ParsedFragment;

/// Bare cabinet number, e.g. `1-305` or `16-1`.
pub static ROOM_PATTERN: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^\d{1,2}-\d{1,3}$").expect("valid regex"));

static TEACHER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
  let surname = r"[А-ЯЁA-Z][а-яёa-z]+(?:-[А-ЯЁA-Z][а-яёa-z]+)?";
  let initial = r"[А-ЯЁA-Z]\.";
  Regex::new(&format!(r"^{surname}\s+{initial}\s?{initial}$"))
    .expect("valid regex")
});

const LESSON_TYPE_KEYWORDS: [&str; 3] = ["занятие", "лекция", "урок"];
const SUBGROUP_KEYWORD: &str = "подгруппа";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineKind {
  Cabinet,
  Teacher,
  LessonType,
  Subgroup,
  Discipline,
}

/// Pattern families in precedence order. A line falls through to
/// [`LineKind::Discipline`] when nothing matches.
const KEYWORD_RULES: [(LineKind, fn(&str) -> bool); 4] = [
  (LineKind::Cabinet, |line| ROOM_PATTERN.is_match(line)),
  (LineKind::Teacher, |line| TEACHER_PATTERN.is_match(line)),
  (LineKind::LessonType, |line| {
    let lower = line.to_lowercase();
    LESSON_TYPE_KEYWORDS.iter().any(|k| lower.contains(k))
  }),
  (LineKind::Subgroup, |line| {
    line.to_lowercase().contains(SUBGROUP_KEYWORD)
  }),
];

pub fn classify_line(line: &str) -> LineKind {
  KEYWORD_RULES
    .iter()
    .find(|(_, matches)| matches(line))
    .map(|(kind, _)| *kind)
    .unwrap_or(LineKind::Discipline)
}

/// Folds every line of a composite group-grid cell into one fragment. Field
/// order in the cell does not matter. Returns `None` when the cell has no
/// content lines.
pub fn parse_keyword_cell(cell: &str) -> Option<ParsedFragment> {
  let mut fragment = ParsedFragment::default();
  let mut discipline = Vec::new();
  let mut saw_line = false;

  for line in cell_lines(cell) {
    saw_line = true;
    let kind = classify_line(line);
    trace!(line, ?kind, "classified cell line");

    let slot = match kind {
      LineKind::Cabinet => &mut fragment.room,
      LineKind::Teacher => &mut fragment.teacher,
      LineKind::LessonType => &mut fragment.lesson_type,
      LineKind::Subgroup => &mut fragment.subgroup,
      LineKind::Discipline => {
        discipline.push(line);
        continue;
      }
    };
    if let Some(existing) = slot.as_deref() {
      warn!(?kind, existing, ignored = line, "duplicate field in cell");
    } else {
      *slot = Some(line.to_owned());
    }
  }

  if !saw_line {
    return None;
  }
  fragment.discipline = discipline.join(" ");
  Some(fragment)
}
