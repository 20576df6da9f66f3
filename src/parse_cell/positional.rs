use tracing::{debug, trace};

use super::{cell_lines, is_initials, is_surname};
use crate::lesson::ParsedFragment;

/// Maximum number of tokens a comma-joined group label may span.
const MAX_GROUP_TOKENS: usize = 3;

/// Longest leading token treated as an ordinal / marker and discarded.
const MAX_MARKER_CHARS: usize = 3;

/// One positional heuristic: when `applies` holds for the remaining tokens
/// and the fragment built so far, `extract` consumes tokens into the
/// fragment. Rules run once each, in table order.
pub struct LineRule {
  pub name:    &'static str,
  pub applies: fn(&[&str], &ParsedFragment) -> bool,
  pub extract: fn(&mut Vec<&str>, &mut ParsedFragment),
}

pub const LEADING_MARKER: LineRule = LineRule {
  name:    "leading_marker",
  applies: |tokens, _| {
    tokens.len() > 1 && tokens[0].chars().count() <= MAX_MARKER_CHARS
  },
  extract: |tokens, _| {
    tokens.remove(0);
  },
};

pub const TRAILING_TEACHER: LineRule = LineRule {
  name:    "trailing_teacher",
  applies: |tokens, _| tokens.last().is_some_and(|t| is_initials(t)),
  extract: |tokens, fragment| {
    let start = tokens.len().saturating_sub(2);
    fragment.teacher = Some(tokens.split_off(start).join(" "));
  },
};

pub const COMMA_GROUP: LineRule = LineRule {
  name:    "comma_group",
  applies: |tokens, fragment| {
    fragment.group.is_none() && tokens.first().is_some_and(|t| t.ends_with(','))
  },
  extract: |tokens, fragment| {
    let mut taken = 0;
    while taken < tokens.len() && taken < MAX_GROUP_TOKENS {
      if taken > 0 && starts_teacher(tokens, taken) {
        break;
      }
      taken += 1;
      if !tokens[taken - 1].ends_with(',') {
        break;
      }
    }
    let label = tokens.drain(..taken).collect::<Vec<_>>().join(" ");
    fragment.group = Some(label.trim_end_matches(',').to_owned());
  },
};

pub const LEADING_GROUP: LineRule = LineRule {
  name:    "leading_group",
  applies: |tokens, fragment| {
    fragment.group.is_none() && !tokens.is_empty() && !starts_teacher(tokens, 0)
  },
  extract: |tokens, fragment| {
    fragment.group = Some(tokens.remove(0).to_owned());
  },
};

pub const INLINE_TEACHER: LineRule = LineRule {
  name:    "inline_teacher",
  applies: |tokens, fragment| {
    fragment.teacher.is_none()
      && (0..tokens.len()).any(|i| starts_teacher(tokens, i))
  },
  extract: |tokens, fragment| {
    if let Some(i) = (0..tokens.len()).find(|&i| starts_teacher(tokens, i)) {
      let teacher = tokens.drain(i..i + 2).collect::<Vec<_>>();
      fragment.teacher = Some(teacher.join(" "));
    }
  },
};

/// Precedence of the positional heuristics.
pub const POSITIONAL_RULES: [LineRule; 5] = [
  LEADING_MARKER,
  TRAILING_TEACHER,
  COMMA_GROUP,
  LEADING_GROUP,
  INLINE_TEACHER,
];

/// `Surname I.O.` starting at `i`.
fn starts_teacher(tokens: &[&str], i: usize) -> bool {
  i + 1 < tokens.len() && is_surname(tokens[i]) && is_initials(tokens[i + 1])
}

/// Splits one line into group, teacher and discipline. Returns `None` for a
/// line with no tokens at all.
pub fn parse_positional_line(line: &str) -> Option<ParsedFragment> {
  let mut tokens = line.split_whitespace().collect::<Vec<_>>();
  if tokens.is_empty() {
    return None;
  }

  let mut fragment = ParsedFragment::default();
  for rule in &POSITIONAL_RULES {
    if (rule.applies)(&tokens, &fragment) {
      (rule.extract)(&mut tokens, &mut fragment);
      trace!(rule = rule.name, remaining = tokens.len(), "applied line rule");
    }
  }
  fragment.discipline = tokens.join(" ");

  Some(fragment)
}

/// One fragment per non-empty line of a room-grid cell.
pub fn parse_positional_cell(cell: &str) -> Vec<ParsedFragment> {
  cell_lines(cell)
    .filter_map(|line| {
      let fragment = parse_positional_line(line);
      if fragment.is_none() {
        debug!(line, "skipping line with no tokens");
      }
      fragment
    })
    .collect()
}
