//! Free-text lesson cell tokenizers.
//!
//! Room-grid sheets pack `group [teacher] discipline` into one line per
//! lesson and are split positionally ([`positional`]); group-grid sheets put
//! each field on its own line in no fixed order and are classified by keyword
//! ([`keyword`]).

pub mod keyword;
pub mod positional;

pub use self::{keyword::parse_keyword_cell, positional::parse_positional_cell};

/// Non-empty, trimmed lines of a cell. Handles `\r\n` exports too.
pub(crate) fn cell_lines(cell: &str) -> impl Iterator<Item = &str> {
  cell.lines().map(str::trim).filter(|l| !l.is_empty())
}

/// An initials token such as `И.И.`: exactly two periods.
pub(crate) fn is_initials(token: &str) -> bool {
  token.chars().filter(|c| *c == '.').count() == 2
}

/// A surname-like token: starts uppercase, has lowercase letters, no digits
/// and no periods. Group codes like `ИЭ-21` are all-caps with digits, so they
/// never qualify.
pub(crate) fn is_surname(token: &str) -> bool {
  let mut chars = token.chars();
  let starts_upper = chars.next().is_some_and(char::is_uppercase);
  starts_upper
    && token.chars().any(char::is_lowercase)
    && !token.chars().any(|c| c.is_ascii_digit() || c == '.')
}
