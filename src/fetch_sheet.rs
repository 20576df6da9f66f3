use std::{io::Write, path::Path};

use bytes::Bytes;
use calamine::{Data, Range, Reader, Xls, open_workbook, open_workbook_auto};
use miette::{Context, IntoDiagnostic, bail, miette};
use tempfile::TempPath;
use tracing::{debug, instrument, trace};

use crate::HTTP_CLIENT;

const OLE_MAGIC: [u8; 4] = [0xD0, 0xCF, 0x11, 0xE0];
const ZIP_MAGIC: [u8; 2] = *b"PK";

/// Container format of a downloaded workbook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkbookFormat {
  /// Legacy binary `.xls`.
  Legacy,
  /// Office Open XML `.xlsx`.
  OpenXml,
}

impl WorkbookFormat {
  pub fn sniff(body: &[u8]) -> Option<Self> {
    if body.starts_with(&OLE_MAGIC) {
      Some(Self::Legacy)
    } else if body.starts_with(&ZIP_MAGIC) {
      Some(Self::OpenXml)
    } else {
      None
    }
  }

  fn suffix(self) -> &'static str {
    match self {
      Self::Legacy => ".xls",
      Self::OpenXml => ".xlsx",
    }
  }
}

/// A workbook on disk. The file is removed when this is dropped.
#[derive(Debug)]
pub struct TempDocument {
  pub format: WorkbookFormat,
  path:       TempPath,
}

impl TempDocument {
  pub fn path(&self) -> &Path { &self.path }

  /// Writes `body` to a fresh temporary file named for its format.
  pub fn from_bytes(body: &[u8]) -> miette::Result<Self> {
    let Some(format) = WorkbookFormat::sniff(body) else {
      bail!(
        "downloaded document is not a spreadsheet, starts with {:02X?}",
        &body[..body.len().min(8)]
      );
    };

    let mut file = tempfile::Builder::new()
      .prefix("schedule-")
      .suffix(format.suffix())
      .tempfile()
      .into_diagnostic()
      .context("failed to create temporary document file")?;
    file
      .write_all(body)
      .into_diagnostic()
      .context("failed to write temporary document file")?;

    Ok(Self {
      format,
      path: file.into_temp_path(),
    })
  }
}

#[instrument]
pub async fn download(url: &str) -> miette::Result<Bytes> {
  debug!("requesting schedule document");
  let resp = HTTP_CLIENT
    .get(url)
    .send()
    .await
    .into_diagnostic()
    .context("failed to send request for schedule document")?
    .error_for_status()
    .into_diagnostic()
    .context("got error response for schedule document")?;
  let body = resp
    .bytes()
    .await
    .into_diagnostic()
    .context("failed to read full body of schedule document")?;
  debug!(length = body.len(), "recieved schedule document");
  Ok(body)
}

/// Downloads a document into a temporary file.
pub async fn fetch(url: &str) -> miette::Result<TempDocument> {
  let body = download(url).await?;
  tokio::task::spawn_blocking(move || TempDocument::from_bytes(&body))
    .await
    .into_diagnostic()
    .context("document writer task panicked")?
}

/// Produces an `.xlsx` rendition of a legacy workbook's first sheet. Open XML
/// documents pass through untouched. The legacy file is deleted either way.
pub async fn convert(document: TempDocument) -> miette::Result<TempDocument> {
  if document.format == WorkbookFormat::OpenXml {
    return Ok(document);
  }

  tokio::task::spawn_blocking(move || {
    let range = read_legacy_first_sheet(document.path())?;
    let target = tempfile::Builder::new()
      .prefix("schedule-")
      .suffix(WorkbookFormat::OpenXml.suffix())
      .tempfile()
      .into_diagnostic()
      .context("failed to create converted document file")?
      .into_temp_path();
    write_range_as_xlsx(&range, &target)?;
    debug!(
      from = %document.path().display(),
      to = %target.display(),
      "converted legacy workbook"
    );
    Ok(TempDocument {
      format: WorkbookFormat::OpenXml,
      path:   target,
    })
  })
  .await
  .into_diagnostic()
  .context("conversion task panicked")?
}

fn read_legacy_first_sheet(path: &Path) -> miette::Result<Range<Data>> {
  let mut workbook: Xls<_> = open_workbook(path)
    .into_diagnostic()
    .context("failed to open legacy workbook")?;
  workbook
    .worksheet_range_at(0)
    .ok_or(miette!("legacy workbook has no sheets"))?
    .into_diagnostic()
    .context("failed to read first sheet of legacy workbook")
}

/// Writes cell values (no styling) to a new single-sheet workbook.
pub fn write_range_as_xlsx(
  range: &Range<Data>,
  path: &Path,
) -> miette::Result<()> {
  let mut book = umya_spreadsheet::new_file();
  let sheet = book
    .get_sheet_mut(&0)
    .ok_or(miette!("new workbook has no sheet"))?;

  let (start_row, start_col) = range.start().unwrap_or((0, 0));
  for (row, col, value) in range.used_cells() {
    // coords are one-indexed in umya, column first
    let coords = (start_col + col as u32 + 1, start_row + row as u32 + 1);
    let cell = sheet.get_cell_mut(coords);
    match value {
      Data::Int(i) => {
        cell.set_value_number(*i as f64);
      }
      Data::Float(f) if !f.is_nan() => {
        cell.set_value_number(*f);
      }
      Data::Bool(b) => {
        cell.set_value_bool(*b);
      }
      Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => {
        cell.set_value(s.clone());
      }
      Data::DateTime(dt) => {
        let (y, m, d, ..) = dt.to_ymd_hms_milli();
        cell.set_value(format!("{d:02}.{m:02}.{y:04}"));
      }
      other => trace!(?coords, ?other, "dropping cell without a value"),
    }
  }

  umya_spreadsheet::writer::xlsx::write(&book, path)
    .into_diagnostic()
    .context("failed to write converted workbook")
}

/// Reads the first worksheet of a workbook in any supported format.
pub fn load_first_worksheet(path: &Path) -> miette::Result<Range<Data>> {
  let mut workbook = open_workbook_auto(path)
    .into_diagnostic()
    .context(format!("failed to open workbook {}", path.display()))?;
  workbook
    .worksheet_range_at(0)
    .ok_or(miette!("workbook has no sheets"))?
    .into_diagnostic()
    .context("failed to read first worksheet")
}
