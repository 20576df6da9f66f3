use kinded::Kinded;
use miette::{Context, IntoDiagnostic, bail};
use tracing::{debug, info};

use crate::{
  discover::DiscoveredDocument,
  fetch_sheet::{TempDocument, convert, fetch, load_first_worksheet},
  lesson::SlotEntry,
  walk_table::table_source,
};

/// Progress of one discovered document through the pipeline. Temporary files
/// are owned by the state holding them and removed once it moves on.
#[derive(Kinded)]
#[kinded(kind = DocumentStep)]
pub enum DocumentState {
  Discovered {
    document: DiscoveredDocument,
  },
  Downloaded {
    document: DiscoveredDocument,
    file:     TempDocument,
  },
  Converted {
    document: DiscoveredDocument,
    file:     TempDocument,
  },
  Walked {
    document: DiscoveredDocument,
    slots:    Vec<SlotEntry>,
  },
}

impl DocumentState {
  pub fn new(document: DiscoveredDocument) -> Self {
    Self::Discovered { document }
  }

  pub fn document(&self) -> &DiscoveredDocument {
    match self {
      Self::Discovered { document }
      | Self::Downloaded { document, .. }
      | Self::Converted { document, .. }
      | Self::Walked { document, .. } => document,
    }
  }

  pub async fn step(self, group_grid_year: i32) -> miette::Result<Self> {
    let old_state_step = self.kind();
    let new_state = match self {
      DocumentState::Discovered { document } => DocumentState::Downloaded {
        file: fetch(&document.url)
          .await
          .context("failed to download schedule document")?,
        document,
      },
      DocumentState::Downloaded { document, file } => {
        DocumentState::Converted {
          file: convert(file)
            .await
            .context("failed to convert schedule document")?,
          document,
        }
      }
      DocumentState::Converted { document, file } => {
        let shape = document.shape;
        let slots = tokio::task::spawn_blocking(move || {
          let range = load_first_worksheet(file.path())?;
          let source = table_source(shape, &range, group_grid_year);
          debug!(shape = ?source.shape(), "walking worksheet");
          source.slots()
        })
        .await
        .into_diagnostic()
        .context("worksheet walker task panicked")?
        .context(format!("failed to walk {shape:?} worksheet"))?;
        DocumentState::Walked { document, slots }
      }
      DocumentState::Walked { .. } => {
        bail!("document state machine stepped past completion")
      }
    };

    info!(
      url = new_state.document().url,
      old_state = ?old_state_step,
      new_state = ?(new_state.kind()),
      "successfully transitioned state"
    );
    Ok(new_state)
  }

  /// Drives the machine until the document is walked.
  pub async fn run(
    mut self,
    group_grid_year: i32,
  ) -> miette::Result<(DiscoveredDocument, Vec<SlotEntry>)> {
    loop {
      match self {
        DocumentState::Walked { document, slots } => {
          return Ok((document, slots));
        }
        s => self = s.step(group_grid_year).await?,
      }
    }
  }
}
