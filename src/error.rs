use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide error type.
///
/// Nothing here is fatal to the process: callers report the failure and
/// return to an idle state. In-memory mutations that happened before an
/// I/O failure are deliberately not rolled back.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} must not be empty")]
    EmptyInput(&'static str),

    #[error("project name already in use: {0}")]
    DuplicateProject(String),

    #[error("no project named {0}")]
    UnknownProject(String),

    #[error("no data.json found in {}", .0.display())]
    MissingSidecar(PathBuf),

    #[error("data.json in {} is not valid JSON: {source}", .path.display())]
    CorruptSidecar {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not write data.json to {}: {source}", .path.display())]
    SidecarWrite {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not open workbook {}: {source}", .path.display())]
    WorkbookOpen {
        path: PathBuf,
        #[source]
        source: calamine::XlsxError,
    },

    #[error("snapshot export cancelled")]
    ExportCancelled,

    #[error("spreadsheet error: {0}")]
    Spreadsheet(#[from] rust_xlsxwriter::XlsxError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
