/*!
# SKC Manager

A small data-entry engine for tracking product variant ("SKC") codes and
their status across user-defined projects.

## Overview

Each project is an isolated workspace backed by a `skc-data-<N>` folder: a
record store (product code → SKC code → status, insertion-ordered, SKC codes
unique across the whole project), an optional representative image per
product, a `data.json` sidecar persisting both between sessions, and a
rolling set of timestamped spreadsheet snapshots.

Every mutation driven through [`app::SkcApp`] writes the sidecar and
regenerates a snapshot on a background worker with progress reporting,
cooperative cancellation and a 100-file retention cap. Snapshots can be
imported back (into any project) using the inverse layout convention, with
project-wide deduplication.

The crate is the full logic layer of a desktop data-entry tool; windowing,
dialogs and drag-and-drop stay in the calling UI. The bundled binary is a
thin command-line stand-in for that surface.

## Modules

- **store**: record store, status ranking, batch add/modify/delete/sort
- **project**: project registry (discover, create, import, export, switch)
- **saving**: JSON sidecar persistence
- **downloader**: snapshot export (layout, retention, background task)
- **loader**: snapshot import
- **app**: application state driving persistence and export after each
  mutation
- **error**: crate-wide error type
*/

pub mod app;
pub mod downloader;
pub mod error;
pub mod loader;
pub mod project;
pub mod saving;
pub mod store;

/// Re-export the main entry points so callers rarely need module paths.
pub use app::SkcApp;
pub use downloader::{ExportEvent, ExportTask, MAX_SNAPSHOTS};
pub use error::Error;
pub use project::{Project, Registry};
pub use saving::{SidecarData, SidecarLoad};
pub use store::{BatchReport, ImageMap, RecordStore, STATUS_OPTIONS};
