use std::path::{Path, PathBuf};

use crate::downloader::{self, ExportEvent, ExportTask, latest_snapshot};
use crate::error::Error;
use crate::loader;
use crate::project::{Project, Registry, SidecarIssue};
use crate::store::{BatchReport, STATUS_OPTIONS};

/// Top-level application state: the project registry plus the in-flight
/// snapshot export, owned by one object and passed by reference to every
/// operation.
///
/// Every successful mutation persists the current project's sidecar (a
/// failure there degrades to a warning, the in-memory change stands) and
/// restarts the snapshot export. Exports follow a supersede-in-flight
/// policy: at most one task is tracked, and starting a new one first
/// signals cancellation to its predecessor.
pub struct SkcApp {
    registry: Registry,
    export: Option<ExportTask>,
}

impl SkcApp {
    /// Load (or initialize) all projects under `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        Ok(SkcApp {
            registry: Registry::load_all(root)?,
            export: None,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn current_project(&self) -> &Project {
        self.registry.current()
    }

    /// Sidecars that were unreadable at startup, for the UI to surface.
    pub fn load_issues(&self) -> &[SidecarIssue] {
        self.registry.load_issues()
    }

    /// The fixed status list, for binding a status selector.
    pub fn status_options(&self) -> &'static [&'static str] {
        &STATUS_OPTIONS
    }

    /// Flat (product, skc, status) rows of the current project, for table
    /// display.
    pub fn table_rows(&self) -> Vec<(&str, &str, &str)> {
        self.registry.current().store.rows()
    }

    /// Add whitespace-separated SKC codes under `product`. Duplicates
    /// anywhere in the project are skipped silently; the count actually
    /// added is returned.
    pub fn add_skcs(&mut self, product: &str, codes: &str, status: &str) -> Result<usize, Error> {
        let product = product.trim();
        if product.is_empty() {
            return Err(Error::EmptyInput("product code"));
        }
        if codes.trim().is_empty() {
            return Err(Error::EmptyInput("SKC codes"));
        }
        if status.trim().is_empty() {
            return Err(Error::EmptyInput("status"));
        }
        let added = self
            .registry
            .current_mut()
            .store
            .add_skcs(product, codes, status);
        self.persist_and_snapshot();
        Ok(added)
    }

    /// Set the status of every listed code; codes found nowhere are
    /// reported back in the result.
    pub fn batch_modify(&mut self, codes: &str, status: &str) -> Result<BatchReport, Error> {
        if codes.trim().is_empty() {
            return Err(Error::EmptyInput("SKC codes"));
        }
        if status.trim().is_empty() {
            return Err(Error::EmptyInput("status"));
        }
        let list: Vec<&str> = codes.split_whitespace().collect();
        let report = self.registry.current_mut().store.batch_modify(&list, status);
        self.persist_and_snapshot();
        Ok(report)
    }

    /// Delete every listed code; codes found nowhere are reported back.
    pub fn batch_delete(&mut self, codes: &str) -> Result<BatchReport, Error> {
        if codes.trim().is_empty() {
            return Err(Error::EmptyInput("SKC codes"));
        }
        let list: Vec<&str> = codes.split_whitespace().collect();
        let report = self.registry.current_mut().store.batch_delete(&list);
        self.persist_and_snapshot();
        Ok(report)
    }

    /// Reorder every product's SKCs by status rank.
    pub fn auto_sort(&mut self) {
        self.registry.current_mut().store.auto_sort();
        self.persist_and_snapshot();
    }

    /// Attach (or replace) the representative image of a product.
    pub fn assign_image(&mut self, product: &str, path: &str) -> Result<(), Error> {
        let product = product.trim();
        if product.is_empty() {
            return Err(Error::EmptyInput("product code"));
        }
        if path.trim().is_empty() {
            return Err(Error::EmptyInput("image path"));
        }
        self.registry.current_mut().images.assign(product, path);
        self.persist_and_snapshot();
        Ok(())
    }

    /// Merge a spreadsheet into the current project. Nothing is persisted
    /// when the workbook cannot be opened.
    pub fn import_workbook(&mut self, path: &Path) -> Result<usize, Error> {
        let imported = loader::import_workbook(path, &mut self.registry.current_mut().store)?;
        self.persist_and_snapshot();
        Ok(imported)
    }

    /// The most recent snapshot of the current project, if any.
    pub fn latest_snapshot(&self) -> Option<PathBuf> {
        latest_snapshot(&self.registry.current().folder)
    }

    pub fn create_project(&mut self, name: Option<&str>) -> Result<String, Error> {
        let project = self.registry.create(name)?;
        Ok(project.name.clone())
    }

    pub fn switch_project(&mut self, name: &str) -> Result<(), Error> {
        self.registry.switch(name)
    }

    pub fn import_project(&mut self, folder: &Path) -> Result<String, Error> {
        let project = self.registry.import_from(folder)?;
        Ok(project.name.clone())
    }

    pub fn export_project(&self, target: &Path) -> Result<PathBuf, Error> {
        self.registry.export_current(target)
    }

    pub fn export_in_progress(&self) -> bool {
        self.export.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Drain progress/terminal events from the in-flight export without
    /// blocking.
    pub fn poll_export(&mut self) -> Vec<ExportEvent> {
        self.export
            .as_ref()
            .map(|task| task.try_events())
            .unwrap_or_default()
    }

    /// Block until the in-flight export completes and return its terminal
    /// event, or `None` when no export is running.
    pub fn finish_export(&mut self) -> Option<ExportEvent> {
        self.export.take().map(ExportTask::wait)
    }

    /// Like [`SkcApp::finish_export`], but reports progress percentages to
    /// `on_progress` while waiting, ready to feed a progress dialog.
    pub fn finish_export_with(
        &mut self,
        on_progress: impl FnMut(u8),
    ) -> Option<ExportEvent> {
        self.export.take().map(|task| task.wait_with(on_progress))
    }

    /// Signal the in-flight export to stop. The worker obliges at its next
    /// product boundary; no partial file is left behind.
    pub fn cancel_export(&mut self) {
        if let Some(task) = self.export.take() {
            task.cancel();
        }
    }

    fn persist_and_snapshot(&mut self) {
        let project = self.registry.current();
        if let Err(e) = project.save() {
            log::warn!("could not persist project {}: {e}", project.name);
        }
        self.restart_export();
    }

    /// Supersede-in-flight: the previous export (if still running) is told
    /// to cancel, then a fresh one starts from a copy of current state.
    fn restart_export(&mut self) {
        if let Some(previous) = self.export.take() {
            previous.cancel();
        }
        let project = self.registry.current();
        self.export = Some(downloader::spawn_export(
            project.folder.clone(),
            project.store.clone(),
            project.images.clone(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saving::{SIDECAR_NAME, SidecarLoad, load_sidecar};
    use tempfile::tempdir;

    #[test]
    fn add_persists_sidecar_and_writes_snapshot() {
        let dir = tempdir().unwrap();
        let mut app = SkcApp::open(dir.path()).unwrap();

        let added = app.add_skcs("P1", "A B", "已下架").unwrap();
        assert_eq!(added, 2);

        match app.finish_export() {
            Some(ExportEvent::Finished(path)) => assert!(path.exists()),
            other => panic!("expected Finished, got {:?}", other),
        }

        let folder = app.current_project().folder.clone();
        match load_sidecar(&folder).unwrap() {
            SidecarLoad::Loaded(data) => {
                assert!(data.database.contains_skc("A"));
                assert!(data.database.contains_skc("B"));
            }
            other => panic!("expected Loaded, got {:?}", other),
        }
    }

    #[test]
    fn empty_input_aborts_before_mutation() {
        let dir = tempdir().unwrap();
        let mut app = SkcApp::open(dir.path()).unwrap();

        assert!(matches!(
            app.add_skcs("", "A", "已下架"),
            Err(Error::EmptyInput("product code"))
        ));
        assert!(matches!(
            app.add_skcs("P1", "   ", "已下架"),
            Err(Error::EmptyInput("SKC codes"))
        ));
        assert!(matches!(
            app.batch_modify("", "已下架"),
            Err(Error::EmptyInput("SKC codes"))
        ));
        assert!(app.table_rows().is_empty());
        assert!(!app.export_in_progress());
    }

    #[test]
    fn modify_and_delete_report_missing_codes() {
        let dir = tempdir().unwrap();
        let mut app = SkcApp::open(dir.path()).unwrap();
        app.add_skcs("P1", "A", "核价通过").unwrap();

        let report = app.batch_modify("A Z", "已下架").unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.not_found, vec!["Z".to_string()]);

        let report = app.batch_delete("A Q").unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.not_found, vec!["Q".to_string()]);
        assert!(app.table_rows().is_empty());

        app.finish_export();
    }

    #[test]
    fn failed_import_leaves_no_export_behind() {
        let dir = tempdir().unwrap();
        let mut app = SkcApp::open(dir.path()).unwrap();

        let garbage = dir.path().join("junk.xlsx");
        std::fs::write(&garbage, b"nope").unwrap();

        assert!(app.import_workbook(&garbage).is_err());
        assert!(!app.export_in_progress());
        assert!(app.finish_export().is_none());
    }

    #[test]
    fn image_assignment_reaches_the_sidecar() {
        let dir = tempdir().unwrap();
        let mut app = SkcApp::open(dir.path()).unwrap();
        app.add_skcs("P1", "A", "核价通过").unwrap();
        app.assign_image("P1", "/tmp/p1.png").unwrap();
        app.finish_export();

        let folder = app.current_project().folder.clone();
        match load_sidecar(&folder).unwrap() {
            SidecarLoad::Loaded(data) => {
                assert_eq!(data.images.get("P1"), Some("/tmp/p1.png"));
            }
            other => panic!("expected Loaded, got {:?}", other),
        }
    }

    #[test]
    fn rapid_mutations_keep_only_the_newest_export() {
        let dir = tempdir().unwrap();
        let mut app = SkcApp::open(dir.path()).unwrap();

        app.add_skcs("P1", "A", "核价通过").unwrap();
        app.add_skcs("P1", "B", "核价通过").unwrap();
        app.add_skcs("P1", "C", "核价通过").unwrap();

        // Only the last task is still tracked, and it was never cancelled,
        // so it must finish cleanly.
        match app.finish_export() {
            Some(ExportEvent::Finished(path)) => assert!(path.exists()),
            other => panic!("expected Finished, got {:?}", other),
        }
        assert!(app.finish_export().is_none());
    }

    #[test]
    fn project_lifecycle_through_the_app() {
        let dir = tempdir().unwrap();
        let mut app = SkcApp::open(dir.path()).unwrap();
        app.add_skcs("P1", "A", "核价通过").unwrap();
        app.finish_export();

        let name = app.create_project(Some("备用")).unwrap();
        assert_eq!(name, "备用");
        assert!(app.table_rows().is_empty());

        app.switch_project("项目1").unwrap();
        assert_eq!(app.table_rows().len(), 1);

        let target = tempdir().unwrap();
        let dst = app.export_project(target.path()).unwrap();
        assert!(dst.join(SIDECAR_NAME).exists());
    }
}
