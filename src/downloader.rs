use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

use rust_xlsxwriter::{Format, Image, Workbook, Worksheet};

use crate::error::Error;
use crate::store::{ImageMap, RecordStore};

/// Retention cap: at most this many snapshot files exist after any save.
pub const MAX_SNAPSHOTS: usize = 100;

const SNAPSHOT_PREFIX: &str = "skc_";
const SNAPSHOT_EXT: &str = ".xlsx";

/// Snapshot files in `folder`, oldest first by modification time (name as
/// tie-break). An unreadable folder lists as empty.
pub fn list_snapshots(folder: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(folder) else {
        return Vec::new();
    };
    let mut files: Vec<(std::time::SystemTime, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(SNAPSHOT_PREFIX) || !name.ends_with(SNAPSHOT_EXT) {
                return None;
            }
            let meta = entry.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            let mtime = meta.modified().ok()?;
            Some((mtime, entry.path()))
        })
        .collect();
    files.sort();
    files.into_iter().map(|(_, path)| path).collect()
}

/// The most recently modified snapshot, if any. The caller decides what to
/// do with it (a UI would typically hand it to the OS default opener).
pub fn latest_snapshot(folder: &Path) -> Option<PathBuf> {
    list_snapshots(folder).pop()
}

/// Delete oldest snapshots until fewer than [`MAX_SNAPSHOTS`] remain.
/// Deletions are best-effort; a file that will not go away is skipped.
fn enforce_retention(folder: &Path) {
    let mut files = list_snapshots(folder);
    while files.len() >= MAX_SNAPSHOTS {
        let oldest = files.remove(0);
        if let Err(e) = fs::remove_file(&oldest) {
            log::debug!("could not delete old snapshot {}: {e}", oldest.display());
        }
    }
}

/// Write one `skc_<timestamp>.xlsx` snapshot of the store into `folder`.
///
/// Products occupy adjacent column pairs in store order: row 1 a merged
/// title cell (plain cell if the merge fails), row 2 an optional 100×100
/// image, row 3 the `SKC`/`状态` headers, rows 4+ the entries. `progress`
/// receives the percentage of products processed after each product.
///
/// Cancellation is cooperative: `cancel` is checked before each product and
/// again before the final save. The workbook only reaches disk in that last
/// step, so a cancelled export leaves no partial file behind.
///
/// Timestamps have whole-second resolution; a snapshot written in the same
/// second as an earlier one overwrites it.
pub fn write_snapshot(
    folder: &Path,
    store: &RecordStore,
    images: &ImageMap,
    cancel: &AtomicBool,
    mut progress: impl FnMut(u8),
) -> Result<PathBuf, Error> {
    fs::create_dir_all(folder)?;
    enforce_retention(folder);

    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = folder.join(format!("{SNAPSHOT_PREFIX}{timestamp}{SNAPSHOT_EXT}"));

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();

    let total = store.product_count().max(1);
    let mut col: u16 = 0;
    for (i, (product, skcs)) in store.products().enumerate() {
        if cancel.load(Ordering::Relaxed) {
            return Err(Error::ExportCancelled);
        }

        if worksheet
            .merge_range(0, col, 0, col + 1, product, &Format::new())
            .is_err()
        {
            worksheet.write_string(0, col, product)?;
        }

        if let Some(image_path) = images.get(product) {
            embed_image(&mut worksheet, col, image_path);
        }

        worksheet.write_string(2, col, "SKC")?;
        worksheet.write_string(2, col + 1, "状态")?;
        let mut row: u32 = 3;
        for record in skcs {
            worksheet.write_string(row, col, record.code.as_str())?;
            worksheet.write_string(row, col + 1, record.status.as_str())?;
            row += 1;
        }

        col += 2;
        progress((((i + 1) * 100) / total) as u8);
    }

    if cancel.load(Ordering::Relaxed) {
        return Err(Error::ExportCancelled);
    }
    workbook.push_worksheet(worksheet);
    workbook.save(&path)?;
    Ok(path)
}

/// Embed a 100×100 product image at row 2 of the product's first column.
/// Any failure (unreadable file, unsupported format) skips the image and
/// leaves the rest of the snapshot intact.
fn embed_image(worksheet: &mut Worksheet, col: u16, path: &str) {
    let mut image = match Image::new(path) {
        Ok(image) => image,
        Err(e) => {
            log::debug!("skipping image {path}: {e}");
            return;
        }
    };
    let (width, height) = (image.width(), image.height());
    if width <= 0.0 || height <= 0.0 {
        return;
    }
    let image = image
        .set_scale_width(100.0 / width)
        .set_scale_height(100.0 / height);
    if let Err(e) = worksheet.insert_image(1, col, &image) {
        log::debug!("skipping image {path}: {e}");
        return;
    }
    let _ = worksheet.set_row_height(1, 80);
    let _ = worksheet.set_column_width(col, 15);
}

/// Events a background export emits. Exactly one terminal event
/// (`Finished`, `Cancelled` or `Failed`) follows the `Progress` stream.
#[derive(Debug)]
pub enum ExportEvent {
    Progress(u8),
    Finished(PathBuf),
    Cancelled,
    Failed(String),
}

/// Handle to a snapshot export running on its own worker thread.
pub struct ExportTask {
    cancel: Arc<AtomicBool>,
    events: Receiver<ExportEvent>,
    handle: JoinHandle<()>,
}

impl ExportTask {
    /// Ask the worker to stop. It obliges at the next product boundary and
    /// never writes a file after that.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Drain whatever events have arrived so far without blocking.
    pub fn try_events(&self) -> Vec<ExportEvent> {
        self.events.try_iter().collect()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the worker is done and return its terminal event.
    /// Progress events still pending are discarded.
    pub fn wait(self) -> ExportEvent {
        self.wait_with(|_| {})
    }

    /// Like [`ExportTask::wait`], but feeds each pending progress
    /// percentage to `on_progress` on the way.
    pub fn wait_with(self, mut on_progress: impl FnMut(u8)) -> ExportEvent {
        let mut terminal = None;
        for event in self.events.iter() {
            match event {
                ExportEvent::Progress(percent) => on_progress(percent),
                other => terminal = Some(other),
            }
        }
        let _ = self.handle.join();
        terminal.unwrap_or_else(|| ExportEvent::Failed("export worker died".to_string()))
    }
}

/// Start a snapshot export on a worker thread. The worker gets its own copy
/// of the store and image map, so the caller is free to keep mutating.
pub fn spawn_export(folder: PathBuf, store: RecordStore, images: ImageMap) -> ExportTask {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    let (tx, rx) = mpsc::channel();

    let handle = thread::spawn(move || {
        let progress_tx = tx.clone();
        let result = write_snapshot(&folder, &store, &images, &flag, |percent| {
            let _ = progress_tx.send(ExportEvent::Progress(percent));
        });
        let terminal = match result {
            Ok(path) => ExportEvent::Finished(path),
            Err(Error::ExportCancelled) => ExportEvent::Cancelled,
            Err(e) => ExportEvent::Failed(e.to_string()),
        };
        let _ = tx.send(terminal);
    });

    ExportTask {
        cancel,
        events: rx,
        handle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_store() -> RecordStore {
        let mut store = RecordStore::new();
        store.add_skcs("P1", "S1 S2", "已下架");
        store.add_skcs("P2", "S3", "核价通过");
        store
    }

    #[test]
    fn snapshot_lands_in_folder_with_expected_name() {
        let dir = tempdir().unwrap();
        let cancel = AtomicBool::new(false);

        let path =
            write_snapshot(dir.path(), &sample_store(), &ImageMap::new(), &cancel, |_| {}).unwrap();

        assert!(path.exists());
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("skc_"));
        assert!(name.ends_with(".xlsx"));
        assert_eq!(list_snapshots(dir.path()), vec![path]);
    }

    #[test]
    fn progress_reaches_hundred() {
        let dir = tempdir().unwrap();
        let cancel = AtomicBool::new(false);
        let mut seen = Vec::new();

        write_snapshot(dir.path(), &sample_store(), &ImageMap::new(), &cancel, |p| {
            seen.push(p)
        })
        .unwrap();

        assert_eq!(seen, vec![50, 100]);
    }

    #[test]
    fn retention_caps_files_at_limit() {
        let dir = tempdir().unwrap();
        for i in 0..120 {
            fs::write(dir.path().join(format!("skc_dummy{i:03}.xlsx")), b"x").unwrap();
        }

        let cancel = AtomicBool::new(false);
        write_snapshot(dir.path(), &sample_store(), &ImageMap::new(), &cancel, |_| {}).unwrap();

        assert_eq!(list_snapshots(dir.path()).len(), MAX_SNAPSHOTS);
    }

    #[test]
    fn retention_ignores_other_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("data.json"), b"{}").unwrap();
        fs::write(dir.path().join("notes.txt"), b"keep me").unwrap();
        for i in 0..MAX_SNAPSHOTS + 5 {
            fs::write(dir.path().join(format!("skc_dummy{i:03}.xlsx")), b"x").unwrap();
        }

        enforce_retention(dir.path());

        assert_eq!(list_snapshots(dir.path()).len(), MAX_SNAPSHOTS - 1);
        assert!(dir.path().join("data.json").exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn cancelled_export_writes_nothing() {
        let dir = tempdir().unwrap();
        let cancel = AtomicBool::new(true);

        let result =
            write_snapshot(dir.path(), &sample_store(), &ImageMap::new(), &cancel, |_| {});

        assert!(matches!(result, Err(Error::ExportCancelled)));
        assert!(list_snapshots(dir.path()).is_empty());
    }

    #[test]
    fn missing_image_does_not_sink_the_export() {
        let dir = tempdir().unwrap();
        let cancel = AtomicBool::new(false);
        let mut images = ImageMap::new();
        images.assign("P1", "/definitely/not/here.png");

        let path = write_snapshot(dir.path(), &sample_store(), &images, &cancel, |_| {}).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn background_task_reports_finished() {
        let dir = tempdir().unwrap();

        let task = spawn_export(dir.path().to_path_buf(), sample_store(), ImageMap::new());

        match task.wait() {
            ExportEvent::Finished(path) => assert!(path.exists()),
            other => panic!("expected Finished, got {:?}", other),
        }
    }

    #[test]
    fn latest_snapshot_prefers_newest() {
        let dir = tempdir().unwrap();
        assert_eq!(latest_snapshot(dir.path()), None);

        fs::write(dir.path().join("skc_a.xlsx"), b"old").unwrap();
        fs::write(dir.path().join("skc_b.xlsx"), b"new").unwrap();

        let latest = latest_snapshot(dir.path()).unwrap();
        assert_eq!(latest.file_name().unwrap(), "skc_b.xlsx");
    }
}
