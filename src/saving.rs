use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::store::{ImageMap, RecordStore};

/// Name of the per-project sidecar file.
pub const SIDECAR_NAME: &str = "data.json";

/// Everything a project persists between sessions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SidecarData {
    #[serde(default)]
    pub database: RecordStore,
    #[serde(default)]
    pub images: ImageMap,
}

#[derive(Serialize)]
struct SidecarRef<'a> {
    database: &'a RecordStore,
    images: &'a ImageMap,
}

/// Result of reading a sidecar. "No file" and "unreadable file" are
/// different situations and callers must treat them differently; corruption
/// is never folded into an empty result.
#[derive(Debug)]
pub enum SidecarLoad {
    Loaded(SidecarData),
    Absent,
    Corrupt {
        path: PathBuf,
        error: serde_json::Error,
    },
}

/// Write `data.json` into `folder`, creating the folder if needed and
/// overwriting any existing sidecar. The output is indented UTF-8 JSON with
/// non-ASCII text kept readable.
pub fn save_sidecar(folder: &Path, store: &RecordStore, images: &ImageMap) -> Result<(), Error> {
    fs::create_dir_all(folder)?;
    let path = folder.join(SIDECAR_NAME);
    let file = File::create(&path)?;
    let payload = SidecarRef {
        database: store,
        images,
    };
    serde_json::to_writer_pretty(BufWriter::new(file), &payload)
        .map_err(|source| Error::SidecarWrite { path, source })
}

/// Read `folder`'s sidecar. A missing file is `Absent`, unparsable JSON is
/// `Corrupt`; only I/O failures other than not-found are hard errors.
/// Missing keys inside a valid sidecar default to empty.
pub fn load_sidecar(folder: &Path) -> Result<SidecarLoad, Error> {
    let path = folder.join(SIDECAR_NAME);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(SidecarLoad::Absent),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_str::<SidecarData>(&raw) {
        Ok(data) => Ok(SidecarLoad::Loaded(data)),
        Err(error) => Ok(SidecarLoad::Corrupt { path, error }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let mut store = RecordStore::new();
        store.add_skcs("P1", "S1 S2", "已下架");
        let mut images = ImageMap::new();
        images.assign("P1", "/tmp/p1.png");

        save_sidecar(dir.path(), &store, &images).unwrap();

        match load_sidecar(dir.path()).unwrap() {
            SidecarLoad::Loaded(data) => {
                assert_eq!(data.database, store);
                assert_eq!(data.images, images);
            }
            other => panic!("expected Loaded, got {:?}", other),
        }
    }

    #[test]
    fn sidecar_keeps_chinese_readable() {
        let dir = tempdir().unwrap();
        let mut store = RecordStore::new();
        store.add_skcs("货号一", "S1", "核价通过");

        save_sidecar(dir.path(), &store, &ImageMap::new()).unwrap();

        let raw = fs::read_to_string(dir.path().join(SIDECAR_NAME)).unwrap();
        assert!(raw.contains("货号一"));
        assert!(raw.contains("核价通过"));
    }

    #[test]
    fn missing_file_is_absent() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            load_sidecar(dir.path()).unwrap(),
            SidecarLoad::Absent
        ));
    }

    #[test]
    fn bad_json_is_corrupt_not_empty() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(SIDECAR_NAME), "{not json").unwrap();
        assert!(matches!(
            load_sidecar(dir.path()).unwrap(),
            SidecarLoad::Corrupt { .. }
        ));
    }

    #[test]
    fn missing_keys_default_to_empty() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(SIDECAR_NAME),
            r#"{"database": {"P1": {"S1": "已下架"}}}"#,
        )
        .unwrap();

        match load_sidecar(dir.path()).unwrap() {
            SidecarLoad::Loaded(data) => {
                assert_eq!(data.database.record_count(), 1);
                assert!(data.images.is_empty());
            }
            other => panic!("expected Loaded, got {:?}", other),
        }
    }
}
