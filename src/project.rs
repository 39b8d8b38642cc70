use std::fs;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;

use crate::downloader::list_snapshots;
use crate::error::Error;
use crate::saving::{self, SIDECAR_NAME, SidecarLoad};
use crate::store::{ImageMap, RecordStore};

lazy_static! {
    static ref FOLDER_RE: Regex = Regex::new(r"^skc-data-(\d+)$").unwrap();
}

/// One named workspace: its record store, image map and backing folder.
/// Projects are never destroyed by the program; a folder removed externally
/// simply stops being discovered.
#[derive(Debug)]
pub struct Project {
    pub name: String,
    pub folder: PathBuf,
    pub store: RecordStore,
    pub images: ImageMap,
}

impl Project {
    /// Persist this project's sidecar.
    pub fn save(&self) -> Result<(), Error> {
        saving::save_sidecar(&self.folder, &self.store, &self.images)
    }
}

/// A sidecar that existed but failed to parse during registry load. The
/// project starts empty; the issue is kept so the caller can tell the user
/// instead of losing data silently.
#[derive(Debug)]
pub struct SidecarIssue {
    pub folder: PathBuf,
    pub detail: String,
}

/// All known projects plus which one is current. Always holds at least one
/// project once loaded.
#[derive(Debug)]
pub struct Registry {
    root: PathBuf,
    projects: Vec<Project>,
    current: usize,
    issues: Vec<SidecarIssue>,
}

impl Registry {
    /// Scan `root` for `skc-data-<N>` folders in numeric order, name them
    /// `项目1..项目N` and load each sidecar. With no folder present, a
    /// default empty project is created and persisted. The first project
    /// becomes current.
    pub fn load_all(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let mut found: Vec<(u64, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&root)?.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(caps) = FOLDER_RE.captures(&name) {
                if let Ok(index) = caps[1].parse::<u64>() {
                    found.push((index, path));
                }
            }
        }
        found.sort();

        let mut registry = Registry {
            root,
            projects: Vec::new(),
            current: 0,
            issues: Vec::new(),
        };
        for (i, (_, folder)) in found.into_iter().enumerate() {
            registry.push_loaded(format!("项目{}", i + 1), folder)?;
        }

        if registry.projects.is_empty() {
            let folder = registry.root.join("skc-data-1");
            let store = RecordStore::new();
            let images = ImageMap::new();
            saving::save_sidecar(&folder, &store, &images)?;
            registry.projects.push(Project {
                name: "项目1".to_string(),
                folder,
                store,
                images,
            });
        }
        Ok(registry)
    }

    fn push_loaded(&mut self, name: String, folder: PathBuf) -> Result<(), Error> {
        let (store, images) = match saving::load_sidecar(&folder)? {
            SidecarLoad::Loaded(data) => (data.database, data.images),
            SidecarLoad::Absent => (RecordStore::new(), ImageMap::new()),
            SidecarLoad::Corrupt { path, error } => {
                log::warn!(
                    "sidecar {} is corrupt, project starts empty: {error}",
                    path.display()
                );
                self.issues.push(SidecarIssue {
                    folder: folder.clone(),
                    detail: error.to_string(),
                });
                (RecordStore::new(), ImageMap::new())
            }
        };
        self.projects.push(Project {
            name,
            folder,
            store,
            images,
        });
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.projects.iter().map(|p| p.name.as_str())
    }

    /// Sidecars that were present but unreadable at load time.
    pub fn load_issues(&self) -> &[SidecarIssue] {
        &self.issues
    }

    pub fn current(&self) -> &Project {
        &self.projects[self.current]
    }

    pub fn current_mut(&mut self) -> &mut Project {
        &mut self.projects[self.current]
    }

    pub fn get(&self, name: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.name == name)
    }

    /// Make the named project current.
    pub fn switch(&mut self, name: &str) -> Result<(), Error> {
        match self.projects.iter().position(|p| p.name == name) {
            Some(index) => {
                self.current = index;
                Ok(())
            }
            None => Err(Error::UnknownProject(name.to_string())),
        }
    }

    /// Next free `skc-data-<N>` folder under the root: one past the highest
    /// existing index, so a gappy sequence never collides.
    fn allocate_folder(&self) -> PathBuf {
        let mut max = 0u64;
        if let Ok(entries) = fs::read_dir(&self.root) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if let Some(caps) = FOLDER_RE.captures(&name) {
                    if let Ok(index) = caps[1].parse::<u64>() {
                        max = max.max(index);
                    }
                }
            }
        }
        self.root.join(format!("skc-data-{}", max + 1))
    }

    /// First `项目<N>` name not yet taken, counting up from one past the
    /// current project count.
    fn free_default_name(&self) -> String {
        let mut n = self.projects.len() + 1;
        loop {
            let name = format!("项目{n}");
            if !self.projects.iter().any(|p| p.name == name) {
                return name;
            }
            n += 1;
        }
    }

    /// Create a new empty project. An empty or omitted name defaults to
    /// `项目<N>`; names already in use are rejected. The new project is
    /// persisted immediately and becomes current.
    pub fn create(&mut self, name: Option<&str>) -> Result<&Project, Error> {
        let name = match name.map(str::trim) {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => format!("项目{}", self.projects.len() + 1),
        };
        if self.projects.iter().any(|p| p.name == name) {
            return Err(Error::DuplicateProject(name));
        }

        let folder = self.allocate_folder();
        let store = RecordStore::new();
        let images = ImageMap::new();
        saving::save_sidecar(&folder, &store, &images)?;
        self.projects.push(Project {
            name,
            folder,
            store,
            images,
        });
        self.current = self.projects.len() - 1;
        Ok(&self.projects[self.current])
    }

    /// Import a project from an external folder. The folder must contain a
    /// readable sidecar; its content is re-homed into a freshly allocated
    /// `skc-data-<N>` folder (byte copy when possible, reconstructed from
    /// the parsed data otherwise). The imported project becomes current.
    pub fn import_from(&mut self, folder: &Path) -> Result<&Project, Error> {
        let data = match saving::load_sidecar(folder)? {
            SidecarLoad::Loaded(data) => data,
            SidecarLoad::Absent => return Err(Error::MissingSidecar(folder.to_path_buf())),
            SidecarLoad::Corrupt { path, error } => {
                return Err(Error::CorruptSidecar {
                    path,
                    source: error,
                });
            }
        };

        let name = self.free_default_name();
        let new_folder = self.allocate_folder();
        fs::create_dir_all(&new_folder)?;
        if fs::copy(folder.join(SIDECAR_NAME), new_folder.join(SIDECAR_NAME)).is_err() {
            saving::save_sidecar(&new_folder, &data.database, &data.images)?;
        }

        self.projects.push(Project {
            name,
            folder: new_folder,
            store: data.database,
            images: data.images,
        });
        self.current = self.projects.len() - 1;
        Ok(&self.projects[self.current])
    }

    /// Copy the current project's sidecar and every retained snapshot into
    /// `target/<project name>/`. Fails on the first copy that goes wrong;
    /// files copied before that point stay where they landed.
    pub fn export_current(&self, target: &Path) -> Result<PathBuf, Error> {
        let project = self.current();
        let dst = target.join(&project.name);
        fs::create_dir_all(&dst)?;
        fs::copy(project.folder.join(SIDECAR_NAME), dst.join(SIDECAR_NAME))?;
        for snapshot in list_snapshots(&project.folder) {
            let file_name = snapshot.file_name().unwrap_or_default();
            fs::copy(&snapshot, dst.join(file_name))?;
        }
        Ok(dst)
    }
}
