//! Capture directory selection and capture listing.
//!
//! Candidates are tried in priority order:
//!
//! 1. mounted external volumes (e.g. `/media/<user>/<label>/astro_captures`)
//! 2. `<home>/astro_captures`
//! 3. `<cwd>/astro_captures`
//!
//! A candidate qualifies only after a real probe write succeeds; permission bits
//! on removable media are unreliable. The first qualifying directory is cached
//! for the life of the locator, so volumes mounted later are not picked up.
//!
//! The locator's methods do blocking filesystem work. Async callers hand them
//! to the blocking pool through [`StorageLocator::blocking`].

use crate::config::StorageConfig;
use crate::error::{RigError, RigResult};
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// File extensions listed as captures.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "pgm", "dng", "fits"];

/// Ordered locations to consider for the capture directory.
#[derive(Debug, Clone, Default)]
pub struct StorageCandidates {
    /// Mount points of external volumes, already in preference order
    pub external_volumes: Vec<PathBuf>,
    pub home_dir: Option<PathBuf>,
    /// Last resort
    pub working_dir: Option<PathBuf>,
    /// Directory created inside each location
    pub capture_subdir: String,
}

impl StorageCandidates {
    /// Discover candidates on this machine.
    pub fn from_config(config: &StorageConfig) -> Self {
        let external_volumes = config
            .external_roots
            .iter()
            .flat_map(|root| discover_volumes(root))
            .collect();

        Self {
            external_volumes,
            home_dir: dirs::home_dir(),
            working_dir: std::env::current_dir().ok(),
            capture_subdir: config.capture_subdir.clone(),
        }
    }

    /// Candidate capture directories, highest priority first.
    pub fn directories(&self) -> Vec<PathBuf> {
        self.external_volumes
            .iter()
            .chain(self.home_dir.iter())
            .chain(self.working_dir.iter())
            .map(|base| base.join(&self.capture_subdir))
            .collect()
    }
}

/// Mount points found under `root`, up to two levels deep (`/media/<user>/<label>`).
fn discover_volumes(root: &Path) -> Vec<PathBuf> {
    let mut volumes = Vec::new();
    for first in sorted_subdirs(root) {
        if is_mount_point(&first, root) {
            volumes.push(first);
            continue;
        }
        volumes.extend(
            sorted_subdirs(&first)
                .into_iter()
                .filter(|second| is_mount_point(second, &first)),
        );
    }
    debug!(root = %root.display(), found = volumes.len(), "Scanned for external volumes");
    volumes
}

fn sorted_subdirs(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.path())
        .collect();
    dirs.sort();
    dirs
}

#[cfg(unix)]
fn is_mount_point(path: &Path, parent: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (fs::metadata(path), fs::metadata(parent)) {
        (Ok(child), Ok(parent)) => child.dev() != parent.dev(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn is_mount_point(_path: &Path, _parent: &Path) -> bool {
    true
}

/// Create `dir` if needed and prove it accepts writes.
pub fn probe_writable(dir: &Path) -> RigResult<()> {
    fs::create_dir_all(dir)?;
    let probe = dir.join(format!(".astro_rig_probe_{}", uuid::Uuid::new_v4().simple()));
    let written = fs::File::create(&probe).and_then(|mut file| {
        file.write_all(b"probe")?;
        file.sync_all()
    });
    let removed = fs::remove_file(&probe);
    written?;
    removed?;
    Ok(())
}

/// One directory of captures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureFolder {
    /// Directory name relative to the capture directory
    pub name: String,
    pub path: PathBuf,
    /// Image files directly inside the folder
    pub image_count: usize,
    pub modified: Option<DateTime<Utc>>,
}

/// One image file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureFile {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Chooses and caches the capture directory.
#[derive(Debug)]
pub struct StorageLocator {
    candidates: StorageCandidates,
    chosen: OnceCell<PathBuf>,
}

impl StorageLocator {
    /// Locator over explicit candidates; nothing is probed until first use.
    pub fn new(candidates: StorageCandidates) -> Self {
        Self {
            candidates,
            chosen: OnceCell::new(),
        }
    }

    /// Locator over the candidates discovered on this machine.
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(StorageCandidates::from_config(config))
    }

    pub fn candidates(&self) -> &StorageCandidates {
        &self.candidates
    }

    /// Run `op` against the locator on tokio's blocking pool.
    pub async fn blocking<T, F>(self: &Arc<Self>, op: F) -> RigResult<T>
    where
        F: FnOnce(&StorageLocator) -> RigResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let locator = Arc::clone(self);
        tokio::task::spawn_blocking(move || op(&locator))
            .await
            .map_err(|e| RigError::operation("storage", e))?
    }

    /// First writable candidate, probed once and then cached.
    pub fn get_capture_directory(&self) -> RigResult<PathBuf> {
        self.chosen
            .get_or_try_init(|| self.select_directory())
            .cloned()
    }

    fn select_directory(&self) -> RigResult<PathBuf> {
        let directories = self.candidates.directories();
        for dir in &directories {
            match probe_writable(dir) {
                Ok(()) => {
                    info!(path = %dir.display(), "Capture directory selected");
                    return Ok(dir.clone());
                }
                Err(e) => warn!(path = %dir.display(), error = %e, "Capture location not writable"),
            }
        }
        let tried: Vec<String> = directories.iter().map(|d| d.display().to_string()).collect();
        if tried.is_empty() {
            return Err(RigError::StorageUnavailable("no candidate locations".to_string()));
        }
        Err(RigError::StorageUnavailable(tried.join(", ")))
    }

    /// Fresh directory for a session: `<capture_dir>/<name>_<YYYYmmdd_HHMMSS>`.
    ///
    /// A numeric suffix is appended if that directory already exists.
    pub fn session_directory(&self, name: &str, started_at: DateTime<Utc>) -> RigResult<PathBuf> {
        let root = self.get_capture_directory()?;
        let base = format!("{}_{}", sanitize_name(name), started_at.format("%Y%m%d_%H%M%S"));

        let mut candidate = root.join(&base);
        let mut suffix = 1;
        while candidate.exists() {
            suffix += 1;
            candidate = root.join(format!("{}_{}", base, suffix));
        }
        fs::create_dir_all(&candidate)?;
        debug!(path = %candidate.display(), "Session directory created");
        Ok(candidate)
    }

    /// Path for a manual still in the capture directory root.
    pub fn still_path(&self, extension: &str) -> RigResult<PathBuf> {
        let root = self.get_capture_directory()?;
        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%3f");
        Ok(root.join(format!("still_{}.{}", stamp, extension)))
    }

    /// Session folders in the capture directory, newest first.
    pub fn list_capture_folders(&self) -> RigResult<Vec<CaptureFolder>> {
        let root = self.get_capture_directory()?;
        let mut folders: Vec<CaptureFolder> = sorted_subdirs(&root)
            .into_iter()
            .map(|path| CaptureFolder {
                name: file_name(&path),
                image_count: image_files(&path).len(),
                modified: modified(&path),
                path,
            })
            .collect();
        folders.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
        Ok(folders)
    }

    /// Images in `folder` (or the capture directory root), newest first.
    ///
    /// `folder` must be a single directory name; anything that could leave the
    /// capture directory is rejected.
    pub fn list_captures(&self, folder: Option<&str>) -> RigResult<Vec<CaptureFile>> {
        let root = self.get_capture_directory()?;
        let dir = match folder {
            None => root,
            Some(name) => {
                let mut components = Path::new(name).components();
                match (components.next(), components.next()) {
                    (Some(Component::Normal(part)), None) => root.join(part),
                    _ => {
                        return Err(RigError::InvalidParameter(format!(
                            "invalid capture folder '{}'",
                            name
                        )))
                    }
                }
            }
        };
        if !dir.is_dir() {
            return Err(RigError::InvalidParameter(format!(
                "capture folder '{}' does not exist",
                file_name(&dir)
            )));
        }

        let mut files: Vec<CaptureFile> = image_files(&dir)
            .into_iter()
            .map(|path| CaptureFile {
                name: file_name(&path),
                size_bytes: fs::metadata(&path).map(|m| m.len()).unwrap_or(0),
                modified: modified(&path),
                path,
            })
            .collect();
        files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
        Ok(files)
    }
}

fn image_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn modified(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Restrict a session name to characters that are safe in a directory name.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "session".to_string()
    } else {
        cleaned
    }
}
