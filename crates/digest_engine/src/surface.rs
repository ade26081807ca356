use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use engine_logging::{engine_error, engine_warn};
use tempfile::TempDir;

use crate::persist::{ensure_output_dir, AtomicFileWriter};
use crate::{FileTree, WriteError};

/// Where snapshots and the index land. Paths are relative and `/`-separated.
pub trait OutputSurface: Send + Sync {
    /// `Ok(None)` when nothing exists at `path`.
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>, WriteError>;

    /// Write one file so that readers see either the old or the new bytes.
    fn write(&self, path: &str, bytes: &[u8]) -> Result<(), WriteError>;

    /// Replace everything under `prefix` with `tree`. On error the previous
    /// contents under `prefix` are left in place.
    ///
    /// On success the displaced contents are handed back parked: dropping the
    /// handle discards them, [`ParkedTree::restore`] swaps them back in.
    fn replace_tree(
        &self,
        prefix: &str,
        tree: &FileTree,
    ) -> Result<Box<dyn ParkedTree + '_>, WriteError>;
}

/// Contents displaced by [`OutputSurface::replace_tree`].
pub trait ParkedTree: Send {
    /// Remove the new tree and put the displaced contents back.
    fn restore(self: Box<Self>) -> Result<(), WriteError>;
}

/// Accepts `a/b/c.html`; rejects empty segments, `.`/`..`, backslashes and absolute paths.
pub fn is_safe_path(path: &str) -> bool {
    !path.is_empty()
        && !path.contains('\\')
        && path
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}

fn checked(path: &str) -> Result<&str, WriteError> {
    if is_safe_path(path) {
        Ok(path)
    } else {
        Err(WriteError::InvalidPath(path.to_string()))
    }
}

/// In-process surface, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySurface {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    failing_prefixes: Mutex<Vec<String>>,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later write touching `prefix` fail with an I/O error.
    pub fn fail_writes_under(&self, prefix: impl Into<String>) {
        self.failing_prefixes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prefix.into());
    }

    pub fn files(&self) -> BTreeMap<String, Vec<u8>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    /// Paths stored under `prefix/`, sorted.
    pub fn paths_under(&self, prefix: &str) -> Vec<String> {
        let dir = format!("{prefix}/");
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|p| p.starts_with(&dir))
            .cloned()
            .collect()
    }

    /// Replace every file under `prefix/` with `files`, returning the old ones.
    fn swap_under(
        &self,
        prefix: &str,
        files: BTreeMap<String, Vec<u8>>,
    ) -> BTreeMap<String, Vec<u8>> {
        let dir = format!("{prefix}/");
        let mut stored = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        let (previous, kept): (BTreeMap<_, _>, BTreeMap<_, _>) = std::mem::take(&mut *stored)
            .into_iter()
            .partition(|(path, _)| path.starts_with(&dir));
        *stored = kept;
        stored.extend(files);
        previous
    }

    fn check_injected(&self, path: &str) -> Result<(), WriteError> {
        let failing = self
            .failing_prefixes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match failing.iter().find(|p| path.starts_with(p.as_str())) {
            Some(prefix) => Err(WriteError::io(
                path,
                io::Error::other(format!("writes under {prefix} are failing")),
            )),
            None => Ok(()),
        }
    }
}

impl OutputSurface for MemorySurface {
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>, WriteError> {
        Ok(self.get(checked(path)?))
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<(), WriteError> {
        let path = checked(path)?;
        self.check_injected(path)?;
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn replace_tree(
        &self,
        prefix: &str,
        tree: &FileTree,
    ) -> Result<Box<dyn ParkedTree + '_>, WriteError> {
        let prefix = checked(prefix)?;
        let mut staged = BTreeMap::new();
        for (rel, bytes) in tree.iter() {
            let full = format!("{prefix}/{}", checked(rel)?);
            self.check_injected(&full)?;
            staged.insert(full, bytes.to_vec());
        }

        let previous = self.swap_under(prefix, staged);
        Ok(Box::new(MemoryParked {
            surface: self,
            prefix: prefix.to_string(),
            previous,
        }))
    }
}

struct MemoryParked<'a> {
    surface: &'a MemorySurface,
    prefix: String,
    previous: BTreeMap<String, Vec<u8>>,
}

impl ParkedTree for MemoryParked<'_> {
    fn restore(self: Box<Self>) -> Result<(), WriteError> {
        let MemoryParked {
            surface,
            prefix,
            previous,
        } = *self;
        surface.swap_under(&prefix, previous);
        Ok(())
    }
}

/// Surface rooted at a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct DiskSurface {
    root: PathBuf,
}

impl DiskSurface {
    /// Creates `root` if missing and checks that it is writable.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, WriteError> {
        let root = root.into();
        ensure_output_dir(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, WriteError> {
        let path = checked(path)?;
        Ok(path.split('/').fold(self.root.clone(), |acc, seg| acc.join(seg)))
    }
}

impl OutputSurface for DiskSurface {
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>, WriteError> {
        let full = self.resolve(path)?;
        match fs::read(&full) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(WriteError::io(path, err)),
        }
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<(), WriteError> {
        let full = self.resolve(path)?;
        let name = full.file_name().and_then(|n| n.to_str());
        let (Some(dir), Some(name)) = (full.parent(), name) else {
            return Err(WriteError::InvalidPath(path.to_string()));
        };
        AtomicFileWriter::new(dir).write(name, bytes)?;
        Ok(())
    }

    /// Builds the new tree in a sibling staging directory, then swaps it in
    /// with renames. A failure before the swap leaves the old tree untouched.
    fn replace_tree(
        &self,
        prefix: &str,
        tree: &FileTree,
    ) -> Result<Box<dyn ParkedTree + '_>, WriteError> {
        let target = self.resolve(prefix)?;
        let Some(parent) = target.parent() else {
            return Err(WriteError::InvalidPath(prefix.to_string()));
        };
        ensure_output_dir(parent)?;

        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(parent)
            .map_err(|err| WriteError::io(prefix, err))?;
        // tempdirs are created owner-only; snapshots are meant to be served.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(staging.path(), fs::Permissions::from_mode(0o755))
                .map_err(|err| WriteError::io(prefix, err))?;
        }
        for (rel, bytes) in tree.iter() {
            let rel = checked(rel)?;
            let file = rel
                .split('/')
                .fold(staging.path().to_path_buf(), |acc, seg| acc.join(seg));
            if let Some(dir) = file.parent() {
                fs::create_dir_all(dir).map_err(|err| WriteError::io(rel, err))?;
            }
            fs::write(&file, bytes).map_err(|err| WriteError::io(rel, err))?;
        }

        // The displaced tree lives in `retired` until the returned handle drops.
        let retired = tempfile::Builder::new()
            .prefix(".retired-")
            .tempdir_in(parent)
            .map_err(|err| WriteError::io(prefix, err))?;
        let parked = retired.path().join(PARKED);
        let had_previous = target.exists();
        if had_previous {
            fs::rename(&target, &parked).map_err(|err| WriteError::io(prefix, err))?;
        }
        if let Err(err) = fs::rename(staging.path(), &target) {
            if had_previous {
                if let Err(restore) = fs::rename(&parked, &target) {
                    engine_error!("failed to restore {}: {}", prefix, restore);
                    keep_retired(prefix, retired);
                }
            }
            return Err(WriteError::io(prefix, err));
        }
        Ok(Box::new(DiskParked {
            prefix: prefix.to_string(),
            target,
            retired,
            had_previous,
        }))
    }
}

const PARKED: &str = "tree";

/// Leave a retired directory on disk so the only copy of a tree survives.
fn keep_retired(prefix: &str, retired: TempDir) {
    let path = retired.keep();
    engine_warn!("previous contents of {} left at {}", prefix, path.display());
}

struct DiskParked {
    prefix: String,
    target: PathBuf,
    retired: TempDir,
    had_previous: bool,
}

impl ParkedTree for DiskParked {
    fn restore(self: Box<Self>) -> Result<(), WriteError> {
        let DiskParked {
            prefix,
            target,
            retired,
            had_previous,
        } = *self;
        let discarded = retired.path().join("discarded");
        if let Err(err) = fs::rename(&target, &discarded) {
            keep_retired(&prefix, retired);
            return Err(WriteError::io(prefix, err));
        }
        if had_previous {
            if let Err(err) = fs::rename(retired.path().join(PARKED), &target) {
                engine_error!("failed to restore {}: {}", prefix, err);
                keep_retired(&prefix, retired);
                return Err(WriteError::io(prefix, err));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsafe_paths_are_rejected() {
        for bad in ["", "/abs", "a//b", "../x", "a/./b", "a\\b", "a/"] {
            assert!(!is_safe_path(bad), "{bad:?} accepted");
        }
        assert!(is_safe_path("tech-news/2026-2-14-12/static/style.css"));
    }

    #[test]
    fn memory_replace_drops_stale_files() {
        let surface = MemorySurface::new();
        let mut first = FileTree::new();
        first.insert("index.html", "one");
        first.insert("old.txt", "stale");
        drop(surface.replace_tree("s/k", &first).unwrap());

        let mut second = FileTree::new();
        second.insert("index.html", "two");
        drop(surface.replace_tree("s/k", &second).unwrap());

        assert_eq!(surface.paths_under("s/k"), vec!["s/k/index.html".to_string()]);
        assert_eq!(surface.get("s/k/index.html").unwrap(), b"two");
    }

    fn tree(files: &[(&str, &str)]) -> FileTree {
        let mut tree = FileTree::new();
        for (path, body) in files {
            tree.insert(*path, *body);
        }
        tree
    }

    #[test]
    fn memory_restore_brings_back_displaced_files() {
        let surface = MemorySurface::new();
        surface.write("s/other.txt", b"untouched").unwrap();
        drop(surface.replace_tree("s/k", &tree(&[("a.txt", "old"), ("b.txt", "old")])).unwrap());

        let parked = surface.replace_tree("s/k", &tree(&[("a.txt", "new")])).unwrap();
        parked.restore().unwrap();

        assert_eq!(
            surface.paths_under("s/k"),
            vec!["s/k/a.txt".to_string(), "s/k/b.txt".to_string()]
        );
        assert_eq!(surface.get("s/k/a.txt").unwrap(), b"old");
        assert_eq!(surface.get("s/other.txt").unwrap(), b"untouched");
    }

    #[test]
    fn disk_restore_swaps_previous_tree_back() {
        let temp = tempfile::TempDir::new().unwrap();
        let surface = DiskSurface::new(temp.path()).unwrap();
        drop(surface.replace_tree("s/k", &tree(&[("index.html", "old")])).unwrap());

        let parked = surface.replace_tree("s/k", &tree(&[("new.html", "new")])).unwrap();
        parked.restore().unwrap();

        let dir = temp.path().join("s/k");
        assert_eq!(fs::read_to_string(dir.join("index.html")).unwrap(), "old");
        assert!(!dir.join("new.html").exists());
        let siblings: Vec<_> = fs::read_dir(temp.path().join("s"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(siblings, vec!["k".to_string()]);
    }

    #[test]
    fn disk_restore_of_first_tree_removes_it() {
        let temp = tempfile::TempDir::new().unwrap();
        let surface = DiskSurface::new(temp.path()).unwrap();

        let parked = surface.replace_tree("s/k", &tree(&[("index.html", "new")])).unwrap();
        parked.restore().unwrap();

        assert!(!temp.path().join("s/k").exists());
    }
}
