//! Module discovery: enumerates candidate images under a root directory.
//!
//! Files directly in the root come first, followed by the files of each
//! immediate subdirectory. Entries are sorted by name within a directory.
//! Discovery never fails: unreadable directories and files are logged and
//! skipped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Filesystem collaborator used by discovery.
pub trait FileSystem: Send + Sync {
    /// Regular files in `dir` with the given extension, and their sizes.
    fn list_files(&self, dir: &Path, extension: Option<&str>) -> io::Result<Vec<(PathBuf, u64)>>;

    /// Immediate subdirectories of `dir`.
    fn list_dirs(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    fn file_exists(&self, path: &Path) -> bool;
}

/// [`FileSystem`] over `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn list_files(&self, dir: &Path, extension: Option<&str>) -> io::Result<Vec<(PathBuf, u64)>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };
            let path = entry.path();
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping entry of unknown type");
                    continue;
                }
            };
            if !file_type.is_file() || !matches_extension(&path, extension) {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            files.push((path, size));
        }
        Ok(files)
    }

    fn list_dirs(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(dir)?.flatten() {
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                dirs.push(entry.path());
            }
        }
        Ok(dirs)
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

fn matches_extension(path: &Path, extension: Option<&str>) -> bool {
    match extension {
        None => true,
        Some(ext) => path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(ext)),
    }
}

/// One discovered candidate image.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub size: u64,
    pub bytes: Vec<u8>,
}

/// Enumerates candidate images under `root`, one directory level deep.
pub fn discover(fs: &dyn FileSystem, root: &Path, extension: Option<&str>) -> Vec<DiscoveredFile> {
    if !fs.file_exists(root) {
        debug!(root = %root.display(), "Plugin root does not exist");
        return Vec::new();
    }

    let mut found = Vec::new();
    collect_dir(fs, root, extension, &mut found);

    match fs.list_dirs(root) {
        Ok(mut dirs) => {
            dirs.sort();
            for dir in dirs {
                collect_dir(fs, &dir, extension, &mut found);
            }
        }
        Err(e) => warn!(root = %root.display(), error = %e, "Cannot list plugin subdirectories"),
    }

    debug!(root = %root.display(), count = found.len(), "Discovery finished");
    found
}

fn collect_dir(
    fs: &dyn FileSystem,
    dir: &Path,
    extension: Option<&str>,
    found: &mut Vec<DiscoveredFile>,
) {
    let mut files = match fs.list_files(dir, extension) {
        Ok(files) => files,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cannot open plugin directory");
            return;
        }
    };
    files.sort_by(|a, b| a.0.cmp(&b.0));

    for (path, size) in files {
        match fs.read_file(&path) {
            Ok(bytes) => found.push(DiscoveredFile { path, size, bytes }),
            Err(e) => warn!(path = %path.display(), error = %e, "Cannot read plugin file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path, contents: &[u8]) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let found = discover(&LocalFileSystem, &dir.path().join("nope"), Some("nro"));
        assert!(found.is_empty());
    }

    #[test]
    fn test_order_and_depth() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("b.nro"), b"b");
        touch(&root.join("a.nro"), b"a");
        touch(&root.join("readme.txt"), b"x");
        touch(&root.join("zeta/c.nro"), b"c");
        touch(&root.join("alpha/d.NRO"), b"d");
        touch(&root.join("alpha/deep/e.nro"), b"e");

        let found = discover(&LocalFileSystem, root, Some("nro"));
        let names: Vec<_> = found
            .iter()
            .map(|f| f.path.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.nro", "b.nro", "d.NRO", "c.nro"]);
        assert_eq!(found[0].bytes, b"a");
        assert_eq!(found[0].size, 1);
    }

    #[test]
    fn test_no_filter_takes_everything() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("one.bin"), b"1");
        touch(&dir.path().join("two"), b"2");
        assert_eq!(discover(&LocalFileSystem, dir.path(), None).len(), 2);
    }
}
