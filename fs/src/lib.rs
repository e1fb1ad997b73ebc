// Copyright 2021 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::{self, Write};
use std::ops::Deref;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

///
/// A path which is relative to the project root, and guaranteed not to escape it.
///
/// All recorded build outputs and metadata locations are RelativePaths: constructing one
/// from an absolute path is an error, which is how the core enforces that no component
/// ever issues absolute-path I/O.
///
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "PathBuf", into = "PathBuf")]
pub struct RelativePath(PathBuf);

impl RelativePath {
    pub fn empty() -> RelativePath {
        RelativePath(PathBuf::new())
    }

    pub fn new<P: AsRef<Path>>(path: P) -> Result<RelativePath, String> {
        let mut relative_path = PathBuf::new();
        let candidate = path.as_ref();
        for component in candidate.components() {
            match component {
                Component::Prefix(_) => {
                    return Err(format!("Windows paths are not allowed: {candidate:?}"));
                }
                Component::RootDir => {
                    return Err(format!("Absolute paths are not allowed: {candidate:?}"));
                }
                Component::CurDir => (),
                Component::ParentDir => {
                    if !relative_path.pop() {
                        return Err(format!(
                            "Relative paths that escape the root are not allowed: {candidate:?}"
                        ));
                    }
                }
                Component::Normal(path) => relative_path.push(path),
            }
        }
        Ok(RelativePath(relative_path))
    }

    pub fn to_str(&self) -> Option<&str> {
        self.0.to_str()
    }

    pub fn join(&self, other: impl AsRef<Path>) -> Result<RelativePath, String> {
        RelativePath::new(self.0.join(other))
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl Deref for RelativePath {
    type Target = PathBuf;

    fn deref(&self) -> &PathBuf {
        &self.0
    }
}

impl AsRef<Path> for RelativePath {
    fn as_ref(&self) -> &Path {
        self.0.as_path()
    }
}

impl From<RelativePath> for PathBuf {
    fn from(p: RelativePath) -> Self {
        p.0
    }
}

impl TryFrom<PathBuf> for RelativePath {
    type Error = String;

    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        RelativePath::new(path)
    }
}

///
/// Filesystem operations rooted at a project directory.
///
/// Every operation takes a RelativePath; resolution against the root happens in exactly
/// one place. This is the only type in the workspace that touches the disk on the build's
/// behalf.
///
#[derive(Clone, Debug)]
pub struct ProjectFilesystem {
    root: PathBuf,
}

impl ProjectFilesystem {
    pub fn new(root: PathBuf) -> ProjectFilesystem {
        ProjectFilesystem { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, path: &RelativePath) -> PathBuf {
        self.root.join(path)
    }

    pub fn exists(&self, path: &RelativePath) -> bool {
        self.resolve(path).exists()
    }

    pub fn is_file(&self, path: &RelativePath) -> bool {
        self.resolve(path).is_file()
    }

    pub fn file_size(&self, path: &RelativePath) -> Result<u64, String> {
        std::fs::metadata(self.resolve(path))
            .map(|metadata| metadata.len())
            .map_err(|e| format!("Failed to stat {path}: {e}"))
    }

    pub fn mkdirs(&self, path: &RelativePath) -> Result<(), String> {
        std::fs::create_dir_all(self.resolve(path))
            .map_err(|e| format!("Failed to create directory {path}: {e}"))
    }

    ///
    /// Removes the directory and its contents. Removing a directory which does not exist
    /// is not an error.
    ///
    pub fn rmdir_recursive(&self, path: &RelativePath) -> Result<(), String> {
        match std::fs::remove_dir_all(self.resolve(path)) {
            Ok(()) => Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(format!("Failed to remove directory {path}: {e}")),
        }
    }

    pub fn write_contents_to_path(
        &self,
        contents: &str,
        path: &RelativePath,
    ) -> Result<(), String> {
        std::fs::write(self.resolve(path), contents)
            .map_err(|e| format!("Failed to write {path}: {e}"))
    }

    pub fn read_to_string(&self, path: &RelativePath) -> Result<String, String> {
        std::fs::read_to_string(self.resolve(path))
            .map_err(|e| format!("Failed to read {path}: {e}"))
    }

    pub fn open_file(&self, path: &RelativePath) -> Result<std::fs::File, String> {
        std::fs::File::open(self.resolve(path)).map_err(|e| format!("Failed to open {path}: {e}"))
    }

    ///
    /// Walks the file tree under the given path, returning every directory and file in it
    /// (including the path itself) in sorted path order. A path naming a file returns just
    /// that file.
    ///
    /// The sort is what makes consumers (output hashing, archive packaging) independent of
    /// filesystem iteration order.
    ///
    pub fn walk_relative_file_tree(
        &self,
        path: &RelativePath,
    ) -> Result<Vec<RelativePath>, String> {
        let abs = self.resolve(path);
        if abs.is_file() {
            return Ok(vec![path.clone()]);
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&abs) {
            let entry = entry.map_err(|e| format!("Failed to walk {path}: {e}"))?;
            let relative_to_root = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|e| format!("Walked entry escaped the project root: {e}"))?;
            entries.push(RelativePath::new(relative_to_root)?);
        }
        entries.sort();
        Ok(entries)
    }

    ///
    /// Creates a zip of the given project-relative paths at `out_file`, with any
    /// `extra_entries` appended as literal text files.
    ///
    /// The archive is byte-deterministic: entries are written in sorted path order with a
    /// fixed timestamp, so identical inputs produce identical archives.
    ///
    pub fn create_zip(
        &self,
        paths: &BTreeSet<RelativePath>,
        out_file: &Path,
        extra_entries: &BTreeMap<RelativePath, String>,
    ) -> Result<(), String> {
        let out = std::fs::File::create(out_file)
            .map_err(|e| format!("Failed to create archive at {}: {e}", out_file.display()))?;
        let mut zip = ZipWriter::new(out);
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default());

        for path in paths {
            let name = zip_entry_name(path)?;
            let abs = self.resolve(path);
            let metadata = std::fs::metadata(&abs)
                .map_err(|e| format!("Failed to stat {path} while archiving: {e}"))?;
            if metadata.is_dir() {
                zip.add_directory(format!("{name}/"), options)
                    .map_err(|e| format!("Failed to add directory {path} to archive: {e}"))?;
            } else {
                zip.start_file(name, options)
                    .map_err(|e| format!("Failed to add {path} to archive: {e}"))?;
                let mut file = self.open_file(path)?;
                io::copy(&mut file, &mut zip)
                    .map_err(|e| format!("Failed to archive {path}: {e}"))?;
            }
        }

        for (path, contents) in extra_entries {
            let name = zip_entry_name(path)?;
            zip.start_file(name, options)
                .map_err(|e| format!("Failed to add {path} to archive: {e}"))?;
            zip.write_all(contents.as_bytes())
                .map_err(|e| format!("Failed to archive {path}: {e}"))?;
        }

        zip.finish()
            .map_err(|e| format!("Failed to finish archive at {}: {e}", out_file.display()))?;
        Ok(())
    }
}

///
/// Memoizes content fingerprints of project files for the duration of one build.
///
/// Rule-key computation hashes every declared input file; a file referenced by many rules
/// is read once. The cache assumes files do not change during a build, which is the same
/// assumption the rest of the build makes.
///
pub struct FileHashCache {
    filesystem: ProjectFilesystem,
    memo: parking_lot::Mutex<std::collections::HashMap<RelativePath, hashing::Fingerprint>>,
}

impl FileHashCache {
    pub fn new(filesystem: ProjectFilesystem) -> FileHashCache {
        FileHashCache {
            filesystem,
            memo: parking_lot::Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn get(&self, path: &RelativePath) -> Result<hashing::Fingerprint, String> {
        if let Some(fingerprint) = self.memo.lock().get(path) {
            return Ok(*fingerprint);
        }
        let mut file = self.filesystem.open_file(path)?;
        let digest = hashing::sync_copy_and_hash(&mut file, &mut io::sink())
            .map_err(|e| format!("Failed to hash {path}: {e}"))?;
        self.memo.lock().insert(path.clone(), digest.hash);
        Ok(digest.hash)
    }
}

// Zip entry names always use forward slashes, regardless of host separator.
fn zip_entry_name(path: &RelativePath) -> Result<String, String> {
    let mut name = String::new();
    for component in path.components() {
        if !name.is_empty() {
            name.push('/');
        }
        name.push_str(
            component
                .as_os_str()
                .to_str()
                .ok_or_else(|| format!("Path is not valid unicode: {path:?}"))?,
        );
    }
    Ok(name)
}
