// Copyright 2021 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use build_events::{BuildEvent, CacheOperation, EventBus};
use cache::{ArtifactCache, CacheResult};
use fs::{ProjectFilesystem, RelativePath};
use hashing::{Fingerprint, WriterHasher};
use rules::{BuildId, BuildTarget, RecorderHandle, RuleKey, RuleKeyPair};

use crate::clock::Clock;

///
/// Records the paths and metadata belonging to one in-progress build of one target.
///
/// The recorded data is packaged into an artifact stored in the cache, and the metadata
/// is written to disk so a later build can read it back through `OnDiskBuildInfo`. One
/// recorder exists per (target, build id) and is owned by the single builder of that
/// target, so it needs no locking.
///
pub struct BuildInfoRecorder {
    build_target: BuildTarget,
    path_to_metadata_directory: RelativePath,
    filesystem: Arc<ProjectFilesystem>,
    clock: Arc<dyn Clock>,
    build_id: BuildId,
    artifact_extra_data: BTreeMap<String, String>,
    metadata_to_write: BTreeMap<String, String>,
    rule_key: RuleKey,
    // Every member is a path relative to the project root.
    paths_to_outputs: BTreeSet<RelativePath>,
}

impl BuildInfoRecorder {
    pub fn new(
        build_target: BuildTarget,
        filesystem: Arc<ProjectFilesystem>,
        clock: Arc<dyn Clock>,
        build_id: BuildId,
        environment: &BTreeMap<String, String>,
        rule_keys: RuleKeyPair,
    ) -> Result<BuildInfoRecorder, String> {
        let path_to_metadata_directory = crate::metadata_dir(&build_target)?;

        let mut artifact_extra_data = BTreeMap::new();
        artifact_extra_data.insert(
            "artifact_data".to_owned(),
            environment
                .get(crate::CACHE_DATA_ENV_VAR)
                .cloned()
                .unwrap_or_else(|| "null".to_owned()),
        );

        let mut metadata_to_write = BTreeMap::new();
        metadata_to_write.insert(
            crate::METADATA_KEY_FOR_RULE_KEY.to_owned(),
            rule_keys.total.to_hex(),
        );
        metadata_to_write.insert(
            crate::METADATA_KEY_FOR_RULE_KEY_WITHOUT_DEPS.to_owned(),
            rule_keys.without_deps.to_hex(),
        );

        Ok(BuildInfoRecorder {
            build_target,
            path_to_metadata_directory,
            filesystem,
            clock,
            build_id,
            artifact_extra_data,
            metadata_to_write,
            rule_key: rule_keys.total,
            paths_to_outputs: BTreeSet::new(),
        })
    }

    ///
    /// Records an output path, relative to the project root. Recording the same path
    /// twice is a no-op; recording an absolute path is a configuration error.
    ///
    pub fn record_artifact(&mut self, path_to_artifact: &Path) -> Result<(), String> {
        if path_to_artifact.is_absolute() {
            return Err(format!(
                "Error! '{}' is trying to record artifacts with absolute path: '{}'.",
                self.build_target,
                path_to_artifact.display()
            ));
        }
        self.paths_to_outputs
            .insert(RelativePath::new(path_to_artifact)?);
        Ok(())
    }

    ///
    /// This key/value pair is held in memory until `write_metadata_to_disk`. The last
    /// write for a key wins.
    ///
    pub fn add_metadata(&mut self, key: &str, value: &str) {
        self.metadata_to_write
            .insert(key.to_owned(), value.to_owned());
    }

    ///
    /// Stores a sequence of values under one key, encoded as a JSON array string.
    ///
    pub fn add_metadata_values(
        &mut self,
        key: &str,
        values: impl IntoIterator<Item = String>,
    ) -> Result<(), String> {
        let values: Vec<String> = values.into_iter().collect();
        let encoded = serde_json::to_string(&values)
            .map_err(|e| format!("Failed to encode metadata {key} for {}: {e}", self.build_target))?;
        self.add_metadata(key, &encoded);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn get_metadata_for(&self, key: &str) -> Option<&str> {
        self.metadata_to_write.get(key).map(String::as_str)
    }

    ///
    /// Writes the metadata currently held in memory to this target's metadata directory,
    /// one file per key. Not transactional: an interrupted write leaves partial files,
    /// which later readers tolerate by re-deriving.
    ///
    pub fn write_metadata_to_disk(&self, clear_existing_metadata: bool) -> Result<(), String> {
        if clear_existing_metadata {
            self.filesystem
                .rmdir_recursive(&self.path_to_metadata_directory)?;
        }
        self.filesystem.mkdirs(&self.path_to_metadata_directory)?;

        for (key, value) in &self.metadata_to_write {
            self.filesystem
                .write_contents_to_path(value, &self.path_to_metadata_directory.join(key)?)?;
        }
        Ok(())
    }

    ///
    /// The full set of paths belonging to this build: each metadata file, plus everything
    /// transitively reachable from each recorded output path. Sorted.
    ///
    fn get_recorded_paths(&self) -> Result<BTreeSet<RelativePath>, String> {
        let mut paths = BTreeSet::new();

        for key in self.metadata_to_write.keys() {
            paths.insert(self.path_to_metadata_directory.join(key)?);
        }

        for output in &self.paths_to_outputs {
            paths.extend(self.filesystem.walk_relative_file_tree(output)?);
        }

        Ok(paths)
    }

    ///
    /// The combined size and content hash of every recorded file. Directories contribute
    /// to the path set but not to the bytes; each file feeds its path string and then its
    /// content. Deterministic for a given recorded set and file contents.
    ///
    pub fn get_output_size_and_hash(&self) -> Result<(u64, Fingerprint), String> {
        let mut size: u64 = 0;
        let mut hasher = WriterHasher::new(io::sink());
        for path in self.get_recorded_paths()? {
            if self.filesystem.is_file(&path) {
                size += self.filesystem.file_size(&path)?;
                hasher
                    .write_all(path.to_string().as_bytes())
                    .map_err(|e| format!("Failed to hash {path}: {e}"))?;
                let mut file = self.filesystem.open_file(&path)?;
                io::copy(&mut file, &mut hasher)
                    .map_err(|e| format!("Failed to hash {path}: {e}"))?;
            }
        }
        Ok((size, hasher.finish().0.hash))
    }

    fn format_additional_artifact_info(entries: &BTreeMap<String, String>) -> String {
        let mut builder = String::new();
        for (key, value) in entries {
            builder.push_str(key);
            builder.push('=');
            builder.push_str(value);
            builder.push('\n');
        }
        builder
    }

    ///
    /// Zips the metadata and recorded outputs together with a provenance block and stores
    /// the archive in the artifact cache.
    ///
    /// Failure here never fails the build: the artifact is simply not cached. When the
    /// backend does not support storing, this returns before enumerating or zipping
    /// anything.
    ///
    pub async fn perform_upload_to_artifact_cache(
        &self,
        artifact_cache: &dyn ArtifactCache,
        event_bus: &EventBus,
    ) {
        // Although store() would be a noop, building up the zip is wasted I/O.
        if !artifact_cache.is_store_supported() {
            return;
        }

        event_bus.post(BuildEvent::ArtifactCacheStarted {
            operation: CacheOperation::Compress,
            rule_key: self.rule_key.to_hex(),
        });

        let mut info = BTreeMap::new();
        info.insert("build_id".to_owned(), self.build_id.to_string());
        info.insert(
            "timestamp".to_owned(),
            (self.clock.now_millis() / 1000).to_string(),
        );
        info.extend(self.artifact_extra_data.clone());
        let additional_artifact_info = Self::format_additional_artifact_info(&info);

        let archive = self.build_archive(&additional_artifact_info);

        event_bus.post(BuildEvent::ArtifactCacheFinished {
            operation: CacheOperation::Compress,
            rule_key: self.rule_key.to_hex(),
        });

        let archive = match archive {
            Ok(archive) => archive,
            Err((error, paths_to_include)) => {
                let paths: Vec<String> =
                    paths_to_include.iter().map(|path| path.to_string()).collect();
                event_bus.console(
                    log::Level::Info,
                    format!(
                        "Failed to create zip for {} containing:\n{}",
                        self.build_target,
                        paths.join("\n")
                    ),
                );
                log::warn!("Failed to package artifact for {}: {error}", self.build_target);
                return;
            }
        };

        event_bus.post(BuildEvent::ArtifactCacheStarted {
            operation: CacheOperation::Store,
            rule_key: self.rule_key.to_hex(),
        });
        if let Err(error) = artifact_cache.store(&self.rule_key, archive.path()).await {
            log::warn!(
                "Failed to store artifact for {}: {error}",
                self.build_target
            );
        }
        event_bus.post(BuildEvent::ArtifactCacheFinished {
            operation: CacheOperation::Store,
            rule_key: self.rule_key.to_hex(),
        });
        // The temporary archive is removed when it drops, on every path out of here.
    }

    fn build_archive(
        &self,
        additional_artifact_info: &str,
    ) -> Result<tempfile::NamedTempFile, (String, BTreeSet<RelativePath>)> {
        let paths_to_include = match self.get_recorded_paths() {
            Ok(paths) => paths,
            Err(error) => return Err((error, BTreeSet::new())),
        };

        let archive = match tempfile::Builder::new()
            .prefix(&format!("artifact_{}_", sanitize(self.build_target.short_name())))
            .suffix(".zip")
            .tempfile()
        {
            Ok(archive) => archive,
            Err(error) => {
                return Err((
                    format!("Failed to create temporary archive: {error}"),
                    paths_to_include,
                ));
            }
        };

        let mut extra_entries = BTreeMap::new();
        match RelativePath::new(crate::PATH_TO_ARTIFACT_INFO) {
            Ok(info_path) => {
                extra_entries.insert(info_path, additional_artifact_info.to_owned());
            }
            Err(error) => return Err((error, paths_to_include)),
        }

        match self
            .filesystem
            .create_zip(&paths_to_include, archive.path(), &extra_entries)
        {
            Ok(()) => Ok(archive),
            Err(error) => Err((error, paths_to_include)),
        }
    }

    ///
    /// Fetches the artifact stored under this build's rule key into `output_file`. The
    /// caller unpacks and validates the result.
    ///
    pub async fn fetch_artifact_for_buildable(
        &self,
        output_file: &Path,
        artifact_cache: &dyn ArtifactCache,
    ) -> CacheResult {
        artifact_cache.fetch(&self.rule_key, output_file).await
    }

    pub fn rule_key(&self) -> &RuleKey {
        &self.rule_key
    }
}

impl RecorderHandle for BuildInfoRecorder {
    fn record_artifact(&mut self, path: &Path) -> Result<(), String> {
        BuildInfoRecorder::record_artifact(self, path)
    }

    fn add_metadata(&mut self, key: &str, value: &str) {
        BuildInfoRecorder::add_metadata(self, key, value);
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
