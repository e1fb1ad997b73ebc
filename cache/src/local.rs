// Copyright 2021 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use rules::RuleKey;

use crate::{ArtifactCache, CacheResult};

///
/// A directory-backed artifact cache.
///
/// Archives live at `<root>/<first two hex chars>/<hex>.zip`. Stores write a uniquely
/// named temporary file in the destination directory and rename it into place, so a
/// partially written archive is never visible under its final name and concurrent stores
/// of the same key converge on one complete archive.
///
pub struct LocalArtifactCache {
    root: PathBuf,
    do_store: bool,
}

impl LocalArtifactCache {
    pub fn new(root: PathBuf, do_store: bool) -> LocalArtifactCache {
        LocalArtifactCache { root, do_store }
    }

    fn entry_path(&self, rule_key: &RuleKey) -> PathBuf {
        let hex = rule_key.to_hex();
        self.root.join(&hex[..2]).join(format!("{hex}.zip"))
    }
}

#[async_trait]
impl ArtifactCache for LocalArtifactCache {
    fn is_store_supported(&self) -> bool {
        self.do_store
    }

    async fn store(&self, rule_key: &RuleKey, archive: &Path) -> Result<(), String> {
        if !self.do_store {
            return Ok(());
        }

        let entry = self.entry_path(rule_key);
        let parent = entry
            .parent()
            .ok_or_else(|| format!("Cache entry {} has no parent", entry.display()))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("Failed to create cache directory {}: {e}", parent.display()))?;

        let temp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| format!("Failed to create temporary cache file for {rule_key}: {e}"))?;
        tokio::fs::copy(archive, temp.path())
            .await
            .map_err(|e| format!("Failed to write cache entry for {rule_key}: {e}"))?;
        temp.persist(&entry)
            .map_err(|e| format!("Failed to publish cache entry for {rule_key}: {e}"))?;
        Ok(())
    }

    async fn fetch(&self, rule_key: &RuleKey, destination: &Path) -> CacheResult {
        let entry = self.entry_path(rule_key);
        match tokio::fs::metadata(&entry).await {
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => return CacheResult::Miss,
            Err(e) => {
                return CacheResult::Error(format!(
                    "Failed to check the local cache for {rule_key}: {e}"
                ));
            }
            Ok(_) => (),
        }
        match tokio::fs::copy(&entry, destination).await {
            Ok(_) => CacheResult::Hit,
            Err(e) => CacheResult::Error(format!(
                "Failed to fetch {rule_key} from the local cache: {e}"
            )),
        }
    }

    async fn contains(&self, rule_key: &RuleKey) -> bool {
        tokio::fs::metadata(self.entry_path(rule_key)).await.is_ok()
    }
}
