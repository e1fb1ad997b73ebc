// Copyright 2021 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::Arc;

use fs::{ProjectFilesystem, RelativePath};
use hashing::Fingerprint;
use rules::BuildTarget;

pub mod clock;

pub mod recorder;

#[cfg(test)]
mod on_disk_tests;

pub use crate::clock::{Clock, FakeClock, SystemClock};
pub use crate::recorder::BuildInfoRecorder;

///
/// Metadata written under this key holds the rule key the artifact was built for.
///
pub const METADATA_KEY_FOR_RULE_KEY: &str = "RULE_KEY";

///
/// The rule key variant computed without dependency keys. Diagnostic only: it answers
/// "did this rule's own declaration change", and nothing consults it for cache decisions.
///
pub const METADATA_KEY_FOR_RULE_KEY_WITHOUT_DEPS: &str = "RULE_KEY_WITHOUT_DEPS";

///
/// The environment variable whose value is injected verbatim into every stored
/// artifact's provenance block, as `artifact_data`.
///
pub const CACHE_DATA_ENV_VAR: &str = "BUILD_CACHE_DATA";

// Provenance text entry written into every stored archive.
pub(crate) const PATH_TO_ARTIFACT_INFO: &str = "build-out/log/cache_artifact.txt";

const METADATA_BASE_DIR: &str = "build-out/meta";

///
/// The per-target directory holding one file per metadata key.
///
pub fn metadata_dir(target: &BuildTarget) -> Result<RelativePath, String> {
    let mut leaf = target.short_name().to_owned();
    if !target.flavors().is_empty() {
        let flavors: Vec<&str> = target.flavors().iter().map(String::as_str).collect();
        leaf.push('#');
        leaf.push_str(&flavors.join(","));
    }
    RelativePath::new(METADATA_BASE_DIR)?
        .join(target.base_path())?
        .join(leaf)
}

///
/// Reads the metadata a previous build of a target left on disk.
///
/// Earlier builds make no atomicity promises, so every read is best-effort: a missing,
/// partial, or undecodable value is `None`, and callers re-derive whatever they needed.
///
pub struct OnDiskBuildInfo {
    filesystem: Arc<ProjectFilesystem>,
    metadata_directory: RelativePath,
}

impl OnDiskBuildInfo {
    pub fn new(
        target: &BuildTarget,
        filesystem: Arc<ProjectFilesystem>,
    ) -> Result<OnDiskBuildInfo, String> {
        Ok(OnDiskBuildInfo {
            filesystem,
            metadata_directory: metadata_dir(target)?,
        })
    }

    pub fn get_value(&self, key: &str) -> Option<String> {
        let path = self.metadata_directory.join(key).ok()?;
        self.filesystem.read_to_string(&path).ok()
    }

    ///
    /// A metadata value written with `add_metadata_values`, decoded from its array form.
    ///
    pub fn get_values(&self, key: &str) -> Option<Vec<String>> {
        serde_json::from_str(&self.get_value(key)?).ok()
    }

    pub fn get_rule_key(&self) -> Option<Fingerprint> {
        Fingerprint::from_hex_string(&self.get_value(METADATA_KEY_FOR_RULE_KEY)?).ok()
    }

    pub fn get_rule_key_without_deps(&self) -> Option<Fingerprint> {
        Fingerprint::from_hex_string(&self.get_value(METADATA_KEY_FOR_RULE_KEY_WITHOUT_DEPS)?).ok()
    }
}
