// Copyright 2021 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;
use std::path::Path;

use async_trait::async_trait;

use rules::RuleKey;

pub mod local;
#[cfg(test)]
mod local_tests;

pub use crate::local::LocalArtifactCache;

///
/// The outcome of a cache fetch.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CacheResult {
    Hit,
    Miss,
    Error(String),
}

impl CacheResult {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheResult::Hit)
    }
}

impl fmt::Display for CacheResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheResult::Hit => write!(f, "HIT"),
            CacheResult::Miss => write!(f, "MISS"),
            CacheResult::Error(message) => write!(f, "ERROR: {message}"),
        }
    }
}

///
/// A pluggable artifact store keyed by rule key.
///
/// Caching is a performance optimization, never a correctness requirement: callers treat
/// `store` failures as diagnostics, and a backend which cannot store at all advertises
/// that via `is_store_supported` so callers can skip the packaging work entirely.
///
/// Backends must tolerate concurrent stores of different keys; concurrent stores of the
/// same key may race, since identical keys imply byte-equivalent archives.
///
#[async_trait]
pub trait ArtifactCache: Send + Sync {
    fn is_store_supported(&self) -> bool;

    async fn store(&self, rule_key: &RuleKey, archive: &Path) -> Result<(), String>;

    async fn fetch(&self, rule_key: &RuleKey, destination: &Path) -> CacheResult;

    ///
    /// An advisory pre-check. Backends without a cheap existence check answer `false`;
    /// callers must fall back to `fetch`.
    ///
    async fn contains(&self, _rule_key: &RuleKey) -> bool {
        false
    }
}
