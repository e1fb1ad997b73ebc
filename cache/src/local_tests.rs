// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use tempfile::TempDir;
use testutil::make_file;

use rules::{RuleKey, RuleKeyBuilder};

use crate::{ArtifactCache, CacheResult, LocalArtifactCache};

fn test_key(seed: &str) -> RuleKey {
    let mut builder = RuleKeyBuilder::new();
    builder.set("test", seed);
    builder.build().unwrap()
}

fn setup(do_store: bool) -> (LocalArtifactCache, TempDir) {
    let dir = TempDir::new().unwrap();
    let cache = LocalArtifactCache::new(dir.path().join("cache"), do_store);
    (cache, dir)
}

#[tokio::test]
async fn store_then_fetch_round_trips() {
    let (cache, dir) = setup(true);
    let key = test_key("roundtrip");

    let archive = dir.path().join("artifact.zip");
    make_file(&archive, b"archive bytes", 0o600);
    cache.store(&key, &archive).await.unwrap();

    assert!(cache.contains(&key).await);

    let destination = dir.path().join("fetched.zip");
    assert_eq!(CacheResult::Hit, cache.fetch(&key, &destination).await);
    assert_eq!(
        testutil::file::contents(&destination),
        &b"archive bytes"[..]
    );
}

#[tokio::test]
async fn fetch_misses_for_an_unknown_key() {
    let (cache, dir) = setup(true);
    let destination = dir.path().join("fetched.zip");
    assert_eq!(
        CacheResult::Miss,
        cache.fetch(&test_key("unknown"), &destination).await
    );
    assert!(!cache.contains(&test_key("unknown")).await);
}

#[tokio::test]
async fn fetch_reports_errors_distinctly_from_misses() {
    let (cache, dir) = setup(true);
    let key = test_key("error");

    let archive = dir.path().join("artifact.zip");
    make_file(&archive, b"archive bytes", 0o600);
    cache.store(&key, &archive).await.unwrap();

    let destination = dir.path().join("no/such/dir/fetched.zip");
    match cache.fetch(&key, &destination).await {
        CacheResult::Error(_) => (),
        other => panic!("Want an error, got {other:?}"),
    }
}

#[tokio::test]
async fn store_is_a_noop_when_unsupported() {
    let (cache, dir) = setup(false);
    let key = test_key("unsupported");

    let archive = dir.path().join("artifact.zip");
    make_file(&archive, b"archive bytes", 0o600);

    assert!(!cache.is_store_supported());
    cache.store(&key, &archive).await.unwrap();
    assert!(!cache.contains(&key).await);
}

#[tokio::test]
async fn entries_are_sharded_by_key_prefix() {
    let (cache, dir) = setup(true);
    let key = test_key("layout");

    let archive = dir.path().join("artifact.zip");
    make_file(&archive, b"archive bytes", 0o600);
    cache.store(&key, &archive).await.unwrap();

    let hex = key.to_hex();
    let expected = dir
        .path()
        .join("cache")
        .join(&hex[..2])
        .join(format!("{hex}.zip"));
    assert!(expected.is_file());
}
