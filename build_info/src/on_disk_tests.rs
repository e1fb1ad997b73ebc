// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::BTreeMap;
use std::sync::Arc;

use fs::ProjectFilesystem;
use rules::{BuildId, BuildTarget, RuleKeyBuilder, RuleKeyPair};
use tempfile::TempDir;
use testutil::make_file;

use crate::clock::FakeClock;
use crate::recorder::BuildInfoRecorder;
use crate::OnDiskBuildInfo;

fn write_build_info(dir: &TempDir) -> RuleKeyPair {
    let mut total = RuleKeyBuilder::new();
    total.set("seed", "on-disk");
    let mut without_deps = RuleKeyBuilder::new();
    without_deps.set("seed", "on-disk-without-deps");
    let keys = RuleKeyPair {
        total: total.build().unwrap(),
        without_deps: without_deps.build().unwrap(),
    };

    let filesystem = Arc::new(ProjectFilesystem::new(dir.path().to_owned()));
    let mut recorder = BuildInfoRecorder::new(
        BuildTarget::parse("//app:main").unwrap(),
        filesystem,
        Arc::new(FakeClock::new(0)),
        BuildId::from_string("test-build".to_owned()),
        &BTreeMap::new(),
        keys.clone(),
    )
    .unwrap();

    recorder.add_metadata("plain", "value");
    recorder
        .add_metadata_values("many", vec!["one".to_owned(), "two".to_owned()])
        .unwrap();
    recorder.write_metadata_to_disk(true).unwrap();
    keys
}

fn on_disk(dir: &TempDir) -> OnDiskBuildInfo {
    OnDiskBuildInfo::new(
        &BuildTarget::parse("//app:main").unwrap(),
        Arc::new(ProjectFilesystem::new(dir.path().to_owned())),
    )
    .unwrap()
}

#[test]
fn reads_back_what_the_recorder_wrote() {
    let dir = TempDir::new().unwrap();
    let keys = write_build_info(&dir);
    let info = on_disk(&dir);

    assert_eq!(Some("value".to_owned()), info.get_value("plain"));
    assert_eq!(
        Some(vec!["one".to_owned(), "two".to_owned()]),
        info.get_values("many")
    );
    assert_eq!(Some(keys.total.hash()), info.get_rule_key());
    assert_eq!(
        Some(keys.without_deps.hash()),
        info.get_rule_key_without_deps()
    );
}

#[test]
fn missing_metadata_reads_as_none() {
    let dir = TempDir::new().unwrap();
    let info = on_disk(&dir);
    assert_eq!(None, info.get_value("anything"));
    assert_eq!(None, info.get_rule_key());
}

#[test]
fn torn_metadata_reads_as_none() {
    let dir = TempDir::new().unwrap();
    write_build_info(&dir);

    // A partial write from an interrupted build is re-derived, not trusted.
    make_file(
        &dir.path().join("build-out/meta/app/main/RULE_KEY"),
        b"not a fingerprint",
        0o600,
    );
    make_file(
        &dir.path().join("build-out/meta/app/main/many"),
        b"[\"one\",",
        0o600,
    );

    let info = on_disk(&dir);
    assert_eq!(None, info.get_rule_key());
    assert_eq!(None, info.get_values("many"));
}
