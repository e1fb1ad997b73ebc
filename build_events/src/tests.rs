// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use crate::{BuildEvent, CacheOperation, EventBus};

#[test]
fn posts_are_observable_in_order() {
    let bus = EventBus::new();
    bus.post(BuildEvent::ArtifactCacheStarted {
        operation: CacheOperation::Compress,
        rule_key: "abc123".to_owned(),
    });
    bus.post(BuildEvent::ArtifactCacheFinished {
        operation: CacheOperation::Compress,
        rule_key: "abc123".to_owned(),
    });

    let events = bus.events();
    assert_eq!(2, events.len());
    assert_eq!(
        BuildEvent::ArtifactCacheStarted {
            operation: CacheOperation::Compress,
            rule_key: "abc123".to_owned(),
        },
        events[0]
    );
}

#[test]
fn clones_share_one_buffer() {
    let bus = EventBus::new();
    let other = bus.clone();
    other.console(log::Level::Info, "hello".to_owned());
    assert_eq!(1, bus.events().len());
}
