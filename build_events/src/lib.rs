// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::Arc;

use parking_lot::Mutex;

///
/// The artifact-cache operation an event describes.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CacheOperation {
    Compress,
    Store,
    Fetch,
}

///
/// Diagnostic events emitted by the incremental-build core.
///
/// Events are fire-and-forget: nothing in the build's control flow depends on whether or
/// when a consumer observes them. Rule keys travel as their hex form so that consumers
/// need no knowledge of key internals.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BuildEvent {
    ArtifactCacheStarted {
        operation: CacheOperation,
        rule_key: String,
    },
    ArtifactCacheFinished {
        operation: CacheOperation,
        rule_key: String,
    },
    Console {
        level: log::Level,
        message: String,
    },
}

///
/// A best-effort event channel shared by everything in one build invocation.
///
/// Posting appends to a shared buffer (snapshot-readable, primarily for tests and the
/// console renderer) and mirrors console events into the `log` stream.
///
#[derive(Clone, Default)]
pub struct EventBus {
    events: Arc<Mutex<Vec<BuildEvent>>>,
}

impl EventBus {
    pub fn new() -> EventBus {
        EventBus {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn post(&self, event: BuildEvent) {
        if let BuildEvent::Console { level, ref message } = event {
            log::log!(level, "{message}");
        }
        self.events.lock().push(event);
    }

    pub fn console(&self, level: log::Level, message: String) {
        self.post(BuildEvent::Console { level, message });
    }

    ///
    /// A snapshot of every event posted so far, in posting order.
    ///
    pub fn events(&self) -> Vec<BuildEvent> {
        self.events.lock().clone()
    }
}

#[cfg(test)]
mod tests;
