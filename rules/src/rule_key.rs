// Copyright 2021 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use derivative::Derivative;
use sha2::{Digest as Sha256Digest, Sha256};

use fs::{FileHashCache, RelativePath};
use hashing::Fingerprint;

use crate::values::ValueVisitor;
use crate::{BuildRule, BuildTarget};

// Each value shape feeds a distinct tag so that adjacent values can never alias.
const TAG_SEED: u8 = 0x00;
const TAG_FIELD: u8 = 0x01;
const TAG_STR: u8 = 0x02;
const TAG_BOOL: u8 = 0x03;
const TAG_NUM: u8 = 0x04;
const TAG_PATH: u8 = 0x05;
const TAG_OUTPUT_PATH: u8 = 0x06;
const TAG_PUBLIC_OUTPUT_PATH: u8 = 0x07;
const TAG_TARGET: u8 = 0x08;
const TAG_NONE: u8 = 0x09;
const TAG_SOME: u8 = 0x0a;
const TAG_SEQ_START: u8 = 0x0b;
const TAG_SEQ_END: u8 = 0x0c;
const TAG_SET_START: u8 = 0x0d;
const TAG_SET_END: u8 = 0x0e;
const TAG_RULE_KEY: u8 = 0x0f;
const TAG_INPUT_HASH: u8 = 0x10;

///
/// The deterministic fingerprint of a build rule: its identity, its declared fields, and
/// the rule keys of its direct dependencies. The cache lookup key.
///
/// Two rule keys are equal iff every contributing value fed the hash identically. The
/// element list records what fed the hash in human-readable form for diagnostics; it does
/// not participate in equality.
///
#[derive(Derivative, Clone, Debug, Eq)]
#[derivative(PartialEq, Hash)]
pub struct RuleKey {
    hash: Fingerprint,
    #[derivative(PartialEq = "ignore", Hash = "ignore")]
    elements: Arc<Vec<String>>,
}

impl RuleKey {
    pub fn hash(&self) -> Fingerprint {
        self.hash
    }

    pub fn to_hex(&self) -> String {
        self.hash.to_hex()
    }

    ///
    /// The values which fed this key, in feed order.
    ///
    pub fn elements(&self) -> &[String] {
        &self.elements
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hash)
    }
}

///
/// Accumulates a rule's contributing values into a running hash, in declared field order.
///
/// Implements ValueVisitor, so a rule's schema traversal feeds it directly; `set` and
/// `set_rule_key` cover rule-specific details and dependency keys.
///
pub struct RuleKeyBuilder {
    hasher: Sha256,
    elements: Vec<String>,
    file_hashes: Option<Arc<FileHashCache>>,
    error: Option<String>,
}

impl RuleKeyBuilder {
    pub fn new() -> RuleKeyBuilder {
        RuleKeyBuilder {
            hasher: Sha256::default(),
            elements: Vec::new(),
            file_hashes: None,
            error: None,
        }
    }

    ///
    /// A builder which additionally folds the content fingerprint of every visited input
    /// path into the key, so that editing a source file changes the keys of every rule
    /// declaring it.
    ///
    pub fn with_file_hashes(file_hashes: Arc<FileHashCache>) -> RuleKeyBuilder {
        RuleKeyBuilder {
            hasher: Sha256::default(),
            elements: Vec::new(),
            file_hashes: Some(file_hashes),
            error: None,
        }
    }

    // Tag, little-endian length, bytes: unambiguous framing for every contribution.
    fn feed(&mut self, tag: u8, bytes: &[u8]) {
        self.hasher.update([tag]);
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
    }

    fn feed_marker(&mut self, tag: u8) {
        self.feed(tag, &[]);
    }

    pub fn set(&mut self, name: &str, value: &str) -> &mut RuleKeyBuilder {
        self.feed(TAG_FIELD, name.as_bytes());
        self.feed(TAG_STR, value.as_bytes());
        self.elements.push(format!("{name}={value}"));
        self
    }

    pub fn set_rule_key(&mut self, name: &str, key: &RuleKey) -> &mut RuleKeyBuilder {
        self.feed(TAG_FIELD, name.as_bytes());
        self.feed(TAG_RULE_KEY, key.hash().as_bytes());
        self.elements.push(format!("{name}={key}"));
        self
    }

    fn seed(&mut self, fingerprint: Fingerprint) {
        self.feed(TAG_SEED, fingerprint.as_bytes());
        self.elements.push(format!("build_tool={fingerprint}"));
    }

    pub fn build(self) -> Result<RuleKey, String> {
        if let Some(error) = self.error {
            return Err(error);
        }
        Ok(RuleKey {
            hash: Fingerprint::from_bytes(self.hasher.finalize()),
            elements: Arc::new(self.elements),
        })
    }
}

impl ValueVisitor for RuleKeyBuilder {
    fn visit_field(&mut self, name: &str) {
        self.feed(TAG_FIELD, name.as_bytes());
        self.elements.push(format!("field:{name}"));
    }

    fn visit_str(&mut self, value: &str) {
        self.feed(TAG_STR, value.as_bytes());
        self.elements.push(format!("str:{value}"));
    }

    fn visit_bool(&mut self, value: bool) {
        self.feed(TAG_BOOL, if value { b"1" } else { b"0" });
        self.elements.push(format!("bool:{value}"));
    }

    fn visit_num(&mut self, value: i64) {
        self.feed(TAG_NUM, &value.to_le_bytes());
        self.elements.push(format!("num:{value}"));
    }

    fn visit_path(&mut self, value: &RelativePath) {
        self.feed(TAG_PATH, value.to_string().as_bytes());
        self.elements.push(format!("path:{value}"));
        if let Some(file_hashes) = &self.file_hashes {
            match file_hashes.get(value) {
                Ok(fingerprint) => {
                    self.feed(TAG_INPUT_HASH, fingerprint.as_bytes());
                    self.elements.push(format!("input:{value}={fingerprint}"));
                }
                Err(error) => {
                    if self.error.is_none() {
                        self.error = Some(error);
                    }
                }
            }
        }
    }

    fn visit_output_path(&mut self, value: &RelativePath) {
        self.feed(TAG_OUTPUT_PATH, value.to_string().as_bytes());
        self.elements.push(format!("output:{value}"));
    }

    fn visit_public_output_path(&mut self, value: &RelativePath) {
        self.feed(TAG_PUBLIC_OUTPUT_PATH, value.to_string().as_bytes());
        self.elements.push(format!("public_output:{value}"));
    }

    fn visit_target(&mut self, value: &BuildTarget) {
        self.feed(TAG_TARGET, value.full_name().as_bytes());
        self.elements.push(format!("target:{value}"));
    }

    fn visit_none(&mut self) {
        self.feed_marker(TAG_NONE);
        self.elements.push("none".to_owned());
    }

    fn visit_some(&mut self) {
        self.feed_marker(TAG_SOME);
    }

    fn visit_seq_start(&mut self, len: usize) {
        self.feed(TAG_SEQ_START, &(len as u64).to_le_bytes());
    }

    fn visit_seq_end(&mut self) {
        self.feed_marker(TAG_SEQ_END);
    }

    fn visit_set_start(&mut self, len: usize) {
        self.feed(TAG_SET_START, &(len as u64).to_le_bytes());
    }

    fn visit_set_end(&mut self) {
        self.feed_marker(TAG_SET_END);
    }
}

///
/// A rule's key alongside its dependency-independent variant.
///
/// The variant without dependencies answers "did this rule's own declaration change"
/// regardless of dependency churn. It is diagnostic only: cache decisions use `total`.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RuleKeyPair {
    pub total: RuleKey,
    pub without_deps: RuleKey,
}

///
/// Computes rule keys. When constructed with the build tool's own binary fingerprint,
/// every key is seeded with it, so upgrading the tool invalidates all cached artifacts.
/// With a file hash cache attached, declared input files contribute their content
/// fingerprints; without one, only their paths contribute.
///
#[derive(Clone, Default)]
pub struct RuleKeyFactory {
    build_tool_fingerprint: Option<Fingerprint>,
    file_hashes: Option<Arc<FileHashCache>>,
}

impl RuleKeyFactory {
    pub fn new() -> RuleKeyFactory {
        RuleKeyFactory {
            build_tool_fingerprint: None,
            file_hashes: None,
        }
    }

    pub fn with_build_tool_fingerprint(fingerprint: Fingerprint) -> RuleKeyFactory {
        RuleKeyFactory {
            build_tool_fingerprint: Some(fingerprint),
            file_hashes: None,
        }
    }

    pub fn file_hash_cache(mut self, file_hashes: Arc<FileHashCache>) -> RuleKeyFactory {
        self.file_hashes = Some(file_hashes);
        self
    }

    ///
    /// Computes both keys for the given rule. Dependency keys must already have been
    /// computed for every declared dep: a rule's key folds in its dependencies' keys, not
    /// their fields, which is what bounds key computation to one pass over the graph.
    ///
    pub fn build(
        &self,
        rule: &dyn BuildRule,
        dependency_rule_keys: &BTreeMap<BuildTarget, RuleKey>,
    ) -> Result<RuleKeyPair, String> {
        let without_deps = self.base_builder(rule).build()?;

        let mut builder = self.base_builder(rule);
        for dep in rule.params().deps() {
            let dep_key = dependency_rule_keys.get(dep).ok_or_else(|| {
                format!(
                    "While computing the rule key of {}: no rule key was computed for its \
                     dependency {dep}",
                    rule.build_target()
                )
            })?;
            builder.set_rule_key(&dep.full_name(), dep_key);
        }

        Ok(RuleKeyPair {
            total: builder.build()?,
            without_deps,
        })
    }

    fn base_builder(&self, rule: &dyn BuildRule) -> RuleKeyBuilder {
        let mut builder = match &self.file_hashes {
            Some(file_hashes) => RuleKeyBuilder::with_file_hashes(file_hashes.clone()),
            None => RuleKeyBuilder::new(),
        };
        if let Some(fingerprint) = self.build_tool_fingerprint {
            builder.seed(fingerprint);
        }
        builder.set("rule_type", rule.rule_type().0);
        builder.set("target", &rule.build_target().full_name());
        rule.visit_fields(&mut builder);
        rule.append_details_to_rule_key(&mut builder);
        builder
    }
}
