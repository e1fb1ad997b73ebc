// Copyright 2021 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use build_events::EventBus;
use fs::RelativePath;

pub mod genrule;
#[cfg(test)]
mod genrule_tests;

pub mod output_only;

pub mod rule_key;

pub mod steps;

pub mod values;


pub use crate::rule_key::{RuleKey, RuleKeyBuilder, RuleKeyFactory, RuleKeyPair};
pub use crate::steps::Step;
pub use crate::values::{SerializedRule, ValueVisitor};

///
/// The identity of one buildable unit: a package path within the project, a short name,
/// and an optional set of flavors. Targets are written `//base/path:name#flavor,...`.
///
/// Immutable once constructed; targets are the map keys of the whole build, and they name
/// output and metadata directories on disk.
///
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct BuildTarget {
    base_path: RelativePath,
    short_name: String,
    flavors: BTreeSet<String>,
}

impl BuildTarget {
    pub fn new(base_path: RelativePath, short_name: &str) -> Result<BuildTarget, String> {
        if short_name.is_empty() {
            return Err(format!(
                "Build target in //{base_path} must have a non-empty name"
            ));
        }
        if short_name.contains(['/', ':', '#']) {
            return Err(format!(
                "Build target name `{short_name}` in //{base_path} may not contain `/`, `:` or `#`"
            ));
        }
        Ok(BuildTarget {
            base_path,
            short_name: short_name.to_owned(),
            flavors: BTreeSet::new(),
        })
    }

    pub fn with_flavors(
        mut self,
        flavors: impl IntoIterator<Item = String>,
    ) -> Result<BuildTarget, String> {
        for flavor in flavors {
            if flavor.is_empty() {
                return Err(format!("Empty flavor on build target {self}"));
            }
            self.flavors.insert(flavor);
        }
        Ok(self)
    }

    ///
    /// Parses `//base/path:name` with an optional `#flavor,...` suffix.
    ///
    pub fn parse(value: &str) -> Result<BuildTarget, String> {
        let rest = value
            .strip_prefix("//")
            .ok_or_else(|| format!("Failed to parse build target `{value}`: must start with //"))?;
        let (rest, flavors) = match rest.split_once('#') {
            Some((rest, flavors)) => (rest, flavors.split(',').map(str::to_owned).collect()),
            None => (rest, Vec::new()),
        };
        let (base, name) = rest.split_once(':').ok_or_else(|| {
            format!("Failed to parse build target `{value}`: expected a `:` before the target name")
        })?;
        let base_path = RelativePath::new(base)
            .map_err(|e| format!("Failed to parse build target `{value}`: {e}"))?;
        BuildTarget::new(base_path, name)
            .and_then(|target| target.with_flavors(flavors))
            .map_err(|e| format!("Failed to parse build target `{value}`: {e}"))
    }

    pub fn base_path(&self) -> &RelativePath {
        &self.base_path
    }

    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    pub fn flavors(&self) -> &BTreeSet<String> {
        &self.flavors
    }

    pub fn full_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "//{}:{}", self.base_path, self.short_name)?;
        if !self.flavors.is_empty() {
            let flavors: Vec<&str> = self.flavors.iter().map(String::as_str).collect();
            write!(f, "#{}", flavors.join(","))?;
        }
        Ok(())
    }
}

///
/// The name of a rule variant, e.g. `genrule`.
///
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct BuildRuleType(pub &'static str);

impl fmt::Display for BuildRuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

///
/// An opaque identifier for one build invocation.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct BuildId(String);

impl BuildId {
    pub fn new() -> BuildId {
        BuildId(uuid::Uuid::new_v4().to_string())
    }

    pub fn from_string(value: String) -> BuildId {
        BuildId(value)
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

///
/// A reference to a source input: either a checked-in file, or the output of another rule.
///
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum SourcePath {
    File(RelativePath),
    Rule(BuildTarget),
}

///
/// The build targets referenced by the given source paths, in input order.
///
pub fn filter_build_rule_inputs<'a>(
    paths: impl IntoIterator<Item = &'a SourcePath>,
) -> Vec<BuildTarget> {
    paths
        .into_iter()
        .filter_map(|source| match source {
            SourcePath::Rule(target) => Some(target.clone()),
            SourcePath::File(_) => None,
        })
        .collect()
}

///
/// The declared shape of a rule within the dependency graph: its target, its direct
/// dependencies, and any extra-deps.
///
/// Deps contribute to the rule key; extra-deps order the build but are invisible to the
/// key. Params are immutable: `copy_with_extra_deps` produces a new value.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuildRuleParams {
    target: BuildTarget,
    deps: BTreeSet<BuildTarget>,
    extra_deps: BTreeSet<BuildTarget>,
}

impl BuildRuleParams {
    pub fn new(target: BuildTarget, deps: impl IntoIterator<Item = BuildTarget>) -> BuildRuleParams {
        BuildRuleParams {
            target,
            deps: deps.into_iter().collect(),
            extra_deps: BTreeSet::new(),
        }
    }

    pub fn target(&self) -> &BuildTarget {
        &self.target
    }

    pub fn deps(&self) -> &BTreeSet<BuildTarget> {
        &self.deps
    }

    pub fn extra_deps(&self) -> &BTreeSet<BuildTarget> {
        &self.extra_deps
    }

    ///
    /// All targets which must be built before this rule, deps and extra-deps together.
    ///
    pub fn ordering_deps(&self) -> BTreeSet<BuildTarget> {
        self.deps.union(&self.extra_deps).cloned().collect()
    }

    pub fn copy_with_extra_deps(
        &self,
        extra_deps: impl IntoIterator<Item = BuildTarget>,
    ) -> BuildRuleParams {
        let mut params = self.clone();
        params.extra_deps.extend(extra_deps);
        params
    }
}

///
/// A behavior a rule can advertise, checked by descriptions which require their
/// dependencies to be more than just buildable.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Capability {
    InstallablePackage,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::InstallablePackage => write!(f, "installable package"),
        }
    }
}

///
/// Per-invocation state handed to rules when they produce their build steps.
///
#[derive(Clone)]
pub struct BuildContext {
    pub build_id: BuildId,
    pub events: EventBus,
}

impl BuildContext {
    pub fn new(build_id: BuildId, events: EventBus) -> BuildContext {
        BuildContext { build_id, events }
    }
}

///
/// The mutation surface a rule's build steps get over the in-progress build: recording
/// output paths and attaching metadata. Implemented by the build-info recorder.
///
pub trait RecorderHandle {
    ///
    /// Records a project-relative output path. Absolute paths are a configuration error.
    ///
    fn record_artifact(&mut self, path: &Path) -> Result<(), String>;

    fn add_metadata(&mut self, key: &str, value: &str);
}

///
/// A node in the dependency graph: one buildable unit.
///
/// Rules are immutable once constructed. Everything the rule contributes to its cache key
/// flows through `visit_fields` (the declared field schema in `values`) and
/// `append_details_to_rule_key` (rule-specific extras); the same field traversal feeds
/// `serialized` for out-of-process transport.
///
pub trait BuildRule: Send + Sync {
    fn rule_type(&self) -> BuildRuleType;

    fn params(&self) -> &BuildRuleParams;

    fn build_target(&self) -> &BuildTarget {
        self.params().target()
    }

    ///
    /// Walks this rule's declared fields in declared order.
    ///
    fn visit_fields(&self, visitor: &mut dyn ValueVisitor);

    ///
    /// Contributes rule-specific data which is not a declared field to the rule key.
    ///
    fn append_details_to_rule_key(&self, _builder: &mut RuleKeyBuilder) {}

    ///
    /// The ordered steps which produce this rule's outputs. Registers output paths with
    /// the recorder; a rule with no build action returns an empty sequence.
    ///
    fn get_build_steps(
        &self,
        context: &BuildContext,
        recorder: &mut dyn RecorderHandle,
    ) -> Result<Vec<Box<dyn Step>>, String>;

    ///
    /// The source inputs participating in simple file-based staleness checks.
    ///
    fn inputs_to_compare_to_output(&self) -> Vec<RelativePath> {
        Vec::new()
    }

    fn output_path(&self) -> Option<&RelativePath> {
        None
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[]
    }

    ///
    /// This rule's buildable state in transportable form, derived from the same field
    /// traversal that feeds the rule key.
    ///
    fn serialized(&self) -> SerializedRule {
        let mut collector = values::FieldCollector::new();
        self.visit_fields(&mut collector);
        SerializedRule {
            rule_type: self.rule_type().to_string(),
            target: self.build_target().clone(),
            fields: collector.into_fields(),
        }
    }
}

impl fmt::Debug for dyn BuildRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildRule")
            .field("rule_type", &self.rule_type())
            .field("target", self.build_target())
            .finish()
    }
}

///
/// The rules constructed so far in this invocation, looked up by target.
///
#[derive(Default)]
pub struct BuildRuleResolver {
    rules: HashMap<BuildTarget, Arc<dyn BuildRule>>,
}

impl BuildRuleResolver {
    pub fn new() -> BuildRuleResolver {
        BuildRuleResolver {
            rules: HashMap::new(),
        }
    }

    pub fn add_rule(&mut self, rule: Arc<dyn BuildRule>) -> Result<(), String> {
        let target = rule.build_target().clone();
        if self.rules.contains_key(&target) {
            return Err(format!("A rule for {target} was already registered"));
        }
        self.rules.insert(target, rule);
        Ok(())
    }

    pub fn get_rule(&self, target: &BuildTarget) -> Result<Arc<dyn BuildRule>, String> {
        self.rules
            .get(target)
            .cloned()
            .ok_or_else(|| format!("No rule exists for target {target}"))
    }
}

///
/// Parses a typed argument bag and produces a rule. Descriptions are stateless and shared
/// across invocations; construction is pure aside from resolver lookups, and any
/// unsatisfied requirement is a user-facing configuration error naming the offending
/// target.
///
pub trait Description: Send + Sync {
    type Arg;

    fn rule_type(&self) -> BuildRuleType;

    fn create_build_rule(
        &self,
        params: BuildRuleParams,
        resolver: &BuildRuleResolver,
        args: Self::Arg,
    ) -> Result<Arc<dyn BuildRule>, String>;
}
