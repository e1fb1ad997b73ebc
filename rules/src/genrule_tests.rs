// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use build_events::EventBus;
use fs::RelativePath;

use crate::genrule::{
    GenruleArgs, GenruleDescription, PackageGenruleArgs, PackageGenruleDescription,
};
use crate::rule_key::RuleKeyFactory;
use crate::values::{SerializedRule, ValueVisitor};
use crate::{
    BuildContext, BuildId, BuildRule, BuildRuleParams, BuildRuleResolver, BuildRuleType,
    BuildTarget, Capability, Description, RecorderHandle, SourcePath, Step,
};

#[derive(Default)]
struct FakeRecorder {
    artifacts: Vec<PathBuf>,
    metadata: Vec<(String, String)>,
}

impl RecorderHandle for FakeRecorder {
    fn record_artifact(&mut self, path: &Path) -> Result<(), String> {
        if path.is_absolute() {
            return Err(format!("absolute path: {}", path.display()));
        }
        self.artifacts.push(path.to_owned());
        Ok(())
    }

    fn add_metadata(&mut self, key: &str, value: &str) {
        self.metadata.push((key.to_owned(), value.to_owned()));
    }
}

struct StubRule {
    params: BuildRuleParams,
    capabilities: &'static [Capability],
}

impl BuildRule for StubRule {
    fn rule_type(&self) -> BuildRuleType {
        BuildRuleType("stub_rule")
    }

    fn params(&self) -> &BuildRuleParams {
        &self.params
    }

    fn visit_fields(&self, _visitor: &mut dyn ValueVisitor) {}

    fn get_build_steps(
        &self,
        _context: &BuildContext,
        _recorder: &mut dyn RecorderHandle,
    ) -> Result<Vec<Box<dyn Step>>, String> {
        Ok(Vec::new())
    }

    fn capabilities(&self) -> &'static [Capability] {
        self.capabilities
    }
}

fn params(target: &str) -> BuildRuleParams {
    BuildRuleParams::new(BuildTarget::parse(target).unwrap(), Vec::new())
}

fn context() -> BuildContext {
    BuildContext::new(BuildId::new(), EventBus::new())
}

fn resolver_with(target: &str, capabilities: &'static [Capability]) -> BuildRuleResolver {
    let mut resolver = BuildRuleResolver::new();
    resolver
        .add_rule(Arc::new(StubRule {
            params: params(target),
            capabilities,
        }))
        .unwrap();
    resolver
}

#[test]
fn genrule_records_its_output_and_runs_its_command() {
    let rule = GenruleDescription
        .create_build_rule(
            params("//app:main"),
            &BuildRuleResolver::new(),
            GenruleArgs {
                out: "out.jar".to_owned(),
                cmd: Some("echo hi > out.jar".to_owned()),
                ..GenruleArgs::default()
            },
        )
        .unwrap();

    let mut recorder = FakeRecorder::default();
    let steps = rule.get_build_steps(&context(), &mut recorder).unwrap();

    assert_eq!(vec![PathBuf::from("out.jar")], recorder.artifacts);
    assert!(recorder.metadata.is_empty());
    assert_eq!(1, steps.len());
    assert_eq!("echo hi > out.jar", steps[0].describe());
    assert_eq!(
        Some(&RelativePath::new("out.jar").unwrap()),
        rule.output_path()
    );
}

#[test]
fn genrule_without_a_command_has_no_steps() {
    let rule = GenruleDescription
        .create_build_rule(
            params("//app:main"),
            &BuildRuleResolver::new(),
            GenruleArgs {
                out: "out.jar".to_owned(),
                ..GenruleArgs::default()
            },
        )
        .unwrap();

    let mut recorder = FakeRecorder::default();
    let steps = rule.get_build_steps(&context(), &mut recorder).unwrap();
    assert!(steps.is_empty());
    assert_eq!(vec![PathBuf::from("out.jar")], recorder.artifacts);
}

#[test]
fn genrule_rejects_an_empty_out() {
    let err = GenruleDescription
        .create_build_rule(
            params("//app:main"),
            &BuildRuleResolver::new(),
            GenruleArgs::default(),
        )
        .unwrap_err();
    assert!(err.contains("//app:main"), "{err}");
}

#[test]
fn genrule_rejects_an_absolute_out() {
    let err = GenruleDescription
        .create_build_rule(
            params("//app:main"),
            &BuildRuleResolver::new(),
            GenruleArgs {
                out: "/abs/out.jar".to_owned(),
                ..GenruleArgs::default()
            },
        )
        .unwrap_err();
    assert!(err.contains("//app:main"), "{err}");
}

#[test]
fn genrule_src_rules_become_extra_deps() {
    let gen_target = BuildTarget::parse("//lib:gen").unwrap();
    let rule = GenruleDescription
        .create_build_rule(
            params("//app:main"),
            &BuildRuleResolver::new(),
            GenruleArgs {
                out: "out.jar".to_owned(),
                srcs: Some(vec![
                    SourcePath::File(RelativePath::new("src/a.txt").unwrap()),
                    SourcePath::Rule(gen_target.clone()),
                ]),
                ..GenruleArgs::default()
            },
        )
        .unwrap();

    assert_eq!(
        vec![&gen_target],
        rule.params().extra_deps().iter().collect::<Vec<_>>()
    );
    assert_eq!(
        vec![RelativePath::new("src/a.txt").unwrap()],
        rule.inputs_to_compare_to_output()
    );
}

#[test]
fn package_genrule_requires_an_installable_package() {
    let resolver = resolver_with("//lib:plain", &[]);
    let err = PackageGenruleDescription
        .create_build_rule(
            params("//app:bundle"),
            &resolver,
            PackageGenruleArgs {
                package: BuildTarget::parse("//lib:plain").unwrap(),
                out: "bundle.zip".to_owned(),
                cmd: None,
                srcs: None,
                deps: None,
            },
        )
        .unwrap_err();
    assert!(err.contains("//app:bundle"), "{err}");
    assert!(err.contains("//lib:plain"), "{err}");
    assert!(err.contains("installable package"), "{err}");
}

#[test]
fn package_genrule_accepts_an_installable_package() {
    let package = BuildTarget::parse("//lib:pkg").unwrap();
    let resolver = resolver_with("//lib:pkg", &[Capability::InstallablePackage]);

    let rule = PackageGenruleDescription
        .create_build_rule(
            params("//app:bundle"),
            &resolver,
            PackageGenruleArgs {
                package: package.clone(),
                out: "bundle.zip".to_owned(),
                cmd: None,
                srcs: Some(vec![SourcePath::Rule(
                    BuildTarget::parse("//lib:gen").unwrap(),
                )]),
                deps: None,
            },
        )
        .unwrap();

    let extra_deps: Vec<_> = rule.params().extra_deps().iter().cloned().collect();
    assert!(extra_deps.contains(&package));
    assert!(extra_deps.contains(&BuildTarget::parse("//lib:gen").unwrap()));
    assert!(rule
        .capabilities()
        .contains(&Capability::InstallablePackage));
}

#[test]
fn package_genrule_requires_the_package_rule_to_exist() {
    let err = PackageGenruleDescription
        .create_build_rule(
            params("//app:bundle"),
            &BuildRuleResolver::new(),
            PackageGenruleArgs {
                package: BuildTarget::parse("//lib:missing").unwrap(),
                out: "bundle.zip".to_owned(),
                cmd: None,
                srcs: None,
                deps: None,
            },
        )
        .unwrap_err();
    assert!(err.contains("//lib:missing"), "{err}");
}

#[test]
fn resolver_rejects_duplicate_targets() {
    let mut resolver = BuildRuleResolver::new();
    resolver
        .add_rule(Arc::new(StubRule {
            params: params("//lib:dup"),
            capabilities: &[],
        }))
        .unwrap();
    let err = resolver
        .add_rule(Arc::new(StubRule {
            params: params("//lib:dup"),
            capabilities: &[],
        }))
        .unwrap_err();
    assert!(err.contains("//lib:dup"), "{err}");
}

#[test]
fn serialized_genrule_reconstructs_with_an_identical_rule_key() {
    let original = GenruleDescription
        .create_build_rule(
            params("//app:main"),
            &BuildRuleResolver::new(),
            GenruleArgs {
                out: "out.jar".to_owned(),
                cmd: Some("cp src/a.txt out.jar".to_owned()),
                srcs: Some(vec![
                    SourcePath::File(RelativePath::new("src/a.txt").unwrap()),
                    SourcePath::Rule(BuildTarget::parse("//lib:gen").unwrap()),
                ]),
                deps: None,
            },
        )
        .unwrap();

    let bytes = original.serialized().to_bytes().unwrap();
    let shipped = SerializedRule::from_bytes(&bytes).unwrap();
    assert_eq!("genrule", shipped.rule_type);

    let reconstructed = GenruleDescription
        .create_build_rule(
            BuildRuleParams::new(shipped.target.clone(), Vec::new()),
            &BuildRuleResolver::new(),
            GenruleArgs::from_serialized(&shipped).unwrap(),
        )
        .unwrap();

    let factory = RuleKeyFactory::new();
    assert_eq!(
        factory.build(original.as_ref(), &BTreeMap::new()).unwrap().total,
        factory
            .build(reconstructed.as_ref(), &BTreeMap::new())
            .unwrap()
            .total,
    );
}
