// Copyright 2021 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::BTreeSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use fs::RelativePath;

use crate::steps::ShellCommandStep;
use crate::values::{
    ClassInfo, FieldInfo, RuleValue, SerializedRule, ValueTypeInfo, ValueVisitor,
};
use crate::{
    filter_build_rule_inputs, BuildContext, BuildRule, BuildRuleParams, BuildRuleResolver,
    BuildRuleType, BuildTarget, Capability, Description, RecorderHandle, SourcePath, Step,
};

pub const GENRULE_TYPE: BuildRuleType = BuildRuleType("genrule");
pub const PACKAGE_GENRULE_TYPE: BuildRuleType = BuildRuleType("package_genrule");

fn source_value(source: &SourcePath) -> RuleValue {
    match source {
        SourcePath::File(path) => RuleValue::Path(path.clone()),
        SourcePath::Rule(target) => RuleValue::Target(target.clone()),
    }
}

fn source_from_value(target: &BuildTarget, value: &RuleValue) -> Result<SourcePath, String> {
    match value {
        RuleValue::Path(path) => Ok(SourcePath::File(path.clone())),
        RuleValue::Target(dep) => Ok(SourcePath::Rule(dep.clone())),
        other => Err(format!(
            "Rule {target}: expected a source path in `srcs`, got {other:?}"
        )),
    }
}

fn parse_out(target: &BuildTarget, out: &str) -> Result<RelativePath, String> {
    if out.is_empty() {
        return Err(format!("The `out` argument of {target} must be non-empty"));
    }
    RelativePath::new(out)
        .map_err(|e| format!("The `out` argument of {target} is not a valid output path: {e}"))
}

///
/// The argument bag of a `genrule`: a plain data bag populated by upstream parsing.
/// `deps` is folded into the rule's params before construction.
///
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GenruleArgs {
    pub out: String,
    pub cmd: Option<String>,
    pub srcs: Option<Vec<SourcePath>>,
    pub deps: Option<BTreeSet<BuildTarget>>,
}

impl GenruleArgs {
    ///
    /// Rebuilds the argument bag from a rule shipped out-of-process.
    ///
    pub fn from_serialized(serialized: &SerializedRule) -> Result<GenruleArgs, String> {
        let target = &serialized.target;
        let out = match serialized.field("out") {
            Some(RuleValue::OutputPath(path)) => path.to_string(),
            other => {
                return Err(format!(
                    "Rule {target}: expected an output path for `out`, got {other:?}"
                ));
            }
        };
        let cmd = match serialized.field("cmd") {
            Some(RuleValue::Opt(value)) => match value.as_deref() {
                None => None,
                Some(RuleValue::Str(cmd)) => Some(cmd.clone()),
                Some(other) => {
                    return Err(format!(
                        "Rule {target}: expected a string for `cmd`, got {other:?}"
                    ));
                }
            },
            other => {
                return Err(format!(
                    "Rule {target}: expected an optional string for `cmd`, got {other:?}"
                ));
            }
        };
        let srcs = match serialized.field("srcs") {
            Some(RuleValue::Seq(items)) => items
                .iter()
                .map(|item| source_from_value(target, item))
                .collect::<Result<Vec<_>, String>>()?,
            other => {
                return Err(format!(
                    "Rule {target}: expected a sequence of sources for `srcs`, got {other:?}"
                ));
            }
        };
        Ok(GenruleArgs {
            out,
            cmd,
            srcs: Some(srcs),
            deps: None,
        })
    }
}

///
/// Produces a declared output file by running a shell command.
///
pub struct Genrule {
    params: BuildRuleParams,
    out: RelativePath,
    cmd: Option<String>,
    srcs: Vec<SourcePath>,
}

static GENRULE_CLASS_INFO: Lazy<ClassInfo<Genrule>> = Lazy::new(|| {
    ClassInfo::new(
        "genrule",
        vec![
            FieldInfo {
                name: "out",
                type_info: ValueTypeInfo::OutputPath,
                extract: |rule: &Genrule| RuleValue::OutputPath(rule.out.clone()),
            },
            FieldInfo {
                name: "cmd",
                type_info: ValueTypeInfo::Optional(&ValueTypeInfo::Str),
                extract: |rule| RuleValue::opt(rule.cmd.clone().map(RuleValue::Str)),
            },
            FieldInfo {
                name: "srcs",
                type_info: ValueTypeInfo::Sequence(&ValueTypeInfo::Source),
                extract: |rule| RuleValue::Seq(rule.srcs.iter().map(source_value).collect()),
            },
        ],
    )
    .unwrap_or_else(|e| panic!("Invalid genrule schema: {e}"))
});

impl BuildRule for Genrule {
    fn rule_type(&self) -> BuildRuleType {
        GENRULE_TYPE
    }

    fn params(&self) -> &BuildRuleParams {
        &self.params
    }

    fn visit_fields(&self, visitor: &mut dyn ValueVisitor) {
        GENRULE_CLASS_INFO.visit(self, visitor);
    }

    fn get_build_steps(
        &self,
        _context: &BuildContext,
        recorder: &mut dyn RecorderHandle,
    ) -> Result<Vec<Box<dyn Step>>, String> {
        recorder.record_artifact(self.out.as_ref())?;
        let mut steps: Vec<Box<dyn Step>> = Vec::new();
        if let Some(cmd) = &self.cmd {
            steps.push(Box::new(ShellCommandStep {
                command: cmd.clone(),
            }));
        }
        Ok(steps)
    }

    fn inputs_to_compare_to_output(&self) -> Vec<RelativePath> {
        self.srcs
            .iter()
            .filter_map(|source| match source {
                SourcePath::File(path) => Some(path.clone()),
                SourcePath::Rule(_) => None,
            })
            .collect()
    }

    fn output_path(&self) -> Option<&RelativePath> {
        Some(&self.out)
    }
}

pub struct GenruleDescription;

impl Description for GenruleDescription {
    type Arg = GenruleArgs;

    fn rule_type(&self) -> BuildRuleType {
        GENRULE_TYPE
    }

    fn create_build_rule(
        &self,
        params: BuildRuleParams,
        _resolver: &BuildRuleResolver,
        args: GenruleArgs,
    ) -> Result<Arc<dyn BuildRule>, String> {
        let out = parse_out(params.target(), &args.out)?;
        let srcs = args.srcs.unwrap_or_default();
        let params = params.copy_with_extra_deps(filter_build_rule_inputs(&srcs));
        Ok(Arc::new(Genrule {
            params,
            out,
            cmd: args.cmd,
            srcs,
        }))
    }
}

///
/// The argument bag of a `package_genrule`: a genrule whose `package` argument must name
/// a rule producing an installable package.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PackageGenruleArgs {
    pub package: BuildTarget,
    pub out: String,
    pub cmd: Option<String>,
    pub srcs: Option<Vec<SourcePath>>,
    pub deps: Option<BTreeSet<BuildTarget>>,
}

///
/// Post-processes an installable package into a new installable package.
///
pub struct PackageGenrule {
    params: BuildRuleParams,
    package: BuildTarget,
    out: RelativePath,
    cmd: Option<String>,
    srcs: Vec<SourcePath>,
}

static PACKAGE_GENRULE_CLASS_INFO: Lazy<ClassInfo<PackageGenrule>> = Lazy::new(|| {
    ClassInfo::new(
        "package_genrule",
        vec![
            FieldInfo {
                name: "package",
                type_info: ValueTypeInfo::Target,
                extract: |rule: &PackageGenrule| RuleValue::Target(rule.package.clone()),
            },
            FieldInfo {
                name: "out",
                type_info: ValueTypeInfo::OutputPath,
                extract: |rule| RuleValue::OutputPath(rule.out.clone()),
            },
            FieldInfo {
                name: "cmd",
                type_info: ValueTypeInfo::Optional(&ValueTypeInfo::Str),
                extract: |rule| RuleValue::opt(rule.cmd.clone().map(RuleValue::Str)),
            },
            FieldInfo {
                name: "srcs",
                type_info: ValueTypeInfo::Sequence(&ValueTypeInfo::Source),
                extract: |rule| RuleValue::Seq(rule.srcs.iter().map(source_value).collect()),
            },
        ],
    )
    .unwrap_or_else(|e| panic!("Invalid package_genrule schema: {e}"))
});

impl BuildRule for PackageGenrule {
    fn rule_type(&self) -> BuildRuleType {
        PACKAGE_GENRULE_TYPE
    }

    fn params(&self) -> &BuildRuleParams {
        &self.params
    }

    fn visit_fields(&self, visitor: &mut dyn ValueVisitor) {
        PACKAGE_GENRULE_CLASS_INFO.visit(self, visitor);
    }

    fn get_build_steps(
        &self,
        _context: &BuildContext,
        recorder: &mut dyn RecorderHandle,
    ) -> Result<Vec<Box<dyn Step>>, String> {
        recorder.record_artifact(self.out.as_ref())?;
        let mut steps: Vec<Box<dyn Step>> = Vec::new();
        if let Some(cmd) = &self.cmd {
            steps.push(Box::new(ShellCommandStep {
                command: cmd.clone(),
            }));
        }
        Ok(steps)
    }

    fn inputs_to_compare_to_output(&self) -> Vec<RelativePath> {
        self.srcs
            .iter()
            .filter_map(|source| match source {
                SourcePath::File(path) => Some(path.clone()),
                SourcePath::Rule(_) => None,
            })
            .collect()
    }

    fn output_path(&self) -> Option<&RelativePath> {
        Some(&self.out)
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::InstallablePackage]
    }
}

pub struct PackageGenruleDescription;

impl Description for PackageGenruleDescription {
    type Arg = PackageGenruleArgs;

    fn rule_type(&self) -> BuildRuleType {
        PACKAGE_GENRULE_TYPE
    }

    fn create_build_rule(
        &self,
        params: BuildRuleParams,
        resolver: &BuildRuleResolver,
        args: PackageGenruleArgs,
    ) -> Result<Arc<dyn BuildRule>, String> {
        let package_rule = resolver.get_rule(&args.package)?;
        if !package_rule
            .capabilities()
            .contains(&Capability::InstallablePackage)
        {
            return Err(format!(
                "The `package` argument of {}, {}, must correspond to a rule providing the {} \
                 capability",
                params.target(),
                args.package,
                Capability::InstallablePackage
            ));
        }

        let out = parse_out(params.target(), &args.out)?;
        let srcs = args.srcs.unwrap_or_default();
        let mut extra_deps = filter_build_rule_inputs(&srcs);
        extra_deps.push(args.package.clone());
        let params = params.copy_with_extra_deps(extra_deps);

        Ok(Arc::new(PackageGenrule {
            params,
            package: args.package,
            out,
            cmd: args.cmd,
            srcs,
        }))
    }
}
