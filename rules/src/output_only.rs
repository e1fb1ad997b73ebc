// Copyright 2021 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use fs::RelativePath;

use crate::rule_key::RuleKeyBuilder;
use crate::values::ValueVisitor;
use crate::{BuildContext, BuildRule, BuildRuleParams, BuildRuleType, RecorderHandle, Step};

pub const OUTPUT_ONLY_RULE_TYPE: BuildRuleType = BuildRuleType("output_only_build_rule");

///
/// A terminal rule wrapping a file which some other mechanism already produced, so that
/// the file can participate in the graph as a rule output. Used for graph enhancement.
///
pub struct OutputOnlyBuildRule {
    params: BuildRuleParams,
    path_to_output_file: RelativePath,
}

impl OutputOnlyBuildRule {
    pub fn new(params: BuildRuleParams, path_to_output_file: RelativePath) -> OutputOnlyBuildRule {
        OutputOnlyBuildRule {
            params,
            path_to_output_file,
        }
    }
}

impl BuildRule for OutputOnlyBuildRule {
    fn rule_type(&self) -> BuildRuleType {
        OUTPUT_ONLY_RULE_TYPE
    }

    fn params(&self) -> &BuildRuleParams {
        &self.params
    }

    fn visit_fields(&self, _visitor: &mut dyn ValueVisitor) {}

    fn append_details_to_rule_key(&self, builder: &mut RuleKeyBuilder) {
        // The path itself is part of the rule key, but not the contents of the file.
        builder.set("output", &self.path_to_output_file.to_string());
    }

    fn get_build_steps(
        &self,
        _context: &BuildContext,
        recorder: &mut dyn RecorderHandle,
    ) -> Result<Vec<Box<dyn Step>>, String> {
        recorder.record_artifact(self.path_to_output_file.as_ref())?;
        Ok(Vec::new())
    }

    fn output_path(&self) -> Option<&RelativePath> {
        Some(&self.path_to_output_file)
    }
}
