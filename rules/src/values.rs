// Copyright 2021 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use serde::{Deserialize, Serialize};

use fs::RelativePath;

use crate::BuildTarget;

///
/// The closed set of value shapes a rule field may take.
///
/// Every field of every rule type reduces to one of these variants, which is what lets
/// rule-key hashing and out-of-process serialization share a single traversal instead of
/// per-rule-type logic.
///
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum RuleValue {
    Str(String),
    Bool(bool),
    Num(i64),
    Path(RelativePath),
    OutputPath(RelativePath),
    PublicOutputPath(RelativePath),
    Target(BuildTarget),
    Opt(Option<Box<RuleValue>>),
    Seq(Vec<RuleValue>),
    Set(Vec<RuleValue>),
}

impl RuleValue {
    ///
    /// An unordered collection value. Members are stored sorted and deduplicated, so two
    /// sets with the same members are one value regardless of insertion order.
    ///
    pub fn set(values: impl IntoIterator<Item = RuleValue>) -> RuleValue {
        let mut items: Vec<RuleValue> = values.into_iter().collect();
        items.sort();
        items.dedup();
        RuleValue::Set(items)
    }

    pub fn opt(value: Option<RuleValue>) -> RuleValue {
        RuleValue::Opt(value.map(Box::new))
    }

    ///
    /// Dispatches this value to the visitor, recursing through nested values. Set members
    /// are visited in sorted order whatever order they were constructed in.
    ///
    pub fn accept(&self, visitor: &mut dyn ValueVisitor) {
        match self {
            RuleValue::Str(value) => visitor.visit_str(value),
            RuleValue::Bool(value) => visitor.visit_bool(*value),
            RuleValue::Num(value) => visitor.visit_num(*value),
            RuleValue::Path(value) => visitor.visit_path(value),
            RuleValue::OutputPath(value) => visitor.visit_output_path(value),
            RuleValue::PublicOutputPath(value) => visitor.visit_public_output_path(value),
            RuleValue::Target(value) => visitor.visit_target(value),
            RuleValue::Opt(None) => visitor.visit_none(),
            RuleValue::Opt(Some(value)) => {
                visitor.visit_some();
                value.accept(visitor);
            }
            RuleValue::Seq(items) => {
                visitor.visit_seq_start(items.len());
                for item in items {
                    item.accept(visitor);
                }
                visitor.visit_seq_end();
            }
            RuleValue::Set(items) => {
                let mut sorted: Vec<&RuleValue> = items.iter().collect();
                sorted.sort();
                sorted.dedup();
                visitor.visit_set_start(sorted.len());
                for item in sorted {
                    item.accept(visitor);
                }
                visitor.visit_set_end();
            }
        }
    }
}

///
/// The declared type of a rule field. `Source` admits either a file path or a reference
/// to another rule's output.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValueTypeInfo {
    Str,
    Bool,
    Num,
    Path,
    OutputPath,
    PublicOutputPath,
    Target,
    Source,
    Optional(&'static ValueTypeInfo),
    Sequence(&'static ValueTypeInfo),
    Set(&'static ValueTypeInfo),
}

impl ValueTypeInfo {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ValueTypeInfo::Optional(inner) => {
                if matches!(inner, ValueTypeInfo::Optional(_)) {
                    Err("Optional of Optional is not a supported field type".to_owned())
                } else {
                    inner.validate()
                }
            }
            ValueTypeInfo::Sequence(inner) | ValueTypeInfo::Set(inner) => inner.validate(),
            _ => Ok(()),
        }
    }

    pub fn matches(&self, value: &RuleValue) -> bool {
        match (self, value) {
            (ValueTypeInfo::Str, RuleValue::Str(_)) => true,
            (ValueTypeInfo::Bool, RuleValue::Bool(_)) => true,
            (ValueTypeInfo::Num, RuleValue::Num(_)) => true,
            (ValueTypeInfo::Path, RuleValue::Path(_)) => true,
            (ValueTypeInfo::OutputPath, RuleValue::OutputPath(_)) => true,
            (ValueTypeInfo::PublicOutputPath, RuleValue::PublicOutputPath(_)) => true,
            (ValueTypeInfo::Target, RuleValue::Target(_)) => true,
            (ValueTypeInfo::Source, RuleValue::Path(_)) => true,
            (ValueTypeInfo::Source, RuleValue::Target(_)) => true,
            (ValueTypeInfo::Optional(inner), RuleValue::Opt(value)) => match value {
                None => true,
                Some(inner_value) => inner.matches(inner_value),
            },
            (ValueTypeInfo::Sequence(inner), RuleValue::Seq(items)) => {
                items.iter().all(|item| inner.matches(item))
            }
            (ValueTypeInfo::Set(inner), RuleValue::Set(items)) => {
                items.iter().all(|item| inner.matches(item))
            }
            _ => false,
        }
    }
}

///
/// Receives one traversal of a rule's typed values. Implemented by the rule-key builder
/// and by the serialization collector.
///
pub trait ValueVisitor {
    fn visit_field(&mut self, name: &str);
    fn visit_str(&mut self, value: &str);
    fn visit_bool(&mut self, value: bool);
    fn visit_num(&mut self, value: i64);
    fn visit_path(&mut self, value: &RelativePath);
    fn visit_output_path(&mut self, value: &RelativePath);
    fn visit_public_output_path(&mut self, value: &RelativePath);
    fn visit_target(&mut self, value: &BuildTarget);
    fn visit_none(&mut self);
    fn visit_some(&mut self);
    fn visit_seq_start(&mut self, len: usize);
    fn visit_seq_end(&mut self);
    fn visit_set_start(&mut self, len: usize);
    fn visit_set_end(&mut self);
}

///
/// One declared field of a rule type: its name, declared type, and accessor.
///
#[derive(Debug)]
pub struct FieldInfo<R: ?Sized> {
    pub name: &'static str,
    pub type_info: ValueTypeInfo,
    pub extract: fn(&R) -> RuleValue,
}

///
/// The static schema of one rule type. Computed once per type and shared by every
/// instance; an invalid declaration fails at construction, before any hashing happens.
///
#[derive(Debug)]
pub struct ClassInfo<R: ?Sized> {
    type_name: &'static str,
    fields: Vec<FieldInfo<R>>,
}

impl<R: ?Sized> ClassInfo<R> {
    pub fn new(type_name: &'static str, fields: Vec<FieldInfo<R>>) -> Result<ClassInfo<R>, String> {
        if type_name.is_empty() {
            return Err("A rule type must have a non-empty name".to_owned());
        }
        for (index, field) in fields.iter().enumerate() {
            if field.name.is_empty() {
                return Err(format!(
                    "Field {index} of rule type `{type_name}` must have a non-empty name"
                ));
            }
            if fields[..index].iter().any(|prior| prior.name == field.name) {
                return Err(format!(
                    "Rule type `{type_name}` declares field `{}` more than once",
                    field.name
                ));
            }
            field.type_info.validate().map_err(|e| {
                format!("Field `{}` of rule type `{type_name}`: {e}", field.name)
            })?;
        }
        Ok(ClassInfo { type_name, fields })
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn fields(&self) -> &[FieldInfo<R>] {
        &self.fields
    }

    ///
    /// Walks the given instance's fields in declared order.
    ///
    pub fn visit(&self, rule: &R, visitor: &mut dyn ValueVisitor) {
        for field in &self.fields {
            visitor.visit_field(field.name);
            (field.extract)(rule).accept(visitor);
        }
    }
}

///
/// A rule's buildable state, detached from the process that constructed it. The owning
/// description can rebuild an equivalent rule from this on another machine.
///
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SerializedRule {
    pub rule_type: String,
    pub target: BuildTarget,
    pub fields: Vec<(String, RuleValue)>,
}

impl SerializedRule {
    pub fn to_bytes(&self) -> Result<Vec<u8>, String> {
        bincode::serialize(self).map_err(|e| format!("Failed to serialize rule {}: {e}", self.target))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<SerializedRule, String> {
        bincode::deserialize(bytes).map_err(|e| format!("Failed to deserialize rule: {e}"))
    }

    pub fn field(&self, name: &str) -> Option<&RuleValue> {
        self.fields
            .iter()
            .find(|(field_name, _)| field_name == name)
            .map(|(_, value)| value)
    }
}

enum Frame {
    Opt,
    Seq(Vec<RuleValue>),
    Set(Vec<RuleValue>),
}

///
/// A ValueVisitor which reassembles the visited stream into (field name, value) pairs.
/// This is the serialization half of the shared traversal.
///
pub struct FieldCollector {
    fields: Vec<(String, RuleValue)>,
    current_name: Option<String>,
    stack: Vec<Frame>,
}

impl FieldCollector {
    pub fn new() -> FieldCollector {
        FieldCollector {
            fields: Vec::new(),
            current_name: None,
            stack: Vec::new(),
        }
    }

    pub fn into_fields(self) -> Vec<(String, RuleValue)> {
        self.fields
    }

    fn complete(&mut self, mut value: RuleValue) {
        loop {
            match self.stack.last_mut() {
                Some(Frame::Opt) => {
                    self.stack.pop();
                    value = RuleValue::Opt(Some(Box::new(value)));
                }
                Some(Frame::Seq(items)) | Some(Frame::Set(items)) => {
                    items.push(value);
                    return;
                }
                None => {
                    let name = self.current_name.take().unwrap_or_default();
                    self.fields.push((name, value));
                    return;
                }
            }
        }
    }
}

impl ValueVisitor for FieldCollector {
    fn visit_field(&mut self, name: &str) {
        self.current_name = Some(name.to_owned());
    }

    fn visit_str(&mut self, value: &str) {
        self.complete(RuleValue::Str(value.to_owned()));
    }

    fn visit_bool(&mut self, value: bool) {
        self.complete(RuleValue::Bool(value));
    }

    fn visit_num(&mut self, value: i64) {
        self.complete(RuleValue::Num(value));
    }

    fn visit_path(&mut self, value: &RelativePath) {
        self.complete(RuleValue::Path(value.clone()));
    }

    fn visit_output_path(&mut self, value: &RelativePath) {
        self.complete(RuleValue::OutputPath(value.clone()));
    }

    fn visit_public_output_path(&mut self, value: &RelativePath) {
        self.complete(RuleValue::PublicOutputPath(value.clone()));
    }

    fn visit_target(&mut self, value: &BuildTarget) {
        self.complete(RuleValue::Target(value.clone()));
    }

    fn visit_none(&mut self) {
        self.complete(RuleValue::Opt(None));
    }

    fn visit_some(&mut self) {
        self.stack.push(Frame::Opt);
    }

    fn visit_seq_start(&mut self, _len: usize) {
        self.stack.push(Frame::Seq(Vec::new()));
    }

    fn visit_seq_end(&mut self) {
        if let Some(Frame::Seq(items)) = self.stack.pop() {
            self.complete(RuleValue::Seq(items));
        }
    }

    fn visit_set_start(&mut self, _len: usize) {
        self.stack.push(Frame::Set(Vec::new()));
    }

    fn visit_set_end(&mut self) {
        if let Some(Frame::Set(items)) = self.stack.pop() {
            self.complete(RuleValue::Set(items));
        }
    }
}
