//! Steps document contract and validation.
//!
//! A steps document is `{ "steps": [ ... ] }`. Validation only checks that
//! every entry carries a known `type`; the rest of each entry is decoded per
//! step so that one badly shaped step fails alone at run time instead of
//! rejecting the whole document.
//!
//! | type | fields | notes |
//! |---|---|---|
//! | `remove` | `target` (path or list), `equals`? | `equals` drops array elements instead of keys |
//! | `create` | `target`, `source`? / `value`? | always assigns |
//! | `update` | `target`, `expression`/`exp`? / `source`? / `value`? | only existing keys |
//! | `rename` | `target`, `newName` | |
//! | `removeEmpty` | `target` | drops elements whose property is `[]` |

use crate::error::{ConfigError, StepError, StepIssue};
use crate::path::DotPath;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepKind {
    Remove,
    Create,
    RemoveEmpty,
    Rename,
    Update,
}

impl StepKind {
    pub const ALL: [StepKind; 5] = [
        StepKind::Remove,
        StepKind::Create,
        StepKind::RemoveEmpty,
        StepKind::Rename,
        StepKind::Update,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::Remove => "remove",
            StepKind::Create => "create",
            StepKind::RemoveEmpty => "removeEmpty",
            StepKind::Rename => "rename",
            StepKind::Update => "update",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deserialize a field so that an explicit `null` is still "present".
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// `remove` accepts one path or a list of paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Targets {
    One(DotPath),
    Many(Vec<DotPath>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveStep {
    pub target: Targets,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub equals: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateStep {
    pub target: DotPath,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveEmptyStep {
    pub target: DotPath,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameStep {
    pub target: DotPath,
    #[serde(rename = "newName")]
    pub new_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateStep {
    pub target: DotPath,
    /// JSON expression tree, or an s-expression string. `null` is a literal
    /// null expression. Giving both `exp` and `expression` is malformed.
    #[serde(
        default,
        alias = "exp",
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub expression: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Step {
    Remove(RemoveStep),
    Create(CreateStep),
    RemoveEmpty(RemoveEmptyStep),
    Rename(RenameStep),
    Update(UpdateStep),
}

impl Step {
    pub fn kind(&self) -> StepKind {
        match self {
            Step::Remove(_) => StepKind::Remove,
            Step::Create(_) => StepKind::Create,
            Step::RemoveEmpty(_) => StepKind::RemoveEmpty,
            Step::Rename(_) => StepKind::Rename,
            Step::Update(_) => StepKind::Update,
        }
    }
}

/// A validated entry: its kind is known, its body may still be malformed.
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub index: usize,
    pub kind: StepKind,
    pub step: Result<Step, StepError>,
}

/// Ordered, validated step list. Order is execution order.
#[derive(Debug, Clone, Default)]
pub struct StepList {
    steps: Vec<PlannedStep>,
}

impl StepList {
    /// Build from already-typed steps.
    pub fn from_steps(steps: impl IntoIterator<Item = Step>) -> Self {
        let steps = steps
            .into_iter()
            .enumerate()
            .map(|(index, step)| PlannedStep {
                index,
                kind: step.kind(),
                step: Ok(step),
            })
            .collect();
        Self { steps }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PlannedStep> {
        self.steps.iter()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl<'a> IntoIterator for &'a StepList {
    type Item = &'a PlannedStep;
    type IntoIter = std::slice::Iter<'a, PlannedStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

/// Validate a steps document and decode its entries.
///
/// Every entry with an unknown or missing `type` is reported, not only the
/// first one.
pub fn parse_steps(input: &Value) -> Result<StepList, ConfigError> {
    let obj = input.as_object().ok_or(ConfigError::NotAnObject)?;
    let entries = obj
        .get("steps")
        .and_then(Value::as_array)
        .ok_or(ConfigError::MissingSteps)?;

    let mut issues = Vec::new();
    let mut steps = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let type_field = entry.get("type");
        match type_field.and_then(Value::as_str).and_then(StepKind::parse) {
            Some(kind) => steps.push(PlannedStep {
                index,
                kind,
                step: decode_step(entry, kind),
            }),
            None => {
                let shown = match type_field {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => "undefined".to_string(),
                };
                issues.push(StepIssue::new(
                    "JPROC_E_STEP_TYPE",
                    format!("unknown or missing type '{shown}'"),
                    index,
                    type_field.and_then(Value::as_str).map(str::to_owned),
                ));
            }
        }
    }

    if !issues.is_empty() {
        return Err(ConfigError::InvalidSteps(issues));
    }
    Ok(StepList { steps })
}

fn decode_step(entry: &Value, kind: StepKind) -> Result<Step, StepError> {
    serde_json::from_value(entry.clone()).map_err(|err| StepError::Malformed {
        kind,
        message: err.to_string(),
    })
}
