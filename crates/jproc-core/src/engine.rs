use crate::error::{ConfigError, StepError};
use crate::mutate::{self, ValueSpec};
use crate::reader;
use crate::runtime::{Operator, Operators};
use crate::steps::{
    CreateStep, PlannedStep, RemoveStep, Step, StepKind, StepList, Targets, UpdateStep, parse_steps,
};
use serde::Serialize;
use serde_json::Value;
use std::borrow::Cow;
use tracing::{debug, error, info, warn};

/// Engine-scoped execution surface for step lists.
///
/// Operator registration is instance-local, so two engines in one process
/// can carry different expression extensions.
#[derive(Debug, Default)]
pub struct Engine {
    operators: Operators,
}

impl Engine {
    /// Create a new engine with the built-in operators preloaded.
    pub fn new() -> Self {
        Self {
            operators: Operators::new(),
        }
    }

    /// Register or replace an expression operator.
    pub fn register(&mut self, name: impl Into<String>, operator: Operator) -> Option<Operator> {
        self.operators.register(name, operator)
    }

    /// Access the operator registry (read-only).
    pub fn operators(&self) -> &Operators {
        &self.operators
    }

    /// Validate a steps document. Nothing may run when this fails.
    pub fn check(&self, input: &Value) -> Result<StepList, ConfigError> {
        parse_steps(input)
    }

    /// Apply every step in order to `document`.
    ///
    /// A failing step is logged and recorded in the report; the steps after
    /// it still run against the document as it stands.
    pub fn run(&self, document: &mut Value, steps: &StepList) -> RunReport {
        let mut report = RunReport::default();
        for planned in steps {
            info!(step = planned.index, kind = %planned.kind, "applying step");
            let status = match self.apply(document, planned) {
                Ok(Some(effects)) => {
                    info!(step = planned.index, kind = %planned.kind, effects, "step applied");
                    StepStatus::Applied { effects }
                }
                Ok(None) => {
                    warn!(
                        step = planned.index,
                        kind = %planned.kind,
                        "step has neither source nor value, skipped"
                    );
                    StepStatus::NoDiscriminant
                }
                Err(err) => {
                    error!(step = planned.index, kind = %planned.kind, error = %err, "step failed");
                    StepStatus::Failed {
                        message: err.to_string(),
                    }
                }
            };
            report.steps.push(StepReport {
                index: planned.index,
                kind: planned.kind,
                status,
            });
        }
        report
    }

    /// `Ok(None)` marks a create/update with nothing to assign.
    fn apply(
        &self,
        document: &mut Value,
        planned: &PlannedStep,
    ) -> Result<Option<usize>, StepError> {
        let step = planned.step.as_ref().map_err(Clone::clone)?;
        match step {
            Step::Remove(remove) => Ok(Some(apply_remove(document, remove))),
            Step::Create(create) => self.apply_create(document, create),
            Step::Update(update) => self.apply_update(document, update),
            Step::Rename(rename) => Ok(Some(mutate::rename(
                document,
                &rename.target,
                &rename.new_name,
            ))),
            Step::RemoveEmpty(step) => Ok(Some(mutate::remove_empty(document, &step.target))),
        }
    }

    fn apply_create(
        &self,
        document: &mut Value,
        create: &CreateStep,
    ) -> Result<Option<usize>, StepError> {
        let spec = match (&create.source, &create.value) {
            (Some(source), _) => ValueSpec::from_source(source),
            (None, Some(value)) => ValueSpec::Constant(value),
            (None, None) => return Ok(None),
        };
        let count = mutate::create(document, &create.target, spec, &self.operators)?;
        Ok(Some(count))
    }

    fn apply_update(
        &self,
        document: &mut Value,
        update: &UpdateStep,
    ) -> Result<Option<usize>, StepError> {
        let expression = update.expression.as_ref().map(compile_expression).transpose()?;
        let spec = match (&expression, &update.source, &update.value) {
            (Some(expr), _, _) => ValueSpec::Expression(expr),
            (None, Some(source), _) => ValueSpec::from_source(source),
            (None, None, Some(value)) => ValueSpec::Constant(value),
            (None, None, None) => return Ok(None),
        };
        let count = mutate::update(document, &update.target, spec, &self.operators)?;
        Ok(Some(count))
    }
}

fn apply_remove(document: &mut Value, remove: &RemoveStep) -> usize {
    match (&remove.target, &remove.equals) {
        (Targets::Many(paths), _) => paths
            .iter()
            .map(|path| {
                let removed = mutate::remove_key(document, path);
                debug!(path = %path, removed, "removed key");
                removed
            })
            .sum(),
        (Targets::One(path), Some(expected)) => {
            mutate::remove_where_equals(document, path, expected)
        }
        (Targets::One(path), None) => mutate::remove_key(document, path),
    }
}

/// String expressions are s-expressions; anything else is already a tree.
fn compile_expression(expression: &Value) -> Result<Cow<'_, Value>, StepError> {
    match expression {
        Value::String(source) => Ok(Cow::Owned(reader::read(source)?)),
        tree => Ok(Cow::Borrowed(tree)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum StepStatus {
    Applied { effects: usize },
    NoDiscriminant,
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub kind: StepKind,
    #[serde(flatten)]
    pub status: StepStatus,
}

impl StepReport {
    pub fn effects(&self) -> usize {
        match self.status {
            StepStatus::Applied { effects } => effects,
            _ => 0,
        }
    }
}

/// Outcome of one [`Engine::run`], one entry per step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub steps: Vec<StepReport>,
}

impl RunReport {
    pub fn total_effects(&self) -> usize {
        self.steps.iter().map(StepReport::effects).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepReport> {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Failed { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Context, EvalResult};
    use serde_json::json;

    fn run(doc: &mut Value, steps: Value) -> RunReport {
        let engine = Engine::new();
        let list = engine.check(&steps).expect("valid steps");
        engine.run(doc, &list)
    }

    #[test]
    fn update_sets_value_on_every_site() {
        let mut doc = json!({"u": [{"n": "Alice", "a": false}, {"n": "Bob", "a": false}]});
        let report = run(
            &mut doc,
            json!({"steps": [{"type": "update", "target": "u.a", "value": true}]}),
        );
        assert_eq!(doc, json!({"u": [{"n": "Alice", "a": true}, {"n": "Bob", "a": true}]}));
        assert_eq!(report.total_effects(), 2);
    }

    #[test]
    fn failing_step_does_not_stop_later_steps() {
        let mut doc = json!({"d": {"a": 1, "b": 2}});
        let report = run(
            &mut doc,
            json!({"steps": [
                {"type": "rename", "target": "d.a"},
                {"type": "update", "target": "d.b", "expression": ["/", ["value"], 0]},
                {"type": "remove", "target": "d.a"}
            ]}),
        );
        assert_eq!(doc, json!({"d": {"b": 2}}));
        assert_eq!(report.failures().count(), 2);
        assert_eq!(report.steps[2].status, StepStatus::Applied { effects: 1 });
    }

    #[test]
    fn missing_discriminant_is_a_noop() {
        let mut doc = json!({"d": {"a": 1}});
        let report = run(
            &mut doc,
            json!({"steps": [
                {"type": "create", "target": "d.b"},
                {"type": "update", "target": "d.a"}
            ]}),
        );
        assert_eq!(doc, json!({"d": {"a": 1}}));
        assert!(report.steps.iter().all(|s| s.status == StepStatus::NoDiscriminant));
    }

    #[test]
    fn update_precedence_expression_then_source_then_value() {
        let mut doc = json!({"d": [{"a": "hello", "b": "src"}]});
        run(
            &mut doc,
            json!({"steps": [
                {"type": "update", "target": "d.a", "exp": "(u.upper $value)", "source": "b", "value": 0}
            ]}),
        );
        assert_eq!(doc, json!({"d": [{"a": "HELLO", "b": "src"}]}));

        run(
            &mut doc,
            json!({"steps": [{"type": "update", "target": "d.a", "source": "b", "value": 0}]}),
        );
        assert_eq!(doc["d"][0]["a"], json!("src"));
    }

    #[test]
    fn create_prefers_source_over_value() {
        let mut doc = json!({"d": {"x": 5}});
        run(
            &mut doc,
            json!({"steps": [{"type": "create", "target": "d.y", "source": "x", "value": 1}]}),
        );
        assert_eq!(doc, json!({"d": {"x": 5, "y": 5}}));
    }

    #[test]
    fn remove_list_mode_ignores_equals() {
        let mut doc = json!({"a": [{"k": 1, "j": 2}], "b": {"k": 3}});
        let report = run(
            &mut doc,
            json!({"steps": [{"type": "remove", "target": ["a.k", "b.k"], "equals": 1}]}),
        );
        assert_eq!(doc, json!({"a": [{"j": 2}], "b": {}}));
        assert_eq!(report.total_effects(), 2);
    }

    #[test]
    fn remove_with_equals_splices_elements() {
        let mut doc = json!({"items": [{"status": "done"}, {"status": "open"}, {}]});
        run(
            &mut doc,
            json!({"steps": [{"type": "remove", "target": "items.status", "equals": "done"}]}),
        );
        assert_eq!(doc, json!({"items": [{"status": "open"}, {}]}));
    }

    #[test]
    fn unreadable_expression_fails_the_step() {
        let mut doc = json!({"d": {"a": 1}});
        let report = run(
            &mut doc,
            json!({"steps": [{"type": "update", "target": "d.a", "exp": "(+ 1"}]}),
        );
        assert_eq!(doc, json!({"d": {"a": 1}}));
        match &report.steps[0].status {
            StepStatus::Failed { message } => assert!(message.contains("unbalanced")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn modulo_overflow_fails_only_its_step() {
        let mut doc = json!({"d": {"a": i64::MIN, "b": 1}});
        let report = run(
            &mut doc,
            json!({"steps": [
                {"type": "update", "target": "d.a", "exp": ["%", ["value"], -1]},
                {"type": "remove", "target": "d.b"}
            ]}),
        );
        assert_eq!(doc, json!({"d": {"a": i64::MIN}}));
        match &report.steps[0].status {
            StepStatus::Failed { message } => assert!(message.contains("mod overflow")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(report.steps[1].status, StepStatus::Applied { effects: 1 });
    }

    #[test]
    fn deeply_nested_expression_fails_only_its_step() {
        let exp = format!("{}$value{}", "(u.trim ".repeat(20_000), ")".repeat(20_000));
        let mut doc = json!({"d": {"a": " x ", "b": 1}});
        let report = run(
            &mut doc,
            json!({"steps": [
                {"type": "update", "target": "d.a", "exp": exp},
                {"type": "remove", "target": "d.b"}
            ]}),
        );
        assert_eq!(doc, json!({"d": {"a": " x "}}));
        match &report.steps[0].status {
            StepStatus::Failed { message } => assert!(message.contains("nested deeper")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(report.steps[1].status, StepStatus::Applied { effects: 1 });
    }

    #[test]
    fn missing_source_leaves_key_absent_for_later_updates() {
        let mut doc = json!({"u": [{"a": 1}]});
        let report = run(
            &mut doc,
            json!({"steps": [
                {"type": "update", "target": "u.a", "source": "missing"},
                {"type": "update", "target": "u.a", "value": 5}
            ]}),
        );
        assert_eq!(doc, json!({"u": [{}]}));
        assert_eq!(report.steps[0].status, StepStatus::Applied { effects: 1 });
        assert_eq!(report.steps[1].status, StepStatus::Applied { effects: 0 });
    }

    #[test]
    fn null_exp_assigns_null_ahead_of_value() {
        let mut doc = json!({"d": [{"a": "x"}]});
        let report = run(
            &mut doc,
            json!({"steps": [{"type": "update", "target": "d.a", "exp": null, "value": 1}]}),
        );
        assert_eq!(doc, json!({"d": [{"a": null}]}));
        assert_eq!(report.total_effects(), 1);
    }

    #[test]
    fn exp_and_expression_together_fail_only_that_step() {
        let mut doc = json!({"d": [{"a": "x", "b": 1}]});
        let report = run(
            &mut doc,
            json!({"steps": [
                {"type": "update", "target": "d.a", "exp": 1, "expression": 2},
                {"type": "remove", "target": "d.b"}
            ]}),
        );
        assert_eq!(doc, json!({"d": [{"a": "x"}]}));
        assert!(matches!(report.steps[0].status, StepStatus::Failed { .. }));
        assert_eq!(report.steps[1].status, StepStatus::Applied { effects: 1 });
    }

    fn op_shout(args: &[Value], ctx: &Context) -> EvalResult {
        let v = match args.first() {
            Some(node) => crate::runtime::evaluate(node, ctx)?,
            None => ctx.value.clone(),
        };
        Ok(json!(format!("{}!", v.as_str().unwrap_or_default())))
    }

    #[test]
    fn registered_operator_is_available_to_steps() {
        let mut engine = Engine::new();
        engine.register("x.shout", op_shout);
        let steps = engine
            .check(&json!({"steps": [{"type": "update", "target": "d.a", "exp": ["x.shout"]}]}))
            .expect("valid");
        let mut doc = json!({"d": {"a": "hey"}});
        engine.run(&mut doc, &steps);
        assert_eq!(doc, json!({"d": {"a": "hey!"}}));
    }

    #[test]
    fn report_serializes_with_status_tag() {
        let report = RunReport {
            steps: vec![StepReport {
                index: 0,
                kind: StepKind::RemoveEmpty,
                status: StepStatus::Applied { effects: 3 },
            }],
        };
        assert_eq!(
            serde_json::to_value(&report).expect("serialize"),
            json!({"steps": [{"index": 0, "kind": "removeEmpty", "status": "applied", "effects": 3}]})
        );
    }
}
