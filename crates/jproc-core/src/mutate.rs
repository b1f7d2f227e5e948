//! In-place mutations addressed by dot-paths.
//!
//! Every mutator resolves its path against the document, turns the resolved
//! containers into a flat list of mutation sites, applies one kind of change
//! and returns how many locations it changed.

use crate::path::{DotPath, resolve_containers, resolve_value_str};
use crate::runtime::{Context, EvalError, Operators, evaluate};
use serde_json::{Map, Value};

static NULL: Value = Value::Null;

/// Resolve `container` and splice array results into a flat list of objects.
///
/// Order follows the document: depth-first, then array index. Non-object
/// array elements and scalar containers are not mutation sites.
pub fn flatten_targets<'a, S: AsRef<str>>(
    root: &'a mut Value,
    container: &[S],
) -> Vec<&'a mut Map<String, Value>> {
    let mut sites = Vec::new();
    for found in resolve_containers(root, container) {
        match found {
            Value::Array(items) => {
                sites.extend(items.iter_mut().filter_map(Value::as_object_mut));
            }
            Value::Object(obj) => sites.push(obj),
            _ => {}
        }
    }
    sites
}

/// Where a create/update step takes its new value from.
#[derive(Debug, Clone, Copy)]
pub enum ValueSpec<'a> {
    /// Non-blank string `source`: read relative to each site.
    SitePath(&'a str),
    /// Any other `source`, used verbatim.
    Literal(&'a Value),
    /// `value`, copied into every site.
    Constant(&'a Value),
    /// Expression evaluated per site with the key's current value.
    Expression(&'a Value),
}

impl<'a> ValueSpec<'a> {
    /// Classify a `source` field. Blank strings are literals, not paths.
    pub fn from_source(source: &'a Value) -> Self {
        match source.as_str() {
            Some(path) if !path.trim().is_empty() => ValueSpec::SitePath(path),
            _ => ValueSpec::Literal(source),
        }
    }

    /// `None` means the key ends up absent on the site.
    fn compute(
        &self,
        site: &Map<String, Value>,
        current: &Value,
        operators: &Operators,
    ) -> Result<Option<Value>, EvalError> {
        match self {
            ValueSpec::SitePath(path) => Ok(resolve_value_str(site, path).cloned()),
            ValueSpec::Literal(v) | ValueSpec::Constant(v) => Ok(Some((*v).clone())),
            ValueSpec::Expression(expr) => {
                let ctx = Context {
                    site,
                    value: current,
                    operators,
                };
                evaluate(expr, &ctx).map(Some)
            }
        }
    }
}

/// `None` leaves `key` absent, so later `update` steps no longer see it.
fn assign(site: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    match value {
        Some(v) => {
            site.insert(key.to_string(), v);
        }
        None => {
            site.shift_remove(key);
        }
    }
}

/// Delete the terminal key from every site reached by `path`.
pub fn remove_key(root: &mut Value, path: &DotPath) -> usize {
    flatten_targets(root, path.container())
        .into_iter()
        .filter_map(|site| site.shift_remove(path.terminal()))
        .count()
}

/// JavaScript `===` over JSON: numbers compare numerically, objects and
/// arrays are never identical to a configured value.
pub fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => false,
        _ => a == b,
    }
}

/// Drop elements of the arrays at `path.container()` whose property named by
/// the terminal segment strictly equals `expected`. Nested arrays below the
/// container are not searched.
pub fn remove_where_equals(root: &mut Value, path: &DotPath, expected: &Value) -> usize {
    let prop = path.terminal();
    retain_in_containers(root, path, |item| {
        item.as_object()
            .and_then(|obj| obj.get(prop))
            .is_some_and(|v| strict_equals(v, expected))
    })
}

/// Drop elements of the arrays at `path.container()` whose property named by
/// the terminal segment is an empty array.
pub fn remove_empty(root: &mut Value, path: &DotPath) -> usize {
    let prop = path.terminal();
    retain_in_containers(root, path, |item| {
        item.as_object()
            .and_then(|obj| obj.get(prop))
            .and_then(Value::as_array)
            .is_some_and(Vec::is_empty)
    })
}

fn retain_in_containers(
    root: &mut Value,
    path: &DotPath,
    doomed: impl Fn(&Value) -> bool,
) -> usize {
    let mut removed = 0;
    for container in resolve_containers(root, path.container()) {
        if let Value::Array(items) = container {
            let before = items.len();
            items.retain(|item| !doomed(item));
            removed += before - items.len();
        }
    }
    removed
}

/// Set the terminal key on every site, existing or not.
pub fn create(
    root: &mut Value,
    path: &DotPath,
    spec: ValueSpec<'_>,
    operators: &Operators,
) -> Result<usize, EvalError> {
    let sites = flatten_targets(root, path.container());
    write_sites(sites, path.terminal(), spec, operators)
}

/// Replace the terminal key only on sites that already own it.
pub fn update(
    root: &mut Value,
    path: &DotPath,
    spec: ValueSpec<'_>,
    operators: &Operators,
) -> Result<usize, EvalError> {
    let key = path.terminal();
    let sites = flatten_targets(root, path.container())
        .into_iter()
        .filter(|site| site.contains_key(key))
        .collect();
    write_sites(sites, key, spec, operators)
}

/// All new values are computed before any site is written, so an expression
/// failure leaves the document as it was.
fn write_sites(
    mut sites: Vec<&mut Map<String, Value>>,
    key: &str,
    spec: ValueSpec<'_>,
    operators: &Operators,
) -> Result<usize, EvalError> {
    let values = sites
        .iter()
        .map(|site| {
            let current = site.get(key).unwrap_or(&NULL);
            spec.compute(site, current, operators)
        })
        .collect::<Result<Vec<_>, _>>()?;
    let count = values.len();
    for (site, value) in sites.iter_mut().zip(values) {
        assign(site, key, value);
    }
    Ok(count)
}

/// Move the terminal key's value to `new_name` on every site that owns it.
pub fn rename(root: &mut Value, path: &DotPath, new_name: &str) -> usize {
    let old = path.terminal();
    let mut renamed = 0;
    for site in flatten_targets(root, path.container()) {
        if let Some(value) = site.shift_remove(old) {
            site.insert(new_name.to_string(), value);
            renamed += 1;
        }
    }
    renamed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p(raw: &str) -> DotPath {
        DotPath::parse(raw)
    }

    #[test]
    fn flatten_splices_arrays_in_document_order() {
        let mut doc = json!({"a": [{"b": [{"id": 1}, {"id": 2}]}, {"b": {"id": 3}}]});
        let ids: Vec<Value> = flatten_targets(&mut doc, &["a", "b"])
            .into_iter()
            .map(|site| site["id"].clone())
            .collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn flatten_skips_scalar_elements() {
        let mut doc = json!({"a": [1, {"k": 1}, null, "x"]});
        assert_eq!(flatten_targets(&mut doc, &["a"]).len(), 1);
    }

    #[test]
    fn remove_key_counts_deletions() {
        let mut doc = json!({"chats": [{"webUrl": "u", "id": 1}, {"id": 2}]});
        assert_eq!(remove_key(&mut doc, &p("chats.webUrl")), 1);
        assert_eq!(doc, json!({"chats": [{"id": 1}, {"id": 2}]}));
    }

    #[test]
    fn remove_key_at_root() {
        let mut doc = json!({"a": 1, "b": 2});
        assert_eq!(remove_key(&mut doc, &p("a")), 1);
        assert_eq!(doc, json!({"b": 2}));
    }

    #[test]
    fn strict_equality_rules() {
        assert!(strict_equals(&json!(1), &json!(1.0)));
        assert!(strict_equals(&json!("done"), &json!("done")));
        assert!(!strict_equals(&json!("1"), &json!(1)));
        assert!(!strict_equals(&json!(null), &json!(false)));
        assert!(!strict_equals(&json!({"a": 1}), &json!({"a": 1})));
        assert!(!strict_equals(&json!([1]), &json!([1])));
    }

    #[test]
    fn remove_where_equals_is_shallow() {
        let mut doc = json!({"items": [
            {"status": "done"},
            {"status": "open", "items": [{"status": "done"}]},
            {"other": 1}
        ]});
        assert_eq!(remove_where_equals(&mut doc, &p("items.status"), &json!("done")), 1);
        assert_eq!(
            doc,
            json!({"items": [
                {"status": "open", "items": [{"status": "done"}]},
                {"other": 1}
            ]})
        );
    }

    #[test]
    fn remove_where_equals_ignores_non_array_containers() {
        let mut doc = json!({"items": {"status": "done"}});
        assert_eq!(remove_where_equals(&mut doc, &p("items.status"), &json!("done")), 0);
        assert_eq!(doc, json!({"items": {"status": "done"}}));
    }

    #[test]
    fn remove_empty_only_drops_empty_arrays() {
        let mut doc = json!({"m": [
            {"r": []},
            {"r": ["like"]},
            {"r": ""},
            {"r": {}},
            {}
        ]});
        assert_eq!(remove_empty(&mut doc, &p("m.r")), 1);
        assert_eq!(doc["m"].as_array().map(Vec::len), Some(4));
    }

    #[test]
    fn create_from_site_path_and_literals() {
        let ops = Operators::new();
        let mut doc = json!({"m": [{"from": {"id": "a"}}, {"from": {}}]});
        let source = json!("from.id");
        let n = create(&mut doc, &p("m.fromId"), ValueSpec::from_source(&source), &ops).expect("create");
        assert_eq!(n, 2);
        assert_eq!(doc["m"][0]["fromId"], json!("a"));
        assert!(doc["m"][1].get("fromId").is_none());

        let blank = json!("  ");
        create(&mut doc, &p("m.blank"), ValueSpec::from_source(&blank), &ops).expect("create");
        assert_eq!(doc["m"][1]["blank"], json!("  "));

        let number = json!(7);
        create(&mut doc, &p("m.n"), ValueSpec::from_source(&number), &ops).expect("create");
        assert_eq!(doc["m"][0]["n"], json!(7));
    }

    #[test]
    fn create_constant_does_not_alias_configuration() {
        let ops = Operators::new();
        let constant = json!({"tags": []});
        let mut doc = json!({"u": [{}, {}]});
        create(&mut doc, &p("u.meta"), ValueSpec::Constant(&constant), &ops).expect("create");
        doc["u"][0]["meta"]["tags"]
            .as_array_mut()
            .expect("array")
            .push(json!("x"));
        assert_eq!(constant, json!({"tags": []}));
        assert_eq!(doc["u"][1]["meta"], json!({"tags": []}));
    }

    #[test]
    fn update_only_touches_existing_keys() {
        let ops = Operators::new();
        let value = json!(true);
        let mut doc = json!({"u": [{"a": false}, {"b": 1}]});
        let n = update(&mut doc, &p("u.a"), ValueSpec::Constant(&value), &ops).expect("update");
        assert_eq!(n, 1);
        assert_eq!(doc, json!({"u": [{"a": true}, {"b": 1}]}));
    }

    #[test]
    fn update_expression_sees_current_value() {
        let ops = Operators::new();
        let expr = json!(["u.upper", ["value"]]);
        let mut doc = json!({"u": [{"n": "alice"}]});
        update(&mut doc, &p("u.n"), ValueSpec::Expression(&expr), &ops).expect("update");
        assert_eq!(doc, json!({"u": [{"n": "ALICE"}]}));
    }

    #[test]
    fn failing_expression_leaves_document_untouched() {
        let ops = Operators::new();
        let expr = json!(["/", 10, ["var", "d"]]);
        let mut doc = json!({"r": [{"v": 1, "d": 2}, {"v": 1, "d": 0}]});
        let before = doc.clone();
        let err = update(&mut doc, &p("r.v"), ValueSpec::Expression(&expr), &ops)
            .expect_err("second site divides by zero");
        assert_eq!(err.message, "div by zero");
        assert_eq!(doc, before);
    }

    #[test]
    fn rename_moves_value() {
        let mut doc = json!({"data": {"oldKey": "value", "unchanged": "same"}});
        assert_eq!(rename(&mut doc, &p("data.oldKey"), "newKey"), 1);
        assert_eq!(doc, json!({"data": {"unchanged": "same", "newKey": "value"}}));
        assert_eq!(rename(&mut doc, &p("data.oldKey"), "newKey"), 0);
    }
}
