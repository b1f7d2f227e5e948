//! Expression runtime used by `update` steps.
//!
//! Expressions are JSON trees: an array whose first element names a
//! registered operator is a call, anything else is a literal (arrays and
//! objects have their members evaluated). Operators are plain functions held
//! in an [`Operators`] table, so the set of things an expression can do is
//! closed and fixed at build time.
//!
//! An expression sees exactly two inputs: the mutation-site object and the
//! current value of the key being updated.
//!
//! | form | result |
//! |---|---|
//! | `["var", "a.b"]` | dot-path read from the site, `null` when absent |
//! | `["value"]` | current value of the updated key |
//! | `["site"]` | the whole site object |
//! | `["u.substring", x, 1]` | string helpers live under `u.` |

use crate::path::resolve_value_str;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value, json};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

pub type EvalResult = Result<Value, EvalError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

/// Inputs visible to an expression while one site is evaluated.
pub struct Context<'a> {
    pub site: &'a Map<String, Value>,
    pub value: &'a Value,
    pub operators: &'a Operators,
}

pub type Operator = fn(args: &[Value], ctx: &Context) -> EvalResult;

pub struct Operators {
    ops: HashMap<String, Operator>,
}

impl Operators {
    pub fn new() -> Self {
        let mut ops: HashMap<String, Operator> = HashMap::new();
        ops.insert("var".into(), op_var as Operator);
        ops.insert("value".into(), op_value as Operator);
        ops.insert("site".into(), op_site as Operator);
        ops.insert("+".into(), op_add as Operator);
        ops.insert("-".into(), op_sub as Operator);
        ops.insert("*".into(), op_mul as Operator);
        ops.insert("/".into(), op_div as Operator);
        ops.insert("%".into(), op_mod as Operator);
        ops.insert("==".into(), op_eq as Operator);
        ops.insert("!=".into(), op_neq as Operator);
        ops.insert(">".into(), op_gt as Operator);
        ops.insert("<".into(), op_lt as Operator);
        ops.insert(">=".into(), op_gte as Operator);
        ops.insert("<=".into(), op_lte as Operator);
        ops.insert("if".into(), op_if as Operator);
        ops.insert("&&".into(), op_and as Operator);
        ops.insert("||".into(), op_or as Operator);
        ops.insert("!".into(), op_not as Operator);
        ops.insert("coalesce".into(), op_coalesce as Operator);
        ops.insert("match".into(), op_match as Operator);
        ops.insert("u.concat".into(), op_concat as Operator);
        ops.insert("u.lower".into(), op_lower as Operator);
        ops.insert("u.upper".into(), op_upper as Operator);
        ops.insert("u.contains".into(), op_contains as Operator);
        ops.insert("u.template".into(), op_template as Operator);
        ops.insert("u.substring".into(), op_substring as Operator);
        ops.insert("u.replace".into(), op_replace as Operator);
        ops.insert("u.split".into(), op_split as Operator);
        ops.insert("u.to_int".into(), op_to_int as Operator);
        ops.insert("u.to_float".into(), op_to_float as Operator);
        ops.insert("u.to_string".into(), op_to_string as Operator);
        ops.insert("u.trim".into(), op_trim as Operator);
        ops.insert("u.str_len".into(), op_str_len as Operator);
        ops.insert("len".into(), op_len as Operator);
        ops.insert("get".into(), op_get as Operator);
        Self { ops }
    }

    pub fn get(&self, name: &str) -> Option<Operator> {
        self.ops.get(name).copied()
    }

    pub fn register(&mut self, name: impl Into<String>, operator: Operator) -> Option<Operator> {
        self.ops.insert(name.into(), operator)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ops.keys().map(String::as_str)
    }
}

impl Default for Operators {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Operators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("Operators").field("ops", &names).finish()
    }
}

pub fn evaluate(node: &Value, ctx: &Context) -> EvalResult {
    match node {
        Value::Array(arr) => {
            if arr.is_empty() {
                return Ok(Value::Array(vec![]));
            }
            if let Some(op_name) = arr.first().and_then(|v| v.as_str()) {
                if let Some(op) = ctx.operators.get(op_name) {
                    return op(&arr[1..], ctx);
                }
            }
            let mut out = Vec::with_capacity(arr.len());
            for item in arr {
                out.push(evaluate(item, ctx)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(obj) => {
            let mut out = Map::new();
            for (k, v) in obj {
                out.insert(k.clone(), evaluate(v, ctx)?);
            }
            Ok(Value::Object(out))
        }
        _ => Ok(node.clone()),
    }
}

fn require_arg<'a>(args: &'a [Value], index: usize, op: &str) -> Result<&'a Value, EvalError> {
    args.get(index)
        .ok_or_else(|| EvalError::new(format!("{op} requires argument {index}")))
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|v| v as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(if *b { 1 } else { 0 }),
        _ => None,
    }
}

/// Integral results stay integers so `["+", 1, 2]` prints as `3`.
fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < i64::MAX as f64 {
        json!(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Value equality where numbers compare numerically (`1 == 1.0`).
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, l)| y.get(k).is_some_and(|r| values_equal(l, r)))
        }
        _ => a == b,
    }
}

fn cmp_numbers_or_strings(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => Some(text(a).cmp(&text(b))),
    }
}

fn op_var(args: &[Value], ctx: &Context) -> EvalResult {
    let raw = evaluate(require_arg(args, 0, "var")?, ctx)?;
    let Some(path) = raw.as_str() else {
        return Ok(Value::Null);
    };
    Ok(resolve_value_str(ctx.site, path)
        .cloned()
        .unwrap_or(Value::Null))
}

fn op_value(_args: &[Value], ctx: &Context) -> EvalResult {
    Ok(ctx.value.clone())
}

fn op_site(_args: &[Value], ctx: &Context) -> EvalResult {
    Ok(Value::Object(ctx.site.clone()))
}

fn op_add(args: &[Value], ctx: &Context) -> EvalResult {
    let mut total = 0.0;
    for arg in args {
        let v = evaluate(arg, ctx)?;
        total += as_f64(&v).unwrap_or(0.0);
    }
    Ok(number(total))
}

fn op_sub(args: &[Value], ctx: &Context) -> EvalResult {
    let first = evaluate(require_arg(args, 0, "-")?, ctx)?;
    let second = evaluate(require_arg(args, 1, "-")?, ctx)?;
    Ok(number(
        as_f64(&first).unwrap_or(0.0) - as_f64(&second).unwrap_or(0.0),
    ))
}

fn op_mul(args: &[Value], ctx: &Context) -> EvalResult {
    let mut product = 1.0;
    for arg in args {
        let v = evaluate(arg, ctx)?;
        product *= as_f64(&v).unwrap_or(0.0);
    }
    Ok(number(product))
}

fn op_div(args: &[Value], ctx: &Context) -> EvalResult {
    let a = evaluate(require_arg(args, 0, "/")?, ctx)?;
    let b = evaluate(require_arg(args, 1, "/")?, ctx)?;
    let denom = as_f64(&b).unwrap_or(0.0);
    if denom == 0.0 {
        return Err(EvalError::new("div by zero"));
    }
    Ok(number(as_f64(&a).unwrap_or(0.0) / denom))
}

fn op_mod(args: &[Value], ctx: &Context) -> EvalResult {
    let a = evaluate(require_arg(args, 0, "%")?, ctx)?;
    let b = evaluate(require_arg(args, 1, "%")?, ctx)?;
    let denom = as_i64(&b).unwrap_or(0);
    if denom == 0 {
        return Err(EvalError::new("mod by zero"));
    }
    as_i64(&a)
        .unwrap_or(0)
        .checked_rem(denom)
        .map(|r| json!(r))
        .ok_or_else(|| EvalError::new("mod overflow"))
}

fn op_eq(args: &[Value], ctx: &Context) -> EvalResult {
    let a = evaluate(require_arg(args, 0, "==")?, ctx)?;
    let b = evaluate(require_arg(args, 1, "==")?, ctx)?;
    Ok(Value::Bool(values_equal(&a, &b)))
}

fn op_neq(args: &[Value], ctx: &Context) -> EvalResult {
    let a = evaluate(require_arg(args, 0, "!=")?, ctx)?;
    let b = evaluate(require_arg(args, 1, "!=")?, ctx)?;
    Ok(Value::Bool(!values_equal(&a, &b)))
}

fn op_gt(args: &[Value], ctx: &Context) -> EvalResult {
    let a = evaluate(require_arg(args, 0, ">")?, ctx)?;
    let b = evaluate(require_arg(args, 1, ">")?, ctx)?;
    Ok(Value::Bool(
        cmp_numbers_or_strings(&a, &b).is_some_and(|o| o.is_gt()),
    ))
}

fn op_lt(args: &[Value], ctx: &Context) -> EvalResult {
    let a = evaluate(require_arg(args, 0, "<")?, ctx)?;
    let b = evaluate(require_arg(args, 1, "<")?, ctx)?;
    Ok(Value::Bool(
        cmp_numbers_or_strings(&a, &b).is_some_and(|o| o.is_lt()),
    ))
}

fn op_gte(args: &[Value], ctx: &Context) -> EvalResult {
    let a = evaluate(require_arg(args, 0, ">=")?, ctx)?;
    let b = evaluate(require_arg(args, 1, ">=")?, ctx)?;
    Ok(Value::Bool(
        cmp_numbers_or_strings(&a, &b).is_some_and(|o| !o.is_lt()),
    ))
}

fn op_lte(args: &[Value], ctx: &Context) -> EvalResult {
    let a = evaluate(require_arg(args, 0, "<=")?, ctx)?;
    let b = evaluate(require_arg(args, 1, "<=")?, ctx)?;
    Ok(Value::Bool(
        cmp_numbers_or_strings(&a, &b).is_some_and(|o| !o.is_gt()),
    ))
}

fn op_if(args: &[Value], ctx: &Context) -> EvalResult {
    let cond = evaluate(require_arg(args, 0, "if")?, ctx)?;
    if truthy(&cond) {
        if let Some(t) = args.get(1) {
            evaluate(t, ctx)
        } else {
            Ok(Value::Null)
        }
    } else if let Some(f) = args.get(2) {
        evaluate(f, ctx)
    } else {
        Ok(Value::Null)
    }
}

fn op_and(args: &[Value], ctx: &Context) -> EvalResult {
    let mut last = Value::Bool(true);
    for arg in args {
        last = evaluate(arg, ctx)?;
        if !truthy(&last) {
            return Ok(Value::Bool(false));
        }
    }
    Ok(last)
}

fn op_or(args: &[Value], ctx: &Context) -> EvalResult {
    for arg in args {
        let v = evaluate(arg, ctx)?;
        if truthy(&v) {
            return Ok(v);
        }
    }
    Ok(Value::Bool(false))
}

fn op_not(args: &[Value], ctx: &Context) -> EvalResult {
    let v = evaluate(require_arg(args, 0, "!")?, ctx)?;
    Ok(Value::Bool(!truthy(&v)))
}

fn op_coalesce(args: &[Value], ctx: &Context) -> EvalResult {
    for arg in args {
        let v = evaluate(arg, ctx)?;
        if !v.is_null() {
            return Ok(v);
        }
    }
    Ok(Value::Null)
}

fn op_match(args: &[Value], ctx: &Context) -> EvalResult {
    let value = evaluate(require_arg(args, 0, "match")?, ctx)?;
    let mut i = 1usize;
    while i + 1 < args.len() {
        let pat = evaluate(&args[i], ctx)?;
        if pat == Value::String("_".to_string()) || values_equal(&pat, &value) {
            return evaluate(&args[i + 1], ctx);
        }
        i += 2;
    }
    Ok(Value::Null)
}

fn op_concat(args: &[Value], ctx: &Context) -> EvalResult {
    let mut out = String::new();
    for arg in args {
        out.push_str(&text(&evaluate(arg, ctx)?));
    }
    Ok(Value::String(out))
}

fn op_lower(args: &[Value], ctx: &Context) -> EvalResult {
    let v = evaluate(require_arg(args, 0, "u.lower")?, ctx)?;
    Ok(Value::String(text(&v).to_lowercase()))
}

fn op_upper(args: &[Value], ctx: &Context) -> EvalResult {
    let v = evaluate(require_arg(args, 0, "u.upper")?, ctx)?;
    Ok(Value::String(text(&v).to_uppercase()))
}

fn op_contains(args: &[Value], ctx: &Context) -> EvalResult {
    let hay = evaluate(require_arg(args, 0, "u.contains")?, ctx)?;
    let needle = evaluate(require_arg(args, 1, "u.contains")?, ctx)?;
    let result = match hay {
        Value::String(s) => s.contains(&text(&needle)),
        Value::Array(arr) => arr.iter().any(|item| values_equal(item, &needle)),
        Value::Object(obj) => needle.as_str().is_some_and(|k| obj.contains_key(k)),
        _ => false,
    };
    Ok(Value::Bool(result))
}

fn op_template(args: &[Value], ctx: &Context) -> EvalResult {
    let fmt = evaluate(require_arg(args, 0, "u.template")?, ctx)?;
    let mut out = text(&fmt);
    for arg in &args[1..] {
        let rep = text(&evaluate(arg, ctx)?);
        if out.contains("{}") {
            out = out.replacen("{}", &rep, 1);
        }
    }
    Ok(Value::String(out))
}

/// Character-based substring with clamping: negative bounds become 0,
/// bounds past the end become the length, and reversed bounds are swapped.
fn op_substring(args: &[Value], ctx: &Context) -> EvalResult {
    let v = evaluate(require_arg(args, 0, "u.substring")?, ctx)?;
    let start = evaluate(require_arg(args, 1, "u.substring")?, ctx)?;
    let s = text(&v);
    let len = s.chars().count() as i64;
    let clamp = |n: i64| n.clamp(0, len) as usize;
    let from = clamp(as_i64(&start).unwrap_or(0));
    let to = match args.get(2) {
        Some(end) => clamp(as_i64(&evaluate(end, ctx)?).unwrap_or(len)),
        None => len as usize,
    };
    let (from, to) = if from > to { (to, from) } else { (from, to) };
    Ok(Value::String(s.chars().skip(from).take(to - from).collect()))
}

fn op_replace(args: &[Value], ctx: &Context) -> EvalResult {
    let v = evaluate(require_arg(args, 0, "u.replace")?, ctx)?;
    let from = evaluate(require_arg(args, 1, "u.replace")?, ctx)?;
    let to = evaluate(require_arg(args, 2, "u.replace")?, ctx)?;
    let from = text(&from);
    if from.is_empty() {
        return Ok(Value::String(text(&v)));
    }
    Ok(Value::String(text(&v).replace(&from, &text(&to))))
}

fn op_split(args: &[Value], ctx: &Context) -> EvalResult {
    let v = evaluate(require_arg(args, 0, "u.split")?, ctx)?;
    let sep = evaluate(require_arg(args, 1, "u.split")?, ctx)?;
    let s = text(&v);
    let sep = text(&sep);
    let parts: Vec<Value> = if sep.is_empty() {
        s.chars().map(|c| Value::String(c.to_string())).collect()
    } else {
        s.split(sep.as_str())
            .map(|p| Value::String(p.to_string()))
            .collect()
    };
    Ok(Value::Array(parts))
}

fn op_to_int(args: &[Value], ctx: &Context) -> EvalResult {
    let v = evaluate(require_arg(args, 0, "u.to_int")?, ctx)?;
    Ok(json!(as_i64(&v).unwrap_or(0)))
}

fn op_to_float(args: &[Value], ctx: &Context) -> EvalResult {
    let v = evaluate(require_arg(args, 0, "u.to_float")?, ctx)?;
    Ok(Number::from_f64(as_f64(&v).unwrap_or(0.0))
        .map(Value::Number)
        .unwrap_or(Value::Null))
}

fn op_to_string(args: &[Value], ctx: &Context) -> EvalResult {
    let v = evaluate(require_arg(args, 0, "u.to_string")?, ctx)?;
    Ok(Value::String(text(&v)))
}

fn op_trim(args: &[Value], ctx: &Context) -> EvalResult {
    let v = evaluate(require_arg(args, 0, "u.trim")?, ctx)?;
    Ok(Value::String(text(&v).trim().to_string()))
}

fn op_str_len(args: &[Value], ctx: &Context) -> EvalResult {
    let v = evaluate(require_arg(args, 0, "u.str_len")?, ctx)?;
    Ok(json!(text(&v).chars().count()))
}

fn op_len(args: &[Value], ctx: &Context) -> EvalResult {
    let v = evaluate(require_arg(args, 0, "len")?, ctx)?;
    let n = match v {
        Value::String(s) => s.chars().count(),
        Value::Array(a) => a.len(),
        Value::Object(o) => o.len(),
        _ => 0,
    };
    Ok(json!(n))
}

fn op_get(args: &[Value], ctx: &Context) -> EvalResult {
    let collection = evaluate(require_arg(args, 0, "get")?, ctx)?;
    let key = evaluate(require_arg(args, 1, "get")?, ctx)?;
    let out = match (collection, key) {
        (Value::Object(obj), Value::String(k)) => obj.get(&k).cloned(),
        (Value::Array(arr), Value::Number(n)) => {
            n.as_u64().and_then(|i| arr.get(i as usize).cloned())
        }
        (Value::Array(arr), Value::String(s)) => {
            s.parse::<usize>().ok().and_then(|i| arr.get(i).cloned())
        }
        _ => None,
    };
    Ok(out.unwrap_or(Value::Null))
}
