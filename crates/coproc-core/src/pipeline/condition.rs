//! `SKIP` condition evaluation against a JSON context.
//!
//! `field` is a dotted path (`plan.checks.0.status`); numeric segments index
//! into arrays. A missing field reads as `null`.

use std::cmp::Ordering;

use coproc_types::instruction::{ConditionOperator, SkipCondition};
use serde_json::Value;

/// Resolve a dotted path inside `context`.
pub fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(context, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Whether `condition` holds for `context`.
pub fn evaluate_condition(condition: &SkipCondition, context: &Value) -> bool {
    let actual = lookup(context, &condition.field).unwrap_or(&Value::Null);
    let expected = &condition.value;

    match condition.operator {
        ConditionOperator::Exists => !actual.is_null(),
        ConditionOperator::NotExists => actual.is_null(),
        ConditionOperator::Eq => values_equal(actual, expected),
        ConditionOperator::Ne => !values_equal(actual, expected),
        ConditionOperator::Gt => compare(actual, expected) == Some(Ordering::Greater),
        ConditionOperator::Gte => matches!(
            compare(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        ConditionOperator::Lt => compare(actual, expected) == Some(Ordering::Less),
        ConditionOperator::Lte => matches!(
            compare(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        ConditionOperator::Contains => contains(actual, expected),
    }
}

/// Equality with `1 == 1.0`.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Numbers compare numerically, strings lexicographically; anything else is unordered.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => needle.as_str().is_some_and(|n| s.contains(n)),
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        Value::Object(map) => needle.as_str().is_some_and(|key| map.contains_key(key)),
        _ => false,
    }
}
