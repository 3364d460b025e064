//! Declarative conditions, shared by the `condition` node and by
//! conditional edges (`edge.data.condition`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::template::lookup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    Exists,
    NotExists,
    Truthy,
    Falsy,
}

/// `field` is a dotted path into the data being tested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combinator {
    #[default]
    All,
    Any,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    #[serde(default)]
    pub combinator: Combinator,
    pub conditions: Vec<Condition>,
}

impl Condition {
    pub fn evaluate(&self, data: &Value) -> bool {
        let actual = lookup(data, &self.field);
        match self.operator {
            Operator::Exists => actual.is_some_and(|v| !v.is_null()),
            Operator::NotExists => actual.map_or(true, Value::is_null),
            Operator::Truthy => actual.is_some_and(truthy),
            Operator::Falsy => !actual.is_some_and(truthy),
            Operator::Eq => actual.is_some_and(|v| loose_eq(v, &self.value)),
            Operator::Ne => !actual.is_some_and(|v| loose_eq(v, &self.value)),
            Operator::Gt => compare(actual, &self.value).is_some_and(|o| o.is_gt()),
            Operator::Gte => compare(actual, &self.value).is_some_and(|o| o.is_ge()),
            Operator::Lt => compare(actual, &self.value).is_some_and(|o| o.is_lt()),
            Operator::Lte => compare(actual, &self.value).is_some_and(|o| o.is_le()),
            Operator::Contains => match actual {
                Some(Value::String(s)) => self.value.as_str().is_some_and(|needle| s.contains(needle)),
                Some(Value::Array(items)) => items.iter().any(|i| loose_eq(i, &self.value)),
                Some(Value::Object(map)) => self.value.as_str().is_some_and(|k| map.contains_key(k)),
                _ => false,
            },
        }
    }
}

impl ConditionGroup {
    /// An empty group is vacuously true.
    pub fn evaluate(&self, data: &Value) -> bool {
        match self.combinator {
            Combinator::All => self.conditions.iter().all(|c| c.evaluate(data)),
            Combinator::Any => {
                self.conditions.is_empty() || self.conditions.iter().any(|c| c.evaluate(data))
            }
        }
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Numbers compare numerically; `"5"` equals `5`.
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn compare(actual: Option<&Value>, expected: &Value) -> Option<std::cmp::Ordering> {
    let actual = actual?;
    if let (Some(x), Some(y)) = (as_number(actual), as_number(expected)) {
        return x.partial_cmp(&y);
    }
    match (actual, expected) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cond(field: &str, operator: Operator, value: Value) -> Condition {
        Condition { field: field.into(), operator, value }
    }

    #[test]
    fn numeric_comparisons_coerce_strings() {
        let data = json!({ "order": { "total": "120.5" } });
        assert!(cond("order.total", Operator::Gt, json!(100)).evaluate(&data));
        assert!(cond("order.total", Operator::Eq, json!(120.5)).evaluate(&data));
        assert!(!cond("order.total", Operator::Lt, json!(3)).evaluate(&data));
    }

    #[test]
    fn existence_and_truthiness() {
        let data = json!({ "a": null, "b": [], "c": "x" });
        assert!(cond("a", Operator::NotExists, Value::Null).evaluate(&data));
        assert!(cond("zzz", Operator::NotExists, Value::Null).evaluate(&data));
        assert!(cond("b", Operator::Falsy, Value::Null).evaluate(&data));
        assert!(cond("c", Operator::Truthy, Value::Null).evaluate(&data));
    }

    #[test]
    fn contains_handles_strings_arrays_and_objects() {
        let data = json!({ "tags": ["vip", "eu"], "name": "flowforge", "meta": { "k": 1 } });
        assert!(cond("tags", Operator::Contains, json!("vip")).evaluate(&data));
        assert!(cond("name", Operator::Contains, json!("forge")).evaluate(&data));
        assert!(cond("meta", Operator::Contains, json!("k")).evaluate(&data));
    }

    #[test]
    fn group_combinators() {
        let data = json!({ "x": 1 });
        let group = ConditionGroup {
            combinator: Combinator::Any,
            conditions: vec![
                cond("x", Operator::Eq, json!(2)),
                cond("x", Operator::Eq, json!(1)),
            ],
        };
        assert!(group.evaluate(&data));
        let all = ConditionGroup { combinator: Combinator::All, ..group };
        assert!(!all.evaluate(&data));
    }
}
