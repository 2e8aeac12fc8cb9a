//! Input-binding resolution.
//!
//! A node's `inputBindings` map dotted target paths to expressions. Each
//! expression is evaluated against the run's expression context and its
//! result written at the target path of a fresh object. A failing expression
//! only drops its own field.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use graphrun_core::error::EvalError;
use graphrun_core::graph::{Graph, Node};
use graphrun_core::log::LogPhase;
use graphrun_core::traits::ExpressionEvaluator;

use crate::context::RunContext;

/// Result of resolving a binding map.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub value: Value,
    /// `(target path, error)` for every binding that was skipped.
    pub failures: Vec<(String, EvalError)>,
}

/// Evaluate every binding against `context`, collecting failures instead of aborting.
pub fn resolve(
    bindings: &BTreeMap<String, String>,
    context: &Map<String, Value>,
    evaluator: &dyn ExpressionEvaluator,
) -> Resolved {
    let mut value = Value::Object(Map::new());
    let mut failures = Vec::new();

    for (path, expression) in bindings {
        match evaluator.evaluate(expression, context) {
            Ok(result) => set_path(&mut value, path, result),
            Err(e) => failures.push((path.clone(), e)),
        }
    }

    Resolved { value, failures }
}

/// Resolve `node`'s bindings against the current run state, logging skipped fields.
///
/// Returns an empty object when the node declares no bindings.
pub fn resolve_inputs(ctx: &RunContext, graph: &Graph, node: &Node) -> Value {
    let Some(bindings) = node.data.input_bindings.as_ref().filter(|b| !b.is_empty()) else {
        return Value::Object(Map::new());
    };

    let context = ctx.eval_context(graph);
    let resolved = resolve(bindings, &context, ctx.evaluator());
    for (path, error) in &resolved.failures {
        ctx.record(
            node,
            LogPhase::Warning,
            format!("Binding for '{}' skipped: {}", path, error),
        );
    }
    resolved.value
}

/// Write `value` at a dot-separated `path`, creating intermediate objects.
///
/// A non-object found on the way is replaced by an object.
pub fn set_path(target: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut cursor = target;
    for segment in parents {
        cursor = as_object(cursor)
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    as_object(cursor).insert(last.to_string(), value);
}

fn as_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

/// True for `null`, `{}`, `[]` and `""`.
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::CelEvaluator;
    use serde_json::json;

    fn bindings(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn context(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_nested_target_path() {
        let resolved = resolve(
            &bindings(&[("a.b", "NodeX")]),
            &context(json!({ "NodeX": 42, "state": {} })),
            &CelEvaluator,
        );
        assert_eq!(resolved.value, json!({ "a": { "b": 42 } }));
        assert!(resolved.failures.is_empty());
    }

    #[test]
    fn test_one_bad_binding_among_three() {
        let resolved = resolve(
            &bindings(&[
                ("query", "Search.text"),
                ("broken", "Search.text +"),
                ("count", "state.n"),
            ]),
            &context(json!({ "Search": { "text": "rust" }, "state": { "n": 2 } })),
            &CelEvaluator,
        );
        assert_eq!(resolved.value, json!({ "query": "rust", "count": 2 }));
        assert_eq!(resolved.failures.len(), 1);
        assert_eq!(resolved.failures[0].0, "broken");
    }

    #[test]
    fn test_set_path_merges_siblings() {
        let mut v = json!({});
        set_path(&mut v, "user.name", json!("ada"));
        set_path(&mut v, "user.age", json!(36));
        set_path(&mut v, "flag", json!(true));
        assert_eq!(v, json!({ "user": { "name": "ada", "age": 36 }, "flag": true }));
    }

    #[test]
    fn test_set_path_replaces_scalar_parent() {
        let mut v = json!({ "a": 1 });
        set_path(&mut v, "a.b", json!(2));
        assert_eq!(v, json!({ "a": { "b": 2 } }));
    }

    #[test]
    fn test_is_empty() {
        assert!(is_empty(&json!({})));
        assert!(is_empty(&json!(null)));
        assert!(!is_empty(&json!({ "a": null })));
        assert!(!is_empty(&json!(0)));
    }
}
