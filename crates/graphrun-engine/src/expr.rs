//! Expression evaluators.
//!
//! Graph documents are authored in CEL (`state.x > 5 && has(Search.hits)`),
//! evaluated by [`CelEvaluator`]. [`JinjaEvaluator`] accepts minijinja
//! expression syntax instead (`Search.hits | length`) for graphs written
//! against it. Both treat unknown identifiers as an error rather than
//! silently undefined.

use std::collections::HashMap;
use std::sync::Arc;

use cel_interpreter::objects::Key;
use cel_interpreter::{Context, ExecutionError, Program, Value as CelValue};
use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use serde_json::{Map, Number, Value};

use graphrun_core::config::ExpressionLanguage;
use graphrun_core::error::EvalError;
use graphrun_core::traits::ExpressionEvaluator;

/// Evaluator for the configured expression language.
pub fn evaluator_for(language: ExpressionLanguage) -> Arc<dyn ExpressionEvaluator> {
    match language {
        ExpressionLanguage::Cel => Arc::new(CelEvaluator),
        ExpressionLanguage::Jinja => Arc::new(JinjaEvaluator),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CelEvaluator;

impl CelEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl ExpressionEvaluator for CelEvaluator {
    fn evaluate(&self, expression: &str, context: &Map<String, Value>) -> Result<Value, EvalError> {
        let source = expression.trim();
        if source.is_empty() {
            return Err(EvalError::Empty);
        }

        let program = Program::compile(source).map_err(|e| EvalError::Syntax(e.to_string()))?;

        let mut variables = Context::default();
        for (name, value) in context {
            variables.add_variable_from_value(name.clone(), to_cel(value));
        }

        let value = program.execute(&variables).map_err(|e| match e {
            ExecutionError::UndeclaredReference(_) | ExecutionError::NoSuchKey(_) => {
                EvalError::Undefined(source.to_string())
            }
            other => EvalError::Runtime(other.to_string()),
        })?;

        from_cel(&value)
    }
}

/// Integral numbers become CEL `int` so they mix with integer literals.
fn to_cel(value: &Value) -> CelValue {
    match value {
        Value::Null => CelValue::Null,
        Value::Bool(b) => CelValue::Bool(*b),
        Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => CelValue::Int(i),
            (None, Some(u)) => CelValue::UInt(u),
            _ => CelValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => CelValue::String(Arc::new(s.clone())),
        Value::Array(items) => CelValue::from(items.iter().map(to_cel).collect::<Vec<_>>()),
        Value::Object(map) => CelValue::from(
            map.iter()
                .map(|(k, v)| (k.clone(), to_cel(v)))
                .collect::<HashMap<String, CelValue>>(),
        ),
    }
}

fn from_cel(value: &CelValue) -> Result<Value, EvalError> {
    Ok(match value {
        CelValue::Null => Value::Null,
        CelValue::Bool(b) => Value::Bool(*b),
        CelValue::Int(i) => Value::from(*i),
        CelValue::UInt(u) => Value::from(*u),
        CelValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        CelValue::String(s) => Value::String(s.to_string()),
        CelValue::List(items) => Value::Array(items.iter().map(from_cel).collect::<Result<_, _>>()?),
        CelValue::Map(map) => {
            let mut out = Map::new();
            for (key, item) in map.map.iter() {
                let key = match key {
                    Key::String(s) => s.to_string(),
                    Key::Int(i) => i.to_string(),
                    Key::Uint(u) => u.to_string(),
                    Key::Bool(b) => b.to_string(),
                };
                out.insert(key, from_cel(item)?);
            }
            Value::Object(out)
        }
        other => {
            return Err(EvalError::Runtime(format!(
                "result cannot be represented as JSON: {:?}",
                other
            )))
        }
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JinjaEvaluator;

impl JinjaEvaluator {
    pub fn new() -> Self {
        Self
    }
}

fn environment<'s>() -> Environment<'s> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env
}

impl ExpressionEvaluator for JinjaEvaluator {
    fn evaluate(&self, expression: &str, context: &Map<String, Value>) -> Result<Value, EvalError> {
        let source = expression.trim();
        if source.is_empty() {
            return Err(EvalError::Empty);
        }

        let env = environment();
        let compiled = env
            .compile_expression(source)
            .map_err(|e| EvalError::Syntax(e.to_string()))?;

        let value = compiled.eval(context).map_err(|e| match e.kind() {
            ErrorKind::UndefinedError => EvalError::Undefined(source.to_string()),
            _ => EvalError::Runtime(e.to_string()),
        })?;

        if value.is_undefined() {
            return Err(EvalError::Undefined(source.to_string()));
        }

        serde_json::to_value(&value).map_err(|e| EvalError::Runtime(e.to_string()))
    }
}

/// JSON-style truthiness: null, false, 0, NaN and "" are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
