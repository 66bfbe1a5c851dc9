//! JEXL expression evaluator for condition, loop-until, and event-exit
//! expressions.
//!
//! Wraps `jexl_eval::Evaluator` with pre-registered standard transforms.
//! Expressions are parsed, never executed as host code, and the data
//! they see is always passed as a context object, NEVER interpolated
//! into the expression string.

use serde_json::{json, Value};

use ensemble_types::prompt::PromptValue;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during expression evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("Expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("Invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// ExpressionEvaluator
// ---------------------------------------------------------------------------

/// JEXL evaluator with standard transforms pre-registered.
///
/// Used for:
/// - Conditional step branching (`'deploy' in input`)
/// - Loop termination (`input|length > 100`)
/// - Event-mode exit expressions (`final_prompt|contains('done')`)
pub struct ExpressionEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl ExpressionEvaluator {
    /// Create a new evaluator with all standard transforms registered.
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            // String transforms
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.trim()))
            })
            // String search transforms
            .with_transform("contains", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let search = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.contains(search)))
            })
            .with_transform("startsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.starts_with(prefix)))
            })
            .with_transform("endsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let suffix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.ends_with(suffix)))
            })
            // Boolean transform
            .with_transform("not", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!value_to_bool(&val)))
            })
            // Length transform (works on strings, arrays, and objects)
            .with_transform("length", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                let len = match &val {
                    Value::String(s) => s.len(),
                    Value::Array(a) => a.len(),
                    Value::Object(o) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Evaluate an expression against a step output, bound as `input`.
    ///
    /// A scalar prompt appears as a string, a sequence as an array of
    /// strings. Results are coerced to boolean with JavaScript-like
    /// truthiness rules.
    pub fn evaluate(&self, expression: &str, prompt: &PromptValue) -> Result<bool, ExpressionError> {
        let context = json!({ "input": prompt.to_json() });
        self.evaluate_object(expression, &context)
    }

    /// Evaluate an expression against an arbitrary JSON object context.
    pub fn evaluate_object(
        &self,
        expression: &str,
        context: &Value,
    ) -> Result<bool, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }

        let result = self
            .evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))?;

        Ok(value_to_bool(&result))
    }
}

impl Default for ExpressionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Coerce a JSON value to boolean using JavaScript-like truthiness.
fn value_to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluator() -> ExpressionEvaluator {
        ExpressionEvaluator::new()
    }

    // -------------------------------------------------------------------
    // Prompt binding
    // -------------------------------------------------------------------

    #[test]
    fn test_scalar_prompt_binds_as_string() {
        let eval = evaluator();
        let prompt = PromptValue::from("deploy to staging");
        assert!(eval.evaluate("input == 'deploy to staging'", &prompt).unwrap());
        assert!(!eval.evaluate("input == 'something else'", &prompt).unwrap());
    }

    #[test]
    fn test_sequence_prompt_binds_as_array() {
        let eval = evaluator();
        let prompt = PromptValue::Sequence(vec!["a".into(), "b".into()]);
        assert!(eval.evaluate("input|length == 2", &prompt).unwrap());
        assert!(eval.evaluate("'a' in input", &prompt).unwrap());
        assert!(!eval.evaluate("'c' in input", &prompt).unwrap());
    }

    #[test]
    fn test_comparison_on_transformed_input() {
        let eval = evaluator();
        let prompt = PromptValue::from("  URGENT  ");
        assert!(eval.evaluate("input|trim|lower == 'urgent'", &prompt).unwrap());
    }

    #[test]
    fn test_contains_transform() {
        let eval = evaluator();
        let prompt = PromptValue::from("status: all tests passed");
        assert!(eval.evaluate("input|contains('passed')", &prompt).unwrap());
        assert!(!eval.evaluate("input|contains('failed')", &prompt).unwrap());
    }

    // -------------------------------------------------------------------
    // Truthiness coercion
    // -------------------------------------------------------------------

    #[test]
    fn test_empty_string_is_falsy() {
        let eval = evaluator();
        assert!(!eval.evaluate("input", &PromptValue::empty()).unwrap());
        assert!(eval.evaluate("input", &PromptValue::from("x")).unwrap());
    }

    #[test]
    fn test_zero_is_falsy() {
        let eval = evaluator();
        let ctx = json!({ "count": 0.0 });
        assert!(!eval.evaluate_object("count", &ctx).unwrap());
        let ctx = json!({ "count": 3.0 });
        assert!(eval.evaluate_object("count", &ctx).unwrap());
    }

    #[test]
    fn test_not_transform() {
        let eval = evaluator();
        assert!(eval
            .evaluate("(input|contains('x'))|not", &PromptValue::from("abc"))
            .unwrap());
    }

    // -------------------------------------------------------------------
    // Object contexts (event exit expressions)
    // -------------------------------------------------------------------

    #[test]
    fn test_event_exit_style_context() {
        let eval = evaluator();
        let ctx = json!({
            "final_prompt": "shutdown requested",
            "step_results": { "watch": "shutdown requested" }
        });
        assert!(eval
            .evaluate_object("final_prompt|contains('shutdown')", &ctx)
            .unwrap());
        assert!(eval
            .evaluate_object("step_results.watch == final_prompt", &ctx)
            .unwrap());
    }

    #[test]
    fn test_non_object_context_is_rejected() {
        let eval = evaluator();
        let ctx = json!("just a string");
        assert!(matches!(
            eval.evaluate_object("true", &ctx),
            Err(ExpressionError::InvalidContext(_))
        ));
    }

    #[test]
    fn test_malformed_expression_is_an_error() {
        let eval = evaluator();
        assert!(matches!(
            eval.evaluate("input ==", &PromptValue::from("x")),
            Err(ExpressionError::EvalFailed(_))
        ));
    }

    #[test]
    fn test_host_identifiers_are_not_reachable() {
        let eval = evaluator();
        // An identifier outside the bound context is an evaluation
        // error, not a handle to anything in the host.
        assert!(matches!(
            eval.evaluate("std_process_exit", &PromptValue::from("x")),
            Err(ExpressionError::EvalFailed(_))
        ));
    }
}
