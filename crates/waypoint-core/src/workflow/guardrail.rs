//! Input and output guardrails.
//!
//! A guardrail inspects a payload and either passes it through, rewrites
//! it, or blocks with a machine-readable code. Blocks are policy outcomes,
//! not faults: the engine never retries them and surfaces the code and
//! message on the run's terminal error.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Outcome & errors
// ---------------------------------------------------------------------------

/// What a guardrail decided about a payload.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardrailOutcome {
    /// Payload is acceptable as-is.
    Pass,
    /// Payload is acceptable after replacement with this value.
    Replace(Value),
    /// Payload is rejected.
    Block { code: String, message: String },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GuardrailError {
    /// A guardrail rejected the payload.
    #[error("guardrail '{name}' blocked ({code}): {message}")]
    Blocked {
        name: String,
        code: String,
        message: String,
    },

    /// Run-level input guardrails only apply to textual or message-list
    /// inputs.
    #[error("input guardrails require a string or array input, got {got}")]
    UnsupportedInput { got: &'static str },

    /// The guardrail itself failed to evaluate.
    #[error("guardrail '{name}' failed: {message}")]
    Failed { name: String, message: String },
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// One named check over a payload.
pub trait Guardrail: Send + Sync {
    fn name(&self) -> &str;

    fn check<'a>(&'a self, payload: &'a Value)
    -> BoxFuture<'a, Result<GuardrailOutcome, GuardrailError>>;
}

/// Guardrail built from a closure; the common way to define one inline.
pub struct FnGuardrail<F> {
    name: String,
    check: F,
}

impl<F> FnGuardrail<F>
where
    F: Fn(&Value) -> Result<GuardrailOutcome, GuardrailError> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, check: F) -> Arc<dyn Guardrail> {
        Arc::new(Self {
            name: name.into(),
            check,
        })
    }
}

impl<F> Guardrail for FnGuardrail<F>
where
    F: Fn(&Value) -> Result<GuardrailOutcome, GuardrailError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn check<'a>(
        &'a self,
        payload: &'a Value,
    ) -> BoxFuture<'a, Result<GuardrailOutcome, GuardrailError>> {
        Box::pin(async move { (self.check)(payload) })
    }
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Run guardrails in order, threading replacements through so each rail
/// sees the previous rail's rewrite. First block wins.
pub async fn apply_guardrails(
    mut payload: Value,
    rails: &[Arc<dyn Guardrail>],
) -> Result<Value, GuardrailError> {
    for rail in rails {
        match rail.check(&payload).await? {
            GuardrailOutcome::Pass => {}
            GuardrailOutcome::Replace(next) => payload = next,
            GuardrailOutcome::Block { code, message } => {
                return Err(GuardrailError::Blocked {
                    name: rail.name().to_owned(),
                    code,
                    message,
                });
            }
        }
    }
    Ok(payload)
}

/// Run-level input guardrails: reject non-textual inputs before any rail
/// runs, then apply the chain.
pub async fn apply_input_guardrails(
    payload: Value,
    rails: &[Arc<dyn Guardrail>],
) -> Result<Value, GuardrailError> {
    if rails.is_empty() {
        return Ok(payload);
    }
    if !matches!(payload, Value::String(_) | Value::Array(_)) {
        return Err(GuardrailError::UnsupportedInput {
            got: json_type_name(&payload),
        });
    }
    apply_guardrails(payload, rails).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
