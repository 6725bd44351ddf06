//! The boundary between the engine and whatever performs a unit of work.
//!
//! The engine submits a [`UnitOfWork`] and receives a [`UnitResult`]. Retries,
//! transport and execution mechanics all belong to the invoker; the engine
//! only validates the output against the unit's declared shape.
//!
//! Implementations shipped here:
//! - [`CommandInvoker`]: spawns a process with the request as JSON on stdin
//! - [`FnInvoker`]: wraps an async closure (embedding and tests)

mod command;

pub use command::{CommandInvoker, CommandInvokerConfig, UnitRequest};

use async_trait::async_trait;
use phasegate_common::UnitResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use uuid::Uuid;

/// One delegated request. Stateless; identity is the correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitOfWork {
    pub correlation_id: Uuid,
    pub phase: String,
    pub name: String,
    pub input: Value,
    /// JSON Schema the output must satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_shape: Option<Value>,
}

impl UnitOfWork {
    pub fn new(phase: &str, name: &str, input: Value) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            phase: phase.to_string(),
            name: name.to_string(),
            input,
            output_shape: None,
        }
    }

    pub fn with_output_shape(mut self, shape: Value) -> Self {
        self.output_shape = Some(shape);
        self
    }
}

/// Executes a unit of work.
///
/// Failures are values, not errors: an invoker that cannot run a unit returns
/// `UnitResult::Failure` with the appropriate kind.
#[async_trait]
pub trait TaskInvoker: Send + Sync {
    async fn invoke(&self, unit: &UnitOfWork) -> UnitResult;
}

/// Invoker backed by an async closure.
pub struct FnInvoker<F> {
    f: F,
}

impl<F, Fut> FnInvoker<F>
where
    F: Fn(UnitOfWork) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = UnitResult> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> TaskInvoker for FnInvoker<F>
where
    F: Fn(UnitOfWork) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = UnitResult> + Send + 'static,
{
    async fn invoke(&self, unit: &UnitOfWork) -> UnitResult {
        (self.f)(unit.clone()).await
    }
}

/// Invoke `unit` and check a successful output against its declared shape.
///
/// A shape mismatch (or an unusable shape) turns the result into a
/// `ValidationFailure`.
#[tracing::instrument(skip_all, fields(phase = %unit.phase, unit = %unit.name, correlation_id = %unit.correlation_id))]
pub async fn invoke_validated(invoker: &dyn TaskInvoker, unit: &UnitOfWork) -> UnitResult {
    tracing::debug!("dispatching unit");
    let result = invoker.invoke(unit).await;
    let mismatch = match (&result, &unit.output_shape) {
        (UnitResult::Success(output), Some(shape)) => validate_shape(&output.value, shape).err(),
        _ => None,
    };
    let result = match mismatch {
        Some(message) => UnitResult::validation_failure(message),
        None => result,
    };
    if let UnitResult::Failure(failure) = &result {
        tracing::debug!(kind = %failure.kind, message = %failure.message, "unit failed");
    }
    result
}

/// Validate `value` against a JSON Schema.
pub fn validate_shape(value: &Value, shape: &Value) -> Result<(), String> {
    let validator =
        jsonschema::validator_for(shape).map_err(|err| format!("invalid output shape: {}", err))?;
    let messages: Vec<String> = validator
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect();
    if messages.is_empty() {
        Ok(())
    } else {
        Err(format!("output does not match shape: {}", messages.join("; ")))
    }
}
