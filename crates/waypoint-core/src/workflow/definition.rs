//! Build-time workflow definitions.

use std::sync::Arc;

use waypoint_types::workflow::RetryPolicy;

use super::guardrail::Guardrail;
use super::hooks::WorkflowHooks;
use super::step::Step;

/// An immutable, reusable workflow definition: an ordered step list plus
/// run-level policy. One definition serves any number of concurrent runs.
#[derive(Clone)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub purpose: Option<String>,
    pub steps: Vec<Step>,
    /// Run-level retry default; steps may override.
    pub retry: RetryPolicy,
    /// Applied to the run input before the first step.
    pub input_guardrails: Vec<Arc<dyn Guardrail>>,
    /// Applied to the run output after the last step.
    pub output_guardrails: Vec<Arc<dyn Guardrail>>,
    pub hooks: WorkflowHooks,
}

impl Workflow {
    pub fn new(id: impl Into<String>, name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            purpose: None,
            steps,
            retry: RetryPolicy::default(),
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
            hooks: WorkflowHooks::default(),
        }
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_hooks(mut self, hooks: WorkflowHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_input_guardrails(mut self, rails: Vec<Arc<dyn Guardrail>>) -> Self {
        self.input_guardrails = rails;
        self
    }

    pub fn with_output_guardrails(mut self, rails: Vec<Arc<dyn Guardrail>>) -> Self {
        self.output_guardrails = rails;
        self
    }

    /// Index of a top-level step by id.
    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    /// Effective retry attempts for one step: step override else run default.
    pub fn effective_retries(&self, step: &Step) -> u32 {
        step.retries.unwrap_or(self.retry.attempts)
    }
}
