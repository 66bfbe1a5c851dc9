//! Step execution.
//!
//! A resolved step runs up to five stages in fixed order: agent, input,
//! condition, parallel, loop. Each stage that is present rewrites the
//! in-flight prompt; the condition stage additionally selects an
//! explicit jump target. Absent stages are skipped, so a bare step is a
//! pass-through.

use std::sync::Arc;

use serde_json::Value;

use ensemble_types::prompt::PromptValue;
use ensemble_types::workflow::{
    ConditionClause, InputSpec, StepDefinition, StepResult, CONNECTOR_MARKER,
};

use crate::agent::logging::LoggedAgent;
use crate::agent::{AgentCall, AgentError};

use super::expression::{ExpressionError, ExpressionEvaluator};
use super::input::{InputError, InputProvider};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from running a single step.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error("parallel stage received {items} items for {agents} agents")]
    ParallelArity { items: usize, agents: usize },

    #[error("loop exceeded the configured limit of {limit} iterations")]
    LoopLimitExceeded { limit: u32 },

    #[error("step '{0}' declares a loop but no agent is bound to it")]
    UnboundLoop(String),
}

// ---------------------------------------------------------------------------
// Resolved step
// ---------------------------------------------------------------------------

/// Everything a step needs besides its definition: the agents it was
/// resolved against and the shared collaborators.
pub struct StepBinding {
    pub agent: Option<Arc<LoggedAgent>>,
    pub parallel: Vec<Arc<LoggedAgent>>,
    pub loop_agent: Option<Arc<LoggedAgent>>,
    pub sub_workflow_url: Option<String>,
    pub evaluator: Arc<ExpressionEvaluator>,
    pub input_provider: Arc<dyn InputProvider>,
    pub max_loop_iterations: Option<u32>,
}

/// A step definition bound to resolved agents, ready to run.
pub struct Step {
    definition: StepDefinition,
    binding: StepBinding,
}

impl Step {
    pub fn new(definition: StepDefinition, binding: StepBinding) -> Self {
        Self {
            definition,
            binding,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Name of the step's bound agent, if any.
    pub fn agent_name(&self) -> Option<&str> {
        self.definition.agent.as_deref()
    }

    /// Instructions of the step's bound agent, if any.
    pub fn agent_instructions(&self) -> Option<&str> {
        self.binding.agent.as_deref().map(|a| a.instructions())
    }

    /// URL of the sub-workflow this step references, if any. Reference
    /// steps run as pass-throughs; fetching and executing the remote
    /// workflow is up to the embedding application.
    pub fn sub_workflow_url(&self) -> Option<&str> {
        self.binding.sub_workflow_url.as_deref()
    }

    /// Run all present stages in order.
    pub async fn run(
        &self,
        args: &[PromptValue],
        context: Option<&Value>,
        step_index: i64,
    ) -> Result<StepResult, StepError> {
        let mut prompt = args.last().cloned().unwrap_or_default();
        let mut scoring_metrics = None;

        if let Some(agent) = &self.binding.agent {
            let call = AgentCall {
                args: args.to_vec(),
                context: context.cloned(),
                step_index,
            };
            let reply = agent.run(call).await?;
            prompt = reply.prompt;
            scoring_metrics = reply.scoring_metrics;
        }

        if let Some(spec) = &self.definition.input
            && let Some(rewritten) = self.apply_input(spec, &prompt).await?
        {
            prompt = rewritten;
        }

        let next = match &self.definition.condition {
            Some(clauses) => self.route(clauses, &prompt)?,
            None => None,
        };

        if !self.binding.parallel.is_empty() {
            prompt = self.fan_out(prompt, context, step_index).await?;
        }

        if let Some(spec) = &self.definition.loop_spec {
            let agent = self
                .binding
                .loop_agent
                .as_ref()
                .ok_or_else(|| StepError::UnboundLoop(self.definition.name.clone()))?;
            prompt = self.run_loop(agent, &spec.until, prompt, step_index).await?;
        }

        Ok(StepResult {
            prompt,
            next,
            scoring_metrics,
        })
    }

    // -----------------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------------

    /// Input stage. Returns `None` when the template carries the
    /// connector marker, meaning an external UI owns the exchange and
    /// the prompt passes through unchanged.
    async fn apply_input(
        &self,
        spec: &InputSpec,
        prompt: &PromptValue,
    ) -> Result<Option<PromptValue>, StepError> {
        if spec.template.contains(CONNECTOR_MARKER) {
            return Ok(None);
        }

        let text = prompt.text();
        let question = spec.prompt.replace("{prompt}", &text);
        let response = self.binding.input_provider.read(&question).await?;
        let rewritten = spec
            .template
            .replace("{prompt}", &text)
            .replace("{response}", &response);
        Ok(Some(PromptValue::from(rewritten)))
    }

    /// Condition stage. The first clause decides the form: with `if` it
    /// is a binary branch, otherwise an ordered switch where the first
    /// truthy `case` wins and a clause without `case` is the default.
    fn route(
        &self,
        clauses: &[ConditionClause],
        prompt: &PromptValue,
    ) -> Result<Option<String>, StepError> {
        let Some(first) = clauses.first() else {
            return Ok(None);
        };

        if let Some(expr) = &first.if_expr {
            let taken = self.binding.evaluator.evaluate(expr, prompt)?;
            return Ok(if taken {
                first.then.clone()
            } else {
                first.else_.clone()
            });
        }

        let mut default = None;
        for clause in clauses {
            match &clause.case {
                Some(case) => {
                    if self.binding.evaluator.evaluate(case, prompt)? {
                        return Ok(clause.do_.clone());
                    }
                }
                None => {
                    if default.is_none() {
                        default = clause.do_.clone();
                    }
                }
            }
        }
        Ok(default)
    }

    /// Parallel stage. A sequence prompt dispatches positionally (item i
    /// to agent i, arity-checked); a scalar broadcasts to every agent.
    /// All calls run concurrently and every straggler is awaited before
    /// any error is reported; outputs aggregate in declaration order.
    async fn fan_out(
        &self,
        prompt: PromptValue,
        context: Option<&Value>,
        step_index: i64,
    ) -> Result<PromptValue, StepError> {
        let agents = &self.binding.parallel;
        let inputs: Vec<PromptValue> = match &prompt {
            PromptValue::Sequence(items) => {
                if items.len() != agents.len() {
                    return Err(StepError::ParallelArity {
                        items: items.len(),
                        agents: agents.len(),
                    });
                }
                items.iter().map(|item| item.as_str().into()).collect()
            }
            scalar => vec![scalar.clone(); agents.len()],
        };

        let calls = agents.iter().zip(inputs).map(|(agent, input)| {
            let call = AgentCall {
                args: vec![input],
                context: context.cloned(),
                step_index,
            };
            async move { agent.run(call).await }
        });

        let replies = futures_util::future::join_all(calls).await;
        let mut outputs = Vec::with_capacity(agents.len());
        for reply in replies {
            outputs.push(reply?.prompt.text());
        }
        Ok(PromptValue::Sequence(outputs))
    }

    /// Loop stage. A sequence prompt maps the agent once per item; a
    /// scalar feeds the agent its own output until `until` holds on the
    /// latest output (checked after each call, so the body runs at
    /// least once).
    async fn run_loop(
        &self,
        agent: &Arc<LoggedAgent>,
        until: &str,
        prompt: PromptValue,
        step_index: i64,
    ) -> Result<PromptValue, StepError> {
        if let PromptValue::Sequence(items) = &prompt {
            let mut outputs = Vec::with_capacity(items.len());
            for item in items {
                let reply = agent.run(AgentCall::new(item.as_str(), step_index)).await?;
                outputs.push(reply.prompt.text());
            }
            return Ok(PromptValue::Sequence(outputs));
        }

        let mut current = prompt;
        let mut iterations = 0u32;
        loop {
            if let Some(limit) = self.binding.max_loop_iterations
                && iterations >= limit
            {
                return Err(StepError::LoopLimitExceeded { limit });
            }
            let reply = agent.run(AgentCall::new(current, step_index)).await?;
            current = reply.prompt;
            iterations += 1;
            if self.binding.evaluator.evaluate(until, &current)? {
                return Ok(current);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
