//! Workflow traversal engine.
//!
//! A [`Workflow`] binds a validated definition to its collaborators
//! (agent registry, factory, call logger, trace sink, input provider),
//! resolves every step exactly once at run start, and then walks the
//! step list: explicit condition jumps win, otherwise declaration-order
//! succession, terminating after the last declared step. Event mode and
//! the exception policy are layered on top of the same traversal.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use ensemble_types::agent::AgentDefinition;
use ensemble_types::prompt::PromptValue;
use ensemble_types::workflow::{EventSpec, StepDefinition, WorkflowDefinition, WorkflowResult};

use crate::agent::factory::AgentFactory;
use crate::agent::logging::{AgentLogger, LoggedAgent, TracingAgentLogger};
use crate::agent::registry::{AgentRegistry, Restored};
use crate::agent::{AgentCall, AgentError, BoxAgent};

use super::definition::{self, WorkflowError};
use super::event::{CronGate, EventError, GatePoll};
use super::expression::{ExpressionError, ExpressionEvaluator};
use super::input::{InputProvider, UnavailableInputProvider};
use super::step::{Step, StepBinding, StepError};
use super::trace::{build_trace_metadata, NullTraceSink, TraceSink};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from running a workflow.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Definition(#[from] WorkflowError),

    #[error("could not find agent named '{0}'")]
    MissingAgent(String),

    #[error("step '{step}' references unresolved agent '{agent}'")]
    UnknownAgent { step: String, agent: String },

    #[error("step '{from}' jumped to unreachable step '{target}'")]
    UnknownJumpTarget { from: String, target: String },

    #[error("step '{step}' exceeded the visit limit of {limit}")]
    VisitLimitExceeded { step: String, limit: u32 },

    #[error("step '{step}' failed: {source}")]
    Step {
        step: String,
        #[source]
        source: StepError,
    },

    #[error("step '{0}' has no agent to bind instructions from")]
    NoInstructions(String),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error(transparent)]
    Event(#[from] EventError),
}

// ---------------------------------------------------------------------------
// Options and stream events
// ---------------------------------------------------------------------------

/// Run-level tuning knobs.
#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    /// Cap on how many times any single step may execute in one run.
    /// `None` leaves revisit loops unbounded.
    pub max_step_visits: Option<u32>,
    /// Cap on feedback-loop iterations inside a single loop stage.
    pub max_loop_iterations: Option<u32>,
    /// How often event mode polls the cron gate.
    pub event_tick: Duration,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            max_step_visits: None,
            max_loop_iterations: None,
            event_tick: Duration::from_secs(30),
        }
    }
}

/// One item of the streaming run.
#[derive(Debug, Clone)]
pub enum WorkflowStreamEvent {
    /// A step finished.
    Step {
        step_name: String,
        step_result: PromptValue,
        step_index: i64,
        agent_name: Option<String>,
    },
    /// The run completed; carries the accumulated result.
    Final { result: WorkflowResult },
    /// The run failed after the steps already emitted.
    Error { message: String },
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A workflow definition bound to its collaborators, ready to run.
pub struct Workflow {
    definition: WorkflowDefinition,
    agent_definitions: Vec<AgentDefinition>,
    workflow_id: String,
    registry: Arc<AgentRegistry>,
    factory: Arc<AgentFactory>,
    logger: Arc<dyn AgentLogger>,
    trace_sink: Arc<dyn TraceSink>,
    input_provider: Arc<dyn InputProvider>,
    evaluator: Arc<ExpressionEvaluator>,
    options: WorkflowOptions,

    // Populated at run start.
    agents: HashMap<String, Arc<LoggedAgent>>,
    steps: HashMap<String, Step>,
    workflow_models: BTreeMap<String, String>,
    tracing_active: bool,
}

impl Workflow {
    pub fn new(definition: WorkflowDefinition) -> Self {
        Self {
            definition,
            agent_definitions: Vec::new(),
            workflow_id: uuid::Uuid::now_v7().to_string(),
            registry: Arc::new(AgentRegistry::new()),
            factory: Arc::new(AgentFactory::new()),
            logger: Arc::new(TracingAgentLogger),
            trace_sink: Arc::new(NullTraceSink),
            input_provider: Arc::new(UnavailableInputProvider),
            evaluator: Arc::new(ExpressionEvaluator::new()),
            options: WorkflowOptions::default(),
            agents: HashMap::new(),
            steps: HashMap::new(),
            workflow_models: BTreeMap::new(),
            tracing_active: false,
        }
    }

    /// Agent definitions to construct for this run. When non-empty they
    /// take precedence over restoring `template.agents` by name.
    pub fn with_agent_definitions(mut self, definitions: Vec<AgentDefinition>) -> Self {
        self.agent_definitions = definitions;
        self
    }

    pub fn with_registry(mut self, registry: Arc<AgentRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_factory(mut self, factory: Arc<AgentFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn AgentLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_trace_sink(mut self, trace_sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = trace_sink;
        self
    }

    pub fn with_input_provider(mut self, input_provider: Arc<dyn InputProvider>) -> Self {
        self.input_provider = input_provider;
        self
    }

    pub fn with_options(mut self, options: WorkflowOptions) -> Self {
        self.options = options;
        self
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Run the workflow to completion.
    ///
    /// Returns `Ok(Some(result))` on success, `Ok(None)` when a failure
    /// was consumed by the exception policy, and `Err` otherwise. A
    /// non-empty `prompt` overrides the template's initial prompt.
    pub async fn run(
        &mut self,
        prompt: impl Into<String>,
    ) -> Result<Option<WorkflowResult>, EngineError> {
        let initial = self.prepare(prompt.into())?;
        tracing::info!(
            workflow = %self.definition.name,
            workflow_id = %self.workflow_id,
            "starting workflow run"
        );

        match self.execute(initial.clone()).await {
            Ok(result) => Ok(Some(result)),
            Err(error) => self.handle_failure(&initial, error).await,
        }
    }

    /// Run the workflow, yielding one event per completed step, then a
    /// final (or error) event. Semantics match [`Workflow::run`]; only
    /// the delivery differs.
    pub fn run_streaming(
        mut self,
        prompt: impl Into<String>,
    ) -> impl futures_util::Stream<Item = WorkflowStreamEvent> {
        let prompt = prompt.into();
        async_stream::stream! {
            let initial = match self.prepare(prompt) {
                Ok(initial) => initial,
                Err(error) => {
                    yield WorkflowStreamEvent::Error { message: error.to_string() };
                    return;
                }
            };

            let order = self.definition.template.steps.clone();
            let start = match order.first() {
                Some(first) => first.name.clone(),
                None => {
                    let error = WorkflowError::NoSteps(self.definition.name.clone());
                    yield WorkflowStreamEvent::Error { message: error.to_string() };
                    return;
                }
            };

            let mut traversal = Traversal::new(
                &self.steps,
                order,
                initial,
                start,
                self.options.max_step_visits,
            );
            let outcome = loop {
                match traversal.advance().await {
                    Ok(Some(event)) => {
                        yield WorkflowStreamEvent::Step {
                            step_name: event.step_name,
                            step_result: event.step_result,
                            step_index: event.step_index,
                            agent_name: event.agent_name,
                        };
                    }
                    Ok(None) => break Ok(()),
                    Err(error) => break Err(error),
                }
            };

            match outcome {
                Ok(()) => {
                    let (result, _, _) = traversal.into_result();
                    let finished = if self.definition.template.event.is_some() {
                        self.process_event(result).await
                    } else {
                        Ok(result)
                    };
                    match finished {
                        Ok(result) => yield WorkflowStreamEvent::Final { result },
                        Err(error) => {
                            let message = match self.invoke_exception_handler(&error).await {
                                Ok(()) => error.to_string(),
                                Err(handler_error) => handler_error.to_string(),
                            };
                            yield WorkflowStreamEvent::Error { message };
                        }
                    }
                }
                Err(error) => {
                    let message = match self.invoke_exception_handler(&error).await {
                        Ok(()) => error.to_string(),
                        Err(handler_error) => handler_error.to_string(),
                    };
                    yield WorkflowStreamEvent::Error { message };
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Run preparation
    // -----------------------------------------------------------------------

    /// Validate, seed the prompt, and resolve agents and steps. All
    /// reference errors surface here, before anything executes.
    fn prepare(&mut self, prompt: String) -> Result<PromptValue, EngineError> {
        definition::validate(&self.definition)?;
        if !prompt.is_empty() {
            self.definition.template.prompt = prompt;
        }
        self.create_or_restore_agents()?;
        self.resolve_steps()?;
        Ok(PromptValue::from(self.definition.template.prompt.clone()))
    }

    fn create_or_restore_agents(&mut self) -> Result<(), EngineError> {
        self.agents.clear();
        self.workflow_models.clear();
        self.tracing_active = false;

        if !self.agent_definitions.is_empty() {
            for def in self.agent_definitions.clone() {
                // Restore first; construct from the definition on a miss.
                let instance = match self.registry.restore(&def.metadata.name) {
                    Some(Restored::Instance(instance)) => instance,
                    _ => {
                        let instance = Arc::new(self.factory.create(&def)?);
                        self.registry.save(instance.clone(), def.clone());
                        instance
                    }
                };
                self.install_agent(instance, def.is_scoring());
            }
            return Ok(());
        }

        for name in self.definition.template.agents.clone() {
            match self.registry.restore(&name) {
                Some(Restored::Instance(instance)) => {
                    let scoring = self
                        .registry
                        .definition(&name)
                        .is_some_and(|d| d.is_scoring());
                    self.install_agent(instance, scoring);
                }
                Some(Restored::Definition(def)) => {
                    let instance = Arc::new(self.factory.create(&def)?);
                    self.registry.save(instance.clone(), def.clone());
                    self.install_agent(instance, def.is_scoring());
                }
                None => return Err(EngineError::MissingAgent(name)),
            }
        }
        Ok(())
    }

    fn install_agent(&mut self, instance: Arc<BoxAgent>, scoring: bool) {
        let name = instance.name().to_string();
        let model = instance.model().to_string();
        let logged = Arc::new(LoggedAgent::new(
            instance,
            self.workflow_id.clone(),
            self.logger.clone(),
        ));

        if scoring {
            self.tracing_active = true;
        } else {
            self.workflow_models.insert(name.clone(), model);
        }
        self.agents.insert(name, logged);
    }

    /// Bind every step definition to its agents. Resolution happens
    /// exactly once per run; traversal reuses the bound steps, including
    /// event-mode replays.
    fn resolve_steps(&mut self) -> Result<(), EngineError> {
        self.steps.clear();

        for def in self.definition.template.steps.clone() {
            let agent = match &def.agent {
                Some(name) => Some(self.resolved_agent(&def.name, name)?),
                None => None,
            };

            let mut parallel = Vec::new();
            if let Some(names) = &def.parallel {
                for name in names {
                    parallel.push(self.resolved_agent(&def.name, name)?);
                }
            }

            let loop_agent = match &def.loop_spec {
                Some(spec) => Some(self.resolved_agent(&def.name, &spec.agent)?),
                None => None,
            };

            let sub_workflow_url = def.workflow.as_ref().and_then(|reference| {
                self.definition
                    .template
                    .workflows
                    .iter()
                    .find(|w| &w.name == reference)
                    .map(|w| w.url.clone())
            });

            let step = Step::new(
                def.clone(),
                StepBinding {
                    agent,
                    parallel,
                    loop_agent,
                    sub_workflow_url,
                    evaluator: self.evaluator.clone(),
                    input_provider: self.input_provider.clone(),
                    max_loop_iterations: self.options.max_loop_iterations,
                },
            );
            self.steps.insert(def.name.clone(), step);
        }
        Ok(())
    }

    fn resolved_agent(&self, step: &str, name: &str) -> Result<Arc<LoggedAgent>, EngineError> {
        self.agents
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownAgent {
                step: step.to_string(),
                agent: name.to_string(),
            })
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    async fn execute(&self, initial: PromptValue) -> Result<WorkflowResult, EngineError> {
        let order = self.definition.template.steps.clone();
        let Some(first) = order.first() else {
            return Err(WorkflowError::NoSteps(self.definition.name.clone()).into());
        };
        let start = first.name.clone();

        let mut traversal = Traversal::new(
            &self.steps,
            order,
            initial.clone(),
            start,
            self.options.max_step_visits,
        );
        while traversal.advance().await?.is_some() {}
        let (result, executed, scoring) = traversal.into_result();

        self.record_trace(
            &initial.text(),
            &result.final_prompt.text(),
            &executed,
            scoring.as_ref(),
        );

        if self.definition.template.event.is_some() {
            return self.process_event(result).await;
        }
        Ok(result)
    }

    /// Exception policy for [`Workflow::run`]: record the error trace,
    /// hand the error text to the handler agent (step index `-1`), and
    /// report the failure as consumed. Without a resolvable handler the
    /// original error propagates; a failing handler propagates its own
    /// error.
    async fn handle_failure(
        &self,
        initial: &PromptValue,
        error: EngineError,
    ) -> Result<Option<WorkflowResult>, EngineError> {
        tracing::warn!(
            workflow = %self.definition.name,
            error = %error,
            "workflow run failed"
        );
        self.record_trace(&initial.text(), &format!("ERROR: {error}"), &[], None);

        let handled = self
            .definition
            .template
            .exception
            .as_ref()
            .is_some_and(|e| self.agents.contains_key(&e.agent));
        if !handled {
            return Err(error);
        }

        self.invoke_exception_handler(&error).await?;
        Ok(None)
    }

    async fn invoke_exception_handler(&self, error: &EngineError) -> Result<(), EngineError> {
        if let Some(exception) = &self.definition.template.exception
            && let Some(handler) = self.agents.get(&exception.agent)
        {
            handler.run(AgentCall::new(error.to_string(), -1)).await?;
            tracing::info!(
                agent = %exception.agent,
                "exception handler consumed the failure"
            );
        }
        Ok(())
    }

    fn record_trace(
        &self,
        input: &str,
        output: &str,
        executed: &[String],
        scoring: Option<&Value>,
    ) {
        if !self.tracing_active {
            return;
        }
        let metadata = build_trace_metadata(
            &self.workflow_id,
            &self.definition.name,
            executed,
            &self.workflow_models,
            scoring,
        );
        if let Err(error) = self.trace_sink.open_trace(input, output, &metadata) {
            tracing::warn!(error = %error, "could not record workflow trace");
        }
    }

    // -----------------------------------------------------------------------
    // Event mode
    // -----------------------------------------------------------------------

    /// Poll the cron gate on a fixed tick. Each window fires at most
    /// once: optionally re-invoke the event agent on the terminal
    /// prompt, then replay the configured step subsequence against the
    /// already-resolved steps. The exit expression is checked against
    /// the accumulated result on every matching tick; without one the
    /// loop polls indefinitely.
    async fn process_event(
        &self,
        mut result: WorkflowResult,
    ) -> Result<WorkflowResult, EngineError> {
        let Some(event) = self.definition.template.event.clone() else {
            return Ok(result);
        };

        let mut gate = CronGate::new(&event.cron)?;
        let mut ticker = tokio::time::interval(self.options.event_tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(cron = %event.cron, "entering event mode");

        loop {
            ticker.tick().await;
            match gate.poll(&chrono::Utc::now())? {
                GatePoll::Fire => {
                    self.fire_event(&event, &mut result).await?;
                    if self.should_exit(&event, &result)? {
                        break;
                    }
                }
                GatePoll::Hold => {
                    if self.should_exit(&event, &result)? {
                        break;
                    }
                }
                GatePoll::Idle => {}
            }
        }

        tracing::info!(cron = %event.cron, "event mode exit condition met");
        Ok(result)
    }

    async fn fire_event(
        &self,
        event: &EventSpec,
        result: &mut WorkflowResult,
    ) -> Result<(), EngineError> {
        tracing::info!(cron = %event.cron, "event trigger fired");

        if let Some(name) = &event.agent {
            let agent = self
                .agents
                .get(name)
                .ok_or_else(|| EngineError::MissingAgent(name.clone()))?;
            // Index continues past the steps already recorded this run.
            let index = result.step_results.len() as i64;
            let reply = agent
                .run(AgentCall::new(result.final_prompt.clone(), index))
                .await?;
            result.step_results.insert(name.clone(), reply.prompt.clone());
            result.final_prompt = reply.prompt;
        }

        if !event.steps.is_empty() {
            let order: Vec<StepDefinition> = self
                .definition
                .template
                .steps
                .iter()
                .filter(|d| event.steps.contains(&d.name))
                .cloned()
                .collect();
            let start = event.steps[0].clone();

            let mut traversal = Traversal::new(
                &self.steps,
                order,
                result.final_prompt.clone(),
                start,
                self.options.max_step_visits,
            );
            while traversal.advance().await?.is_some() {}
            let (replay, _, _) = traversal.into_result();

            result.final_prompt = replay.final_prompt;
            result.step_results.extend(replay.step_results);
        }
        Ok(())
    }

    fn should_exit(&self, event: &EventSpec, result: &WorkflowResult) -> Result<bool, EngineError> {
        let Some(exit) = &event.exit else {
            return Ok(false);
        };
        Ok(self
            .evaluator
            .evaluate_object(exit, &result.to_event_context())?)
    }
}

// ---------------------------------------------------------------------------
// Traversal
// ---------------------------------------------------------------------------

/// One completed step, as reported by the traversal.
struct StepEvent {
    step_name: String,
    step_result: PromptValue,
    step_index: i64,
    agent_name: Option<String>,
}

/// The traversal state machine, shared by plain runs, streaming runs,
/// and event-mode replays. `order` is the (sub)sequence being walked;
/// jumps outside it are runtime errors.
struct Traversal<'a> {
    steps: &'a HashMap<String, Step>,
    order: Vec<StepDefinition>,
    current: Option<String>,
    prompt: PromptValue,
    initial_prompt: PromptValue,
    step_results: BTreeMap<String, PromptValue>,
    executed: Vec<String>,
    visits: HashMap<String, u32>,
    step_index: i64,
    max_step_visits: Option<u32>,
    scoring_metrics: Option<Value>,
}

impl<'a> Traversal<'a> {
    fn new(
        steps: &'a HashMap<String, Step>,
        order: Vec<StepDefinition>,
        initial: PromptValue,
        start: String,
        max_step_visits: Option<u32>,
    ) -> Self {
        Self {
            steps,
            order,
            current: Some(start),
            prompt: initial.clone(),
            initial_prompt: initial,
            step_results: BTreeMap::new(),
            executed: Vec::new(),
            visits: HashMap::new(),
            step_index: 0,
            max_step_visits,
            scoring_metrics: None,
        }
    }

    /// Execute the current step and move the cursor. `Ok(None)` means
    /// the traversal already terminated.
    async fn advance(&mut self) -> Result<Option<StepEvent>, EngineError> {
        let Some(current) = self.current.clone() else {
            return Ok(None);
        };

        if let Some(limit) = self.max_step_visits {
            let visits = self.visits.entry(current.clone()).or_insert(0);
            *visits += 1;
            if *visits > limit {
                return Err(EngineError::VisitLimitExceeded {
                    step: current,
                    limit,
                });
            }
        }

        let from = self.executed.last().cloned().unwrap_or_default();
        let Some(position) = self.order.iter().position(|d| d.name == current) else {
            return Err(EngineError::UnknownJumpTarget {
                from,
                target: current,
            });
        };
        let definition = self.order[position].clone();
        let Some(step) = self.steps.get(&current) else {
            return Err(EngineError::UnknownJumpTarget {
                from,
                target: current,
            });
        };

        let args = self.bind_args(&definition)?;
        let result = step
            .run(&args, None, self.step_index)
            .await
            .map_err(|source| EngineError::Step {
                step: current.clone(),
                source,
            })?;

        self.prompt = result.prompt.clone();
        self.step_results.insert(current.clone(), result.prompt.clone());
        self.executed.push(current.clone());
        if result.scoring_metrics.is_some() {
            self.scoring_metrics = result.scoring_metrics;
        }

        let index = self.step_index;
        self.step_index += 1;
        tracing::debug!(step = %current, index, "step completed");

        self.current = match result.next {
            Some(target) => {
                if !self.order.iter().any(|d| d.name == target) {
                    return Err(EngineError::UnknownJumpTarget {
                        from: current,
                        target,
                    });
                }
                Some(target)
            }
            None => self.order.get(position + 1).map(|d| d.name.clone()),
        };

        Ok(Some(StepEvent {
            step_name: current,
            step_result: self.prompt.clone(),
            step_index: index,
            agent_name: definition.agent.clone(),
        }))
    }

    /// Resolve a step's declared input bindings into positional args.
    /// Without bindings the in-flight prompt threads through alone.
    fn bind_args(&self, definition: &StepDefinition) -> Result<Vec<PromptValue>, EngineError> {
        let Some(bindings) = &definition.inputs else {
            return Ok(vec![self.prompt.clone()]);
        };
        bindings
            .iter()
            .map(|binding| self.resolve_source(&binding.from))
            .collect()
    }

    fn resolve_source(&self, from: &str) -> Result<PromptValue, EngineError> {
        if from == "prompt" {
            return Ok(self.initial_prompt.clone());
        }
        if let Some(target) = from.strip_prefix("instructions:") {
            return self
                .steps
                .get(target)
                .and_then(|s| s.agent_instructions())
                .map(PromptValue::from)
                .ok_or_else(|| EngineError::NoInstructions(target.to_string()));
        }
        if let Some(recorded) = self.step_results.get(from) {
            return Ok(recorded.clone());
        }
        Ok(PromptValue::from(from))
    }

    fn into_result(self) -> (WorkflowResult, Vec<String>, Option<Value>) {
        (
            WorkflowResult {
                final_prompt: self.prompt,
                step_results: self.step_results,
            },
            self.executed,
            self.scoring_metrics,
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
