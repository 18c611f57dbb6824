//! Agent loop: the LLM ↔ tool-calling main loop.
//!
//! One call to [`AgentLoop::run`] takes a task from user text to a final
//! answer: route, append the task, then alternate between streaming a
//! completion and dispatching the tool calls it asks for until the model
//! answers without tools or the iteration ceiling is hit.
//!
//! Memory and session state are borrowed mutably for the whole run, so a
//! session can never have two runs in flight.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use kestrel_core::config::AgentConfig;
use kestrel_core::types::{LlmResponse, Message, ToolDefinition, ToolInvocation, ToolResult};
use kestrel_core::{Mode, SessionState};
use kestrel_providers::{DeltaCallback, LlmProvider, LlmRequestConfig, ProviderError};

use crate::correction::{correction_instruction, test_failure_instruction};
use crate::memory::ContextMemory;
use crate::router::IntentRouter;
use crate::testing::TestRunner;
use crate::tools::ToolDispatcher;

/// Attempts given to a state-mutating tool before its failure is reported.
pub const MUTATING_ATTEMPTS: u32 = 3;

// ─────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────

/// Where the loop currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Thinking,
    ExecutingTools,
    /// Terminal: the run has returned or is about to.
    Idle,
}

/// Progress notification for whoever renders the run.
#[derive(Clone, Debug, PartialEq)]
pub enum AgentEvent {
    StateChanged(LoopState),
    TextDelta(String),
    ToolStarted { id: String, name: String },
    ToolFinished { id: String, name: String, success: bool, attempts: u32 },
    Notice(String),
}

// ─────────────────────────────────────────────
// Config / results
// ─────────────────────────────────────────────

/// Loop limits and generation settings.
#[derive(Clone, Debug)]
pub struct AgentLoopConfig {
    pub max_iterations: usize,
    /// Estimated-token budget; pruning starts at 80% of it.
    pub token_budget: usize,
    pub request: LlmRequestConfig,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self::from_agent_config(&AgentConfig::default())
    }
}

impl AgentLoopConfig {
    pub fn from_agent_config(agent: &AgentConfig) -> Self {
        Self {
            max_iterations: agent.max_iterations.max(1),
            token_budget: agent.token_budget,
            request: LlmRequestConfig {
                max_tokens: agent.max_tokens,
                temperature: agent.temperature,
            },
        }
    }
}

/// Outcome of one run.
#[derive(Clone, Debug)]
pub struct AgentRunResult {
    /// Final answer, or a warning when the iteration ceiling was reached.
    pub text: String,
    /// Model that produced the last response (the fallback, if one was used).
    pub model: String,
    pub mode: Mode,
    pub iterations: usize,
    pub elapsed: Duration,
    /// `false` when the run stopped at the iteration ceiling.
    pub completed: bool,
}

/// Result of dispatching one invocation, with the attempts it took.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutcome {
    pub result: ToolResult,
    pub attempts: u32,
}

// ─────────────────────────────────────────────
// AgentLoop
// ─────────────────────────────────────────────

/// Drives one session's runs against a provider and a tool set.
pub struct AgentLoop {
    provider: Arc<dyn LlmProvider>,
    tools: ToolDispatcher,
    router: IntentRouter,
    config: AgentLoopConfig,
    test_runner: Option<Arc<dyn TestRunner>>,
    events: Option<UnboundedSender<AgentEvent>>,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: ToolDispatcher,
        router: IntentRouter,
        config: AgentLoopConfig,
    ) -> Self {
        info!(
            provider = provider.display_name(),
            tools = tools.len(),
            max_iterations = config.max_iterations,
            token_budget = config.token_budget,
            "agent loop initialized"
        );
        Self {
            provider,
            tools,
            router,
            config,
            test_runner: None,
            events: None,
        }
    }

    /// Run the test suite after mutating tool rounds in build mode.
    pub fn with_test_runner(mut self, runner: Arc<dyn TestRunner>) -> Self {
        self.test_runner = Some(runner);
        self
    }

    /// Send progress events to `tx`.
    pub fn with_events(mut self, tx: UnboundedSender<AgentEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn tools(&self) -> &ToolDispatcher {
        &self.tools
    }

    pub fn router(&self) -> &IntentRouter {
        &self.router
    }

    pub fn config(&self) -> &AgentLoopConfig {
        &self.config
    }

    /// Carry `task` through to a final answer.
    ///
    /// # Errors
    /// Provider failures other than a first capacity failure propagate
    /// unchanged (recover them with `downcast_ref::<ProviderError>()`).
    /// Turns appended before the failure stay in memory.
    pub async fn run(
        &self,
        task: &str,
        memory: &mut ContextMemory,
        session: &mut SessionState,
    ) -> Result<AgentRunResult> {
        let started = Instant::now();
        let decision = self.router.route(task, session);
        let mode = decision.mode;
        let mut model = decision.model;
        info!(
            session = memory.session_id(),
            mode = %mode,
            model = %model,
            routed = decision.routed,
            "starting run"
        );

        memory.add_user(task);
        session.iterations = 0;
        let definitions = self.tools.get_definitions();
        let mut fallback_used = false;

        loop {
            if session.iterations >= self.config.max_iterations {
                let text = format!(
                    "Stopped after {} iterations without a final answer.",
                    session.iterations
                );
                warn!(session = memory.session_id(), iterations = session.iterations, "iteration limit reached");
                self.emit(AgentEvent::Notice(text.clone()));
                self.set_state(LoopState::Idle);
                return Ok(AgentRunResult {
                    text,
                    model,
                    mode,
                    iterations: session.iterations,
                    elapsed: started.elapsed(),
                    completed: false,
                });
            }
            session.iterations += 1;
            self.set_state(LoopState::Thinking);
            debug!(iteration = session.iterations, model = %model, "LLM call");

            if memory.needs_pruning(self.config.token_budget) {
                memory.prune();
            }

            let correction = memory
                .last()
                .filter(|turn| turn.is_tool_error())
                .map(|turn| Message::user(correction_instruction(turn.text())));
            let messages = memory.build_messages(correction);

            let response = match self.complete(&messages, &definitions, &model).await {
                Ok(response) => response,
                Err(e) if e.is_capacity() && !fallback_used => {
                    fallback_used = true;
                    let fallback = self.router.fallback_model(mode).to_string();
                    if fallback == model {
                        self.set_state(LoopState::Idle);
                        return Err(e.into());
                    }
                    warn!(from = %model, to = %fallback, error = %e, "capacity failure, switching model");
                    self.emit(AgentEvent::Notice(format!(
                        "{model} is over capacity; continuing with {fallback}"
                    )));
                    model = fallback;
                    match self.complete(&messages, &definitions, &model).await {
                        Ok(response) => response,
                        Err(e) => {
                            self.set_state(LoopState::Idle);
                            return Err(e.into());
                        }
                    }
                }
                Err(e) => {
                    self.set_state(LoopState::Idle);
                    return Err(e.into());
                }
            };

            if let Some(usage) = &response.usage {
                session.record_usage(usage);
            }

            if !response.has_tool_calls() {
                memory.add_assistant(response.content.as_str());
                self.set_state(LoopState::Idle);
                info!(
                    session = memory.session_id(),
                    iterations = session.iterations,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "run complete"
                );
                return Ok(AgentRunResult {
                    text: response.content,
                    model,
                    mode,
                    iterations: session.iterations,
                    elapsed: started.elapsed(),
                    completed: true,
                });
            }

            memory.add_assistant_tool_calls(response.content.as_str(), response.tool_calls.clone());
            self.set_state(LoopState::ExecutingTools);

            let mut mutated = false;
            let mut outcomes = Vec::with_capacity(response.tool_calls.len());
            for call in &response.tool_calls {
                let outcome = match call.invocation() {
                    Ok(invocation) => {
                        mutated |= self.tools.is_mutating(&invocation.name);
                        self.dispatch(&invocation).await
                    }
                    Err(e) => {
                        warn!(tool = %call.function.name, error = %e, "undecodable tool arguments");
                        ToolOutcome {
                            result: ToolResult::failure(format!("invalid arguments JSON: {e}")),
                            attempts: 0,
                        }
                    }
                };
                outcomes.push(outcome);
            }
            for (call, outcome) in response.tool_calls.iter().zip(outcomes) {
                memory.add_tool_outcome(call.id.as_str(), &outcome.result);
            }

            if mutated && mode == Mode::Build {
                self.run_tests(memory).await;
            }
        }
    }

    /// Dispatch one invocation, retrying state-mutating tools.
    pub async fn dispatch(&self, invocation: &ToolInvocation) -> ToolOutcome {
        let max_attempts = if self.tools.is_mutating(&invocation.name) {
            MUTATING_ATTEMPTS
        } else {
            1
        };
        self.emit(AgentEvent::ToolStarted {
            id: invocation.id.clone(),
            name: invocation.name.clone(),
        });

        let mut attempts = 0;
        let result = loop {
            attempts += 1;
            let result = self.tools.execute(invocation).await;
            if result.success || attempts >= max_attempts {
                break result;
            }
            debug!(
                tool = %invocation.name,
                attempt = attempts,
                error = result.error.as_deref().unwrap_or(""),
                "retrying tool"
            );
        };

        info!(
            tool = %invocation.name,
            success = result.success,
            attempts,
            "tool finished"
        );
        self.emit(AgentEvent::ToolFinished {
            id: invocation.id.clone(),
            name: invocation.name.clone(),
            success: result.success,
            attempts,
        });
        ToolOutcome { result, attempts }
    }

    async fn complete(
        &self,
        messages: &[Message],
        definitions: &[ToolDefinition],
        model: &str,
    ) -> Result<LlmResponse, ProviderError> {
        let tools = (!definitions.is_empty()).then_some(definitions);
        match &self.events {
            Some(tx) => {
                let forward = |delta: &str| {
                    let _ = tx.send(AgentEvent::TextDelta(delta.to_string()));
                };
                let on_delta: &DeltaCallback<'_> = &forward;
                self.provider
                    .chat(messages, tools, model, &self.config.request, Some(on_delta))
                    .await
            }
            None => {
                self.provider
                    .chat(messages, tools, model, &self.config.request, None)
                    .await
            }
        }
    }

    async fn run_tests(&self, memory: &mut ContextMemory) {
        let Some(runner) = &self.test_runner else {
            return;
        };
        let report = runner.run().await;
        if report.passed {
            debug!("tests passed");
            return;
        }
        warn!(session = memory.session_id(), "tests failed after change");
        self.emit(AgentEvent::Notice("Tests failed after the last change".into()));
        memory.add_user(test_failure_instruction(&report.output));
    }

    fn set_state(&self, state: LoopState) {
        self.emit(AgentEvent::StateChanged(state));
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
