//! The control loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use skipper_core::actions::Action;
use skipper_core::browser::{BrowserDriver, BrowserStateSnapshot};
use skipper_core::completion::{CompletionClient, CompletionError, CompletionRequest, PromptBlock};
use skipper_core::events::AgentEvent;
use skipper_core::history::{ExecutedAction, HistoryLog, HistoryRecord};
use skipper_core::plan::{Plan, PlannedAction};

use crate::actions::builtin_actions;
use crate::prompt;
use crate::registry::ActionRegistry;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Upper bound on loop iterations; every step attempt counts against it.
    pub max_steps: u32,
    /// Token budget passed with each completion request.
    pub max_tokens: u32,
    /// Backoff after a rate-limit classification.
    pub rate_limit_backoff: Duration,
    /// Backoff after any other recoverable request failure.
    pub retry_backoff: Duration,
    /// Release the browser on completion; when false, the run transcript is
    /// rendered into a fresh inert page instead.
    pub close_browser_on_finish: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 25,
            max_tokens: 4096,
            rate_limit_backoff: Duration::from_millis(60_000),
            retry_backoff: Duration::from_millis(1_000),
            close_browser_on_finish: true,
        }
    }
}

/// The step engine: drives the browser toward the task by looping
/// snapshot → compose → complete → parse → dispatch → record.
pub struct Agent {
    task: String,
    registry: ActionRegistry,
    history: HistoryLog,
    driver: Arc<dyn BrowserDriver>,
    client: Arc<dyn CompletionClient>,
    config: AgentConfig,
    events: broadcast::Sender<AgentEvent>,
    /// Cancelled means `running == false`: by `done`, by a terminal request
    /// failure, or by an external `stop()`.
    shutdown: CancellationToken,
    started: bool,
    stopped: bool,
    steps_taken: u32,
}

impl Agent {
    /// Build an agent with the built-in browser actions registered.
    pub fn new(
        task: impl Into<String>,
        driver: Arc<dyn BrowserDriver>,
        client: Arc<dyn CompletionClient>,
        config: AgentConfig,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let mut registry = ActionRegistry::new();
        for action in builtin_actions(Arc::clone(&driver), shutdown.clone()) {
            registry.register(action);
        }
        Self::with_registry(task, registry, driver, client, config, shutdown)
    }

    /// Build an agent over a caller-supplied registry. `shutdown` must be
    /// the token the registry's terminal action cancels.
    pub fn with_registry(
        task: impl Into<String>,
        registry: ActionRegistry,
        driver: Arc<dyn BrowserDriver>,
        client: Arc<dyn CompletionClient>,
        config: AgentConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            task: task.into(),
            registry,
            history: HistoryLog::new(),
            driver,
            client,
            config,
            events,
            shutdown,
            started: false,
            stopped: false,
            steps_taken: 0,
        }
    }

    /// Swap the history log (e.g. to install a compaction policy).
    pub fn set_history(&mut self, history: HistoryLog) {
        self.history = history;
    }

    /// Register an additional action before the run starts.
    pub fn register_action(&mut self, action: Action) {
        self.registry.register(action);
    }

    /// Subscribe to lifecycle events. Call before `start()`.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn steps_taken(&self) -> u32 {
        self.steps_taken
    }

    pub fn is_running(&self) -> bool {
        self.started && !self.stopped && !self.shutdown.is_cancelled()
    }

    /// Run the loop until the run is cancelled or `max_steps` is reached.
    /// Calling `start()` on an agent that already ran (or is running) is a
    /// no-op.
    #[instrument(skip(self), fields(task = %self.task))]
    pub async fn start(&mut self) {
        if self.started {
            debug!("start() called while already running; ignoring");
            return;
        }
        self.started = true;

        while !self.shutdown.is_cancelled() && self.steps_taken < self.config.max_steps {
            self.step().await;
            self.steps_taken += 1;
        }

        self.stop().await;
        self.send_event(AgentEvent::Completed);
    }

    /// End the run: cancel, release or annotate the browser, emit `Stopped`.
    /// Idempotent — the signal fires once per run no matter how the loop
    /// exits.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.shutdown.cancel();

        if self.config.close_browser_on_finish {
            if let Err(e) = self.driver.close().await {
                warn!(error = %e, "failed to release browser");
            }
        } else {
            let transcript = self.render_transcript().await;
            if let Err(e) = self.driver.show_text_page(&transcript).await {
                warn!(error = %e, "failed to render transcript page");
            }
        }

        self.send_event(AgentEvent::Stopped);
    }

    /// One loop iteration: at most one completion request and the execution
    /// of its plan. Failures consume the step without a transcript entry.
    async fn step(&mut self) {
        let step = self.steps_taken + 1;
        self.send_event(AgentEvent::StepStart { step });

        let snapshot = match self.driver.snapshot().await {
            Ok(s) => s,
            Err(e) => {
                warn!(step, error = %e, "browser snapshot failed; step consumed");
                return;
            }
        };

        let request = CompletionRequest {
            system: prompt::system_message(&self.registry, &self.task),
            input: self.input_blocks(&snapshot),
            max_tokens: self.config.max_tokens,
        };

        let text = match self.client.complete(&request).await {
            Ok(text) => text,
            Err(err) => {
                self.recover(err).await;
                return;
            }
        };

        let plan = match Plan::parse(&text) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(step, error = %e, "model response was not a valid plan; step discarded");
                return;
            }
        };

        let mut executed = Vec::with_capacity(plan.actions.len());
        for (index, planned) in plan.actions.iter().enumerate() {
            // A cancelled run stops issuing invocations; the one in flight
            // has already resolved by the time we check.
            if self.shutdown.is_cancelled() {
                debug!(step, index, "run stopping; remaining invocations not issued");
                break;
            }
            self.send_event(AgentEvent::ActionStart {
                step,
                index,
                name: planned.name.clone(),
            });
            let outcome = self.invoke(planned).await;
            self.send_event(AgentEvent::ActionEnd {
                step,
                index,
                name: planned.name.clone(),
                success: outcome.success,
            });
            executed.push(outcome);
        }

        let post = self.driver.snapshot().await.unwrap_or_default();
        self.history.push(HistoryRecord {
            timestamp: Utc::now(),
            tabs: post.tabs,
            active_tab: post.active_tab,
            state: plan.state,
            actions: executed,
        });
    }

    /// Dispatch one invocation. An unresolved name records an explicit
    /// failure in its slot; a handler failure is captured without touching
    /// the invocations that follow it.
    async fn invoke(&self, planned: &PlannedAction) -> ExecutedAction {
        let Some(action) = self.registry.resolve(&planned.name) else {
            warn!(name = %planned.name, "plan referenced an unregistered action");
            return ExecutedAction {
                name: planned.name.clone(),
                args: planned.args.clone(),
                success: false,
                result: Some(Value::String(format!("unknown action: {}", planned.name))),
            };
        };

        let args = bind_args(action, &planned.args);
        match action.invoke(args).await {
            Ok(result) => ExecutedAction {
                name: planned.name.clone(),
                args: planned.args.clone(),
                success: true,
                result,
            },
            Err(e) => {
                warn!(name = %planned.name, error = %e, "action failed");
                ExecutedAction {
                    name: planned.name.clone(),
                    args: planned.args.clone(),
                    success: false,
                    result: Some(Value::String(e.to_string())),
                }
            }
        }
    }

    /// Request-failure branch: classify, back off (awaited to completion),
    /// and only `TokenLimitExceeded` ends the run.
    async fn recover(&mut self, err: CompletionError) {
        match err {
            CompletionError::RateLimited { retry_after } => {
                let backoff = retry_after
                    .map_or(self.config.rate_limit_backoff, |hint| {
                        hint.min(self.config.rate_limit_backoff)
                    });
                warn!(backoff_ms = backoff.as_millis() as u64, "rate limited; backing off");
                self.history.purge();
                tokio::time::sleep(backoff).await;
            }
            CompletionError::TokenLimitExceeded => {
                error!("context window exhausted; ending run");
                self.shutdown.cancel();
            }
            CompletionError::Other(msg) => {
                warn!(error = %msg, "completion request failed; retrying after backoff");
                tokio::time::sleep(self.config.retry_backoff).await;
            }
        }
    }

    /// History transcript plus the current state, each as a user block.
    fn input_blocks(&self, snapshot: &BrowserStateSnapshot) -> Vec<PromptBlock> {
        let mut blocks = Vec::with_capacity(self.history.len() + 1);
        for record in self.history.iter() {
            blocks.push(PromptBlock::user(prompt::history_message(record)));
        }
        blocks.push(PromptBlock::user(prompt::state_message(snapshot)));
        blocks
    }

    /// The full composed text of the run, for the debug transcript page.
    async fn render_transcript(&self) -> String {
        let snapshot = self.driver.snapshot().await.unwrap_or_default();
        let mut text = prompt::system_message(&self.registry, &self.task);
        for record in self.history.iter() {
            text.push_str("\n\n---\n\n");
            text.push_str(&prompt::history_message(record));
        }
        text.push_str("\n\n---\n\n");
        text.push_str(&prompt::state_message(&snapshot));
        text
    }

    fn send_event(&self, event: AgentEvent) {
        if self.events.send(event).is_err() {
            debug!("no event receivers — event dropped");
        }
    }
}

/// Map the plan's named args onto the action's declared parameter order.
/// Parameters absent from the plan bind to `Null`; extra plan keys are
/// ignored.
fn bind_args(action: &Action, args: &Map<String, Value>) -> Vec<Value> {
    action
        .params
        .iter()
        .map(|param| args.get(&param.name).cloned().unwrap_or(Value::Null))
        .collect()
}
