use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};

use crate::agent_engine::context::ContextManager;
use crate::agent_engine::event_bus::{CancelFlag, EventBus, StepEvent};
use crate::agent_engine::loop_control::{LoopController, RetryDecision, RetryState};
use crate::agent_engine::response::{parse_agent_response, AgentResponse};
use crate::agent_engine::state::{AgentEvent, AgentState, RunOutcome, StepOutcome, Task};
use crate::config::{AgentConfig, ExecutorConfig};
use crate::diagnostics::{parse_applied_tags, render_block, Diagnostics};
use crate::errors::{VisorError, VisorResult};
use crate::executor::dispatcher::{ActionDispatcher, BatchOutcome};
use crate::executor::input::NativeInput;
use crate::llm::types::CallConfig;
use crate::llm::{complete, LlmProvider};
use crate::perception::crop::CropSelector;
use crate::perception::pipeline::{into_context, prepare_upload};
use crate::perception::traits::{ScreenCapture, UiParser};
use crate::perception::ui_context::format_ui_context;

/// External services one engine talks to.
pub struct Collaborators {
    pub capture: Arc<dyn ScreenCapture>,
    pub parser: Arc<dyn UiParser>,
    pub llm: Arc<dyn LlmProvider>,
    pub llm_cfg: CallConfig,
    /// Crop pre-pass; `None` always sends the full frame.
    pub crop: Option<CropSelector>,
    pub input: Arc<dyn NativeInput>,
    pub diagnostics: Option<Arc<dyn Diagnostics>>,
}

/// Runs the observe → plan → act loop for one task at a time.
///
/// The engine is the only writer of the agent state, the retry counters and
/// the context. Stop requests arrive through the shared [`CancelFlag`] and are
/// sampled between phases of a step and between actions of a batch.
pub struct AgentEngine {
    config: AgentConfig,
    state_tx: watch::Sender<AgentState>,
    task: Option<Task>,
    loop_ctrl: LoopController,
    context: ContextManager,
    dispatcher: ActionDispatcher,
    capture: Arc<dyn ScreenCapture>,
    parser: Arc<dyn UiParser>,
    llm: Arc<dyn LlmProvider>,
    llm_cfg: CallConfig,
    crop: Option<CropSelector>,
    diagnostics: Option<Arc<dyn Diagnostics>>,
    cancel: CancelFlag,
    /// Set while a task is queued or running; claimed by [`crate::commands::AgentHandle::start`].
    busy: Arc<AtomicBool>,
    bus: EventBus,
    captures: u32,
    purged_at: u32,
}

impl AgentEngine {
    pub fn new(
        config: AgentConfig,
        executor: ExecutorConfig,
        system_prompt: String,
        collab: Collaborators,
    ) -> Self {
        let (state_tx, _) = watch::channel(AgentState::Idle);
        Self {
            loop_ctrl: LoopController::new(&config),
            context: ContextManager::new(system_prompt, config.history_window),
            dispatcher: ActionDispatcher::new(collab.input, executor),
            config,
            state_tx,
            task: None,
            capture: collab.capture,
            parser: collab.parser,
            llm: collab.llm,
            llm_cfg: collab.llm_cfg,
            crop: collab.crop,
            diagnostics: collab.diagnostics,
            cancel: CancelFlag::new(),
            busy: Arc::new(AtomicBool::new(false)),
            bus: EventBus::default(),
            captures: 0,
            purged_at: 0,
        }
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StepEvent> {
        self.bus.subscribe()
    }

    pub(crate) fn busy_flag(&self) -> Arc<AtomicBool> {
        self.busy.clone()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<StepEvent> {
        self.bus.sender()
    }

    pub fn watch_state(&self) -> watch::Receiver<AgentState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> AgentState {
        *self.state_tx.borrow()
    }

    pub fn retry_state(&self) -> RetryState {
        self.loop_ctrl.state()
    }

    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    pub fn task(&self) -> Option<&Task> {
        self.task.as_ref()
    }

    fn set_state(&self, state: AgentState) {
        let prev = self.state_tx.send_replace(state);
        if prev != state {
            tracing::info!(from = ?prev, to = ?state, "agent state changed");
        }
    }

    /// `Idle`/terminal → `Running`. Resets counters, context and the stop flag.
    pub fn start(&mut self, goal: &str) -> VisorResult<()> {
        self.begin(goal, true)
    }

    /// Shared by [`start`](Self::start) and the service loop. Queued goals keep
    /// the stop flag as the handle left it, so a stop sent while queued still lands.
    fn begin(&mut self, goal: &str, clear_cancel: bool) -> VisorResult<()> {
        if self.state().is_active() {
            return Err(VisorError::AlreadyRunning);
        }
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(VisorError::Config("task text is empty".into()));
        }
        self.task = Some(Task {
            goal: goal.to_string(),
            started_at: chrono::Utc::now(),
        });
        self.loop_ctrl.reset();
        self.context.begin_task(goal);
        if clear_cancel {
            self.cancel.clear();
        }
        self.busy.store(true, Ordering::SeqCst);
        self.set_state(AgentState::Running);
        tracing::info!(goal, "task started");
        self.bus
            .publish(StepEvent::status(0, AgentState::Running, format!("Started: {goal}")));
        Ok(())
    }

    pub async fn run_task(&mut self, goal: &str) -> VisorResult<RunOutcome> {
        self.start(goal)?;
        Ok(self.run().await)
    }

    /// Drives steps until the task completes, fails, is stopped or runs out of steps.
    pub async fn run(&mut self) -> RunOutcome {
        if self.state() != AgentState::Running {
            tracing::warn!(state = ?self.state(), "run called without a started task");
            return RunOutcome::Failed("no task started".into());
        }

        loop {
            if self.cancel.is_cancelled() {
                return self.finish(RunOutcome::StoppedByUser);
            }
            if self.loop_ctrl.step_limit_reached() {
                return self.finish(RunOutcome::StepLimitReached);
            }

            let step = self.loop_ctrl.state().step_count;
            match self.step(step).await {
                Ok(StepOutcome::Continue) => self.loop_ctrl.record_success(),
                Ok(StepOutcome::Done) => {
                    self.loop_ctrl.record_success();
                    return self.finish(RunOutcome::Completed);
                }
                Ok(StepOutcome::Stopped) => return self.finish(RunOutcome::StoppedByUser),
                Err(e) => {
                    let decision = self.loop_ctrl.record_failure(&e);
                    let retry = self.loop_ctrl.state();
                    tracing::warn!(
                        step,
                        error = %e,
                        errors = retry.error_count,
                        max_errors = retry.max_errors,
                        ?decision,
                        "step failed"
                    );
                    let mut event = StepEvent::status(step, AgentState::Running, "Step failed");
                    event.error = Some(e.to_string());
                    self.bus.publish(event);

                    match decision {
                        RetryDecision::Retry(backoff) => tokio::time::sleep(backoff).await,
                        RetryDecision::Fail => return self.finish(RunOutcome::Failed(e.to_string())),
                        RetryDecision::Ignore => self.loop_ctrl.record_success(),
                    }
                }
            }
        }
    }

    /// Serves goals from `rx` one at a time until `Shutdown` or the channel closes.
    pub async fn run_loop(&mut self, mut rx: mpsc::Receiver<AgentEvent>) {
        tracing::info!("agent loop started");
        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::GoalReceived(goal) => match self.begin(&goal, false) {
                    Ok(()) => {
                        let outcome = self.run().await;
                        tracing::info!(%outcome, "task finished");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "task rejected");
                        self.busy.store(false, Ordering::SeqCst);
                        let mut event = StepEvent::status(0, self.state(), "Task rejected");
                        event.error = Some(e.to_string());
                        self.bus.publish(event);
                    }
                },
                AgentEvent::Shutdown => break,
            }
        }
        tracing::info!("agent loop exited");
    }

    fn finish(&mut self, outcome: RunOutcome) -> RunOutcome {
        let step = self.loop_ctrl.state().step_count;
        if outcome == RunOutcome::StoppedByUser {
            self.set_state(AgentState::Stopping);
            self.bus
                .publish(StepEvent::status(step, AgentState::Stopping, "Stopping"));
        }
        let state = outcome.state();
        self.set_state(state);
        self.busy.store(false, Ordering::SeqCst);

        let mut event = StepEvent::status(step, state, outcome.to_string());
        event.done = outcome == RunOutcome::Completed;
        if let RunOutcome::Failed(reason) = &outcome {
            event.error = Some(reason.clone());
        }
        event.outcome = Some(outcome.to_string());
        event.history = self.context.history_summary();
        self.bus.publish(event);
        tracing::info!(%outcome, steps = step, "run finished");
        outcome
    }

    async fn housekeeping(&mut self) {
        let every = self.config.housekeeping_every;
        if every == 0 || self.captures == 0 || self.captures % every != 0 || self.purged_at == self.captures {
            return;
        }
        self.purged_at = self.captures;
        match self.capture.purge().await {
            Ok(removed) => tracing::debug!(removed, "old screenshots purged"),
            Err(e) => tracing::warn!(error = %e, "screenshot purge failed"),
        }
    }

    fn diagnostics_block(&self) -> Option<String> {
        if !self.config.include_diagnostics {
            return None;
        }
        self.diagnostics.as_ref().map(|d| render_block(d.as_ref()))
    }

    fn record_applied(&self, response: &AgentResponse) {
        let (Some(diag), Some(reply)) = (&self.diagnostics, &response.reply) else {
            return;
        };
        for (company, position) in parse_applied_tags(reply) {
            if let Err(e) = diag.record_applied(&company, &position) {
                tracing::warn!(error = %e, company = %company, position = %position, "could not record applied item");
            }
        }
    }

    async fn step(&mut self, step: u32) -> VisorResult<StepOutcome> {
        // ── Observe ──────────────────────────────────────────────────────
        if self.cancel.is_cancelled() {
            return Ok(StepOutcome::Stopped);
        }
        self.housekeeping().await;

        let shot = self.capture.capture().await?;
        self.captures += 1;
        tracing::debug!(
            step,
            path = %shot.path.display(),
            width = shot.meta.physical_width,
            height = shot.meta.physical_height,
            "screen captured"
        );

        let crop = match (&self.crop, self.config.crop_enabled) {
            (Some(selector), true) => {
                selector
                    .select(&shot, self.context.goal().unwrap_or_default())
                    .await
            }
            _ => None,
        };
        let (upload, crop) = prepare_upload(&shot, crop);
        let parsed = self.parser.parse(&upload, crop.as_ref()).await?;
        if self.cancel.is_cancelled() {
            return Ok(StepOutcome::Stopped);
        }

        let perception = into_context(&shot, parsed, crop);
        tracing::info!(step, elements = perception.elements.len(), cropped = crop.is_some(), "screen parsed");
        self.context
            .set_ui_context(format_ui_context(&perception.elements));

        // ── Plan ─────────────────────────────────────────────────────────
        let user_text = self.context.next_user_message(step);
        let mut images = Vec::new();
        if self.config.send_screenshot {
            images.push(perception.raw_image_base64.clone());
            if let Some(labeled) = &perception.labeled_image_base64 {
                images.push(labeled.clone());
            }
        }
        let diag = self.diagnostics_block();
        let messages = self
            .context
            .build_messages(diag.as_deref(), &user_text, &images);

        if self.cancel.is_cancelled() {
            return Ok(StepOutcome::Stopped);
        }
        tracing::info!(step, messages = messages.len(), model = %self.llm_cfg.model, "calling LLM");
        let completion = complete(self.llm.as_ref(), messages, &self.llm_cfg).await;
        if self.cancel.is_cancelled() {
            return Ok(StepOutcome::Stopped);
        }
        if !completion.success {
            return Err(VisorError::LlmInvocation(
                completion.error.unwrap_or_else(|| "unknown error".into()),
            ));
        }
        let raw = completion.response.unwrap_or_default();
        let response = parse_agent_response(&raw)?;
        for thought in &response.reasoning {
            tracing::debug!(step, %thought, "model reasoning");
        }

        // ── Act ──────────────────────────────────────────────────────────
        let report = self
            .dispatcher
            .execute(&response.actions, &perception.elements, &perception.meta, &self.cancel)
            .await;
        if report.outcome == BatchOutcome::Stopped {
            return Ok(StepOutcome::Stopped);
        }

        self.record_applied(&response);
        self.context.record_step(step, &user_text, &raw, &response);

        let done = report.outcome == BatchOutcome::Done;
        let message = response
            .reply
            .clone()
            .unwrap_or_else(|| format!("Step {} finished", step + 1));
        self.bus.publish(StepEvent {
            step,
            state: AgentState::Running,
            message,
            actions_taken: report.executed,
            done,
            error: None,
            outcome: None,
            history: Vec::new(),
        });

        Ok(if done { StepOutcome::Done } else { StepOutcome::Continue })
    }
}
