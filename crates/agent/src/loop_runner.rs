//! The orchestration loop implementation.

use std::sync::Arc;
use std::time::Duration;

use appforge_config::AgentConfig;
use appforge_core::agent::{Mode, Phase};
use appforge_core::error::{Error, ProviderError, Result};
use appforge_core::event::{AgentEvent, NoticeLevel, ToolCallStatus};
use appforge_core::message::{ContentPart, Message, MessageToolCall};
use appforge_core::provider::{ModelConfig, Provider, ProviderRequest, StreamEvent, ToolDefinition};
use appforge_core::tool::names::{LIST_FILES, SEARCH_FILES, TASK_COMPLETE, WRITE_FILE};
use appforge_core::tool::{ToolOutput, ToolRegistry};
use tracing::{debug, info, warn};

use crate::context::{trim, truncate_middle};
use crate::parser::{NativeToolCalls, parse_tagged_tool_calls, render_tool_instructions};
use crate::prompts;
use crate::session::{RunHandle, Session};

/// Characters of a tool result shown in status events.
const STATUS_SUMMARY_CHARS: usize = 200;

const VISION_CAPTION: &str = "Screenshot of the current app:";
const IMAGE_PLACEHOLDER: &str = "[Screenshot captured]";

/// Budgets and caps for one loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSettings {
    /// Hard cap on turns per invocation.
    pub max_iterations: u32,
    /// Consecutive transport/tool failures before the loop gives up.
    pub max_consecutive_errors: u32,
    /// Text-only turns that may be nudged before the loop gives up.
    pub max_nudges: u32,
    pub context_token_budget: usize,
    pub tool_result_max_chars: usize,
    /// Exploration-only turns before the search guard fires.
    pub search_loop_threshold: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            max_consecutive_errors: 5,
            max_nudges: 5,
            context_token_budget: 100_000,
            tool_result_max_chars: 8000,
            search_loop_threshold: 3,
            backoff_base_ms: 1000,
            backoff_max_ms: 8000,
        }
    }
}

impl LoopSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            max_consecutive_errors: config.max_consecutive_errors,
            max_nudges: config.max_nudges,
            context_token_budget: config.context_token_budget,
            tool_result_max_chars: config.tool_result_max_chars,
            search_loop_threshold: config.search_loop_threshold,
            backoff_base_ms: config.backoff_base_ms,
            backoff_max_ms: config.backoff_max_ms,
        }
    }
}

/// How a loop invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The model called `task_complete`.
    Completed,
    /// The model answered without tool calls and nothing needed nudging.
    Answered,
    /// The nudge budget ran out before the model finished.
    Stalled,
    /// The iteration cap was reached.
    IterationCap,
    /// The consecutive-error cap was reached; the session is in `Phase::Error`.
    Failed,
    /// Stopped, or superseded by a newer invocation. Nothing was committed
    /// after that point.
    Superseded,
}

impl RunOutcome {
    /// Whether a planning phase that ended this way has a plan to review.
    fn has_plan(self) -> bool {
        matches!(self, Self::Completed | Self::Answered | Self::Stalled)
    }
}

/// Delay before retry `attempt` (1-based): `base · 2^(attempt-1)`, capped.
pub fn backoff_delay_ms(attempt: u32, base_ms: u64, max_ms: u64) -> u64 {
    let factor = 1u64
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor).min(max_ms)
}

/// Detects turns that only explore (search/list) without acting.
#[derive(Debug)]
pub(crate) struct SearchLoopGuard {
    threshold: u32,
    streak: u32,
}

impl SearchLoopGuard {
    pub(crate) fn new(threshold: u32) -> Self {
        Self {
            threshold,
            streak: 0,
        }
    }

    /// Record one turn's calls. Returns `true` when the streak reached the
    /// threshold; the streak starts over in that case.
    pub(crate) fn observe(&mut self, calls: &[MessageToolCall]) -> bool {
        let exploring = !calls.is_empty()
            && calls
                .iter()
                .all(|c| c.name == SEARCH_FILES || c.name == LIST_FILES)
            && calls.iter().any(|c| c.name == SEARCH_FILES);

        if !exploring {
            self.streak = 0;
            return false;
        }

        self.streak += 1;
        if self.streak >= self.threshold {
            self.streak = 0;
            return true;
        }
        false
    }

    pub(crate) fn streak(&self) -> u32 {
        self.streak
    }
}

/// Counters scoped to one phase of an invocation.
#[derive(Debug, Default)]
struct PhaseProgress {
    consecutive_errors: u32,
    nudges: u32,
    has_written: bool,
    task_complete: bool,
}

/// One streamed model turn.
struct StreamedTurn {
    message_id: String,
    text: String,
    calls: Vec<MessageToolCall>,
    malformed: bool,
}

enum TurnError {
    Superseded,
    Transport(String),
}

/// What executing one tool call amounted to.
enum CallResult {
    Succeeded,
    Failed,
    Superseded,
}

/// The orchestration loop: drives a model through tool use on a [`Session`].
///
/// The loop itself is stateless; everything it mutates lives in the session
/// and is written only through the invocation's [`RunHandle`].
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    model: ModelConfig,
    settings: LoopSettings,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>, model: ModelConfig) -> Self {
        Self {
            provider,
            tools,
            model,
            settings: LoopSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: LoopSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the maximum number of turns per invocation.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.settings.max_iterations = max;
        self
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    pub fn model(&self) -> &ModelConfig {
        &self.model
    }

    /// Send a user message and drive the session according to its mode.
    ///
    /// Any loop already running on the session is superseded first. An
    /// empty message resumes without adding one.
    pub async fn run(&self, session: &Session, message: &str) -> RunOutcome {
        self.drive(session.begin_run(), message).await
    }

    /// Approve the pending plan: switch to build mode and build it.
    pub async fn approve_plan(&self, session: &Session) -> Result<RunOutcome> {
        let run = session
            .begin_run_from(Phase::AwaitingApproval, Phase::Building, Some(Mode::Build))
            .map_err(|phase| wrong_phase("approve a plan", phase))?;
        Ok(self.drive(run, prompts::PLAN_APPROVED).await)
    }

    /// Send feedback on the pending plan and plan again.
    pub async fn request_changes(&self, session: &Session, feedback: &str) -> Result<RunOutcome> {
        let run = session
            .begin_run_from(Phase::AwaitingApproval, Phase::Planning, Some(Mode::Plan))
            .map_err(|phase| wrong_phase("request plan changes", phase))?;
        Ok(self.drive(run, feedback).await)
    }

    /// Run the QA phase that was waiting for approval.
    pub async fn approve_tests(&self, session: &Session) -> Result<RunOutcome> {
        let run = session
            .begin_run_from(Phase::AwaitingTestApproval, Phase::Testing, None)
            .map_err(|phase| wrong_phase("approve testing", phase))?;
        if !run.push_message(Message::user(prompts::RUN_QA)) {
            return Ok(RunOutcome::Superseded);
        }
        let outcome = self.work(&run, Phase::Testing).await;
        run.finish();
        Ok(outcome)
    }

    /// Skip the QA phase that was waiting for approval.
    pub fn skip_tests(&self, session: &Session) -> Result<()> {
        let run = session
            .begin_run_from(Phase::AwaitingTestApproval, Phase::Done, None)
            .map_err(|phase| wrong_phase("skip testing", phase))?;
        run.finish();
        Ok(())
    }

    /// Stop whatever loop is running on the session.
    pub fn stop(&self, session: &Session) {
        session.stop();
    }

    async fn drive(&self, run: RunHandle, message: &str) -> RunOutcome {
        if !message.trim().is_empty() && !run.push_message(Message::user(message)) {
            return RunOutcome::Superseded;
        }

        let Some((mode, phase)) = run.read(|s| (s.mode, s.phase)) else {
            return RunOutcome::Superseded;
        };
        info!(generation = run.generation(), mode = %mode, "Agent loop started");

        let outcome = match mode {
            Mode::Plan => self.plan(&run).await,
            Mode::Build => self.work(&run, Phase::Building).await,
            Mode::Test => self.work(&run, Phase::Testing).await,
            Mode::Auto => self.auto(&run, phase == Phase::Idle).await,
        };

        run.finish();
        info!(generation = run.generation(), outcome = ?outcome, "Agent loop finished");
        outcome
    }

    /// Planning; a finished plan waits for approval.
    async fn plan(&self, run: &RunHandle) -> RunOutcome {
        let outcome = self.run_phase(run, Phase::Planning).await;
        if outcome.has_plan() && !run.set_phase(Phase::AwaitingApproval) {
            return RunOutcome::Superseded;
        }
        outcome
    }

    /// Building or testing; completion ends in `Phase::Done`.
    async fn work(&self, run: &RunHandle, phase: Phase) -> RunOutcome {
        let outcome = self.run_phase(run, phase).await;
        if outcome == RunOutcome::Completed && !run.set_phase(Phase::Done) {
            return RunOutcome::Superseded;
        }
        outcome
    }

    /// Plan (only from a fresh session), self-approve, build, then test or
    /// pause for test approval.
    async fn auto(&self, run: &RunHandle, from_idle: bool) -> RunOutcome {
        if from_idle {
            let planned = self.run_phase(run, Phase::Planning).await;
            if !planned.has_plan() {
                return planned;
            }
            if !run.push_message(Message::user(prompts::PLAN_APPROVED)) {
                return RunOutcome::Superseded;
            }
        }

        let built = self.run_phase(run, Phase::Building).await;
        if built != RunOutcome::Completed {
            return built;
        }

        let Some(auto_test) = run.read(|s| s.auto_test) else {
            return RunOutcome::Superseded;
        };
        if !auto_test {
            if !run.set_phase(Phase::AwaitingTestApproval) {
                return RunOutcome::Superseded;
            }
            return built;
        }

        if !run.push_message(Message::user(prompts::RUN_QA)) {
            return RunOutcome::Superseded;
        }
        self.work(run, Phase::Testing).await
    }

    fn system_message(&self, phase: Phase, tools: &[ToolDefinition]) -> Message {
        let mut prompt = prompts::system_prompt(phase).to_string();
        if !self.model.supports_tool_use {
            prompt.push_str(&render_tool_instructions(tools));
        }
        Message::system(prompt)
    }

    /// The turn loop for one phase.
    async fn run_phase(&self, run: &RunHandle, phase: Phase) -> RunOutcome {
        if !run.set_phase(phase) {
            return RunOutcome::Superseded;
        }
        info!(generation = run.generation(), phase = %phase, "Phase started");

        let definitions = self.tools.definitions();
        let system = self.system_message(phase, &definitions);
        let native_tools = if self.model.supports_tool_use {
            definitions
        } else {
            Vec::new()
        };

        let mut progress = PhaseProgress::default();
        let mut guard = SearchLoopGuard::new(self.settings.search_loop_threshold);

        loop {
            let budget = self.settings.context_token_budget;
            let max_iterations = self.settings.max_iterations;
            let Some(turn) = run.commit(|s| {
                if s.iterations >= max_iterations {
                    return None;
                }
                s.iterations += 1;
                let mut view = Vec::with_capacity(s.conversation.len() + 1);
                view.push(system.clone());
                view.extend(s.conversation.messages.iter().cloned());
                Some((s.iterations, trim(&view, budget).into_owned()))
            }) else {
                return RunOutcome::Superseded;
            };

            let Some((iteration, messages)) = turn else {
                warn!(generation = run.generation(), "Iteration cap reached");
                run.publish(AgentEvent::Notice {
                    level: NoticeLevel::Warning,
                    text: prompts::ITERATION_CAP.into(),
                });
                return RunOutcome::IterationCap;
            };

            debug!(
                generation = run.generation(),
                iteration,
                messages = messages.len(),
                "Sending request"
            );
            let request = ProviderRequest::new(&self.model, messages, native_tools.clone());

            let streamed = match self.stream_turn(run, request).await {
                Ok(streamed) => streamed,
                Err(TurnError::Superseded) => return RunOutcome::Superseded,
                Err(TurnError::Transport(error)) => {
                    progress.consecutive_errors += 1;
                    let attempt = progress.consecutive_errors;
                    if attempt >= self.settings.max_consecutive_errors {
                        warn!(error = %error, attempt, "LLM error cap reached");
                        return self.fatal(run, prompts::TRANSPORT_FATAL, &error);
                    }

                    let delay = backoff_delay_ms(
                        attempt,
                        self.settings.backoff_base_ms,
                        self.settings.backoff_max_ms,
                    );
                    warn!(error = %error, attempt, delay_ms = delay, "LLM error, retrying");
                    run.publish(AgentEvent::Notice {
                        level: NoticeLevel::Info,
                        text: prompts::retry_notice(&error, delay),
                    });

                    tokio::select! {
                        _ = run.cancel_token().cancelled() => return RunOutcome::Superseded,
                        _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                    }
                    continue;
                }
            };

            let (content, calls) = if self.model.supports_tool_use {
                (streamed.text, streamed.calls)
            } else {
                let parsed = parse_tagged_tool_calls(&streamed.text);
                let mut calls = parsed.calls;
                calls.extend(streamed.calls);
                (parsed.text, calls)
            };

            run.publish(AgentEvent::AssistantFinished {
                message_id: streamed.message_id.clone(),
                content: content.clone(),
            });

            if streamed.malformed && calls.is_empty() {
                info!(generation = run.generation(), "Malformed tool call, asking the model to retry");
                if !content.trim().is_empty()
                    && !run.push_message(assistant_message(&streamed.message_id, content, Vec::new()))
                {
                    return RunOutcome::Superseded;
                }
                if !run.push_message(Message::user(prompts::MALFORMED_RETRY)) {
                    return RunOutcome::Superseded;
                }
                continue;
            }

            if calls.is_empty() {
                if !content.trim().is_empty()
                    && !run.push_message(assistant_message(&streamed.message_id, content, Vec::new()))
                {
                    return RunOutcome::Superseded;
                }

                let Some(nudge) = self.nudge_for(run, phase, &progress) else {
                    return RunOutcome::Answered;
                };
                if progress.nudges >= self.settings.max_nudges {
                    info!(generation = run.generation(), phase = %phase, "Nudge budget exhausted");
                    return RunOutcome::Stalled;
                }
                progress.nudges += 1;
                debug!(nudge = progress.nudges, "Nudging model");
                if !run.push_message(Message::user(nudge)) {
                    return RunOutcome::Superseded;
                }
                continue;
            }

            if !run.push_message(assistant_message(
                &streamed.message_id,
                content,
                calls.clone(),
            )) {
                return RunOutcome::Superseded;
            }

            let mut any_succeeded = false;
            for call in &calls {
                match self.execute_call(run, &streamed.message_id, call, &mut progress).await {
                    CallResult::Succeeded => any_succeeded = true,
                    CallResult::Failed => {}
                    CallResult::Superseded => return RunOutcome::Superseded,
                }
            }
            // Only real progress earns back the nudge budget.
            if any_succeeded {
                progress.nudges = 0;
            }

            if progress.task_complete {
                info!(generation = run.generation(), phase = %phase, "Task completed");
                return RunOutcome::Completed;
            }

            if progress.consecutive_errors >= self.settings.max_consecutive_errors {
                warn!(errors = progress.consecutive_errors, "Tool error cap reached");
                return self.fatal(run, prompts::TOOL_FATAL, "repeated tool errors");
            }

            if guard.observe(&calls) {
                info!(generation = run.generation(), "Search loop detected");
                if !run.push_message(Message::user(prompts::STOP_SEARCHING)) {
                    return RunOutcome::Superseded;
                }
            }
        }
    }

    /// Open a stream and consume it into one turn.
    async fn stream_turn(
        &self,
        run: &RunHandle,
        request: ProviderRequest,
    ) -> std::result::Result<StreamedTurn, TurnError> {
        let cancel = run.cancel_token().clone();
        let mut rx = tokio::select! {
            _ = cancel.cancelled() => return Err(TurnError::Superseded),
            opened = self.provider.stream(request, cancel.clone()) => {
                opened.map_err(|e| TurnError::Transport(e.to_string()))?
            }
        };

        let message_id = uuid::Uuid::new_v4().to_string();
        if !run.publish(AgentEvent::AssistantStarted {
            message_id: message_id.clone(),
        }) {
            return Err(TurnError::Superseded);
        }

        let mut text = String::new();
        let mut native = NativeToolCalls::new();

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Err(TurnError::Superseded),
                event = rx.recv() => event,
            };
            if !run.is_current() {
                return Err(TurnError::Superseded);
            }

            match event {
                Some(StreamEvent::TextDelta { text: delta }) => {
                    text.push_str(&delta);
                    run.publish(AgentEvent::TextDelta {
                        message_id: message_id.clone(),
                        text: delta,
                    });
                }
                Some(StreamEvent::ToolCallStart { index, id, name }) => native.start(index, id, name),
                Some(StreamEvent::ToolCallDelta {
                    index,
                    name,
                    arguments,
                }) => native.delta(index, name.as_deref(), &arguments),
                Some(StreamEvent::ToolCallEnd { index }) => native.end(index),
                Some(StreamEvent::Error { message }) => return Err(TurnError::Transport(message)),
                Some(StreamEvent::Done) => break,
                None => {
                    let error = ProviderError::StreamInterrupted("ended before completion".into());
                    return Err(TurnError::Transport(error.to_string()));
                }
            }
        }

        let calls = native.finish();
        Ok(StreamedTurn {
            message_id,
            text,
            calls,
            malformed: native.is_malformed(),
        })
    }

    /// Execute one tool call and commit its result.
    async fn execute_call(
        &self,
        run: &RunHandle,
        message_id: &str,
        call: &MessageToolCall,
        progress: &mut PhaseProgress,
    ) -> CallResult {
        if !run.publish(AgentEvent::ToolCallUpdated {
            message_id: message_id.to_string(),
            call_id: call.id.clone(),
            name: call.name.clone(),
            status: ToolCallStatus::Pending,
            summary: None,
        }) {
            return CallResult::Superseded;
        }

        debug!(tool = %call.name, id = %call.id, "Executing tool");
        let result = self.tools.execute(call).await;
        if !run.is_current() {
            return CallResult::Superseded;
        }

        let (message, status, summary) = match result {
            Ok(output) => {
                progress.consecutive_errors = 0;
                if call.name == WRITE_FILE {
                    progress.has_written = true;
                }
                if call.name == TASK_COMPLETE {
                    progress.task_complete = true;
                    let summary = call.arguments["summary"].as_str().unwrap_or_default();
                    run.publish(AgentEvent::TaskCompleted {
                        summary: summary.to_string(),
                    });
                }
                (
                    self.tool_message(call, &output),
                    ToolCallStatus::Succeeded,
                    output.summary(STATUS_SUMMARY_CHARS),
                )
            }
            Err(e) => {
                progress.consecutive_errors += 1;
                warn!(tool = %call.name, error = %e, "Tool failed");
                let text = format!("Error: {e}");
                (
                    Message::tool_result(&call.id, text.clone()),
                    ToolCallStatus::Failed,
                    text,
                )
            }
        };

        if !run.push_message(message) {
            return CallResult::Superseded;
        }
        let published = run.publish(AgentEvent::ToolCallUpdated {
            message_id: message_id.to_string(),
            call_id: call.id.clone(),
            name: call.name.clone(),
            status,
            summary: Some(summary),
        });
        match (published, status) {
            (false, _) => CallResult::Superseded,
            (true, ToolCallStatus::Succeeded) => CallResult::Succeeded,
            (true, _) => CallResult::Failed,
        }
    }

    fn tool_message(&self, call: &MessageToolCall, output: &ToolOutput) -> Message {
        match output {
            ToolOutput::Text { text } => Message::tool_result(
                &call.id,
                truncate_middle(text, self.settings.tool_result_max_chars).into_owned(),
            ),
            ToolOutput::Image { data_url } if self.model.supports_vision => Message::tool_parts(
                &call.id,
                vec![
                    ContentPart::text(VISION_CAPTION),
                    ContentPart::image(data_url.clone()),
                ],
            ),
            ToolOutput::Image { .. } => Message::tool_result(&call.id, IMAGE_PLACEHOLDER),
        }
    }

    /// The corrective message for a text-only turn, if the phase wants one.
    fn nudge_for(&self, run: &RunHandle, phase: Phase, progress: &PhaseProgress) -> Option<String> {
        match phase {
            Phase::Planning if !progress.has_written => Some(prompts::PLANNING_NUDGE.to_string()),
            Phase::Building | Phase::Testing => {
                let errors = run.session().errors();
                let report = errors.has_errors().then(|| errors.report());
                Some(prompts::build_nudge(progress.has_written, report.as_deref()))
            }
            _ => None,
        }
    }

    /// Surface a fatal notice exactly once and move the session to `Phase::Error`.
    fn fatal(&self, run: &RunHandle, notice: &str, cause: &str) -> RunOutcome {
        if !run.fail(cause) {
            return RunOutcome::Superseded;
        }
        run.publish(AgentEvent::Notice {
            level: NoticeLevel::Fatal,
            text: notice.to_string(),
        });
        RunOutcome::Failed
    }
}

fn assistant_message(id: &str, content: String, calls: Vec<MessageToolCall>) -> Message {
    let mut message = Message::assistant_with_tool_calls(content, calls);
    message.id = id.to_string();
    message
}

fn wrong_phase(action: &'static str, phase: Phase) -> Error {
    Error::InvalidState { action, phase }
}
