//! Per-project session state and the single-writer guard.
//!
//! A [`Session`] owns one project's conversation, phase, mode and error
//! buffers. Only one loop may write to it at a time: every loop invocation
//! calls [`Session::begin_run`], which cancels the previous invocation and
//! advances the generation counter. The returned [`RunHandle`] checks its
//! generation under the state lock before every mutation, so a superseded
//! loop can never commit anything after its successor started.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use appforge_core::agent::{Mode, Phase};
use appforge_core::diagnostics::ErrorAggregator;
use appforge_core::event::{AgentEvent, EventBus};
use appforge_core::message::{Conversation, Message};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Result text committed for tool calls a superseded loop left unanswered.
const CANCELLED_CALL: &str = "tool call cancelled";

/// Mutable state of a session, only reachable under its lock.
#[derive(Debug)]
pub struct SessionState {
    pub project_id: String,
    pub conversation: Conversation,
    pub phase: Phase,
    pub mode: Mode,
    pub auto_test: bool,
    /// Turns taken by the current (or last) loop invocation.
    pub iterations: u32,
    /// Message of the last unexpected fault, if the session is in `Phase::Error`.
    pub error: Option<String>,
    running: bool,
    generation: u64,
    cancel: CancellationToken,
}

impl SessionState {
    fn new(project_id: String, mode: Mode, auto_test: bool) -> Self {
        Self {
            project_id,
            conversation: Conversation::new(),
            phase: Phase::Idle,
            mode,
            auto_test,
            iterations: 0,
            error: None,
            running: false,
            generation: 0,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancel the active invocation (if any) and invalidate its generation.
    fn supersede(&mut self) {
        self.cancel.cancel();
        self.generation += 1;
        self.running = false;
    }
}

struct Inner {
    state: Mutex<SessionState>,
    errors: Arc<ErrorAggregator>,
    events: EventBus,
}

/// A cheaply cloneable handle to one project's session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

/// Serializable view of a session for callers that persist state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub project_id: String,
    pub phase: Phase,
    pub mode: Mode,
    pub auto_test: bool,
    pub iterations: u32,
    pub conversation: Conversation,
}

impl Session {
    /// Create an idle session for `project_id`. `errors` is the aggregator
    /// the tool gateway and the preview bridge feed.
    pub fn new(project_id: impl Into<String>, errors: Arc<ErrorAggregator>) -> Self {
        Self::from_state(
            SessionState::new(project_id.into(), Mode::default(), true),
            errors,
        )
    }

    /// Rebuild a session from a snapshot. No loop is running afterwards.
    pub fn restore(snapshot: SessionSnapshot, errors: Arc<ErrorAggregator>) -> Self {
        let mut state = SessionState::new(snapshot.project_id, snapshot.mode, snapshot.auto_test);
        state.conversation = snapshot.conversation;
        state.phase = snapshot.phase;
        state.iterations = snapshot.iterations;
        Self::from_state(state, errors)
    }

    fn from_state(state: SessionState, errors: Arc<ErrorAggregator>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                errors,
                events: EventBus::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock();
        SessionSnapshot {
            project_id: state.project_id.clone(),
            phase: state.phase,
            mode: state.mode,
            auto_test: state.auto_test,
            iterations: state.iterations,
            conversation: state.conversation.clone(),
        }
    }

    pub fn project_id(&self) -> String {
        self.lock().project_id.clone()
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    pub fn mode(&self) -> Mode {
        self.lock().mode
    }

    pub fn auto_test(&self) -> bool {
        self.lock().auto_test
    }

    pub fn iterations(&self) -> u32 {
        self.lock().iterations
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    /// A copy of the conversation.
    pub fn conversation(&self) -> Conversation {
        self.lock().conversation.clone()
    }

    pub fn errors(&self) -> &Arc<ErrorAggregator> {
        &self.inner.errors
    }

    /// Subscribe to the session's events. Subscribers only get copies.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AgentEvent>> {
        self.inner.events.subscribe()
    }

    pub fn set_mode(&self, mode: Mode) {
        let mut state = self.lock();
        if state.mode != mode {
            state.mode = mode;
            self.inner.events.publish(AgentEvent::ModeChanged { mode });
        }
    }

    pub fn set_auto_test(&self, auto_test: bool) {
        self.lock().auto_test = auto_test;
    }

    /// Start a new loop invocation, superseding any running one.
    ///
    /// Iteration bookkeeping is reset, and tool calls the previous
    /// invocation left unanswered get a cancellation result so the
    /// conversation stays well-formed.
    pub fn begin_run(&self) -> RunHandle {
        let mut state = self.lock();
        self.begin_run_locked(&mut state)
    }

    /// Start a new invocation out of a waiting phase.
    ///
    /// Only succeeds while the session is in `expected`. The phase check,
    /// the optional mode switch, the move to `next` and the supersession
    /// all happen under one lock, so of two racing approvals exactly one
    /// starts a run. On mismatch nothing changes and the current phase is
    /// returned.
    pub fn begin_run_from(
        &self,
        expected: Phase,
        next: Phase,
        mode: Option<Mode>,
    ) -> Result<RunHandle, Phase> {
        let mut state = self.lock();
        if state.phase != expected {
            return Err(state.phase);
        }
        if let Some(mode) = mode
            && state.mode != mode
        {
            state.mode = mode;
            self.inner.events.publish(AgentEvent::ModeChanged { mode });
        }
        let run = self.begin_run_locked(&mut state);
        self.set_phase_locked(&mut state, next);
        Ok(run)
    }

    fn begin_run_locked(&self, state: &mut SessionState) -> RunHandle {
        if state.running {
            info!(generation = state.generation, "Superseding running loop");
        }
        state.supersede();
        state.cancel = CancellationToken::new();
        state.running = true;
        state.iterations = 0;
        state.error = None;

        let repaired = state.conversation.close_dangling_tool_calls(CANCELLED_CALL);
        if repaired > 0 {
            debug!(count = repaired, "Closed dangling tool calls");
        }

        RunHandle {
            session: self.clone(),
            generation: state.generation,
            cancel: state.cancel.clone(),
        }
    }

    /// Stop the running loop (if any) and return to idle.
    pub fn stop(&self) {
        let mut state = self.lock();
        let was_running = state.running;
        state.supersede();
        if was_running {
            info!(generation = state.generation, "Loop stopped");
            self.set_phase_locked(&mut state, Phase::Idle);
        }
    }

    /// Stop any loop and discard the conversation.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.supersede();
        state.conversation = Conversation::new();
        state.iterations = 0;
        state.error = None;
        self.set_phase_locked(&mut state, Phase::Idle);
    }

    /// Retarget the session at another project: stops any loop, discards
    /// the conversation and clears the error buffers.
    pub fn switch_project(&self, project_id: impl Into<String>) {
        let mut state = self.lock();
        state.supersede();
        state.project_id = project_id.into();
        state.conversation = Conversation::new();
        state.iterations = 0;
        state.error = None;
        self.inner.errors.clear();
        self.set_phase_locked(&mut state, Phase::Idle);
    }

    fn set_phase_locked(&self, state: &mut SessionState, phase: Phase) {
        if state.phase != phase {
            state.phase = phase;
            self.inner.events.publish(AgentEvent::PhaseChanged { phase });
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Session")
            .field("project_id", &state.project_id)
            .field("phase", &state.phase)
            .field("mode", &state.mode)
            .field("generation", &state.generation)
            .field("messages", &state.conversation.len())
            .finish()
    }
}

/// Write access for one loop invocation.
///
/// Every method re-checks, under the session lock, that this invocation
/// is still the authoritative one. Once superseded or cancelled they all
/// become no-ops and report `false`/`None`.
#[derive(Clone)]
pub struct RunHandle {
    session: Session,
    generation: u64,
    cancel: CancellationToken,
}

impl RunHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Token cancelled when this invocation is stopped or superseded.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn is_current_locked(&self, state: &SessionState) -> bool {
        !self.cancel.is_cancelled() && state.generation == self.generation
    }

    /// Whether this invocation may still write.
    pub fn is_current(&self) -> bool {
        self.is_current_locked(&self.session.lock())
    }

    /// Read session state, if still current.
    pub fn read<R>(&self, f: impl FnOnce(&SessionState) -> R) -> Option<R> {
        let state = self.session.lock();
        self.is_current_locked(&state).then(|| f(&state))
    }

    /// Mutate session state, if still current.
    pub fn commit<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> Option<R> {
        let mut state = self.session.lock();
        if !self.is_current_locked(&state) {
            return None;
        }
        Some(f(&mut state))
    }

    /// Append a message and announce it.
    pub fn push_message(&self, message: Message) -> bool {
        let mut state = self.session.lock();
        if !self.is_current_locked(&state) {
            return false;
        }
        let event = AgentEvent::MessageAppended {
            message_id: message.id.clone(),
            role: message.role,
        };
        state.conversation.push(message);
        self.session.inner.events.publish(event);
        true
    }

    pub fn set_phase(&self, phase: Phase) -> bool {
        let mut state = self.session.lock();
        if !self.is_current_locked(&state) {
            return false;
        }
        self.session.set_phase_locked(&mut state, phase);
        true
    }

    /// Enter `Phase::Error` with the fault's message.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        let mut state = self.session.lock();
        if !self.is_current_locked(&state) {
            return false;
        }
        state.error = Some(message.into());
        self.session.set_phase_locked(&mut state, Phase::Error);
        true
    }

    /// Publish an event on behalf of this invocation.
    pub fn publish(&self, event: AgentEvent) -> bool {
        let state = self.session.lock();
        if !self.is_current_locked(&state) {
            return false;
        }
        self.session.inner.events.publish(event);
        true
    }

    /// Mark the invocation finished. The session stays in whatever phase
    /// the loop left it.
    pub fn finish(&self) {
        let mut state = self.session.lock();
        if self.is_current_locked(&state) {
            state.running = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appforge_core::message::{MessageToolCall, Role};

    fn session() -> Session {
        Session::new("todo-app", Arc::new(ErrorAggregator::new()))
    }

    #[test]
    fn new_session_is_idle() {
        let session = session();
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(session.mode(), Mode::Build);
        assert!(!session.is_running());
        assert!(session.conversation().is_empty());
    }

    #[test]
    fn newer_run_supersedes_older() {
        let session = session();
        let first = session.begin_run();
        assert!(first.push_message(Message::user("hello")));

        let second = session.begin_run();
        assert!(first.cancel_token().is_cancelled());
        assert!(!first.is_current());
        assert!(!first.push_message(Message::assistant("stale")));
        assert!(!first.set_phase(Phase::Done));
        assert!(first.commit(|s| s.iterations += 1).is_none());

        assert!(second.push_message(Message::assistant("fresh")));
        let texts: Vec<_> = session.conversation().messages.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["hello", "fresh"]);
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[test]
    fn begin_run_resets_iterations_and_repairs_dangling_calls() {
        let session = session();
        let run = session.begin_run();
        run.commit(|s| s.iterations = 7);
        run.push_message(Message::assistant_with_tool_calls(
            "",
            vec![MessageToolCall::new("call_1", "write_file", serde_json::json!({}))],
        ));

        session.begin_run();
        assert_eq!(session.iterations(), 0);
        let conversation = session.conversation();
        let last = conversation.messages.last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert_eq!(last.tool_call_id.as_deref(), Some("call_1"));
        assert!(conversation.has_valid_tool_pairing());
    }

    #[test]
    fn stop_cancels_and_returns_to_idle() {
        let session = session();
        let run = session.begin_run();
        run.set_phase(Phase::Building);

        session.stop();
        assert!(run.cancel_token().is_cancelled());
        assert!(!session.is_running());
        assert_eq!(session.phase(), Phase::Idle);
        assert!(!run.set_phase(Phase::Done));
    }

    #[test]
    fn switch_project_discards_conversation_and_errors() {
        let session = session();
        let run = session.begin_run();
        run.push_message(Message::user("build a todo app"));
        session.errors().record_terminal_line("Error: Cannot find module './Todo'");

        session.switch_project("notes-app");
        assert_eq!(session.project_id(), "notes-app");
        assert!(session.conversation().is_empty());
        assert!(!session.errors().has_errors());
        assert!(!run.is_current());
    }

    #[tokio::test]
    async fn events_reach_subscribers_only_from_current_run() {
        let session = session();
        let mut rx = session.subscribe();
        let old = session.begin_run();
        let new = session.begin_run();

        assert!(!old.set_phase(Phase::Planning));
        assert!(new.set_phase(Phase::Building));

        let event = rx.recv().await.unwrap();
        assert_eq!(*event, AgentEvent::PhaseChanged { phase: Phase::Building });
    }

    #[test]
    fn snapshot_round_trips_through_restore() {
        let session = session();
        session.set_mode(Mode::Plan);
        let run = session.begin_run();
        run.push_message(Message::user("build a todo app"));
        run.set_phase(Phase::AwaitingApproval);
        run.finish();

        let json = serde_json::to_string(&session.snapshot()).unwrap();
        let snapshot: SessionSnapshot = serde_json::from_str(&json).unwrap();
        let restored = Session::restore(snapshot, Arc::new(ErrorAggregator::new()));

        assert_eq!(restored.phase(), Phase::AwaitingApproval);
        assert_eq!(restored.mode(), Mode::Plan);
        assert_eq!(restored.conversation().len(), 1);
        assert!(!restored.is_running());
    }

    #[test]
    fn begin_run_from_moves_out_of_the_waiting_phase_once() {
        let session = session();
        session.set_mode(Mode::Plan);
        let plan = session.begin_run();
        plan.set_phase(Phase::AwaitingApproval);
        plan.finish();
        let mut rx = session.subscribe();

        let build = session
            .begin_run_from(Phase::AwaitingApproval, Phase::Building, Some(Mode::Build))
            .unwrap();
        assert_eq!(session.mode(), Mode::Build);
        assert_eq!(session.phase(), Phase::Building);
        assert!(build.is_current());

        let generation = session.generation();
        let second =
            session.begin_run_from(Phase::AwaitingApproval, Phase::Planning, Some(Mode::Plan));
        assert_eq!(second.err(), Some(Phase::Building));
        assert_eq!(session.mode(), Mode::Build);
        assert_eq!(session.generation(), generation);
        assert!(build.is_current());

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push((*event).clone());
        }
        assert_eq!(
            events,
            vec![
                AgentEvent::ModeChanged { mode: Mode::Build },
                AgentEvent::PhaseChanged { phase: Phase::Building },
            ]
        );
    }

    #[test]
    fn begin_run_from_in_the_wrong_phase_changes_nothing() {
        let session = session();
        session.set_mode(Mode::Plan);

        let result =
            session.begin_run_from(Phase::AwaitingApproval, Phase::Building, Some(Mode::Build));
        assert_eq!(result.err(), Some(Phase::Idle));
        assert_eq!(session.mode(), Mode::Plan);
        assert_eq!(session.generation(), 0);
        assert!(!session.is_running());
    }
}
