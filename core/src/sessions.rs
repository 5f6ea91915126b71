//! Execution session manager: admission, approval wiring, concurrency
//! caps, timeout/cancellation, event emission, and history recording.
//!
//! The registry table and per-mission admission queues are the only shared
//! mutable structures; every mutation goes through the registry mutex.
//! Each session owns exactly one child process; the process handle never
//! leaves the per-session run task.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use chrono::Utc;
use outpost_protocol::AgentEvent;
use outpost_protocol::ApprovalDecision;
use outpost_protocol::ApprovalSignal;
use outpost_protocol::ApprovalVerdict;
use outpost_protocol::CommandRequest;
use outpost_protocol::ExecutionResult;
use outpost_protocol::HistoryEntry;
use outpost_protocol::MissionId;
use outpost_protocol::SessionId;
use outpost_protocol::SessionState;
use outpost_protocol::ShellDialect;
use tokio::sync::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::approval;
use crate::config::AgentConfig;
use crate::error::AgentErr;
use crate::error::Result;
use crate::exec;
use crate::exec::ChunkSink;
use crate::exec::ExecParams;
use crate::exec::ExitDisposition;
use crate::permissions::PermissionSet;
use crate::shell;
use crate::shell::DialectInvocation;
use crate::store::MissionStore;

const HISTORY_PREVIEW_CHARS: usize = 500;
const COMMAND_PREVIEW_CHARS: usize = 80;

/// Front door for command requests. Cheap to clone; all state lives in the
/// shared registry.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Registry>,
}

impl SessionManager {
    /// Build a manager and the outbound event stream the transport should
    /// drain. The channel is bounded at `config.event_buffer`; a slow
    /// consumer backpressures output producers.
    pub fn new(
        config: AgentConfig,
        store: Arc<dyn MissionStore>,
    ) -> (Self, async_channel::Receiver<AgentEvent>) {
        let (events, events_rx) = async_channel::bounded(config.event_buffer.max(1));
        let available = shell::detect_available_dialects();
        tracing::info!(
            mode = %config.default_execution_mode,
            dialects = ?available.keys().collect::<Vec<_>>(),
            "session manager ready"
        );
        let inner = Arc::new(Registry {
            config,
            store,
            events,
            available,
            state: Mutex::new(RegistryState::default()),
            admission_halted: AtomicBool::new(false),
        });
        (Self { inner }, events_rx)
    }

    /// Admit one command request: resolve permissions, run the approval
    /// policy, and either deny, park for approval, or start execution.
    /// Returns the session id; terminal outcomes arrive as events.
    pub async fn submit(&self, request: CommandRequest) -> Result<SessionId> {
        self.inner.submit(request).await
    }

    /// Deliver the asynchronous human decision for a `Pending` session.
    pub async fn resolve_approval(&self, id: SessionId, signal: ApprovalSignal) -> Result<()> {
        self.inner.resolve_approval(id, signal).await
    }

    /// Cancel a session. Idempotent: cancelling a terminal (or already
    /// removed) session is a no-op.
    pub async fn cancel(&self, id: SessionId) -> Result<()> {
        self.inner.cancel(id).await
    }

    pub async fn session_state(&self, id: SessionId) -> Option<SessionState> {
        let state = self.inner.state.lock().await;
        state.sessions.get(&id).map(|h| h.state())
    }

    pub async fn active_sessions(&self) -> Vec<SessionSummary> {
        let state = self.inner.state.lock().await;
        let mut summaries: Vec<_> = state.sessions.values().map(|h| h.summary()).collect();
        summaries.sort_by_key(|s| s.uptime_ms);
        summaries
    }

    /// True once a history append has failed; no new sessions are admitted.
    pub fn admission_halted(&self) -> bool {
        self.inner.admission_halted.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: SessionId,
    pub mission_id: MissionId,
    pub correlation_id: String,
    pub state: SessionState,
    pub command_preview: String,
    pub uptime_ms: u128,
}

struct Registry {
    config: AgentConfig,
    store: Arc<dyn MissionStore>,
    events: async_channel::Sender<AgentEvent>,
    available: BTreeMap<ShellDialect, DialectInvocation>,
    state: Mutex<RegistryState>,
    admission_halted: AtomicBool,
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<SessionId, Arc<SessionHandle>>,
    queues: HashMap<MissionId, VecDeque<SessionId>>,
    running_per_mission: HashMap<MissionId, usize>,
    running_total: usize,
}

struct SessionHandle {
    id: SessionId,
    request: CommandRequest,
    dialect: ShellDialect,
    invocation: DialectInvocation,
    decision: ApprovalDecision,
    timeout: Duration,
    state: StdMutex<SessionState>,
    approval_tx: StdMutex<Option<oneshot::Sender<ApprovalSignal>>>,
    cancel: CancellationToken,
    created_at: Instant,
}

impl SessionHandle {
    fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Forward-only transition. Returns false when the session is already
    /// terminal or `next` would move backwards; the caller that wins the
    /// terminal transition is the one that records history.
    fn advance(&self, next: SessionState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.is_terminal() {
            return false;
        }
        if !next.is_terminal() && next.rank() <= state.rank() {
            return false;
        }
        *state = next;
        true
    }

    fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            mission_id: self.request.mission_id.clone(),
            correlation_id: self.request.correlation_id.clone(),
            state: self.state(),
            command_preview: preview(&self.request.command, COMMAND_PREVIEW_CHARS),
            uptime_ms: self.created_at.elapsed().as_millis(),
        }
    }
}

impl Registry {
    async fn submit(self: &Arc<Self>, request: CommandRequest) -> Result<SessionId> {
        if self.admission_halted.load(Ordering::SeqCst) {
            return Err(AgentErr::HistoryUnavailable(
                "a previous history append failed".to_string(),
            ));
        }
        let command = request.command.trim();
        if command.is_empty() {
            return Err(AgentErr::InvalidRequest("empty command".to_string()));
        }

        // Mission data is fetched fresh per request; edits between requests
        // are always observed, edits mid-flight never are.
        let mission = self.store.get_mission(&request.mission_id).await?;
        let perms = PermissionSet::resolve(&mission, &self.config);
        let decision = approval::decide(perms.mode, command, &perms);
        let timeout = perms.effective_timeout(request.timeout_secs.map(Duration::from_secs));

        let requested_dialect = match request.dialect {
            ShellDialect::Auto => self.config.default_dialect,
            other => other,
        };
        let resolved = shell::resolve_dialect(requested_dialect, &self.available);

        let (dialect, invocation) = match resolved {
            Ok(pair) => pair,
            Err(err) => {
                // Fail fast, but keep the audit trail: a terminal session
                // is recorded with no process ever spawned.
                let handle = self.insert_session(request, requested_dialect, Vec::new(), decision, timeout).await;
                self.finalize(
                    &handle,
                    SessionState::Failed,
                    FinalizeOutcome::without_run(Some(err.to_string())),
                )
                .await;
                return Ok(handle.id);
            }
        };

        let handle = self
            .insert_session(request, dialect, invocation, decision.clone(), timeout)
            .await;

        match decision.verdict {
            ApprovalVerdict::AutoDenied => {
                let error = AgentErr::PermissionDenied {
                    mode: decision.mode,
                    matched_pattern: decision.matched_pattern.clone(),
                    reason: match &decision.matched_pattern {
                        Some(p) => format!("command matches blocked pattern `{p}`"),
                        None => "blocked by policy".to_string(),
                    },
                };
                self.finalize(
                    &handle,
                    SessionState::Denied,
                    FinalizeOutcome::without_run(Some(error.to_string())),
                )
                .await;
            }
            ApprovalVerdict::RequiresApproval => {
                self.park_for_approval(&handle).await;
            }
            ApprovalVerdict::AutoApproved => {
                self.admit(Arc::clone(&handle)).await;
            }
        }
        Ok(handle.id)
    }

    async fn insert_session(
        self: &Arc<Self>,
        request: CommandRequest,
        dialect: ShellDialect,
        invocation: DialectInvocation,
        decision: ApprovalDecision,
        timeout: Duration,
    ) -> Arc<SessionHandle> {
        let handle = Arc::new(SessionHandle {
            id: SessionId::new(),
            request,
            dialect,
            invocation,
            decision,
            timeout,
            state: StdMutex::new(SessionState::Pending),
            approval_tx: StdMutex::new(None),
            cancel: CancellationToken::new(),
            created_at: Instant::now(),
        });
        let mut state = self.state.lock().await;
        state.sessions.insert(handle.id, Arc::clone(&handle));
        handle
    }

    /// Park a session awaiting the human decision. There is deliberately no
    /// timeout here: human latency is unbounded, and a stuck approval is
    /// resolved only by an explicit signal or cancellation.
    async fn park_for_approval(self: &Arc<Self>, handle: &Arc<SessionHandle>) {
        let (tx, rx) = oneshot::channel();
        {
            let mut slot = handle.approval_tx.lock().unwrap_or_else(|e| e.into_inner());
            *slot = Some(tx);
        }
        self.emit(AgentEvent::ApprovalRequested {
            session_id: handle.id,
            correlation_id: handle.request.correlation_id.clone(),
            mission_id: handle.request.mission_id.clone(),
            command: handle.request.command.clone(),
            mode: handle.decision.mode,
        })
        .await;

        let registry = Arc::clone(self);
        let handle = Arc::clone(handle);
        tokio::spawn(async move {
            tokio::select! {
                signal = rx => match signal {
                    Ok(ApprovalSignal::Approve) => {
                        registry.admit(handle).await;
                    }
                    Ok(ApprovalSignal::Reject) => {
                        registry
                            .finalize(
                                &handle,
                                SessionState::Denied,
                                FinalizeOutcome::without_run(Some(
                                    AgentErr::ApprovalRejected.to_string(),
                                )),
                            )
                            .await;
                    }
                    // Sender dropped without a signal: manager shutdown.
                    Err(_) => {}
                },
                _ = handle.cancel.cancelled() => {
                    let elapsed_ms = handle.created_at.elapsed().as_millis() as u64;
                    registry
                        .finalize(
                            &handle,
                            SessionState::Cancelled,
                            FinalizeOutcome::without_run(Some(
                                AgentErr::Cancelled { elapsed_ms, last_seq: 0 }.to_string(),
                            )),
                        )
                        .await;
                }
            }
        });
    }

    async fn resolve_approval(self: &Arc<Self>, id: SessionId, signal: ApprovalSignal) -> Result<()> {
        let handle = {
            let state = self.state.lock().await;
            state.sessions.get(&id).cloned()
        }
        .ok_or(AgentErr::SessionNotFound(id))?;

        let tx = {
            let mut slot = handle.approval_tx.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        match tx {
            Some(tx) => {
                let _ = tx.send(signal);
                Ok(())
            }
            None => Err(AgentErr::InvalidRequest(format!(
                "session {id} is not awaiting approval"
            ))),
        }
    }

    async fn cancel(self: &Arc<Self>, id: SessionId) -> Result<()> {
        let handle = {
            let state = self.state.lock().await;
            state.sessions.get(&id).cloned()
        };
        // Terminal sessions are removed from the table; cancelling them
        // (or an unknown id) is a no-op.
        let Some(handle) = handle else {
            return Ok(());
        };

        match handle.state() {
            state if state.is_terminal() => Ok(()),
            SessionState::Queued => {
                let dequeued = {
                    let mut state = self.state.lock().await;
                    let queue = state.queues.get_mut(&handle.request.mission_id);
                    match queue {
                        Some(queue) => {
                            let pos = queue.iter().position(|queued| *queued == id);
                            if let Some(pos) = pos {
                                queue.remove(pos);
                                true
                            } else {
                                false
                            }
                        }
                        None => false,
                    }
                };
                if dequeued {
                    let elapsed_ms = handle.created_at.elapsed().as_millis() as u64;
                    self.finalize(
                        &handle,
                        SessionState::Cancelled,
                        FinalizeOutcome::without_run(Some(
                            AgentErr::Cancelled { elapsed_ms, last_seq: 0 }.to_string(),
                        )),
                    )
                    .await;
                } else {
                    // Promoted to running between the state read and the
                    // queue lock; fall through to the token.
                    handle.cancel.cancel();
                }
                Ok(())
            }
            // Pending: the approval waiter observes the token and
            // finalizes without ever spawning. Running/Streaming: the exec
            // loop terminates the child and reports KilledCancelled.
            _ => {
                handle.cancel.cancel();
                Ok(())
            }
        }
    }

    /// Take a running slot or join the mission's FIFO queue.
    async fn admit(self: &Arc<Self>, handle: Arc<SessionHandle>) {
        let admitted = {
            let mut state = self.state.lock().await;
            let mission_id = handle.request.mission_id.clone();
            let per_mission = state.running_per_mission.get(&mission_id).copied().unwrap_or(0);
            if per_mission < self.config.max_sessions_per_mission
                && state.running_total < self.config.max_concurrent_sessions
            {
                *state.running_per_mission.entry(mission_id).or_insert(0) += 1;
                state.running_total += 1;
                true
            } else {
                state.queues.entry(mission_id).or_default().push_back(handle.id);
                false
            }
        };
        if admitted {
            self.start_running(handle).await;
        } else {
            self.set_state(&handle, SessionState::Queued).await;
        }
    }

    /// Spawn the per-session run task. The running slot must already be
    /// accounted for.
    async fn start_running(self: &Arc<Self>, handle: Arc<SessionHandle>) {
        self.set_state(&handle, SessionState::Running).await;
        tokio::spawn(Arc::clone(self).run_session_boxed(handle));
    }

    /// Type-erased entry point for the run task. `run_session` awaits
    /// `release_slot`, which awaits `start_running` for promoted sessions;
    /// boxing here breaks that cycle so the spawned future has a concrete
    /// `Send` type.
    fn run_session_boxed(
        self: Arc<Self>,
        handle: Arc<SessionHandle>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            self.run_session(handle).await;
        })
    }

    async fn run_session(self: Arc<Self>, handle: Arc<SessionHandle>) {
        let (first_tx, first_rx) = oneshot::channel();
        {
            // Flip to Streaming when the first chunk shows up.
            let registry = Arc::clone(&self);
            let streaming_handle = Arc::clone(&handle);
            tokio::spawn(async move {
                if first_rx.await.is_ok() {
                    registry.set_state(&streaming_handle, SessionState::Streaming).await;
                }
            });
        }

        let sink = ChunkSink::new(handle.id, self.events.clone(), Some(first_tx));
        let params = ExecParams {
            session_id: handle.id,
            argv: shell::invocation_argv(&handle.invocation, handle.request.command.trim()),
            cwd: handle.request.cwd.clone(),
            env: handle.request.env.clone(),
            timeout: handle.timeout,
            grace_period: Duration::from_millis(self.config.grace_period_ms),
            max_output_bytes: self.config.max_output_bytes,
        };

        let outcome = exec::run_command(params, Some(sink), handle.cancel.clone()).await;

        let (state, finalize) = match outcome {
            Ok(raw) => {
                let elapsed_ms = raw.duration.as_millis() as u64;
                let base = FinalizeOutcome {
                    exit_code: None,
                    duration_ms: elapsed_ms,
                    last_seq: raw.last_seq,
                    dropped_output: raw.dropped_output,
                    stdout_preview: preview_bytes(&raw.stdout),
                    stderr_preview: preview_bytes(&raw.stderr),
                    error: None,
                };
                match raw.disposition {
                    ExitDisposition::Exited(code) => (
                        SessionState::Completed,
                        FinalizeOutcome {
                            exit_code: Some(code),
                            ..base
                        },
                    ),
                    ExitDisposition::Signaled(signal) => (
                        SessionState::Failed,
                        FinalizeOutcome {
                            error: Some(AgentErr::BackendCrashed { signal }.to_string()),
                            ..base
                        },
                    ),
                    ExitDisposition::KilledTimeout => (
                        SessionState::TimedOut,
                        FinalizeOutcome {
                            error: Some(
                                AgentErr::Timeout {
                                    elapsed_ms,
                                    last_seq: raw.last_seq,
                                }
                                .to_string(),
                            ),
                            ..base
                        },
                    ),
                    ExitDisposition::KilledCancelled => (
                        SessionState::Cancelled,
                        FinalizeOutcome {
                            error: Some(
                                AgentErr::Cancelled {
                                    elapsed_ms,
                                    last_seq: raw.last_seq,
                                }
                                .to_string(),
                            ),
                            ..base
                        },
                    ),
                }
            }
            Err(err) => (
                SessionState::Failed,
                FinalizeOutcome::without_run(Some(err.to_string())),
            ),
        };

        self.finalize(&handle, state, finalize).await;
        self.release_slot(&handle.request.mission_id).await;
    }

    /// Free the mission's running slot and promote queued sessions FIFO.
    async fn release_slot(self: &Arc<Self>, mission_id: &MissionId) {
        let promoted = {
            let mut state = self.state.lock().await;
            if let Some(count) = state.running_per_mission.get_mut(mission_id) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    state.running_per_mission.remove(mission_id);
                }
            }
            state.running_total = state.running_total.saturating_sub(1);
            take_promotable(&mut state, &self.config)
        };
        for handle in promoted {
            self.start_running(handle).await;
        }
    }

    async fn set_state(self: &Arc<Self>, handle: &Arc<SessionHandle>, next: SessionState) -> bool {
        if !handle.advance(next) {
            return false;
        }
        tracing::debug!(session = %handle.id, state = %next, "session state");
        self.emit(AgentEvent::StateChanged {
            session_id: handle.id,
            correlation_id: handle.request.correlation_id.clone(),
            state: next,
        })
        .await;
        true
    }

    /// Terminalize a session exactly once: emit the result, record history
    /// in completion order, and drop it from the table.
    async fn finalize(
        self: &Arc<Self>,
        handle: &Arc<SessionHandle>,
        state: SessionState,
        outcome: FinalizeOutcome,
    ) {
        debug_assert!(state.is_terminal());
        if !self.set_state(handle, state).await {
            return;
        }

        let duration_ms = if outcome.duration_ms != 0 {
            outcome.duration_ms
        } else {
            handle.created_at.elapsed().as_millis() as u64
        };

        let result = ExecutionResult {
            session_id: handle.id,
            correlation_id: handle.request.correlation_id.clone(),
            mission_id: handle.request.mission_id.clone(),
            state,
            exit_code: outcome.exit_code,
            duration_ms,
            last_seq: outcome.last_seq,
            dropped_output: outcome.dropped_output,
            error: outcome.error.clone(),
        };
        self.emit(AgentEvent::Finished(result)).await;

        let entry = HistoryEntry {
            ts: Utc::now(),
            correlation_id: handle.request.correlation_id.clone(),
            command: preview(&handle.request.command, HISTORY_PREVIEW_CHARS),
            dialect: handle.dialect,
            decision: handle.decision.clone(),
            state,
            exit_code: outcome.exit_code,
            duration_ms,
            stdout_preview: outcome.stdout_preview,
            stderr_preview: outcome.stderr_preview,
            error: outcome.error,
        };
        if let Err(err) = self.store.append_history(&handle.request.mission_id, entry).await {
            // The audit trail is the one thing this core must not run
            // without; stop admitting new work and surface loudly.
            self.admission_halted.store(true, Ordering::SeqCst);
            tracing::error!(
                mission = %handle.request.mission_id,
                session = %handle.id,
                "history append failed, halting admission: {err}"
            );
        }

        let mut state = self.state.lock().await;
        state.sessions.remove(&handle.id);
    }

    async fn emit(&self, event: AgentEvent) {
        let _ = self.events.send(event).await;
    }
}

/// Pull queued sessions into freed slots, per-mission FIFO, while both the
/// global and the per-mission caps have headroom. Counts are updated under
/// the same lock the caller holds.
fn take_promotable(state: &mut RegistryState, config: &AgentConfig) -> Vec<Arc<SessionHandle>> {
    let mut promoted = Vec::new();
    loop {
        if state.running_total >= config.max_concurrent_sessions {
            break;
        }
        let next_mission = state
            .queues
            .iter()
            .filter(|(mission_id, queue)| {
                !queue.is_empty()
                    && state.running_per_mission.get(*mission_id).copied().unwrap_or(0)
                        < config.max_sessions_per_mission
            })
            .map(|(mission_id, _)| mission_id.clone())
            .next();
        let Some(mission_id) = next_mission else {
            break;
        };
        let Some(id) = state
            .queues
            .get_mut(&mission_id)
            .and_then(|queue| queue.pop_front())
        else {
            continue;
        };
        let Some(handle) = state.sessions.get(&id).cloned() else {
            continue;
        };
        if handle.state().is_terminal() {
            continue;
        }
        *state.running_per_mission.entry(mission_id.clone()).or_insert(0) += 1;
        state.running_total += 1;
        promoted.push(handle);
    }
    state.queues.retain(|_, queue| !queue.is_empty());
    promoted
}

#[derive(Debug, Default)]
struct FinalizeOutcome {
    exit_code: Option<i32>,
    /// 0 means "measure from session creation".
    duration_ms: u64,
    last_seq: u64,
    dropped_output: bool,
    stdout_preview: String,
    stderr_preview: String,
    error: Option<String>,
}

impl FinalizeOutcome {
    fn without_run(error: Option<String>) -> Self {
        Self {
            error,
            ..Self::default()
        }
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

fn preview_bytes(bytes: &[u8]) -> String {
    preview(&String::from_utf8_lossy(bytes), HISTORY_PREVIEW_CHARS)
}
