// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session coordinator.
//!
//! One coordinator task drives each session: it decomposes the user task
//! into a subtask graph, fans work out over the dispatch bus, applies the
//! retry and deadline policies, and aggregates results when the graph
//! drains. In hierarchical sessions the top coordinator (`queen`) delegates
//! branches to sub-coordinators (`subqueen-N`) that answer like workers;
//! agents refer to each other only by id, all traffic goes through the bus.

use crate::board::LifecycleCell;
use crate::bus::BusError;
use crate::ctx::EngineCtx;
use crate::scheduler::{Scheduler, TimerKey};
use hive_adapters::{ChatMessage, LlmBackend};
use hive_core::{
    role_of, AgentId, AgentLifecycle, Architecture, Clock, ControlSignal, CorrelationId, Message,
    MessageKind, Role, Session, SessionId, SessionStatus, Subtask, SubtaskAssignment, SubtaskGraph,
    SubtaskId, SubtaskState, TimingSummary,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Coordinator poll interval for timers and cancellation.
const TICK: Duration = Duration::from_millis(100);

const DECOMPOSE_SYSTEM: &str = "You are a planning assistant. Split the user's \
task into between one and eight short, self-contained subtask descriptions. \
Respond with a JSON array of strings and nothing else.";

const SYNTHESIS_SYSTEM: &str = "You are an editor. Merge the numbered partial \
results below into one coherent final answer. Do not mention the numbering.";

/// Keywords implying the subtask depends on the one before it.
const ORDER_KEYWORDS: &[&str] = &[
    "then ",
    "after that",
    "afterwards",
    "once that",
    "using the",
    "based on the",
    "with the result",
    "finally",
];

/// Strict decomposition parse: a bare JSON array of non-empty strings.
///
/// Anything else (prose, fences, objects, empty arrays) is `None` and the
/// caller falls back to a single subtask holding the original text.
pub fn parse_decomposition(reply: &str) -> Option<Vec<String>> {
    let parsed: Vec<String> = serde_json::from_str(reply.trim()).ok()?;
    let cleaned: Vec<String> = parsed
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Infer dependencies from ordering keywords and explicit step references.
///
/// Returns one dependency set per subtask, indexed like `texts`.
pub fn infer_deps(texts: &[String]) -> Vec<BTreeSet<usize>> {
    let mut deps: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); texts.len()];

    for (i, text) in texts.iter().enumerate() {
        let lower = text.to_lowercase();

        if i > 0 && ORDER_KEYWORDS.iter().any(|k| lower.contains(k)) {
            deps[i].insert(i - 1);
        }

        // "step N" / "subtask N" references (1-based).
        let mut words = lower.split_whitespace().peekable();
        while let Some(word) = words.next() {
            if word != "step" && word != "subtask" {
                continue;
            }
            let Some(next) = words.peek() else { break };
            let number: String = next.chars().take_while(|c| c.is_ascii_digit()).collect();
            if let Ok(n) = number.parse::<usize>() {
                if n >= 1 && n <= texts.len() && n - 1 != i {
                    deps[i].insert(n - 1);
                }
            }
        }
    }
    deps
}

/// Whether this coordinator is the session root or a delegate branch.
enum Mode {
    /// Owns the session record and seals it.
    Top {
        cancel: watch::Receiver<bool>,
        queue_tx: watch::Sender<BTreeMap<i32, usize>>,
        delegates: Vec<AgentId>,
    },
    /// Serves delegated branches and answers the parent like a worker.
    Delegate { pool: Vec<AgentId> },
}

/// In-progress branch work of a delegate.
struct Delegation {
    origin: Message,
    graph: SubtaskGraph,
    correlations: HashMap<CorrelationId, SubtaskId>,
}

/// The state machine driving one session.
pub struct Coordinator<B: LlmBackend, C: Clock> {
    id: AgentId,
    session_id: SessionId,
    ctx: EngineCtx<B, C>,
    inbox: mpsc::Receiver<Message>,
    lifecycle: LifecycleCell,
    scheduler: Scheduler,
    mode: Mode,
    /// Last worker each subtask was sent to; retries avoid it when possible.
    last_worker: HashMap<SubtaskId, AgentId>,
    /// When each subtask became ready, for the wait histogram.
    ready_since: HashMap<SubtaskId, Instant>,
    started_at: Instant,
}

impl<B: LlmBackend, C: Clock> Coordinator<B, C> {
    /// Build the top coordinator for a session.
    ///
    /// Registers `queen` on the bus; `cancel` flips when the session should
    /// stop, `queue_tx` feeds pending counts to the autoscaler.
    pub fn top(
        session_id: SessionId,
        ctx: EngineCtx<B, C>,
        cancel: watch::Receiver<bool>,
        queue_tx: watch::Sender<BTreeMap<i32, usize>>,
    ) -> Result<Self, BusError> {
        let id = AgentId::queen();
        let lifecycle: LifecycleCell = Arc::new(Mutex::new(AgentLifecycle::Active));
        let inbox = ctx.bus.register(id.clone(), Arc::clone(&lifecycle))?;
        let started_at = ctx.clock.now();
        Ok(Self {
            id,
            session_id,
            ctx,
            inbox,
            lifecycle,
            scheduler: Scheduler::new(),
            mode: Mode::Top {
                cancel,
                queue_tx,
                delegates: Vec::new(),
            },
            last_worker: HashMap::new(),
            ready_since: HashMap::new(),
            started_at,
        })
    }

    /// Build a delegate coordinator bound to a worker pool.
    fn delegate(
        n: usize,
        session_id: SessionId,
        ctx: EngineCtx<B, C>,
        pool: Vec<AgentId>,
    ) -> Result<Self, BusError> {
        let id = AgentId::subqueen(n);
        let lifecycle: LifecycleCell = Arc::new(Mutex::new(AgentLifecycle::Active));
        let inbox = ctx.bus.register(id.clone(), Arc::clone(&lifecycle))?;
        let started_at = ctx.clock.now();
        Ok(Self {
            id,
            session_id,
            ctx,
            inbox,
            lifecycle,
            scheduler: Scheduler::new(),
            mode: Mode::Delegate { pool },
            last_worker: HashMap::new(),
            ready_since: HashMap::new(),
            started_at,
        })
    }

    // ── session persistence ────────────────────────────────────────────────

    fn load_session(&self) -> Result<Session, crate::RuntimeError> {
        self.ctx
            .store
            .lock()
            .get(&self.session_id)
            .ok_or_else(|| crate::RuntimeError::SessionNotFound(self.session_id.clone()))
    }

    /// CAS-commit the session, refreshing the in-memory version.
    fn commit(&self, session: &mut Session) -> Result<(), crate::RuntimeError> {
        let version = self.ctx.store.lock().update(session.clone())?;
        session.version = version;
        Ok(())
    }

    // ── decomposition ──────────────────────────────────────────────────────

    /// Ask the backend to split a task; fall back to a single subtask.
    async fn decompose(&self, task: &str) -> (Vec<String>, Option<String>) {
        let messages = vec![
            ChatMessage::system(DECOMPOSE_SYSTEM),
            ChatMessage::user(task.to_string()),
        ];
        match self.ctx.backend.chat(&self.ctx.config.model, &messages).await {
            Ok(reply) => match parse_decomposition(&reply) {
                Some(texts) => (texts, None),
                None => (
                    vec![task.to_string()],
                    Some("decomposition parse failed, running task as a single subtask".to_string()),
                ),
            },
            Err(e) => (
                vec![task.to_string()],
                Some(format!("decomposition call failed ({e}), running task as a single subtask")),
            ),
        }
    }

    /// Populate a graph from decomposed texts: inferred deps, roles from the
    /// role assigner, priorities descending with index.
    fn build_graph(&self, graph: &mut SubtaskGraph, texts: &[String]) -> Vec<String> {
        let deps = infer_deps(texts);
        let count = texts.len() as i32;

        let mut ids = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            let id = graph.add(
                text.clone(),
                Some(role_of(text)),
                count - i as i32,
                BTreeSet::new(),
                None,
            );
            ids.push(id);
        }
        for (i, dep_set) in deps.iter().enumerate() {
            for &dep in dep_set {
                graph.add_dep(ids[i], ids[dep]);
            }
        }
        graph.break_cycles()
    }

    /// Arm deadline timers for non-terminal subtasks that carry one.
    fn arm_deadlines(&mut self, graph: &SubtaskGraph) {
        let now_ms = self.ctx.clock.epoch_ms();
        let now = self.ctx.clock.now();
        for subtask in graph.iter() {
            if subtask.state.is_terminal() {
                continue;
            }
            if let Some(deadline_ms) = subtask.deadline_ms {
                let remaining = Duration::from_millis(deadline_ms.saturating_sub(now_ms));
                self.scheduler.set(TimerKey::Deadline(subtask.id), remaining, now);
            }
        }
    }

    // ── dispatch ───────────────────────────────────────────────────────────

    /// Pick a target worker: idle with matching role first, then any idle,
    /// avoiding `avoid` when an alternative exists. `pool` restricts the
    /// candidates (empty means unrestricted).
    fn pick_worker(
        &self,
        required_role: Option<Role>,
        avoid: Option<&AgentId>,
        pool: &[AgentId],
    ) -> Option<AgentId> {
        let idle = self.ctx.board.idle_workers();
        let mut candidates: Vec<(AgentId, Role)> = idle
            .into_iter()
            .filter(|(id, _)| pool.is_empty() || pool.contains(id))
            .collect();
        if candidates.is_empty() {
            return None;
        }

        if candidates.len() > 1 {
            if let Some(avoid) = avoid {
                candidates.retain(|(id, _)| id != avoid);
            }
        }

        if let Some(required) = required_role {
            if let Some((id, _)) = candidates.iter().find(|(_, role)| *role == required) {
                return Some(id.clone());
            }
        }
        candidates.first().map(|(id, _)| id.clone())
    }

    /// Peers a mesh subtask shares its response with.
    fn mesh_peers(&self, target: &AgentId) -> Vec<AgentId> {
        self.ctx
            .board
            .members()
            .into_iter()
            .filter(|id| id != target)
            .collect()
    }

    /// Correlations are deterministic and stable across retries: every
    /// attempt of a subtask belongs to the same request/response chain.
    /// The coordinator id disambiguates delegate branch graphs, whose
    /// subtask ids also start at zero.
    fn correlation_for(&self, subtask: &Subtask) -> CorrelationId {
        CorrelationId::new(format!("{}:{}:{}", self.session_id, self.id, subtask.id))
    }

    /// Send one ready subtask to `target`; returns false on backpressure.
    async fn send_assignment(
        &mut self,
        graph: &mut SubtaskGraph,
        correlations: &mut HashMap<CorrelationId, SubtaskId>,
        subtask_id: SubtaskId,
        target: AgentId,
        peers: Vec<AgentId>,
    ) -> Result<bool, crate::RuntimeError> {
        let Some(subtask) = graph.get(subtask_id) else {
            return Ok(true);
        };
        let correlation = self.correlation_for(subtask);
        let assignment = SubtaskAssignment {
            subtask_id,
            text: subtask.text.clone(),
            role: subtask.required_role,
            priority: subtask.priority,
            deadline_ms: subtask.deadline_ms,
            attempt: subtask.attempts + 1,
            peers,
        };
        let message = Message::subtask(
            self.session_id.clone(),
            self.id.clone(),
            target.clone(),
            correlation.clone(),
            assignment,
            self.ctx.clock.epoch_ms(),
        );

        match self.ctx.bus.send(message).await {
            Ok(delivered) => {
                graph.mark_in_flight(subtask_id, target.clone());
                correlations.insert(correlation, subtask_id);
                self.last_worker.insert(subtask_id, target);
                if let Some(since) = self.ready_since.remove(&subtask_id) {
                    let wait = self.ctx.clock.now().duration_since(since);
                    self.ctx.board.record_wait(wait.as_millis() as u64);
                }
                if delivered.is_none() {
                    // Dead-lettered; the error already sits in our inbox and
                    // will drive the retry path.
                    debug!(subtask = %subtask_id, "dispatch dead-lettered");
                }
                Ok(true)
            }
            Err(BusError::Backpressure(worker)) => {
                // Defer: the subtask stays ready and is retried next tick.
                debug!(subtask = %subtask_id, worker = %worker, "backpressure, deferring");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Promote ready subtasks and dispatch as many as workers allow.
    async fn dispatch_ready(
        &mut self,
        graph: &mut SubtaskGraph,
        correlations: &mut HashMap<CorrelationId, SubtaskId>,
        mesh: bool,
    ) -> Result<bool, crate::RuntimeError> {
        let now = self.ctx.clock.now();
        for promoted in graph.refresh_ready() {
            self.ready_since.entry(promoted).or_insert(now);
        }

        let mut dispatched = false;
        for subtask_id in graph.ready_queue() {
            let (required_role, avoid) = match graph.get(subtask_id) {
                Some(s) => (s.required_role, self.last_worker.get(&subtask_id).cloned()),
                None => continue,
            };

            let target = match &self.mode {
                Mode::Top { delegates, .. } if !delegates.is_empty() => {
                    // Round-robin branches across sub-coordinators.
                    Some(delegates[subtask_id.0 as usize % delegates.len()].clone())
                }
                Mode::Delegate { pool } => {
                    let pool = pool.clone();
                    self.pick_worker(required_role, avoid.as_ref(), &pool)
                }
                Mode::Top { .. } => self.pick_worker(required_role, avoid.as_ref(), &[]),
            };
            let Some(target) = target else {
                // No idle worker; wait for a response or fleet growth.
                break;
            };

            let peers = if mesh { self.mesh_peers(&target) } else { Vec::new() };
            if !self
                .send_assignment(graph, correlations, subtask_id, target, peers)
                .await?
            {
                break;
            }
            dispatched = true;
        }
        Ok(dispatched)
    }

    // ── replies and timers ─────────────────────────────────────────────────

    /// Apply a worker reply to the graph. Returns true when it changed.
    fn apply_reply(
        &mut self,
        graph: &mut SubtaskGraph,
        correlations: &HashMap<CorrelationId, SubtaskId>,
        message: &Message,
        failure: &mut Option<String>,
    ) -> bool {
        let Some(&subtask_id) = correlations.get(&message.correlation) else {
            debug!(correlation = %message.correlation, "reply for unknown correlation");
            return false;
        };

        match message.kind {
            MessageKind::Response => {
                let text = message.text().unwrap_or_default().to_string();
                if graph.mark_done(subtask_id, text) {
                    self.scheduler.cancel(&TimerKey::Deadline(subtask_id));
                    self.scheduler.cancel(&TimerKey::Retry(subtask_id));
                    debug!(subtask = %subtask_id, worker = %message.sender, "subtask done");
                    true
                } else {
                    false
                }
            }
            MessageKind::Error => {
                let reason = message.text().unwrap_or("unknown error").to_string();
                let attempts = graph.get(subtask_id).map(|s| s.attempts).unwrap_or(0);
                if graph
                    .get(subtask_id)
                    .map(|s| s.state.is_terminal())
                    .unwrap_or(true)
                {
                    return false;
                }

                if attempts <= self.ctx.config.subtask_retries {
                    // Back off, then return the subtask to ready; a
                    // different worker is preferred on the next attempt.
                    graph.mark_attempt_failed(subtask_id, reason.clone());
                    let backoff = self.ctx.config.backoff_for_attempt(attempts);
                    self.scheduler
                        .set(TimerKey::Retry(subtask_id), backoff, self.ctx.clock.now());
                    info!(subtask = %subtask_id, attempts, error = %reason, "attempt failed, retrying");
                } else {
                    let failed = graph.mark_failed(subtask_id, reason.clone());
                    failure.get_or_insert(reason.clone());
                    self.scheduler.cancel(&TimerKey::Deadline(subtask_id));
                    warn!(subtask = %subtask_id, cascade = failed.len(), error = %reason, "subtask failed");
                }
                true
            }
            _ => false,
        }
    }

    /// Fire elapsed timers. Returns true when the graph changed.
    fn fire_timers(&mut self, graph: &mut SubtaskGraph, failure: &mut Option<String>) -> bool {
        let mut changed = false;
        for key in self.scheduler.fired(self.ctx.clock.now()) {
            match key {
                TimerKey::Deadline(subtask_id) => {
                    let terminal = graph
                        .get(subtask_id)
                        .map(|s| s.state.is_terminal())
                        .unwrap_or(true);
                    if !terminal {
                        graph.mark_failed(subtask_id, "timeout");
                        failure.get_or_insert_with(|| format!("{subtask_id}: timeout"));
                        self.scheduler.cancel(&TimerKey::Retry(subtask_id));
                        warn!(subtask = %subtask_id, "deadline elapsed");
                        changed = true;
                    }
                }
                TimerKey::Retry(subtask_id) => {
                    graph.mark_retry(subtask_id);
                    self.ready_since.insert(subtask_id, self.ctx.clock.now());
                    changed = true;
                }
            }
        }
        changed
    }

    /// The graph is finished when every subtask is terminal and no retry is
    /// still pending.
    fn graph_finished(&self, graph: &SubtaskGraph) -> bool {
        graph.is_complete() && !self.scheduler.has_pending_retries()
    }

    // ── top-level run ──────────────────────────────────────────────────────

    /// Drive the session to a terminal status.
    pub async fn run(mut self) -> Result<SessionStatus, crate::RuntimeError> {
        let mut session = self.load_session()?;
        info!(session = %session.id, architecture = %session.architecture, "coordinator starting");

        if session.graph.is_empty() {
            let (texts, warning) = self.decompose(&session.task).await;
            let cycle_warnings = self.build_graph(&mut session.graph, &texts);
            session.warnings.extend(warning);
            session.warnings.extend(cycle_warnings);
            self.commit(&mut session)?;
        }
        self.arm_deadlines(&session.graph);

        if session.architecture == Architecture::Hierarchical && session.graph.len() > 1 {
            self.spawn_delegates(&session)?;
        }

        let mesh = session.architecture == Architecture::Mesh;
        let mut correlations = std::mem::take(&mut session.correlations);
        let mut failure = session.failure.clone();

        let status = loop {
            if self.cancelled() {
                break self.cancel_session(&mut session).await?;
            }

            let dispatched = self
                .dispatch_ready(&mut session.graph, &mut correlations, mesh)
                .await?;
            self.publish_queue(&session.graph);
            if dispatched {
                session.correlations = correlations.clone();
                self.commit(&mut session)?;
            }

            if self.graph_finished(&session.graph) {
                break self.finish(&mut session).await?;
            }

            let mut changed = false;
            tokio::select! {
                maybe = self.inbox.recv() => {
                    match maybe {
                        Some(message) => {
                            let seq = message.seq;
                            if message.kind == MessageKind::Control {
                                break self.cancel_session(&mut session).await?;
                            }
                            changed |= self.apply_reply(
                                &mut session.graph,
                                &correlations,
                                &message,
                                &mut failure,
                            );
                            self.ctx.bus.ack(&self.id, seq);
                        }
                        None => break SessionStatus::Failed,
                    }
                }
                _ = tokio::time::sleep(TICK) => {}
            }
            changed |= self.fire_timers(&mut session.graph, &mut failure);

            if changed {
                session.failure = failure.clone();
                session.correlations = correlations.clone();
                self.commit(&mut session)?;
            }
        };

        self.shutdown_delegates().await;
        *self.lifecycle.lock() = AgentLifecycle::Terminated;
        self.ctx.bus.deregister(&self.id);
        Ok(status)
    }

    fn cancelled(&self) -> bool {
        match &self.mode {
            Mode::Top { cancel, .. } => *cancel.borrow(),
            Mode::Delegate { .. } => false,
        }
    }

    fn publish_queue(&self, graph: &SubtaskGraph) {
        if let Mode::Top { queue_tx, .. } = &self.mode {
            let _ = queue_tx.send(graph.pending_by_priority());
        }
    }

    /// Spawn sub-coordinators and partition the worker pool among them.
    fn spawn_delegates(&mut self, session: &Session) -> Result<(), crate::RuntimeError> {
        let k = session.graph.len();
        let m = self.ctx.config.sub_coordinators.clamp(1, k.saturating_sub(1).max(1));

        let workers = self.ctx.board.members();
        let mut pools: Vec<Vec<AgentId>> = vec![Vec::new(); m];
        for (i, worker) in workers.into_iter().enumerate() {
            pools[i % m].push(worker);
        }

        let mut delegates = Vec::with_capacity(m);
        for (n, pool) in pools.into_iter().enumerate() {
            let delegate = Coordinator::delegate(
                n,
                self.session_id.clone(),
                self.ctx.clone(),
                pool,
            )?;
            delegates.push(delegate.id.clone());
            tokio::spawn(delegate.run_delegate());
        }
        info!(count = delegates.len(), "sub-coordinators spawned");

        if let Mode::Top { delegates: slot, .. } = &mut self.mode {
            *slot = delegates;
        }
        Ok(())
    }

    async fn shutdown_delegates(&mut self) {
        let delegates = match &self.mode {
            Mode::Top { delegates, .. } => delegates.clone(),
            Mode::Delegate { .. } => return,
        };
        for delegate in delegates {
            let message = Message::control(
                self.session_id.clone(),
                self.id.clone(),
                delegate,
                ControlSignal::Shutdown,
                self.ctx.clock.epoch_ms(),
            );
            let _ = self.ctx.bus.send(message).await;
        }
    }

    /// Aggregate results, synthesize, seal the session.
    async fn finish(&mut self, session: &mut Session) -> Result<SessionStatus, crate::RuntimeError> {
        let status = if session.graph.any_failed() {
            if session.failure.is_none() {
                session.failure = session
                    .graph
                    .iter()
                    .find(|s| s.state == SubtaskState::Failed)
                    .and_then(|s| s.error.clone());
            }
            SessionStatus::Failed
        } else {
            let (count, aggregated) = {
                let results = session.graph.results_in_order();
                let aggregated = results
                    .iter()
                    .map(|(id, role, text)| match role {
                        Some(role) => format!("### {id} [{role}]\n{text}"),
                        None => format!("### {id}\n{text}"),
                    })
                    .collect::<Vec<_>>()
                    .join("\n\n");
                (results.len(), aggregated)
            };
            // A single subtask needs no synthesis pass.
            let result_text = if count == 1 {
                session
                    .graph
                    .results_in_order()
                    .first()
                    .map(|(_, _, text)| text.to_string())
                    .unwrap_or_default()
            } else {
                self.synthesize(session, aggregated).await
            };
            session.result = Some(result_text);
            SessionStatus::Completed
        };

        session.status = status;
        let timing = self.timing_summary(session);
        session.timing = Some(timing);
        self.commit(session)?;

        let now_ms = self.ctx.clock.epoch_ms();
        self.ctx.store.lock().seal(&session.id, now_ms)?;
        info!(session = %session.id, status = %status, "session sealed");
        Ok(status)
    }

    /// Final synthesis call; on backend failure the concatenation stands.
    async fn synthesize(&self, session: &mut Session, aggregated: String) -> String {
        let messages = vec![
            ChatMessage::system(SYNTHESIS_SYSTEM),
            ChatMessage::user(aggregated.clone()),
        ];
        match self.ctx.backend.chat(&self.ctx.config.model, &messages).await {
            Ok(text) => text,
            Err(e) => {
                session
                    .warnings
                    .push(format!("synthesis failed ({e}), returning concatenated results"));
                aggregated
            }
        }
    }

    fn timing_summary(&self, session: &Session) -> TimingSummary {
        let snapshot = self.ctx.board.snapshot(
            BTreeMap::new(),
            hive_core::GpuSnapshot::Unavailable {
                at_ms: self.ctx.clock.epoch_ms(),
            },
        );
        TimingSummary {
            subtasks: session.graph.len(),
            mean_wait_ms: snapshot.waits.mean_ms(),
            max_wait_ms: snapshot.waits.max_ms(),
            elapsed_ms: self.ctx.clock.now().duration_since(self.started_at).as_millis() as u64,
        }
    }

    /// Cancellation: stop dispatching, mark cancelled, tell the fleet.
    async fn cancel_session(
        &mut self,
        session: &mut Session,
    ) -> Result<SessionStatus, crate::RuntimeError> {
        warn!(session = %session.id, "session cancelled");
        session.status = SessionStatus::Cancelled;
        self.commit(session)?;
        let now_ms = self.ctx.clock.epoch_ms();
        self.ctx.store.lock().seal(&session.id, now_ms)?;

        self.ctx
            .bus
            .broadcast(
                self.session_id.clone(),
                self.id.clone(),
                ControlSignal::Shutdown,
            )
            .await?;
        Ok(SessionStatus::Cancelled)
    }

    // ── delegate run loop ──────────────────────────────────────────────────

    /// Serve delegated branches until shutdown.
    ///
    /// Each delegated subtask is re-decomposed into a local, in-memory
    /// branch graph dispatched over this delegate's worker pool; the
    /// branch result is synthesized and returned to the parent as a single
    /// `response`. Branch graphs are rebuilt from the parent's re-delivery
    /// on restart, so they are deliberately not persisted.
    pub async fn run_delegate(mut self) {
        let mut backlog: VecDeque<Message> = VecDeque::new();
        let mut current: Option<Delegation> = None;
        let mut draining = false;

        loop {
            // Start the next branch when free.
            if current.is_none() {
                if let Some(origin) = backlog.pop_front() {
                    current = Some(self.start_delegation(origin).await);
                } else if draining {
                    break;
                }
            }

            if let Some(delegation) = &mut current {
                let mut graph = std::mem::take(&mut delegation.graph);
                let mut correlations = std::mem::take(&mut delegation.correlations);
                let result = self
                    .dispatch_ready(&mut graph, &mut correlations, false)
                    .await;
                delegation.graph = graph;
                delegation.correlations = correlations;
                if let Err(e) = result {
                    warn!(delegate = %self.id, error = %e, "branch dispatch failed");
                }

                if self.graph_finished(&delegation.graph) {
                    let finished = current.take();
                    if let Some(finished) = finished {
                        self.reply_branch(finished).await;
                    }
                    continue;
                }
            }

            let mut failure = None;
            tokio::select! {
                maybe = self.inbox.recv() => {
                    let Some(message) = maybe else { break };
                    let seq = message.seq;
                    match message.kind {
                        MessageKind::Subtask => backlog.push_back(message),
                        MessageKind::Control => draining = true,
                        _ => {
                            if let Some(delegation) = &mut current {
                                let mut graph = std::mem::take(&mut delegation.graph);
                                self.apply_reply(
                                    &mut graph,
                                    &delegation.correlations,
                                    &message,
                                    &mut failure,
                                );
                                delegation.graph = graph;
                            }
                        }
                    }
                    self.ctx.bus.ack(&self.id, seq);
                }
                _ = tokio::time::sleep(TICK) => {}
            }
            if let Some(delegation) = &mut current {
                let mut graph = std::mem::take(&mut delegation.graph);
                self.fire_timers(&mut graph, &mut failure);
                delegation.graph = graph;
            }
        }

        *self.lifecycle.lock() = AgentLifecycle::Terminated;
        self.ctx.bus.deregister(&self.id);
        debug!(delegate = %self.id, "delegate exiting");
    }

    /// Decompose a delegated subtask into a branch graph.
    async fn start_delegation(&mut self, origin: Message) -> Delegation {
        let text = origin
            .assignment()
            .map(|a| a.text.clone())
            .unwrap_or_default();
        let (texts, _warning) = self.decompose(&text).await;

        let mut graph = SubtaskGraph::new();
        self.build_graph(&mut graph, &texts);
        debug!(delegate = %self.id, branches = graph.len(), "delegation started");

        Delegation {
            origin,
            graph,
            correlations: HashMap::new(),
        }
    }

    /// Answer the parent for a finished branch.
    async fn reply_branch(&mut self, delegation: Delegation) {
        let reply = if delegation.graph.any_failed() {
            let reason = delegation
                .graph
                .iter()
                .find(|s| s.state == SubtaskState::Failed)
                .and_then(|s| s.error.clone())
                .unwrap_or_else(|| "branch failed".to_string());
            Message::error(
                &delegation.origin,
                self.id.clone(),
                reason,
                self.ctx.clock.epoch_ms(),
            )
        } else {
            let results = delegation.graph.results_in_order();
            let text = if results.len() == 1 {
                results[0].2.to_string()
            } else {
                results
                    .iter()
                    .map(|(_, _, text)| *text)
                    .collect::<Vec<_>>()
                    .join("\n\n")
            };
            Message::response(
                &delegation.origin,
                self.id.clone(),
                text,
                self.ctx.clock.epoch_ms(),
            )
        };

        if let Err(e) = self.ctx.bus.send(reply).await {
            warn!(delegate = %self.id, error = %e, "branch reply failed");
        }
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
