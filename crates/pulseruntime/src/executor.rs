use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use pulsecore::{
    ActivationContext, Edge, EventBus, EventSubscription, ExecutionContext, ExecutionEvent,
    ExecutionId, ExecutionOutcome, ExecutionResult, ExecutionState, Graph, NodeConfig, NodeError,
    NodeId, PreparedActivation, Readiness, StartMode, StateTransitionError, Transfer, Transition,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Settings for an [`Executor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Pause after every iteration, in milliseconds. Zero disables it.
    /// An `iterationDelay` entry in the execution context takes precedence.
    pub iteration_delay_ms: u64,

    /// How many direct-through relays may trigger each other in a chain
    /// before the execution fails.
    pub max_relay_depth: usize,

    pub event_buffer_size: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            iteration_delay_ms: 0,
            max_relay_depth: 64,
            event_buffer_size: 1000,
        }
    }
}

impl ExecutorConfig {
    fn iteration_delay(&self) -> Option<Duration> {
        (self.iteration_delay_ms > 0).then(|| Duration::from_millis(self.iteration_delay_ms))
    }
}

struct Session {
    state: ExecutionState,
    execution_id: ExecutionId,
    cancellation: CancellationToken,
}

struct Shared {
    config: ExecutorConfig,
    session: Mutex<Session>,
    wake: Notify,
    events: EventBus,
}

/// Runs a graph iteration by iteration until it goes quiet.
///
/// The handle is cheap to clone; clones share one state machine, so a task
/// other than the one driving [`Executor::execute`] can pause, step, resume
/// or cancel the run.
#[derive(Clone)]
pub struct Executor {
    shared: Arc<Shared>,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        let events = EventBus::new(config.event_buffer_size);
        Self {
            shared: Arc::new(Shared {
                config,
                session: Mutex::new(Session {
                    state: ExecutionState::Idle,
                    execution_id: ExecutionId::nil(),
                    cancellation: CancellationToken::new(),
                }),
                wake: Notify::new(),
                events,
            }),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ExecutionState {
        self.shared.session.lock().state
    }

    /// Subscribe to execution events
    pub fn subscribe(&self) -> EventSubscription {
        self.shared.events.subscribe()
    }

    /// Run `graph` continuously until it completes, fails or is cancelled.
    pub async fn execute(
        &self,
        graph: &mut Graph,
        context: ExecutionContext,
    ) -> Result<ExecutionResult, StateTransitionError> {
        self.execute_with(graph, context, StartMode::Continuous).await
    }

    /// Like [`Executor::execute`]; `StartMode::Step` starts paused and waits
    /// for [`Executor::step_forward`] or [`Executor::resume`].
    ///
    /// Fails only when the executor is already running. Every other ending
    /// is reported in the returned [`ExecutionResult`].
    pub async fn execute_with(
        &self,
        graph: &mut Graph,
        context: ExecutionContext,
        mode: StartMode,
    ) -> Result<ExecutionResult, StateTransitionError> {
        let (execution_id, cancellation, previous, next) = {
            let mut session = self.shared.session.lock();
            let next = session.state.transition(Transition::Start(mode))?;
            let previous = std::mem::replace(&mut session.state, next);
            session.execution_id = ExecutionId::new_v4();
            session.cancellation = CancellationToken::new();
            (
                session.execution_id,
                session.cancellation.clone(),
                previous,
                next,
            )
        };

        tracing::info!(
            %execution_id,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Starting graph execution"
        );
        self.emit(ExecutionEvent::Started {
            execution_id,
            node_count: graph.node_count(),
            edge_count: graph.edge_count(),
            timestamp: Utc::now(),
        });
        self.emit(ExecutionEvent::StateChanged {
            execution_id,
            from: previous,
            to: next,
            timestamp: Utc::now(),
        });

        for cycle in graph.find_relay_cycles() {
            tracing::warn!(
                nodes = ?cycle,
                limit = self.shared.config.max_relay_depth,
                "direct-through relays form a cycle; propagation will hit the depth limit"
            );
        }
        for id in graph.node_ids().to_vec() {
            if let Some(node) = graph.node_mut(id) {
                node.reset_status();
            }
        }

        let started = Instant::now();
        let mut run = Run {
            executor: self.clone(),
            graph,
            context: Arc::new(context),
            execution_id,
            cancellation,
            iteration: 0,
            fired_sources: HashSet::new(),
        };
        let outcome = run.drive().await;
        let result = ExecutionResult {
            execution_id,
            outcome,
            iterations: run.iteration,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        self.finish(&result);
        Ok(result)
    }

    /// Stop at the next iteration boundary.
    pub fn pause(&self) -> Result<(), StateTransitionError> {
        self.transition(Transition::Pause).map(|_| ())
    }

    pub fn resume(&self) -> Result<(), StateTransitionError> {
        self.transition(Transition::Resume)?;
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Run exactly one iteration, then return to paused.
    pub fn step_forward(&self) -> Result<(), StateTransitionError> {
        self.transition(Transition::Step)?;
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Request cancellation. In-flight activations are abandoned and the
    /// pending `execute` call resolves with a cancelled outcome.
    pub fn cancel(&self) -> Result<(), StateTransitionError> {
        {
            let session = self.shared.session.lock();
            session.state.transition(Transition::Cancel)?;
            session.cancellation.cancel();
        }
        tracing::info!("Cancellation requested");
        self.shared.wake.notify_one();
        Ok(())
    }

    fn transition(&self, transition: Transition) -> Result<ExecutionState, StateTransitionError> {
        let (execution_id, previous, next) = {
            let mut session = self.shared.session.lock();
            let next = session.state.transition(transition)?;
            let previous = std::mem::replace(&mut session.state, next);
            (session.execution_id, previous, next)
        };
        tracing::debug!(from = %previous, to = %next, "execution state changed");
        self.emit(ExecutionEvent::StateChanged {
            execution_id,
            from: previous,
            to: next,
            timestamp: Utc::now(),
        });
        Ok(next)
    }

    /// Return to idle, then publish the terminal event.
    fn finish(&self, result: &ExecutionResult) {
        let transition = match result.outcome {
            ExecutionOutcome::Completed => Transition::Complete,
            ExecutionOutcome::Cancelled => Transition::Cancel,
            ExecutionOutcome::Failed { .. } => Transition::Error,
        };
        let previous = {
            let mut session = self.shared.session.lock();
            std::mem::replace(&mut session.state, ExecutionState::Idle)
        };
        if previous.transition(transition).is_err() {
            tracing::warn!(state = %previous, %transition, "terminal transition from unexpected state");
        }
        let execution_id = result.execution_id;
        self.emit(ExecutionEvent::StateChanged {
            execution_id,
            from: previous,
            to: ExecutionState::Idle,
            timestamp: Utc::now(),
        });

        let event = match &result.outcome {
            ExecutionOutcome::Completed => {
                tracing::info!(
                    %execution_id,
                    iterations = result.iterations,
                    duration_ms = result.duration_ms,
                    "Graph execution completed"
                );
                ExecutionEvent::Completed {
                    execution_id,
                    result: result.clone(),
                    timestamp: Utc::now(),
                }
            }
            ExecutionOutcome::Cancelled => {
                tracing::info!(%execution_id, iterations = result.iterations, "Graph execution cancelled");
                ExecutionEvent::Cancelled {
                    execution_id,
                    result: result.clone(),
                    timestamp: Utc::now(),
                }
            }
            ExecutionOutcome::Failed { error } => {
                tracing::error!(%execution_id, iterations = result.iterations, "Graph execution failed: {}", error);
                ExecutionEvent::Failed {
                    execution_id,
                    error: error.clone(),
                    result: result.clone(),
                    timestamp: Utc::now(),
                }
            }
        };
        self.emit(event);
    }

    fn emit(&self, event: ExecutionEvent) {
        self.shared.events.emit(event);
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

/// How one iteration ended.
enum Step {
    Progressed,
    Quiescent,
    Cancelled,
    Failed(String),
}

enum Work {
    Propagate(NodeId, usize),
    Activate(NodeId, usize),
}

/// State of a single `execute` call.
struct Run<'g> {
    executor: Executor,
    graph: &'g mut Graph,
    context: Arc<ExecutionContext>,
    execution_id: ExecutionId,
    cancellation: CancellationToken,
    iteration: u64,
    fired_sources: HashSet<NodeId>,
}

impl Run<'_> {
    async fn drive(&mut self) -> ExecutionOutcome {
        loop {
            if self.cancellation.is_cancelled() {
                return ExecutionOutcome::Cancelled;
            }
            let state = self.executor.state();
            match state {
                ExecutionState::Running | ExecutionState::Stepping => {
                    match self.execute_one_iteration().await {
                        Step::Progressed => {}
                        Step::Quiescent => return ExecutionOutcome::Completed,
                        Step::Cancelled => return ExecutionOutcome::Cancelled,
                        Step::Failed(error) => return ExecutionOutcome::Failed { error },
                    }
                    if state == ExecutionState::Stepping {
                        if let Err(e) = self.executor.transition(Transition::StepComplete) {
                            tracing::debug!("step completion skipped: {}", e);
                        }
                    }
                }
                ExecutionState::Paused => {
                    let cancellation = self.cancellation.clone();
                    tokio::select! {
                        _ = self.executor.shared.wake.notified() => {}
                        _ = cancellation.cancelled() => {}
                    }
                }
                ExecutionState::Idle => return ExecutionOutcome::Cancelled,
            }
        }
    }

    async fn execute_one_iteration(&mut self) -> Step {
        let ready = self.collect_ready();
        if ready.is_empty() {
            tracing::debug!(iterations = self.iteration, "no ready nodes, graph is quiescent");
            return Step::Quiescent;
        }

        self.iteration += 1;
        tracing::debug!(iteration = self.iteration, ready = ready.len(), "iteration");
        self.emit(ExecutionEvent::Iteration {
            execution_id: self.execution_id,
            iteration: self.iteration,
            timestamp: Utc::now(),
        });

        let failures = match self.activate_all(&ready).await {
            Some(failures) => failures,
            None => return Step::Cancelled,
        };
        if !failures.is_empty() {
            return Step::Failed(failures.join("; "));
        }

        // Clear every consumed input before anything is propagated, so a
        // node earlier in the scan cannot have its delivery wiped by a later
        // node's clear.
        for id in &ready {
            self.clear_inputs(*id);
        }
        for id in &ready {
            if let Err(step) = self.propagate(*id).await {
                return step;
            }
        }

        if !self.delay().await {
            return Step::Cancelled;
        }
        Step::Progressed
    }

    fn collect_ready(&mut self) -> Vec<NodeId> {
        let mut ready = Vec::new();
        for &id in self.graph.node_ids() {
            let Some(node) = self.graph.node(id) else {
                continue;
            };
            let connected = self.graph.connected_input_ids(id);
            if node.is_ready_to_activate(&connected) != Readiness::Ready {
                continue;
            }
            if connected.is_empty() {
                let behavior = node.behavior();
                let exhausted = self.fired_sources.contains(&id)
                    && !behavior.refires()
                    && !behavior.has_pending_work();
                if exhausted {
                    continue;
                }
                self.fired_sources.insert(id);
            }
            ready.push(id);
        }
        ready
    }

    fn is_ready(&self, id: NodeId) -> bool {
        let connected = self.graph.connected_input_ids(id);
        self.graph
            .node(id)
            .is_some_and(|node| node.is_ready_to_activate(&connected) == Readiness::Ready)
    }

    /// Fan out every ready node onto its own task and wait for all of them.
    ///
    /// Returns the failure messages, or `None` when cancelled mid-flight.
    async fn activate_all(&mut self, ready: &[NodeId]) -> Option<Vec<String>> {
        let mut pending = FuturesUnordered::new();
        for &id in ready {
            let Some(node) = self.graph.node_mut(id) else {
                continue;
            };
            let prepared = node.prepare_activation();
            let config = node.context().clone();
            let node_type = node.type_id().to_string();
            let ctx = self.activation_context(id, config);

            self.emit(ExecutionEvent::NodeStarted {
                execution_id: self.execution_id,
                node_id: id,
                node_type,
                timestamp: Utc::now(),
            });

            let started = Instant::now();
            let handle = tokio::spawn(async move {
                let PreparedActivation {
                    behavior,
                    inputs,
                    controls,
                } = prepared;
                behavior.activate_core(ctx, inputs, controls).await
            });
            pending.push(async move { (id, handle.await, started.elapsed()) });
        }

        let cancellation = self.cancellation.clone();
        let mut settled = HashSet::new();
        let mut failures = Vec::new();
        loop {
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => {
                    for id in ready.iter().filter(|id| !settled.contains(*id)) {
                        if let Some(node) = self.graph.node_mut(*id) {
                            node.reset_status();
                        }
                    }
                    tracing::debug!(abandoned = ready.len() - settled.len(), "activations abandoned");
                    return None;
                }
                next = pending.next() => {
                    let Some((id, joined, elapsed)) = next else {
                        break;
                    };
                    settled.insert(id);
                    let result = joined.unwrap_or_else(|e| {
                        Err(NodeError::ExecutionFailed(format!("activation task failed: {}", e)))
                    });
                    let completed = self
                        .graph
                        .node_mut(id)
                        .map(|node| node.complete_activation(result));
                    if let Some(Err(e)) = self.report_completion(id, completed, elapsed) {
                        failures.push(e);
                    }
                }
            }
        }
        Some(failures)
    }

    /// Emit `NodeCompleted` for a settled activation. Returns the failure
    /// line for the iteration report when it failed.
    fn report_completion(
        &mut self,
        id: NodeId,
        completed: Option<Result<(), NodeError>>,
        elapsed: Duration,
    ) -> Option<Result<(), String>> {
        let completed = completed?;
        self.graph.reindex_ports(id);
        let label = self
            .graph
            .node(id)
            .map(|node| node.label().to_string())
            .unwrap_or_default();
        let duration_ms = elapsed.as_millis() as u64;
        match completed {
            Ok(()) => {
                tracing::debug!(node = %label, duration_ms, "node completed");
                self.emit(ExecutionEvent::NodeCompleted {
                    execution_id: self.execution_id,
                    node_id: id,
                    success: true,
                    error: None,
                    duration_ms,
                    timestamp: Utc::now(),
                });
                Some(Ok(()))
            }
            Err(e) => {
                tracing::error!(node = %label, "Node {} failed: {}", id, e);
                self.emit(ExecutionEvent::NodeCompleted {
                    execution_id: self.execution_id,
                    node_id: id,
                    success: false,
                    error: Some(e.to_string()),
                    duration_ms,
                    timestamp: Utc::now(),
                });
                Some(Err(format!("{}: {}", label, e)))
            }
        }
    }

    /// Push a node's fresh outputs downstream, settling any direct-through
    /// relays they trigger depth-first within this iteration.
    async fn propagate(&mut self, origin: NodeId) -> Result<(), Step> {
        let max_depth = self.executor.shared.config.max_relay_depth;
        let mut stack = vec![Work::Propagate(origin, 0)];
        while let Some(work) = stack.pop() {
            match work {
                Work::Propagate(id, depth) => {
                    let triggered = self.transfer_outputs(id)?;
                    for relay in triggered.into_iter().rev() {
                        stack.push(Work::Activate(relay, depth + 1));
                    }
                }
                Work::Activate(id, depth) => {
                    if !self.is_ready(id) {
                        continue;
                    }
                    if depth > max_depth {
                        let label = self
                            .graph
                            .node(id)
                            .map(|node| node.label().to_string())
                            .unwrap_or_default();
                        return Err(Step::Failed(format!(
                            "{}: direct-through relay depth limit of {} exceeded",
                            label, max_depth
                        )));
                    }
                    self.activate_relay(id).await?;
                    stack.push(Work::Propagate(id, depth));
                }
            }
        }
        Ok(())
    }

    /// Move every output-side port with unread data across its valid edges.
    /// Returns the direct-through nodes that became ready, in delivery order.
    fn transfer_outputs(&mut self, id: NodeId) -> Result<Vec<NodeId>, Step> {
        let Some(node) = self.graph.node(id) else {
            return Ok(Vec::new());
        };
        let sources: Vec<_> = node
            .output_port_ids()
            .into_iter()
            .filter(|port| !self.graph.outgoing(*port).is_empty())
            .collect();

        let mut values = Vec::new();
        if let Some(node) = self.graph.node_mut(id) {
            for port_id in sources {
                if let Some(port) = node.port_mut(port_id) {
                    if port.has_new_data() {
                        values.push((port_id, port.read()));
                    }
                }
            }
        }

        let mut transfers = Vec::new();
        let mut candidates = Vec::new();
        let mut failure = None;
        'outer: for (from, value) in values {
            for to in self.graph.outgoing(from).to_vec() {
                if !self.graph.is_edge_valid(&Edge::new(from, to)) {
                    tracing::warn!(%from, %to, "skipping incompatible edge");
                    continue;
                }
                // An element port removed by a reshaping write leaves its edge behind.
                if self.graph.owner_of(to).is_none() {
                    tracing::warn!(%from, %to, "skipping edge to a removed element port");
                    continue;
                }
                match self.graph.write_port(to, value.clone()) {
                    Ok(stored) => transfers.push(Transfer {
                        from_port: from,
                        to_port: to,
                        value: stored,
                    }),
                    Err(e) => {
                        failure = Some(format!("propagation {} -> {} failed: {}", from, to, e));
                        break 'outer;
                    }
                }
                if let Some(owner) = self.graph.owner_of(to) {
                    let relay = self.graph.node(owner).is_some_and(|n| n.is_direct_through());
                    if relay && !candidates.contains(&owner) {
                        candidates.push(owner);
                    }
                }
            }
        }

        if !transfers.is_empty() {
            tracing::debug!(node = %id, transfers = transfers.len(), "data propagated");
            self.emit(ExecutionEvent::DataPropagated {
                execution_id: self.execution_id,
                node_id: id,
                transfers,
                timestamp: Utc::now(),
            });
        }
        if let Some(error) = failure {
            return Err(Step::Failed(error));
        }
        Ok(candidates.into_iter().filter(|relay| self.is_ready(*relay)).collect())
    }

    async fn activate_relay(&mut self, id: NodeId) -> Result<(), Step> {
        let Some(node) = self.graph.node(id) else {
            return Ok(());
        };
        let config = node.context().clone();
        let node_type = node.type_id().to_string();
        let ctx = self.activation_context(id, config);
        self.emit(ExecutionEvent::NodeStarted {
            execution_id: self.execution_id,
            node_id: id,
            node_type,
            timestamp: Utc::now(),
        });

        let cancellation = self.cancellation.clone();
        let started = Instant::now();
        let Some(node) = self.graph.node_mut(id) else {
            return Ok(());
        };
        let result = tokio::select! {
            biased;
            _ = cancellation.cancelled() => None,
            result = node.activate(ctx) => Some(result),
        };
        let Some(result) = result else {
            node.reset_status();
            return Err(Step::Cancelled);
        };

        match self.report_completion(id, Some(result), started.elapsed()) {
            Some(Err(e)) => Err(Step::Failed(e)),
            _ => {
                self.clear_inputs(id);
                Ok(())
            }
        }
    }

    /// Clearing an input container drops its element ports, so the index
    /// is refreshed with it.
    fn clear_inputs(&mut self, id: NodeId) {
        if let Some(node) = self.graph.node_mut(id) {
            node.clear_inputs();
            self.graph.reindex_ports(id);
        }
    }

    async fn delay(&self) -> bool {
        let delay = self
            .context
            .iteration_delay()
            .or_else(|| self.executor.shared.config.iteration_delay());
        let Some(delay) = delay else {
            return true;
        };
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.cancellation.cancelled() => false,
        }
    }

    fn activation_context(&self, id: NodeId, config: NodeConfig) -> ActivationContext {
        ActivationContext {
            node_id: id,
            iteration: self.iteration,
            config,
            execution: Arc::clone(&self.context),
            events: self.executor.shared.events.create_emitter(self.execution_id, id),
            cancellation: self.cancellation.clone(),
        }
    }

    fn emit(&self, event: ExecutionEvent) {
        self.executor.emit(event);
    }
}
