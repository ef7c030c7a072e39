use crate::{ExecutionId, ExecutionResult, ExecutionState, NodeId, PortId, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// One value moved across an edge during propagation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub from_port: PortId,
    pub to_port: PortId,
    pub value: Value,
}

/// Events emitted during graph execution, in the order they happen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    Started {
        execution_id: ExecutionId,
        node_count: usize,
        edge_count: usize,
        timestamp: DateTime<Utc>,
    },
    StateChanged {
        execution_id: ExecutionId,
        from: ExecutionState,
        to: ExecutionState,
        timestamp: DateTime<Utc>,
    },
    Iteration {
        execution_id: ExecutionId,
        iteration: u64,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        execution_id: ExecutionId,
        node_id: NodeId,
        node_type: String,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        execution_id: ExecutionId,
        node_id: NodeId,
        success: bool,
        error: Option<String>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    DataPropagated {
        execution_id: ExecutionId,
        node_id: NodeId,
        transfers: Vec<Transfer>,
        timestamp: DateTime<Utc>,
    },
    NodeEvent {
        execution_id: ExecutionId,
        node_id: NodeId,
        event: NodeEvent,
        timestamp: DateTime<Utc>,
    },
    Completed {
        execution_id: ExecutionId,
        result: ExecutionResult,
        timestamp: DateTime<Utc>,
    },
    Cancelled {
        execution_id: ExecutionId,
        result: ExecutionResult,
        timestamp: DateTime<Utc>,
    },
    Failed {
        execution_id: ExecutionId,
        error: String,
        result: ExecutionResult,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> ExecutionId {
        match self {
            ExecutionEvent::Started { execution_id, .. }
            | ExecutionEvent::StateChanged { execution_id, .. }
            | ExecutionEvent::Iteration { execution_id, .. }
            | ExecutionEvent::NodeStarted { execution_id, .. }
            | ExecutionEvent::NodeCompleted { execution_id, .. }
            | ExecutionEvent::DataPropagated { execution_id, .. }
            | ExecutionEvent::NodeEvent { execution_id, .. }
            | ExecutionEvent::Completed { execution_id, .. }
            | ExecutionEvent::Cancelled { execution_id, .. }
            | ExecutionEvent::Failed { execution_id, .. } => *execution_id,
        }
    }

    /// Whether this event ends an execution.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionEvent::Completed { .. }
                | ExecutionEvent::Cancelled { .. }
                | ExecutionEvent::Failed { .. }
        )
    }
}

/// Messages a node sends about itself while it runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum NodeEvent {
    Info { message: String },
    Warning { message: String },
    Progress { percent: f64, message: Option<String> },
}

/// Event emitter handed to a node activation
#[derive(Clone)]
pub struct EventEmitter {
    execution_id: ExecutionId,
    node_id: NodeId,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn new(
        execution_id: ExecutionId,
        node_id: NodeId,
        sender: broadcast::Sender<ExecutionEvent>,
    ) -> Self {
        Self {
            execution_id,
            node_id,
            sender,
        }
    }

    /// Emitter with no listeners, for running a node outside an executor.
    pub fn detached(node_id: NodeId) -> Self {
        let (sender, _) = broadcast::channel(1);
        Self::new(ExecutionId::nil(), node_id, sender)
    }

    pub fn emit(&self, event: NodeEvent) {
        let _ = self.sender.send(ExecutionEvent::NodeEvent {
            execution_id: self.execution_id,
            node_id: self.node_id,
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(NodeEvent::Info {
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(NodeEvent::Warning {
            message: message.into(),
        });
    }

    pub fn progress(&self, percent: f64, message: Option<String>) {
        self.emit(NodeEvent::Progress { percent, message });
    }
}

/// Publish/subscribe channel owned by one executor.
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn create_emitter(&self, execution_id: ExecutionId, node_id: NodeId) -> EventEmitter {
        EventEmitter::new(execution_id, node_id, self.sender.clone())
    }
}

/// Handle returned by [`EventBus::subscribe`]. Dropping it unsubscribes.
pub struct EventSubscription {
    receiver: broadcast::Receiver<ExecutionEvent>,
}

impl EventSubscription {
    /// Next event, or `None` once the bus is gone.
    ///
    /// A subscriber that falls behind skips the overwritten events.
    pub async fn recv(&mut self) -> Option<ExecutionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<ExecutionEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drain every event currently buffered.
    pub fn drain(&mut self) -> Vec<ExecutionEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    pub fn unsubscribe(self) {}
}
