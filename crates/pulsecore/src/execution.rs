use crate::{StateTransitionError, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Key under which hosts pass the inter-iteration debug delay, in milliseconds.
pub const ITERATION_DELAY_KEY: &str = "iterationDelay";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Idle,
    Running,
    Paused,
    Stepping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartMode {
    Continuous,
    Step,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Start(StartMode),
    Pause,
    Resume,
    Step,
    StepComplete,
    Cancel,
    Complete,
    Error,
}

impl ExecutionState {
    /// Next state for `transition`, or the reason it is not allowed.
    pub fn transition(self, transition: Transition) -> Result<ExecutionState, StateTransitionError> {
        use ExecutionState::*;
        let next = match (self, transition) {
            (Idle, Transition::Start(StartMode::Continuous)) => Some(Running),
            (Idle, Transition::Start(StartMode::Step)) => Some(Paused),
            (Running, Transition::Pause) => Some(Paused),
            (Paused, Transition::Resume) => Some(Running),
            (Paused, Transition::Step) => Some(Stepping),
            (Stepping, Transition::StepComplete) => Some(Paused),
            (Running | Paused | Stepping, Transition::Cancel)
            | (Running | Paused | Stepping, Transition::Complete)
            | (Running | Paused | Stepping, Transition::Error) => Some(Idle),
            _ => None,
        };
        next.ok_or(StateTransitionError {
            state: self,
            transition,
        })
    }

    pub fn is_active(self) -> bool {
        self != ExecutionState::Idle
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionState::Idle => "idle",
            ExecutionState::Running => "running",
            ExecutionState::Paused => "paused",
            ExecutionState::Stepping => "stepping",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transition::Start(StartMode::Continuous) => "start",
            Transition::Start(StartMode::Step) => "start in step mode",
            Transition::Pause => "pause",
            Transition::Resume => "resume",
            Transition::Step => "step",
            Transition::StepComplete => "complete a step",
            Transition::Cancel => "cancel",
            Transition::Complete => "complete",
            Transition::Error => "fail",
        };
        f.write_str(name)
    }
}

/// Opaque host settings handed to every activation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ExecutionContext {
    values: BTreeMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn with_iteration_delay(self, delay: Duration) -> Self {
        self.with(ITERATION_DELAY_KEY, delay.as_millis() as i64)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn iteration_delay(&self) -> Option<Duration> {
        self.values
            .get(ITERATION_DELAY_KEY)
            .and_then(Value::as_f64)
            .filter(|ms| *ms > 0.0)
            .map(|ms| Duration::from_millis(ms as u64))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Completed,
    Cancelled,
    Failed { error: String },
}

/// Final report of one `execute` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    pub outcome: ExecutionOutcome,
    pub iterations: u64,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn is_completed(&self) -> bool {
        self.outcome == ExecutionOutcome::Completed
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            ExecutionOutcome::Failed { error } => Some(error),
            _ => None,
        }
    }
}
