//! Progress Tracker - the five-stage operation pipeline state machine
//!
//! Stages run strictly left to right: input validation, request
//! preparation, remote execution, store processing, result decoding.
//! The tracker is event-driven from the executor's lifecycle; any visual
//! pacing (artificial delays) belongs to the presentation layer and never
//! enters this state machine. Its timing is illustrative - the
//! authoritative latency figure is Metrics.executionTime.

use serde::Serialize;

/// The five fixed pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageId {
    Input,
    Prepare,
    Remote,
    Store,
    Decode,
}

impl StageId {
    pub const ALL: [StageId; 5] = [
        StageId::Input,
        StageId::Prepare,
        StageId::Remote,
        StageId::Store,
        StageId::Decode,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            StageId::Input => "Input Validation",
            StageId::Prepare => "Request Preparation",
            StageId::Remote => "Remote Execution",
            StageId::Store => "Store Processing",
            StageId::Decode => "Result Decoding",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Idle,
    Active,
    Completed,
    Error,
}

/// One stage's current state
#[derive(Debug, Clone, Serialize)]
pub struct StageState {
    pub id: StageId,
    pub label: &'static str,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Five-stage state machine driven by the Operation Executor.
///
/// Invariant: at most one stage is Active at any instant. On failure the
/// active stage (and only that one) becomes Error; stages to its right
/// stay Idle for the rest of the run.
#[derive(Debug)]
pub struct ProgressTracker {
    stages: Vec<StageState>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        ProgressTracker {
            stages: StageId::ALL
                .iter()
                .map(|id| StageState {
                    id: *id,
                    label: id.label(),
                    status: StageStatus::Idle,
                    detail: None,
                })
                .collect(),
        }
    }

    /// All stages back to idle, details cleared
    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.status = StageStatus::Idle;
            stage.detail = None;
        }
    }

    /// Start a new run (implicit reset)
    pub fn begin(&mut self) {
        self.reset();
    }

    /// Transition exactly the named stage. Activating a stage completes a
    /// still-active predecessor so the single-active invariant holds even
    /// if a caller skips an explicit completion.
    pub fn advance(&mut self, id: StageId, status: StageStatus, detail: Option<&str>) {
        if status == StageStatus::Active {
            for stage in &mut self.stages {
                if stage.status == StageStatus::Active && stage.id != id {
                    stage.status = StageStatus::Completed;
                }
            }
        }
        if let Some(stage) = self.stages.iter_mut().find(|s| s.id == id) {
            stage.status = status;
            stage.detail = detail.map(str::to_string);
        }
    }

    /// Mark the currently active stage as failed. Stages to its right are
    /// left idle; nothing advances further this run.
    pub fn fail(&mut self, detail: &str) {
        if let Some(stage) = self
            .stages
            .iter_mut()
            .find(|s| s.status == StageStatus::Active)
        {
            stage.status = StageStatus::Error;
            stage.detail = Some(detail.to_string());
        }
    }

    pub fn active_stage(&self) -> Option<StageId> {
        self.stages
            .iter()
            .find(|s| s.status == StageStatus::Active)
            .map(|s| s.id)
    }

    pub fn stage_status(&self, id: StageId) -> StageStatus {
        self.stages
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.status)
            .unwrap_or(StageStatus::Idle)
    }

    /// Current state of all five stages, in order
    pub fn snapshot(&self) -> Vec<StageState> {
        self.stages.clone()
    }
}
