//! Scripted `SandboxRunner` for harness and coordinator tests.

use crate::error::SandboxError;
use crate::sandbox::{Phase, SandboxRequest, SandboxRunner};
use async_trait::async_trait;
use judgebox_common::types::{ExecutionLimits, ExecutionOutcome};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

enum Step {
    Outcome(ExecutionOutcome),
    Fail,
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub command: Vec<String>,
    pub stdin: String,
    pub limits: ExecutionLimits,
    pub phase: Phase,
    pub workspace_files: Vec<String>,
}

pub(crate) fn outcome(stdout: &str) -> ExecutionOutcome {
    ExecutionOutcome {
        stdout: stdout.to_string(),
        exit_code: Some(0),
        wall_time_seconds: 0.1,
        peak_memory_megabytes: 10.0,
        ..Default::default()
    }
}

/// Replays queued steps in order; falls back to `fallback` once exhausted
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    steps: Mutex<VecDeque<Step>>,
    fallback: Option<ExecutionOutcome>,
    recorded: Mutex<Vec<RecordedCall>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, outcome: ExecutionOutcome) -> Self {
        self.push(Step::Outcome(outcome))
    }

    pub fn then_stdout(self, stdout: &str) -> Self {
        self.then(outcome(stdout))
    }

    pub fn then_fail(self) -> Self {
        self.push(Step::Fail)
    }

    pub fn otherwise(mut self, outcome: ExecutionOutcome) -> Self {
        self.fallback = Some(outcome);
        self
    }

    /// Every execution waits for one permit of `gate` before finishing
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn push(self, step: Step) -> Self {
        self.steps.lock().unwrap().push_back(step);
        self
    }

    pub fn calls(&self) -> usize {
        self.recorded.lock().unwrap().len()
    }

    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.recorded.lock().unwrap().clone()
    }

    pub fn run_calls(&self) -> usize {
        self.recorded()
            .iter()
            .filter(|call| call.phase == Phase::Run)
            .count()
    }
}

#[async_trait]
impl SandboxRunner for ScriptedRunner {
    async fn execute(&self, request: SandboxRequest<'_>) -> Result<ExecutionOutcome, SandboxError> {
        let mut workspace_files: Vec<String> = std::fs::read_dir(request.workspace)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        workspace_files.sort();

        self.recorded.lock().unwrap().push(RecordedCall {
            command: request.command.to_vec(),
            stdin: request.stdin.to_string(),
            limits: request.limits,
            phase: request.phase,
            workspace_files,
        });

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Outcome(outcome)) => Ok(outcome),
            Some(Step::Fail) => Err(SandboxError::Runtime("scripted failure".to_string())),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| SandboxError::Runtime("script exhausted".to_string())),
        }
    }
}
