//! Execution Coordinator - the only entry point the HTTP layer talks to
//!
//! **Core Responsibility:**
//! Validate a request, prepare the workspace, run the build step once, take
//! an execution slot, then either execute once (`run_once`) or hand off to
//! the harness (`run_suite`).
//!
//! Builds pass through their own admission gate with the same capacity and
//! queue depth as executions. A compile failure returns before execution
//! admission, so it never occupies or waits for an execution slot, but a
//! build beyond the queue depth is still turned away with `ResourceExhausted`.
//!
//! **Resource discipline:**
//! Slot, workspace and containers are all scoped values. If the caller drops
//! the future (client disconnect) they are released on the way out, the
//! same as on a normal return.

use crate::admission::{Admission, AdmissionSnapshot};
use crate::error::{ExecError, SandboxError};
use crate::harness::{self, RunPlan};
use crate::language::{validate_entry_identifier, LanguageProfile, LanguageTable};
use crate::sandbox::{execute_with_retry, Phase, SandboxRequest, SandboxRunner};
use crate::workspace::Workspace;
use judgebox_common::types::{
    CompileFailure, ExecutionLimits, RunReport, Submission, SubmissionVerdict, TestCase,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Safety limits to prevent pathological inputs from reaching Docker
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024;
pub const MAX_STDIN_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub max_concurrency: usize,
    pub queue_depth: usize,
    pub workspace_root: Option<PathBuf>,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            max_concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2),
            queue_depth: 64,
            workspace_root: None,
        }
    }
}

enum Build {
    Ready(Workspace),
    Failed(CompileFailure),
}

pub struct Coordinator {
    languages: LanguageTable,
    runner: Arc<dyn SandboxRunner>,
    admission: Admission,
    builds: Admission,
    workspace_root: Option<PathBuf>,
}

impl Coordinator {
    pub fn new(
        languages: LanguageTable,
        runner: Arc<dyn SandboxRunner>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            languages,
            runner,
            admission: Admission::new(settings.max_concurrency, settings.queue_depth),
            builds: Admission::new(settings.max_concurrency, settings.queue_depth),
            workspace_root: settings.workspace_root,
        }
    }

    pub fn languages(&self) -> &LanguageTable {
        &self.languages
    }

    pub fn admission(&self) -> AdmissionSnapshot {
        self.admission.snapshot()
    }

    /// Compile steps running or waiting, separate from execution slots
    pub fn builds(&self) -> AdmissionSnapshot {
        self.builds.snapshot()
    }

    /// Default limits for a language, used when a question supplies none
    pub fn default_limits(&self, submission: &Submission) -> Result<ExecutionLimits, ExecError> {
        Ok(self.languages.profile(submission.language)?.default_limits())
    }

    /// Single free-form run with caller-supplied stdin
    #[instrument(skip_all, fields(language = %submission.language, entry = %submission.entry_identifier))]
    pub async fn run_once(
        &self,
        submission: &Submission,
        stdin: &str,
        limits: ExecutionLimits,
    ) -> Result<RunReport, ExecError> {
        let profile = self.validate(submission, &limits)?;
        check_stdin(stdin)?;

        let workspace = match self.build(profile, submission).await? {
            Build::Ready(workspace) => workspace,
            Build::Failed(failure) => return Ok(RunReport::CompileFailed(failure)),
        };
        let _slot = self.admission.acquire().await?;

        let command = profile.run_command(&submission.entry_identifier);
        let plan = RunPlan {
            image: &profile.image,
            command: &command,
            workspace: workspace.path(),
            limits,
        };
        let outcome = execute_with_retry(self.runner.as_ref(), plan.request(stdin)).await?;
        Ok(RunReport::Executed(outcome))
    }

    /// Grade against every enabled case, in order
    #[instrument(skip_all, fields(language = %submission.language, entry = %submission.entry_identifier))]
    pub async fn run_suite(
        &self,
        submission: &Submission,
        cases: &[TestCase],
        limits: ExecutionLimits,
    ) -> Result<SubmissionVerdict, ExecError> {
        let profile = self.validate(submission, &limits)?;
        let enabled: Vec<&TestCase> = cases.iter().filter(|case| case.enabled).collect();
        if enabled.is_empty() {
            return Err(ExecError::configuration("no enabled test cases"));
        }
        for case in &enabled {
            check_stdin(&case.input)?;
        }

        let workspace = match self.build(profile, submission).await? {
            Build::Ready(workspace) => workspace,
            Build::Failed(failure) => {
                return Ok(harness::compile_failure_verdict(
                    submission.language,
                    &enabled,
                    failure,
                ))
            }
        };
        let _slot = self.admission.acquire().await?;

        let command = profile.run_command(&submission.entry_identifier);
        let plan = RunPlan {
            image: &profile.image,
            command: &command,
            workspace: workspace.path(),
            limits,
        };
        let verdict =
            harness::run_suite(self.runner.as_ref(), plan, submission.language, &enabled).await?;
        Ok(verdict)
    }

    /// Everything that can be rejected without touching the sandbox
    fn validate(
        &self,
        submission: &Submission,
        limits: &ExecutionLimits,
    ) -> Result<&LanguageProfile, ExecError> {
        let profile = self.languages.profile(submission.language)?;
        validate_entry_identifier(&submission.entry_identifier)?;
        limits.validate().map_err(ExecError::Configuration)?;
        if submission.source_code.len() > MAX_SOURCE_CODE_BYTES {
            return Err(ExecError::configuration(format!(
                "source code exceeds maximum size of {} bytes",
                MAX_SOURCE_CODE_BYTES
            )));
        }
        Ok(profile)
    }

    async fn build(
        &self,
        profile: &LanguageProfile,
        submission: &Submission,
    ) -> Result<Build, ExecError> {
        let entry = &submission.entry_identifier;
        let command = profile.build_command(entry);
        // taken before the workspace exists so queued builds hold nothing on disk
        let _build_slot = match command {
            Some(_) => Some(self.builds.acquire().await?),
            None => None,
        };

        let workspace = Workspace::prepare(
            self.workspace_root.as_deref(),
            &profile.source_file_name(entry),
            &submission.source_code,
        )
        .map_err(SandboxError::from)?;

        let Some(command) = command else {
            return Ok(Build::Ready(workspace));
        };

        let request = SandboxRequest {
            image: &profile.image,
            command: &command,
            workspace: workspace.path(),
            stdin: "",
            limits: profile.build_limits(),
            phase: Phase::Build,
        };
        let outcome = execute_with_retry(self.runner.as_ref(), request).await?;

        if outcome.is_clean_exit() {
            info!(wall_time_s = outcome.wall_time_seconds, "build succeeded");
            Ok(Build::Ready(workspace))
        } else {
            warn!(
                exit_code = ?outcome.exit_code,
                timed_out = outcome.timed_out,
                "build failed"
            );
            Ok(Build::Failed(harness::compile_failure(&outcome)))
        }
    }
}

fn check_stdin(stdin: &str) -> Result<(), ExecError> {
    if stdin.len() > MAX_STDIN_BYTES {
        return Err(ExecError::configuration(format!(
            "input exceeds maximum size of {} bytes",
            MAX_STDIN_BYTES
        )));
    }
    Ok(())
}
