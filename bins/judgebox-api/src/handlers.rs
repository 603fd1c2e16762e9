// HTTP route handlers for the judgebox API

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use judgebox_common::types::{
    CaseStatus, EntityId, ExecutionOutcome, Language, Question, RunReport, Submission,
    SubmissionVerdict,
};
use judgebox_engine::harness::outputs_match;
use judgebox_engine::ExecError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

use crate::error::ApiError;
use crate::metrics;
use crate::AppState;

pub const TIME_OUT_MARKER: &str = "Time Out";
pub const MEMORY_LIMIT_MARKER: &str = "Memory Limit Exceeded";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerRunDto {
    #[serde(default)]
    pub member_id: Option<String>,
    pub code_file_id: EntityId,
    pub question_id: EntityId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomInputDto {
    pub code_file_id: EntityId,
    #[serde(default)]
    pub question_id: Option<EntityId>,
    #[serde(default)]
    pub input: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestcaseResultDto {
    pub time: f64,
    pub mem: String,
    pub input: String,
    /// Expected output
    pub output: String,
    pub actual: String,
    pub pass: bool,
    pub status: CaseStatus,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResultDto {
    pub language: Language,
    pub time: f64,
    pub mem: String,
    pub is_correct: bool,
    pub testcase_results: Vec<TestcaseResultDto>,
    /// Program stdout for the single-run action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile_error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CustomOutputDto {
    pub output: String,
}

/// Seconds, two decimals
pub fn round_time(seconds: f64) -> f64 {
    (seconds * 100.0).round() / 100.0
}

pub fn format_mem(megabytes: f64) -> String {
    format!("{:.2} MB", megabytes)
}

impl ExecutionResultDto {
    fn from_run(language: Language, report: RunReport, question: &Question) -> Self {
        match report {
            RunReport::Executed(outcome) => Self {
                language,
                time: round_time(outcome.wall_time_seconds),
                mem: format_mem(outcome.peak_memory_megabytes),
                is_correct: outcome.is_clean_exit()
                    && outputs_match(&outcome.stdout, &question.sample_output),
                testcase_results: Vec::new(),
                output: Some(outcome.stdout.trim_end().to_string()),
                compile_error: None,
            },
            RunReport::CompileFailed(failure) => Self {
                language,
                time: 0.0,
                mem: format_mem(0.0),
                is_correct: false,
                testcase_results: Vec::new(),
                output: None,
                compile_error: Some(failure.output),
            },
        }
    }

    fn from_verdict(verdict: SubmissionVerdict) -> Self {
        let testcase_results = verdict
            .per_case_results
            .into_iter()
            .map(|r| TestcaseResultDto {
                time: round_time(r.wall_time_seconds),
                mem: format_mem(r.peak_memory_megabytes),
                input: r.input,
                output: r.expected_output,
                actual: r.actual_output.trim_end().to_string(),
                pass: r.passed,
                status: r.status,
            })
            .collect();

        Self {
            language: verdict.language,
            time: round_time(verdict.aggregate_wall_time_seconds),
            mem: format_mem(verdict.aggregate_peak_memory_megabytes),
            is_correct: verdict.all_passed,
            testcase_results,
            output: None,
            compile_error: verdict.compile_error.map(|f| f.output),
        }
    }
}

/// What the custom-input console shows
pub fn console_output(report: RunReport) -> String {
    match report {
        RunReport::CompileFailed(failure) => failure.output,
        RunReport::Executed(outcome) => merged_output(&outcome),
    }
}

fn merged_output(outcome: &ExecutionOutcome) -> String {
    if outcome.timed_out {
        return TIME_OUT_MARKER.to_string();
    }
    if outcome.out_of_memory {
        return MEMORY_LIMIT_MARKER.to_string();
    }
    let mut output = outcome.stdout.trim_end().to_string();
    let stderr = outcome.stderr.trim_end();
    if !stderr.is_empty() {
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(stderr);
    }
    output
}

async fn resolve_submission(state: &AppState, id: &EntityId) -> Result<Submission, ApiError> {
    let file = state.code_files.code_file(id).await?;
    let path = file.path.clone();
    file.into_submission().ok_or_else(|| {
        ApiError::from(ExecError::configuration(format!(
            "unsupported code file type: {}",
            path
        )))
    })
}

/// POST /docker/run - run once against the question's sample input
#[instrument(skip_all, fields(request_id = %uuid::Uuid::new_v4(), code_file = %req.code_file_id, question = %req.question_id))]
pub async fn run_code(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DockerRunDto>,
) -> Result<Json<ExecutionResultDto>, ApiError> {
    let started = Instant::now();
    let result = async {
        let submission = resolve_submission(&state, &req.code_file_id).await?;
        let question = state.questions.question(&req.question_id).await?;
        let limits = question.limits(state.coordinator.default_limits(&submission)?);

        let report = state
            .coordinator
            .run_once(&submission, &question.sample_input, limits)
            .await?;
        Ok::<_, ApiError>(ExecutionResultDto::from_run(
            submission.language,
            report,
            &question,
        ))
    }
    .await;

    metrics::record("run", started, &result);
    if let Ok(dto) = &result {
        info!(
            member = req.member_id.as_deref().unwrap_or("-"),
            is_correct = dto.is_correct,
            "run finished"
        );
    }
    result.map(Json)
}

/// POST /docker/test - grade against every enabled test case
#[instrument(skip_all, fields(request_id = %uuid::Uuid::new_v4(), code_file = %req.code_file_id, question = %req.question_id))]
pub async fn test_code(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DockerRunDto>,
) -> Result<Json<ExecutionResultDto>, ApiError> {
    let started = Instant::now();
    let result = async {
        let submission = resolve_submission(&state, &req.code_file_id).await?;
        let question = state.questions.question(&req.question_id).await?;
        let limits = question.limits(state.coordinator.default_limits(&submission)?);

        let verdict = state
            .coordinator
            .run_suite(&submission, &question.testcases, limits)
            .await?;
        Ok::<_, ApiError>(ExecutionResultDto::from_verdict(verdict))
    }
    .await;

    metrics::record("test", started, &result);
    if let Ok(dto) = &result {
        info!(
            member = req.member_id.as_deref().unwrap_or("-"),
            is_correct = dto.is_correct,
            cases = dto.testcase_results.len(),
            "test finished"
        );
    }
    result.map(Json)
}

/// POST /docker/custom - run once with caller-supplied stdin
#[instrument(skip_all, fields(request_id = %uuid::Uuid::new_v4(), code_file = %req.code_file_id))]
pub async fn custom_input(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CustomInputDto>,
) -> Result<Json<CustomOutputDto>, ApiError> {
    let started = Instant::now();
    let result = async {
        let submission = resolve_submission(&state, &req.code_file_id).await?;
        let defaults = state.coordinator.default_limits(&submission)?;
        let limits = match &req.question_id {
            Some(id) => state.questions.question(id).await?.limits(defaults),
            None => defaults,
        };

        let report = state
            .coordinator
            .run_once(&submission, &req.input, limits)
            .await?;
        Ok::<_, ApiError>(CustomOutputDto {
            output: console_output(report),
        })
    }
    .await;

    metrics::record("custom", started, &result);
    result.map(Json)
}

/// GET /status - Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let languages: Vec<Language> = state
        .coordinator
        .languages()
        .profiles()
        .iter()
        .map(|p| p.name)
        .collect();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "languages": languages,
            "admission": state.coordinator.admission(),
            "builds": state.coordinator.builds(),
        })),
    )
}

/// GET /metrics - Prometheus text format
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match metrics::render(state.coordinator.admission()) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
