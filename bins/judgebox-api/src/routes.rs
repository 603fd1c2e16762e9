use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/docker/run", post(handlers::run_code))
        .route("/docker/test", post(handlers::test_code))
        .route("/docker/custom", post(handlers::custom_input))
        .route("/status", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{CustomOutputDto, ExecutionResultDto};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use judgebox_common::store::MemoryStore;
    use judgebox_common::types::{CodeFile, ExecutionOutcome, Question, TestCase};
    use judgebox_engine::sandbox::{Phase, SandboxRequest, SandboxRunner};
    use judgebox_engine::{Coordinator, CoordinatorSettings, LanguageTable, SandboxError};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    /// Echoes stdin back; source markers select failure modes
    struct EchoRunner;

    #[async_trait]
    impl SandboxRunner for EchoRunner {
        async fn execute(
            &self,
            request: SandboxRequest<'_>,
        ) -> Result<ExecutionOutcome, SandboxError> {
            let source: String = std::fs::read_dir(request.workspace)?
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| std::fs::read_to_string(entry.path()).ok())
                .collect();

            let mut outcome = ExecutionOutcome {
                exit_code: Some(0),
                wall_time_seconds: 0.123,
                peak_memory_megabytes: 7.5,
                ..Default::default()
            };
            match request.phase {
                Phase::Build if source.contains("SYNTAX") => {
                    outcome.exit_code = Some(1);
                    outcome.stderr = "Main.java:1: error: illegal start of expression".into();
                }
                Phase::Build => {}
                Phase::Run if source.contains("LOOP") => {
                    outcome.exit_code = None;
                    outcome.timed_out = true;
                }
                Phase::Run => outcome.stdout = format!("{}\n", request.stdin),
            }
            Ok(outcome)
        }
    }

    async fn app() -> Router {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_code_file(
                1u64,
                CodeFile {
                    path: "echo.py".into(),
                    source: "print(input())".into(),
                    language: None,
                },
            )
            .await;
        store
            .insert_code_file(
                2u64,
                CodeFile {
                    path: "Main.java".into(),
                    source: "SYNTAX".into(),
                    language: None,
                },
            )
            .await;
        store
            .insert_code_file(
                3u64,
                CodeFile {
                    path: "spin.js".into(),
                    source: "LOOP".into(),
                    language: None,
                },
            )
            .await;
        store
            .insert_code_file(
                4u64,
                CodeFile {
                    path: "notes.txt".into(),
                    source: String::new(),
                    language: None,
                },
            )
            .await;
        store
            .insert_question(
                10u64,
                Question {
                    time_limit_seconds: Some(1.0),
                    memory_limit_mb: Some(128),
                    sample_input: "42".into(),
                    sample_output: "42".into(),
                    testcases: vec![
                        TestCase::new("1", "1"),
                        TestCase::new("2", "3"),
                        TestCase::new("skip", "skip").disabled(),
                    ],
                },
            )
            .await;

        let coordinator = Coordinator::new(
            LanguageTable::builtin(),
            Arc::new(EchoRunner),
            CoordinatorSettings {
                max_concurrency: 2,
                queue_depth: 2,
                workspace_root: None,
            },
        );
        let state = Arc::new(AppState {
            coordinator: Arc::new(coordinator),
            code_files: store.clone(),
            questions: store,
        });
        Router::new().merge(routes()).with_state(state)
    }

    async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_run_uses_sample_input() {
        let (status, body) = post_json(
            app().await,
            "/docker/run",
            json!({ "memberId": "alice", "codeFileId": 1, "questionId": 10 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let dto: ExecutionResultDto = serde_json::from_value(body).unwrap();
        assert!(dto.is_correct);
        assert_eq!(dto.output.as_deref(), Some("42"));
        assert_eq!(dto.time, 0.12);
        assert_eq!(dto.mem, "7.50 MB");
        assert!(dto.testcase_results.is_empty());
    }

    #[tokio::test]
    async fn test_suite_results_in_order() {
        let (status, body) = post_json(
            app().await,
            "/docker/test",
            json!({ "memberId": "alice", "codeFileId": "1", "questionId": 10 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["language"], "python");
        assert_eq!(body["isCorrect"], false);

        let cases = body["testcaseResults"].as_array().unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0]["input"], "1");
        assert_eq!(cases[0]["pass"], true);
        assert_eq!(cases[1]["output"], "3");
        assert_eq!(cases[1]["actual"], "2");
        assert_eq!(cases[1]["pass"], false);
        assert_eq!(cases[1]["status"], "wrong_answer");
        assert_eq!(body["time"], 0.25);
    }

    #[tokio::test]
    async fn test_compile_error_is_reported_not_failed() {
        let (status, body) = post_json(
            app().await,
            "/docker/test",
            json!({ "codeFileId": 2, "questionId": 10 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isCorrect"], false);
        assert!(body["compileError"]
            .as_str()
            .unwrap()
            .contains("illegal start of expression"));
        assert!(body["testcaseResults"]
            .as_array()
            .unwrap()
            .iter()
            .all(|c| c["status"] == "compile_error"));
    }

    #[tokio::test]
    async fn test_custom_input() {
        let (status, body) = post_json(
            app().await,
            "/docker/custom",
            json!({ "codeFileId": 1, "questionId": 10, "input": "hello world" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let dto: CustomOutputDto = serde_json::from_value(body).unwrap();
        assert_eq!(dto.output, "hello world");

        let (_, body) = post_json(
            app().await,
            "/docker/custom",
            json!({ "codeFileId": 3, "input": "" }),
        )
        .await;
        assert_eq!(body["output"], "Time Out");
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let (status, body) = post_json(
            app().await,
            "/docker/run",
            json!({ "codeFileId": 99, "questionId": 10 }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("99"));

        let (status, _) = post_json(
            app().await,
            "/docker/test",
            json!({ "codeFileId": 1, "questionId": 404 }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = post_json(
            app().await,
            "/docker/custom",
            json!({ "codeFileId": 4, "input": "" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status_and_metrics() {
        let app = app().await;
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["admission"]["capacity"], 2);
        assert_eq!(body["builds"]["queueDepth"], 2);
        assert_eq!(body["builds"]["active"], 0);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("judgebox_execution_slots_active"));
    }
}
