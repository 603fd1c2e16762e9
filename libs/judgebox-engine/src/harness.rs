//! Test Harness - grade one submission against an ordered list of cases
//!
//! **Core Responsibility:**
//! Run the prepared submission once per enabled test case, strictly in
//! order, and fold the raw outcomes into a `SubmissionVerdict`.
//!
//! **Comparison policy:**
//! - Trailing whitespace/newlines are trimmed on both sides
//! - Leading and internal whitespace are significant
//! - Empty expected output means "expect nothing", not "don't care"
//! - A timed out, OOM, crashed or non-zero-exit run never passes

use crate::error::SandboxError;
use crate::sandbox::{execute_with_retry, Phase, SandboxRequest, SandboxRunner};
use judgebox_common::types::{
    CaseStatus, CompileFailure, ExecutionLimits, ExecutionOutcome, Language, SubmissionVerdict,
    TestCase, TestCaseResult,
};
use std::path::Path;
use tracing::{debug, info};

pub fn normalize_output(output: &str) -> &str {
    output.trim_end()
}

pub fn outputs_match(actual: &str, expected: &str) -> bool {
    normalize_output(actual) == normalize_output(expected)
}

fn classify(outcome: &ExecutionOutcome, expected: &str) -> CaseStatus {
    if outcome.timed_out {
        CaseStatus::TimeLimitExceeded
    } else if outcome.out_of_memory {
        CaseStatus::MemoryLimitExceeded
    } else if outcome.crashed || outcome.exit_code != Some(0) {
        CaseStatus::RuntimeError
    } else if !outputs_match(&outcome.stdout, expected) {
        CaseStatus::WrongAnswer
    } else {
        CaseStatus::Passed
    }
}

pub fn evaluate_case(case: &TestCase, outcome: &ExecutionOutcome) -> TestCaseResult {
    let status = classify(outcome, &case.expected_output);
    TestCaseResult {
        input: case.input.clone(),
        expected_output: case.expected_output.clone(),
        actual_output: outcome.stdout.clone(),
        passed: status == CaseStatus::Passed,
        status,
        wall_time_seconds: outcome.wall_time_seconds,
        peak_memory_megabytes: outcome.peak_memory_megabytes,
        exit_code: outcome.exit_code,
    }
}

/// Wall time is summed, peak memory is the max; an empty list never passes
pub fn aggregate(language: Language, results: Vec<TestCaseResult>) -> SubmissionVerdict {
    let all_passed = !results.is_empty() && results.iter().all(|r| r.passed);
    let aggregate_wall_time_seconds = results.iter().map(|r| r.wall_time_seconds).sum();
    let aggregate_peak_memory_megabytes = results
        .iter()
        .map(|r| r.peak_memory_megabytes)
        .fold(0.0, f64::max);

    SubmissionVerdict {
        all_passed,
        per_case_results: results,
        language,
        aggregate_wall_time_seconds,
        aggregate_peak_memory_megabytes,
        compile_error: None,
    }
}

/// Compiler output as shown to the user: diagnostics first
pub fn compile_failure(outcome: &ExecutionOutcome) -> CompileFailure {
    let mut output = outcome.stderr.trim_end().to_string();
    let stdout = outcome.stdout.trim_end();
    if !stdout.is_empty() {
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(stdout);
    }
    let reason = if outcome.timed_out {
        Some("compilation timed out")
    } else if outcome.out_of_memory {
        Some("compilation exceeded its memory limit")
    } else {
        None
    };
    if let Some(reason) = reason {
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(reason);
    }
    CompileFailure {
        output,
        exit_code: outcome.exit_code,
        timed_out: outcome.timed_out,
    }
}

/// Every case failed with the compile-error marker; nothing was run
pub fn compile_failure_verdict(
    language: Language,
    cases: &[&TestCase],
    failure: CompileFailure,
) -> SubmissionVerdict {
    let results = cases
        .iter()
        .map(|case| TestCaseResult {
            input: case.input.clone(),
            expected_output: case.expected_output.clone(),
            actual_output: String::new(),
            passed: false,
            status: CaseStatus::CompileError,
            wall_time_seconds: 0.0,
            peak_memory_megabytes: 0.0,
            exit_code: None,
        })
        .collect();

    SubmissionVerdict {
        compile_error: Some(failure),
        ..aggregate(language, results)
    }
}

/// Everything needed to run the built submission once
#[derive(Debug, Clone, Copy)]
pub struct RunPlan<'a> {
    pub image: &'a str,
    pub command: &'a [String],
    pub workspace: &'a Path,
    pub limits: ExecutionLimits,
}

impl<'a> RunPlan<'a> {
    pub fn request(&self, stdin: &'a str) -> SandboxRequest<'a> {
        SandboxRequest {
            image: self.image,
            command: self.command,
            workspace: self.workspace,
            stdin,
            limits: self.limits,
            phase: Phase::Run,
        }
    }
}

/// Sequential, in-order execution; one result per case
pub async fn run_suite(
    runner: &dyn SandboxRunner,
    plan: RunPlan<'_>,
    language: Language,
    cases: &[&TestCase],
) -> Result<SubmissionVerdict, SandboxError> {
    let mut results = Vec::with_capacity(cases.len());

    for (index, case) in cases.iter().enumerate() {
        let outcome = execute_with_retry(runner, plan.request(&case.input)).await?;
        let result = evaluate_case(case, &outcome);
        debug!(
            case = index + 1,
            status = ?result.status,
            wall_time_s = result.wall_time_seconds,
            peak_mb = result.peak_memory_megabytes,
            "test case evaluated"
        );
        results.push(result);
    }

    let verdict = aggregate(language, results);
    let passed = verdict.per_case_results.iter().filter(|r| r.passed).count();
    info!(
        %language,
        passed,
        total = verdict.per_case_results.len(),
        wall_time_s = verdict.aggregate_wall_time_seconds,
        peak_mb = verdict.aggregate_peak_memory_megabytes,
        "suite finished"
    );
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{outcome, ScriptedRunner};

    fn plan<'a>(command: &'a [String]) -> RunPlan<'a> {
        RunPlan {
            image: "python:3.11-slim",
            command,
            workspace: Path::new("."),
            limits: ExecutionLimits::default(),
        }
    }

    #[test]
    fn test_normalization_rules() {
        assert!(outputs_match("30", "30\n"));
        assert!(outputs_match("30\r\n\n", "30"));
        assert!(outputs_match("a b\t \n", "a b"));
        assert!(!outputs_match(" 30", "30"));
        assert!(!outputs_match("a  b", "a b"));
        assert!(!outputs_match("1\n\n2", "1\n2"));
    }

    #[test]
    fn test_empty_expected_output_is_not_a_wildcard() {
        let case = TestCase::new("", "");
        assert!(evaluate_case(&case, &outcome("\n")).passed);
        assert!(!evaluate_case(&case, &outcome("something")).passed);
    }

    #[test]
    fn test_limit_flags_always_fail() {
        let case = TestCase::new("", "42");
        let mut out = outcome("42\n");
        out.timed_out = true;
        out.exit_code = None;
        let result = evaluate_case(&case, &out);
        assert!(!result.passed);
        assert_eq!(result.status, CaseStatus::TimeLimitExceeded);

        let mut out = outcome("42");
        out.out_of_memory = true;
        assert_eq!(evaluate_case(&case, &out).status, CaseStatus::MemoryLimitExceeded);

        let mut out = outcome("42");
        out.crashed = true;
        out.exit_code = Some(139);
        assert_eq!(evaluate_case(&case, &out).status, CaseStatus::RuntimeError);
    }

    #[test]
    fn test_non_zero_exit_fails_even_with_matching_output() {
        let case = TestCase::new("", "42");
        let mut out = outcome("42");
        out.exit_code = Some(1);
        let result = evaluate_case(&case, &out);
        assert!(!result.passed);
        assert_eq!(result.status, CaseStatus::RuntimeError);
        assert_eq!(result.exit_code, Some(1));
    }

    #[test]
    fn test_aggregate_sums_time_and_maxes_memory() {
        let case = TestCase::new("", "ok");
        let mut a = outcome("ok");
        a.wall_time_seconds = 0.25;
        a.peak_memory_megabytes = 12.0;
        let mut b = outcome("ok");
        b.wall_time_seconds = 0.5;
        b.peak_memory_megabytes = 30.5;

        let verdict = aggregate(
            Language::Python,
            vec![evaluate_case(&case, &a), evaluate_case(&case, &b)],
        );
        assert!(verdict.all_passed);
        assert!((verdict.aggregate_wall_time_seconds - 0.75).abs() < 1e-9);
        assert_eq!(verdict.aggregate_peak_memory_megabytes, 30.5);
    }

    #[test]
    fn test_empty_suite_is_not_all_passed() {
        let verdict = aggregate(Language::Java, Vec::new());
        assert!(!verdict.all_passed);
        assert_eq!(verdict.aggregate_wall_time_seconds, 0.0);
    }

    #[test]
    fn test_compile_failure_verdict_marks_every_case() {
        let cases = [TestCase::new("1", "1"), TestCase::new("2", "2")];
        let refs: Vec<&TestCase> = cases.iter().collect();
        let mut build = outcome("");
        build.exit_code = Some(1);
        build.stderr = "Main.java:1: error: ';' expected\n".to_string();

        let verdict = compile_failure_verdict(Language::Java, &refs, compile_failure(&build));
        assert!(!verdict.all_passed);
        assert_eq!(verdict.per_case_results.len(), 2);
        assert!(verdict
            .per_case_results
            .iter()
            .all(|r| !r.passed && r.status == CaseStatus::CompileError));
        let failure = verdict.compile_error.unwrap();
        assert_eq!(failure.output, "Main.java:1: error: ';' expected");
        assert_eq!(failure.exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_run_suite_preserves_order() {
        let runner = ScriptedRunner::new()
            .then_stdout("3\n")
            .then_stdout("wrong\n")
            .then_stdout("11");
        let cases = [
            TestCase::new("1 2", "3"),
            TestCase::new("2 2", "4"),
            TestCase::new("5 6", "11"),
        ];
        let refs: Vec<&TestCase> = cases.iter().collect();
        let command = vec!["python3".to_string(), "main.py".to_string()];

        let verdict = run_suite(&runner, plan(&command), Language::Python, &refs)
            .await
            .unwrap();

        let inputs: Vec<&str> = verdict
            .per_case_results
            .iter()
            .map(|r| r.input.as_str())
            .collect();
        assert_eq!(inputs, vec!["1 2", "2 2", "5 6"]);
        let passed: Vec<bool> = verdict.per_case_results.iter().map(|r| r.passed).collect();
        assert_eq!(passed, vec![true, false, true]);
        assert!(!verdict.all_passed);

        let stdins: Vec<String> = runner.recorded().into_iter().map(|c| c.stdin).collect();
        assert_eq!(stdins, vec!["1 2", "2 2", "5 6"]);
    }

    #[tokio::test]
    async fn test_run_suite_retries_then_surfaces_sandbox_error() {
        let runner = ScriptedRunner::new()
            .then_stdout("ok")
            .then_fail()
            .then_fail();
        let cases = [TestCase::new("", "ok"), TestCase::new("", "ok")];
        let refs: Vec<&TestCase> = cases.iter().collect();
        let command = vec!["node".to_string(), "main.js".to_string()];

        let result = run_suite(&runner, plan(&command), Language::JavaScript, &refs).await;
        assert!(result.is_err());
        assert_eq!(runner.calls(), 3);
    }
}
