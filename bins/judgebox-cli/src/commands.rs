// CLI commands for running submissions outside the HTTP service
use anyhow::{bail, Context, Result};
use judgebox_common::store::{Fixtures, RedisStore};
use judgebox_common::types::{CodeFile, ExecutionLimits, Submission, TestCase};
use judgebox_engine::{
    Coordinator, CoordinatorSettings, DockerSandbox, LanguageTable, SandboxSettings,
};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;

pub fn load_languages(path: Option<&Path>) -> Result<LanguageTable> {
    match path {
        Some(path) => LanguageTable::load(path)
            .with_context(|| format!("Failed to load languages from {}", path.display())),
        None => Ok(LanguageTable::builtin()),
    }
}

/// Treat `source` as if uploaded under `path`'s file name
fn submission_from(path: &Path, source: String) -> Result<Submission> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Not a file path: {}", path.display()))?;

    CodeFile {
        path: name.to_string(),
        source,
        language: None,
    }
    .into_submission()
    .with_context(|| format!("Unsupported file type: {}", name))
}

fn read_submission(path: &Path) -> Result<Submission> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    submission_from(path, source)
}

fn parse_cases(raw: &str) -> Result<Vec<TestCase>> {
    serde_json::from_str(raw).context("Failed to parse test cases")
}

fn resolve_limits(
    table: &LanguageTable,
    submission: &Submission,
    time_limit: Option<f64>,
    memory_limit: Option<u32>,
) -> Result<ExecutionLimits> {
    let defaults = table.profile(submission.language)?.default_limits();
    let limits = ExecutionLimits::new(
        time_limit.unwrap_or(defaults.wall_clock_seconds),
        memory_limit.unwrap_or(defaults.memory_megabytes),
    );
    if let Err(reason) = limits.validate() {
        bail!("Invalid limits: {}", reason);
    }
    Ok(limits)
}

/// Single-slot coordinator over the local Docker daemon
async fn local_coordinator(table: LanguageTable) -> Result<Coordinator> {
    let sandbox =
        DockerSandbox::connect(SandboxSettings::default()).context("Failed to connect to Docker")?;
    sandbox.ping().await.context("Docker daemon not reachable")?;

    Ok(Coordinator::new(
        table,
        Arc::new(sandbox),
        CoordinatorSettings {
            max_concurrency: 1,
            queue_depth: 0,
            workspace_root: None,
        },
    ))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run_file(
    table: &LanguageTable,
    file: &Path,
    input: Option<&Path>,
    time_limit: Option<f64>,
    memory_limit: Option<u32>,
) -> Result<()> {
    let submission = read_submission(file)?;
    let limits = resolve_limits(table, &submission, time_limit, memory_limit)?;
    let stdin = match input {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => String::new(),
    };

    let coordinator = local_coordinator(table.clone()).await?;
    let report = coordinator.run_once(&submission, &stdin, limits).await?;
    print_json(&report)
}

pub async fn test_file(
    table: LanguageTable,
    file: &Path,
    cases_path: &Path,
    time_limit: Option<f64>,
    memory_limit: Option<u32>,
) -> Result<()> {
    let submission = read_submission(file)?;
    let limits = resolve_limits(&table, &submission, time_limit, memory_limit)?;
    let raw = fs::read_to_string(cases_path)
        .with_context(|| format!("Failed to read {}", cases_path.display()))?;
    let cases = parse_cases(&raw)?;

    let coordinator = local_coordinator(table).await?;
    let verdict = coordinator.run_suite(&submission, &cases, limits).await?;
    print_json(&verdict)?;

    if !verdict.all_passed {
        let failed = verdict.per_case_results.iter().filter(|r| !r.passed).count();
        bail!("{} of {} test cases failed", failed, verdict.per_case_results.len());
    }
    Ok(())
}

pub fn list_languages(table: &LanguageTable) {
    println!("{:<12} {:<28} {:<8} {}", "LANGUAGE", "IMAGE", "LIMITS", "RUN");
    for profile in table.profiles() {
        let limits = profile.default_limits();
        println!(
            "{:<12} {:<28} {:<8} {}",
            profile.name.as_str(),
            profile.image,
            format!("{}s/{}M", limits.wall_clock_seconds, limits.memory_megabytes),
            profile.run.join(" ")
        );
    }
}

pub async fn seed(fixtures_path: &Path, redis_url: &str) -> Result<()> {
    let fixtures = Fixtures::load(fixtures_path)
        .with_context(|| format!("Failed to load {}", fixtures_path.display()))?;
    let store = RedisStore::connect(redis_url)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", redis_url))?;

    let (code_files, questions) = store.seed(&fixtures).await?;
    println!("✓ Seeded {} code files and {} questions", code_files, questions);
    Ok(())
}
