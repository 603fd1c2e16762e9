use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Languages the sandbox knows how to build and run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    JavaScript,
    Java,
    Python,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported language: {0}")]
pub struct UnknownLanguage(pub String);

impl Language {
    pub const ALL: [Language; 3] = [Language::JavaScript, Language::Java, Language::Python];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
            Language::Java => "java",
            Language::Python => "python",
        }
    }

    /// Canonical source file extension, without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            Language::JavaScript => "js",
            Language::Java => "java",
            Language::Python => "py",
        }
    }

    /// Map a code file extension (`js`, `java`, `py`) to its language
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "js" | "mjs" => Some(Language::JavaScript),
            "java" => Some(Language::Java),
            "py" => Some(Language::Python),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            "java" => Ok(Language::Java),
            "python" | "py" | "python3" => Ok(Language::Python),
            _ => Err(UnknownLanguage(s.to_string())),
        }
    }
}

/// One user's source code, ready to be built and executed.
///
/// Immutable once created; lives for a single execution request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub source_code: String,
    pub language: Language,
    /// Names the source file and, for Java, the main class
    pub entry_identifier: String,
}

impl Submission {
    pub fn new(
        source_code: impl Into<String>,
        language: Language,
        entry_identifier: impl Into<String>,
    ) -> Self {
        Self {
            source_code: source_code.into(),
            language,
            entry_identifier: entry_identifier.into(),
        }
    }
}

/// Per-question resource limits for a single execution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLimits {
    pub wall_clock_seconds: f64,
    pub memory_megabytes: u32,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            wall_clock_seconds: 2.0,
            memory_megabytes: 256,
        }
    }
}

impl ExecutionLimits {
    pub const MAX_WALL_CLOCK_SECONDS: f64 = 60.0;
    pub const MAX_MEMORY_MEGABYTES: u32 = 4096;

    pub fn new(wall_clock_seconds: f64, memory_megabytes: u32) -> Self {
        Self {
            wall_clock_seconds,
            memory_megabytes,
        }
    }

    /// Reject non-positive, non-finite, or absurdly large limits
    pub fn validate(&self) -> Result<(), String> {
        if !self.wall_clock_seconds.is_finite() || self.wall_clock_seconds <= 0.0 {
            return Err(format!(
                "wall clock limit must be a positive number of seconds, got {}",
                self.wall_clock_seconds
            ));
        }
        if self.wall_clock_seconds > Self::MAX_WALL_CLOCK_SECONDS {
            return Err(format!(
                "wall clock limit {}s exceeds the maximum of {}s",
                self.wall_clock_seconds,
                Self::MAX_WALL_CLOCK_SECONDS
            ));
        }
        if self.memory_megabytes == 0 {
            return Err("memory limit must be positive".to_string());
        }
        if self.memory_megabytes > Self::MAX_MEMORY_MEGABYTES {
            return Err(format!(
                "memory limit {}MB exceeds the maximum of {}MB",
                self.memory_megabytes,
                Self::MAX_MEMORY_MEGABYTES
            ));
        }
        Ok(())
    }

    pub fn wall_clock(&self) -> Duration {
        Duration::from_secs_f64(self.wall_clock_seconds)
    }

    pub fn memory_bytes(&self) -> u64 {
        u64::from(self.memory_megabytes) * 1024 * 1024
    }
}

fn default_enabled() -> bool {
    true
}

/// An (input, expected output) pair used to grade a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Raw result of one isolated run. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by the limit monitor
    pub exit_code: Option<i64>,
    pub wall_time_seconds: f64,
    pub peak_memory_megabytes: f64,
    pub timed_out: bool,
    pub out_of_memory: bool,
    /// Killed by a signal (exit status 129..=192) without a limit breach
    pub crashed: bool,
    #[serde(default)]
    pub stdout_truncated: bool,
    #[serde(default)]
    pub stderr_truncated: bool,
}

impl ExecutionOutcome {
    /// Exited by itself with status 0 and no limit breach
    pub fn is_clean_exit(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out && !self.out_of_memory && !self.crashed
    }
}

/// Grading status of a single test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Passed,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    CompileError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseResult {
    pub input: String,
    pub expected_output: String,
    pub actual_output: String,
    pub passed: bool,
    pub status: CaseStatus,
    pub wall_time_seconds: f64,
    pub peak_memory_megabytes: f64,
    pub exit_code: Option<i64>,
}

/// Captured output of a failed build step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileFailure {
    /// Compiler diagnostics (stderr, then stdout)
    pub output: String,
    pub exit_code: Option<i64>,
    pub timed_out: bool,
}

/// Terminal artifact of a multi-case run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionVerdict {
    pub all_passed: bool,
    pub per_case_results: Vec<TestCaseResult>,
    pub language: Language,
    /// Sum over cases
    pub aggregate_wall_time_seconds: f64,
    /// Max over cases
    pub aggregate_peak_memory_megabytes: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile_error: Option<CompileFailure>,
}

/// Result of a single free-form run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunReport {
    Executed(ExecutionOutcome),
    CompileFailed(CompileFailure),
}

/// Opaque identifier handed to the collaborator stores.
///
/// The frontend sends numeric ids; strings are accepted as well.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        EntityId(value.to_string())
    }
}

impl From<u64> for EntityId {
    fn from(value: u64) -> Self {
        EntityId(value.to_string())
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(EntityId(n.to_string())),
            Raw::Text(s) => Ok(EntityId(s)),
        }
    }
}

/// A stored code file as returned by the code-file collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeFile {
    /// File path as saved by the user, e.g. `solutions/Main.java`
    pub path: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
}

impl CodeFile {
    /// Explicit language, falling back to the path's extension
    pub fn language(&self) -> Option<Language> {
        self.language.or_else(|| {
            Path::new(&self.path)
                .extension()
                .and_then(|ext| ext.to_str())
                .and_then(Language::from_extension)
        })
    }

    /// Java needs the file stem as the class name; other languages fall back
    /// to `main` when the stem is not a usable identifier.
    pub fn entry_identifier(&self, language: Language) -> String {
        let stem = Path::new(&self.path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        match language {
            Language::Java => stem.to_string(),
            _ if is_identifier(stem) => stem.to_string(),
            _ => "main".to_string(),
        }
    }

    pub fn into_submission(self) -> Option<Submission> {
        let language = self.language()?;
        let entry = self.entry_identifier(language);
        Some(Submission::new(self.source, language, entry))
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`, at most 64 characters
pub fn is_identifier(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    candidate.len() <= 64 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A question as returned by the question collaborator
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[serde(default)]
    pub time_limit_seconds: Option<f64>,
    #[serde(default)]
    pub memory_limit_mb: Option<u32>,
    /// Canonical input used by the "run" action
    #[serde(default)]
    pub sample_input: String,
    #[serde(default)]
    pub sample_output: String,
    #[serde(default)]
    pub testcases: Vec<TestCase>,
}

impl Question {
    /// The question's limits, with absent values taken from `fallback`
    pub fn limits(&self, fallback: ExecutionLimits) -> ExecutionLimits {
        ExecutionLimits {
            wall_clock_seconds: self.time_limit_seconds.unwrap_or(fallback.wall_clock_seconds),
            memory_megabytes: self.memory_limit_mb.unwrap_or(fallback.memory_megabytes),
        }
    }
}
