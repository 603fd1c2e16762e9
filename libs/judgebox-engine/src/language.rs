//! Language Adapter - per-language build/run knowledge
//!
//! **Core Responsibility:**
//! Map a `Language` to its container image, source file name, optional
//! build command and run command. Pure lookup once the table is loaded.
//!
//! Command templates may reference `{file}` (source file name) and
//! `{entry}` (entry identifier / Java class name).

use crate::error::ExecError;
use judgebox_common::types::{is_identifier, ExecutionLimits, Language};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

fn default_time_limit() -> f64 {
    2.0
}

fn default_memory_limit() -> u32 {
    256
}

fn default_build_time_limit() -> f64 {
    15.0
}

fn default_build_memory_limit() -> u32 {
    512
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageProfile {
    pub name: Language,
    pub image: String,
    pub file_extension: String,
    #[serde(default)]
    pub build: Option<Vec<String>>,
    pub run: Vec<String>,
    #[serde(default = "default_time_limit")]
    pub time_limit_seconds: f64,
    #[serde(default = "default_memory_limit")]
    pub memory_limit_mb: u32,
    #[serde(default = "default_build_time_limit")]
    pub build_time_limit_seconds: f64,
    #[serde(default = "default_build_memory_limit")]
    pub build_memory_limit_mb: u32,
}

impl LanguageProfile {
    fn new(name: Language, image: &str, build: Option<&[&str]>, run: &[&str]) -> Self {
        let owned = |parts: &[&str]| parts.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            name,
            image: image.to_string(),
            file_extension: name.extension().to_string(),
            build: build.map(owned),
            run: owned(run),
            time_limit_seconds: default_time_limit(),
            memory_limit_mb: default_memory_limit(),
            build_time_limit_seconds: default_build_time_limit(),
            build_memory_limit_mb: default_build_memory_limit(),
        }
    }

    pub fn source_file_name(&self, entry: &str) -> String {
        format!("{}.{}", entry, self.file_extension)
    }

    /// `None` for interpreted languages
    pub fn build_command(&self, entry: &str) -> Option<Vec<String>> {
        self.build
            .as_ref()
            .filter(|cmd| !cmd.is_empty())
            .map(|cmd| self.expand(cmd, entry))
    }

    pub fn run_command(&self, entry: &str) -> Vec<String> {
        self.expand(&self.run, entry)
    }

    /// Limits applied when the question does not supply its own
    pub fn default_limits(&self) -> ExecutionLimits {
        ExecutionLimits::new(self.time_limit_seconds, self.memory_limit_mb)
    }

    pub fn build_limits(&self) -> ExecutionLimits {
        ExecutionLimits::new(self.build_time_limit_seconds, self.build_memory_limit_mb)
    }

    fn expand(&self, template: &[String], entry: &str) -> Vec<String> {
        let file = self.source_file_name(entry);
        template
            .iter()
            .map(|arg| arg.replace("{file}", &file).replace("{entry}", entry))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageProfile>,
}

/// Enum-keyed table of language profiles
#[derive(Debug, Clone)]
pub struct LanguageTable {
    profiles: HashMap<Language, LanguageProfile>,
}

impl LanguageTable {
    pub fn builtin() -> Self {
        let profiles = [
            LanguageProfile::new(Language::JavaScript, "node:20-slim", None, &["node", "{file}"]),
            LanguageProfile::new(
                Language::Python,
                "python:3.11-slim",
                None,
                &["python3", "-u", "{file}"],
            ),
            LanguageProfile::new(
                Language::Java,
                "eclipse-temurin:21-jdk",
                Some(&["javac", "-encoding", "UTF-8", "{file}"]),
                &["java", "-XX:+UseSerialGC", "-Xss64m", "-cp", ".", "{entry}"],
            ),
        ];
        Self {
            profiles: profiles.into_iter().map(|p| (p.name, p)).collect(),
        }
    }

    /// Built-in profiles overridden by the entries of a `languages.json` file
    pub fn load(config_path: &Path) -> Result<Self, ExecError> {
        let content = std::fs::read_to_string(config_path).map_err(|e| {
            ExecError::configuration(format!(
                "failed to read {}: {}",
                config_path.display(),
                e
            ))
        })?;
        Self::builtin().with_overrides(&content)
    }

    pub fn with_overrides(mut self, json: &str) -> Result<Self, ExecError> {
        let parsed: LanguagesJson = serde_json::from_str(json)
            .map_err(|e| ExecError::configuration(format!("invalid language table: {}", e)))?;

        for profile in parsed.languages {
            if profile.run.is_empty() {
                return Err(ExecError::configuration(format!(
                    "language {} has an empty run command",
                    profile.name
                )));
            }
            profile.default_limits().validate().map_err(|reason| {
                ExecError::configuration(format!("language {}: {}", profile.name, reason))
            })?;
            info!(language = %profile.name, image = %profile.image, "language profile overridden");
            self.profiles.insert(profile.name, profile);
        }
        Ok(self)
    }

    pub fn profile(&self, language: Language) -> Result<&LanguageProfile, ExecError> {
        self.profiles.get(&language).ok_or_else(|| {
            ExecError::configuration(format!("no profile configured for {}", language))
        })
    }

    /// Profiles in a stable order
    pub fn profiles(&self) -> Vec<&LanguageProfile> {
        Language::ALL
            .iter()
            .filter_map(|lang| self.profiles.get(lang))
            .collect()
    }
}

impl Default for LanguageTable {
    fn default() -> Self {
        Self::builtin()
    }
}

pub fn validate_entry_identifier(entry: &str) -> Result<(), ExecError> {
    if is_identifier(entry) {
        Ok(())
    } else {
        Err(ExecError::configuration(format!(
            "invalid entry identifier {:?}",
            entry
        )))
    }
}
