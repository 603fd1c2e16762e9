//! Error taxonomy surfaced by the engine.
//!
//! A compile error is *not* an error here: it is a normal outcome carried in
//! [`judgebox_common::types::RunReport`] / `SubmissionVerdict`. Only the
//! conditions below abort a request.

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Unknown language, missing profile, invalid limits or identifier.
    /// Raised before any resource is consumed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Infrastructure failure while running the submission
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// Admission queue is full
    #[error("execution capacity exhausted ({active} running, {queued} queued)")]
    ResourceExhausted { active: usize, queued: usize },
}

impl ExecError {
    pub fn configuration(message: impl Into<String>) -> Self {
        ExecError::Configuration(message.into())
    }
}

/// Failure to set up, run or observe an isolated process
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("workspace error: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("image {image} unavailable: {reason}")]
    Image { image: String, reason: String },

    #[error("sandbox failure: {0}")]
    Runtime(String),
}
