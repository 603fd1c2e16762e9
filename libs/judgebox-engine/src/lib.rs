//! Isolated execution of untrusted submissions.
//!
//! Layering, bottom-up: [`language`] resolves build/run commands, [`sandbox`]
//! executes one command under limits, [`harness`] grades a submission against
//! test cases, [`coordinator`] bounds concurrency and is the only entry point
//! the HTTP layer talks to.

pub mod admission;
pub mod coordinator;
pub mod error;
pub mod harness;
pub mod language;
pub mod sandbox;
pub mod workspace;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{Coordinator, CoordinatorSettings};
pub use error::{ExecError, SandboxError};
pub use language::{LanguageProfile, LanguageTable};
pub use sandbox::{DockerSandbox, SandboxRunner, SandboxSettings};
