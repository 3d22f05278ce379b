//! Shared plumbing for the kiln build engines.
//!
//! Provides content digests for files and caller-supplied tokens, the typed
//! fatal errors that abort a run, external command execution with scoped
//! environments, and the verbosity-gated console output used by every crate
//! in the workspace.

pub mod digest;
pub mod error;
pub mod exec;
pub mod verbose;

pub use digest::{Digest, DigestSource};
pub use error::BuildError;
pub use exec::{CommandEnv, CommandRunner, ProcessRunner};
