//! Fatal conditions that abort a build run.
//!
//! These are raised through `anyhow` like every other failure, but carry a
//! concrete type so callers can tell an ordering violation from a failed
//! compiler with `downcast_ref::<BuildError>()`.

use std::path::PathBuf;

/// Errors that end the current run immediately.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// An external command exited unsuccessfully.
    #[error("{command} failed with error code {code}")]
    CommandFailed {
        /// The program that was run.
        command: String,
        /// Its exit code, or -1 if it was terminated by a signal.
        code: i32,
    },

    /// A path was reached again while its own dependencies were being checked.
    #[error("circular dependencies detected at {path}")]
    CircularDependency {
        /// The id of the path that was re-entered.
        path: String,
    },

    /// A package was built before one of the packages it depends on.
    #[error("package `{package}` depends on `{dependency}`, which has no recorded revision (build it first)")]
    MissingRevision {
        /// The package being checked.
        package: String,
        /// The dependency without a revision record.
        dependency: String,
    },

    /// A revision record on disk is not in the two-line format.
    #[error("malformed revision record at {}", path.display())]
    InvalidRevisionRecord {
        /// Location of the record.
        path: PathBuf,
    },

    /// A git checkout points at a different remote than the package declares.
    #[error("git remote mismatch for {}: local is {local}, required is {required}", repo.display())]
    RemoteMismatch {
        /// The checkout directory.
        repo: PathBuf,
        /// The configured `origin` URL.
        local: String,
        /// The URL declared by the package.
        required: String,
    },

    /// A git checkout has uncommitted changes to tracked files.
    #[error("dirty working directory in {}", repo.display())]
    DirtyCheckout {
        /// The checkout directory.
        repo: PathBuf,
    },

    /// The local branch has commits that are not on its upstream.
    #[error("local branch {branch} doesn't match origin in {}", repo.display())]
    DivergedBranch {
        /// The checkout directory.
        repo: PathBuf,
        /// The branch being tracked.
        branch: String,
    },
}
