//! File-level incremental build engine.
//!
//! A [`Registry`] holds one node per artifact id, loaded from and saved to a
//! JSON state file. Inputs are leaf files whose dependency lists may be
//! discovered dynamically; outputs are files produced by build actions.
//! [`Registry::process`] decides whether an output is stale, runs the action
//! only when it is, and commits the new digest afterwards.
//!
//! Pipeline per run: load state → resolve paths → evaluate staleness lazily
//! → run actions → save state (on every exit path, see [`Registry::run`]).

pub mod depfile;
pub mod discover;
pub mod fileset;
mod input;
mod output;
pub mod path;
mod process;
pub mod registry;
pub mod state;
pub mod traversal;

pub use discover::{CompilerDiscoverer, DependsGenerator};
pub use fileset::FileSet;
pub use path::{Dependency, PathId, PathKind};
pub use registry::Registry;
pub use state::StateFile;
pub use traversal::Traversal;
