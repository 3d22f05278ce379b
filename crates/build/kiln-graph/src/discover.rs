//! Dynamic dependency discovery.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use kiln_core::{CommandEnv, CommandRunner};

use crate::depfile;

/// Produces the dependency ids of an input.
///
/// Called only when the input is new, its content changed, or its
/// dependency list was never recorded.
pub trait DependsGenerator {
    /// Return the ids `id` depends on. `file` is its location on disk.
    fn generate(&self, id: &str, file: &Path) -> Result<Vec<String>>;
}

impl<F> DependsGenerator for F
where
    F: Fn(&str, &Path) -> Result<Vec<String>>,
{
    fn generate(&self, id: &str, file: &Path) -> Result<Vec<String>> {
        self(id, file)
    }
}

/// Discovers header dependencies by asking a compiler for a Make rule.
pub struct CompilerDiscoverer {
    argv: Vec<String>,
    root: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl CompilerDiscoverer {
    /// Use `argv` followed by the input id as the discovery command, run from
    /// `root`.
    pub fn new(
        argv: Vec<String>,
        root: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            argv,
            root: root.into(),
            runner,
        }
    }

    /// `clang++ -MM -MT out <id>`.
    pub fn clang(root: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(kiln_core::exec::argv(["clang++", "-MM", "-MT", "out"]), root, runner)
    }
}

impl DependsGenerator for CompilerDiscoverer {
    fn generate(&self, id: &str, _file: &Path) -> Result<Vec<String>> {
        let mut argv = self.argv.clone();
        argv.push(id.to_string());
        let listing = self.runner.capture(&argv, &self.root, &CommandEnv::inherit())?;
        Ok(depfile::prerequisites(&listing, id, &self.root))
    }
}
