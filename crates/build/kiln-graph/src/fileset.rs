//! Glob-selected groups of input paths.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::path::{PathId, id_for};
use crate::registry::Registry;

/// An ordered set of registry paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
    files: Vec<PathId>,
}

impl FileSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every file under the registry root matching `patterns` as an
    /// input.
    ///
    /// Patterns are matched against ids, so `*` never crosses a `/`. Each
    /// pattern is walked from its literal directory prefix, no deeper than its
    /// components reach unless it contains `**`. The build directory, the
    /// registry's ignored directories and `.git` are never searched. Matches
    /// are in sorted id order.
    pub fn glob(registry: &mut Registry, patterns: &[&str]) -> Result<Self> {
        let root = registry.root().to_path_buf();
        let ignored: Vec<PathBuf> = registry.ignored_dirs().map(Path::to_path_buf).collect();
        let walks = patterns
            .iter()
            .map(|pattern| Ok((Walk::of(pattern), compile(pattern)?.compile_matcher())))
            .collect::<Result<Vec<_>>>()?;

        let mut ids = BTreeSet::new();
        for (walk, matcher) in &walks {
            let base = root.join(&walk.base);
            if !base.is_dir() || ignored.iter().any(|dir| base.starts_with(dir)) {
                continue;
            }
            let mut walker = WalkDir::new(&base);
            if let Some(depth) = walk.depth {
                walker = walker.max_depth(depth);
            }
            let entries = walker.into_iter().filter_entry(|entry| {
                entry.file_name() != ".git"
                    && !ignored.iter().any(|dir| entry.path().starts_with(dir))
            });
            for entry in entries {
                let entry = entry.with_context(|| format!("failed to scan {}", base.display()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(&root) else {
                    continue;
                };
                let id = id_for(relative);
                if matcher.is_match(&id) {
                    ids.insert(id);
                }
            }
        }

        let mut set = Self::new();
        for id in ids {
            set.add(registry.input(&id));
        }
        Ok(set)
    }

    /// Move every path whose id matches `patterns` into a new set.
    pub fn extract(&mut self, registry: &Registry, patterns: &[&str]) -> Result<Self> {
        let matcher = build_matcher(patterns)?;
        let (taken, kept) = self
            .files
            .iter()
            .copied()
            .partition(|&path| matcher.is_match(registry.id(path)));
        self.files = kept;
        Ok(Self { files: taken })
    }

    /// Add a path unless it is already present.
    pub fn add(&mut self, path: PathId) {
        if !self.contains(path) {
            self.files.push(path);
        }
    }

    /// Whether `path` is in the set.
    pub fn contains(&self, path: PathId) -> bool {
        self.files.contains(&path)
    }

    /// Iterate over the paths in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = PathId> + '_ {
        self.files.iter().copied()
    }

    /// The ids of every path, in order.
    pub fn ids(&self, registry: &Registry) -> Vec<String> {
        self.iter().map(|path| registry.id(path).to_string()).collect()
    }

    /// Number of paths.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Where to start walking for one pattern.
#[derive(Debug, PartialEq, Eq)]
struct Walk {
    /// Leading directories free of glob syntax, relative to the root.
    base: PathBuf,
    /// Deepest level below `base` the pattern can match, `None` with `**`.
    depth: Option<usize>,
}

impl Walk {
    fn of(pattern: &str) -> Self {
        let parts: Vec<&str> = pattern.split('/').filter(|part| !part.is_empty()).collect();
        let dirs = parts.len().saturating_sub(1);
        let literal = parts[..dirs]
            .iter()
            .take_while(|part| !part.contains(['*', '?', '[', '{', '\\']) && **part != "..")
            .count();
        let rest = &parts[literal..];
        Self {
            base: parts[..literal].iter().collect(),
            depth: if rest.iter().any(|part| part.contains("**")) {
                None
            } else {
                Some(rest.len())
            },
        }
    }
}

fn compile(pattern: &str) -> Result<Glob> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .with_context(|| format!("invalid glob pattern `{pattern}`"))
}

fn build_matcher(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(compile(pattern)?);
    }
    builder.build().context("failed to compile glob patterns")
}
