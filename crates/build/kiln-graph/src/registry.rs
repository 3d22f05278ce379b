//! The persistent path registry.
//!
//! Owns every artifact node for a run. Nodes are created on first reference
//! through [`Registry::get_or_create`], so an id always resolves to the same
//! [`PathId`]. State is loaded once when the registry is opened and written
//! back once at the end of [`Registry::run`]. A successful run drops paths it
//! never reached from the state file.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use kiln_core::verbose::Timer;
use kiln_core::{Digest, DigestSource, vprintln, wprintln};

use crate::discover::DependsGenerator;
use crate::path::{Dependency, Node, PathId, PathKind};
use crate::state::{DependencyRecord, PathRecord, StateFile};
use crate::traversal::Traversal;

/// Registry of every artifact known to the current run.
pub struct Registry {
    root: PathBuf,
    build_dir: PathBuf,
    state_path: PathBuf,
    pub(crate) nodes: Vec<Node>,
    index: HashMap<String, PathId>,
    ignored: Vec<PathBuf>,
}

impl Registry {
    /// Create an empty registry.
    ///
    /// Ids resolve against `root`; `build_dir` and `state_path` are taken as
    /// given.
    pub fn new(
        root: impl Into<PathBuf>,
        build_dir: impl Into<PathBuf>,
        state_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            root: root.into(),
            build_dir: build_dir.into(),
            state_path: state_path.into(),
            nodes: Vec::new(),
            index: HashMap::new(),
            ignored: Vec::new(),
        }
    }

    /// Open the registry stored at `<root>/<build_dir>/<state_file>`.
    ///
    /// A missing state file yields an empty registry.
    pub fn open(
        root: impl Into<PathBuf>,
        build_dir: impl AsRef<Path>,
        state_file: &str,
    ) -> Result<Self> {
        let root = root.into();
        let build_dir = root.join(build_dir);
        let state_path = build_dir.join(state_file);

        let _t = Timer::start("state load");
        let state = StateFile::load(&state_path)?;
        let mut registry = Self::new(root, build_dir, state_path);
        registry.load(&state);
        vprintln!("  state: {} paths loaded", registry.len());
        Ok(registry)
    }

    /// Populate the registry from persisted state.
    ///
    /// Runs in two phases: every recorded path is created first so that
    /// dependency edges can refer to paths recorded later in the file.
    pub fn load(&mut self, state: &StateFile) {
        for (id, record) in &state.paths {
            let path = self.intern(record.kind, id);
            self.nodes[path.0].persisted.clone_from(&record.digest);
        }

        for (id, record) in &state.paths {
            let Some(records) = &record.dependencies else {
                continue;
            };
            let path = self.intern(record.kind, id);
            let edges = records
                .iter()
                .map(|dep| Dependency {
                    target: self.intern(PathKind::Input, &dep.path),
                    snapshot: dep.digest.clone(),
                })
                .collect();
            self.nodes[path.0].dependencies = Some(edges);
        }
    }

    /// Resolve `id`, creating the path on first reference.
    ///
    /// An existing output is returned as-is when an input is requested, since
    /// build products may feed other actions. An existing input requested as
    /// an output is promoted to an output.
    pub fn get_or_create(&mut self, kind: PathKind, id: &str) -> PathId {
        let path = self.intern(kind, id);
        self.nodes[path.0].touched = true;
        path
    }

    fn intern(&mut self, kind: PathKind, id: &str) -> PathId {
        if let Some(&path) = self.index.get(id) {
            let node = &mut self.nodes[path.0];
            if kind == PathKind::Output && node.kind == PathKind::Input {
                vprintln!("  {id}: promoted from input to output");
                node.kind = PathKind::Output;
                node.generator = None;
            }
            return path;
        }

        let path = PathId(self.nodes.len());
        let file = self.root.join(id);
        self.nodes.push(Node::new(id.to_string(), kind, file));
        self.index.insert(id.to_string(), path);
        path
    }

    /// Resolve an input path.
    pub fn input(&mut self, id: &str) -> PathId {
        self.get_or_create(PathKind::Input, id)
    }

    /// Resolve an output path.
    pub fn output(&mut self, id: &str) -> PathId {
        self.get_or_create(PathKind::Output, id)
    }

    /// Find an already-known path.
    pub fn lookup(&self, id: &str) -> Option<PathId> {
        self.index.get(id).copied()
    }

    /// Number of known paths.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no paths are known.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The project root ids resolve against.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The build directory.
    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// Location of the state file.
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Keep `dir` out of file-set globs, like the build directory.
    pub fn ignore_dir(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        if !self.ignored.contains(&dir) {
            self.ignored.push(dir);
        }
    }

    /// Directories globs never descend into, the build directory first.
    pub fn ignored_dirs(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.build_dir.as_path()).chain(self.ignored.iter().map(PathBuf::as_path))
    }

    /// Join `name` onto the build directory.
    pub fn output_path(&self, name: &str) -> PathBuf {
        self.build_dir.join(name)
    }

    /// The id of a path.
    pub fn id(&self, path: PathId) -> &str {
        &self.nodes[path.0].id
    }

    /// The kind of a path.
    pub fn kind(&self, path: PathId) -> PathKind {
        self.nodes[path.0].kind
    }

    /// The on-disk location of a path.
    pub fn file(&self, path: PathId) -> &Path {
        &self.nodes[path.0].file
    }

    /// The digest committed by the previous run, if it is still trusted.
    pub fn persisted_digest(&self, path: PathId) -> Option<&Digest> {
        self.nodes[path.0].persisted.as_ref()
    }

    /// The dependency edges of a path, if they have been materialized.
    pub fn dependencies(&self, path: PathId) -> Option<&[Dependency]> {
        self.nodes[path.0].dependencies.as_deref()
    }

    /// Digest a path by a caller-supplied token instead of file content.
    pub fn set_token(&mut self, path: PathId, token: impl Into<String>) {
        self.nodes[path.0].source = DigestSource::Token(token.into());
    }

    /// Attach a dependency generator to an input.
    ///
    /// The generator runs only when the input is new, its content changed, or
    /// its dependency list was never materialized.
    pub fn set_generator(&mut self, path: PathId, generator: Arc<dyn DependsGenerator>) {
        self.nodes[path.0].generator = Some(generator);
    }

    /// The live digest of a path, computed once per run.
    pub fn digest(&mut self, path: PathId) -> Result<Option<Digest>> {
        let node = &mut self.nodes[path.0];
        if let Some(digest) = &node.live {
            return Ok(digest.clone());
        }
        let digest = node.source.digest()?;
        node.live = Some(digest.clone());
        Ok(digest)
    }

    /// Whether a path changed since the previous run, including upstream churn.
    pub fn updated(&mut self, path: PathId) -> Result<bool> {
        self.updated_in(path, &mut Traversal::new())
    }

    pub(crate) fn updated_in(&mut self, path: PathId, traversal: &mut Traversal) -> Result<bool> {
        match self.nodes[path.0].kind {
            PathKind::Input => self.input_updated(path, traversal),
            PathKind::Output => Ok(self.output_updated(path)),
        }
    }

    /// Walk the dependency edges of `path`, advancing snapshots that moved.
    ///
    /// Every edge is visited even after a change is found so that all
    /// snapshots are brought up to date.
    pub fn dependencies_updated(&mut self, path: PathId) -> Result<bool> {
        self.dependencies_updated_in(path, &mut Traversal::new())
    }

    pub(crate) fn dependencies_updated_in(
        &mut self,
        path: PathId,
        traversal: &mut Traversal,
    ) -> Result<bool> {
        traversal.enter(path, &self.nodes[path.0].id)?;
        let result = self.walk_dependencies(path, traversal);
        traversal.leave(path);
        result
    }

    fn walk_dependencies(&mut self, path: PathId, traversal: &mut Traversal) -> Result<bool> {
        let mut changed = false;
        let mut index = 0;
        while let Some(target) = self.edge(path, index).map(|edge| edge.target) {
            let current = self.digest(target)?;
            let moved = self.edge(path, index).is_some_and(|edge| edge.snapshot != current);
            if moved {
                vprintln!("  {}: {} changed", self.nodes[path.0].id, self.nodes[target.0].id);
                if let Some(edge) = self.edge_mut(path, index) {
                    edge.snapshot = current;
                }
            }
            let upstream = self.updated_in(target, traversal)?;
            changed |= moved || upstream;
            index += 1;
        }
        Ok(changed)
    }

    fn edge(&self, path: PathId, index: usize) -> Option<&Dependency> {
        self.nodes[path.0].dependencies.as_ref()?.get(index)
    }

    fn edge_mut(&mut self, path: PathId, index: usize) -> Option<&mut Dependency> {
        self.nodes[path.0].dependencies.as_mut()?.get_mut(index)
    }

    /// Serialize every known path.
    pub fn snapshot(&self) -> StateFile {
        self.snapshot_where(&vec![true; self.nodes.len()])
    }

    fn snapshot_where(&self, keep: &[bool]) -> StateFile {
        let mut state = StateFile::default();
        for (node, _) in self.nodes.iter().zip(keep).filter(|(_, keep)| **keep) {
            let dependencies = node.dependencies.as_ref().map(|edges| {
                edges
                    .iter()
                    .map(|edge| DependencyRecord {
                        path: self.nodes[edge.target.0].id.clone(),
                        digest: edge.snapshot.clone(),
                    })
                    .collect()
            });
            state.paths.insert(
                node.id.clone(),
                PathRecord {
                    digest: node.committed_digest(),
                    kind: node.kind,
                    dependencies,
                },
            );
        }
        state
    }

    /// Write the state file.
    pub fn save(&self) -> Result<()> {
        let _t = Timer::start("state save");
        self.snapshot().save(&self.state_path)
    }

    /// Write the state file without the paths this run never reached.
    ///
    /// A path is reached when it was resolved through
    /// [`get_or_create`](Self::get_or_create) or is a dependency of a reached
    /// path.
    pub fn save_reachable(&self) -> Result<()> {
        let _t = Timer::start("state save");
        let keep = self.reachable();
        let dropped = keep.iter().filter(|keep| !**keep).count();
        if dropped > 0 {
            vprintln!("  state: dropping {dropped} unreferenced paths");
        }
        self.snapshot_where(&keep).save(&self.state_path)
    }

    fn reachable(&self) -> Vec<bool> {
        let mut keep = vec![false; self.nodes.len()];
        let mut stack: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| self.nodes[i].touched)
            .collect();
        while let Some(i) = stack.pop() {
            if std::mem::replace(&mut keep[i], true) {
                continue;
            }
            if let Some(edges) = &self.nodes[i].dependencies {
                stack.extend(edges.iter().map(|edge| edge.target.0));
            }
        }
        keep
    }

    /// Stop trusting every input found updated in a run that did not finish.
    ///
    /// An input's own dependency snapshots are shared by every output built
    /// from it, so the first output to look at them advances them for all.
    /// Dropping the committed digest makes the input read as changed next run
    /// and every dependent output is checked again.
    fn distrust_updated_inputs(&mut self) {
        for node in &mut self.nodes {
            if node.kind == PathKind::Input && node.updated == Some(true) {
                node.awaiting_rebuild = true;
            }
        }
    }

    /// Run build logic and save state afterwards, whatever the outcome.
    ///
    /// State is written when `f` succeeds, when it returns an error, and when
    /// it panics. Only a successful run prunes unreached paths; a failed one
    /// keeps them and distrusts the inputs it saw change. A save failure is
    /// reported but never masks an error from `f`.
    pub fn run<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(self)));
        let saved = if matches!(outcome, Ok(Ok(_))) {
            self.save_reachable()
        } else {
            self.distrust_updated_inputs();
            self.save()
        };

        let result = match outcome {
            Ok(result) => result,
            Err(payload) => {
                if let Err(e) = saved {
                    wprintln!("failed to save build state: {e:#}");
                }
                panic::resume_unwind(payload);
            }
        };

        match (result, saved) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(save_err)) => {
                wprintln!("failed to save build state: {save_err:#}");
                Err(e)
            }
        }
    }
}
