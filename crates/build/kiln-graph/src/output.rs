//! Staleness rules for output paths.

use anyhow::{Result, bail};
use kiln_core::{vprintln, wprintln};

use crate::path::{Dependency, PathId, PathKind};
use crate::registry::Registry;
use crate::traversal::Traversal;

impl Registry {
    /// Declare the inputs an output is built from.
    ///
    /// Edges are replaced only when the set of targets differs from the
    /// current one, so unchanged declarations keep their snapshots. A replaced
    /// edge set makes the output stale.
    pub fn set_dependencies(&mut self, path: PathId, targets: &[PathId]) -> Result<()> {
        let node = &mut self.nodes[path.0];
        if node.kind != PathKind::Output {
            bail!("cannot declare dependencies of input {}", node.id);
        }

        let mut wanted: Vec<PathId> = targets.to_vec();
        wanted.sort_unstable();
        wanted.dedup();

        let same = node.dependencies.as_ref().is_some_and(|edges| {
            let mut current: Vec<PathId> = edges.iter().map(|edge| edge.target).collect();
            current.sort_unstable();
            current == wanted
        });
        if same {
            return Ok(());
        }

        vprintln!("  {}: dependency list changed", node.id);
        let mut edges: Vec<Dependency> = Vec::with_capacity(targets.len());
        for &target in targets {
            if !edges.iter().any(|edge| edge.target == target) {
                edges.push(Dependency::new(target));
            }
        }
        node.dependencies = Some(edges);
        node.updated = Some(true);
        Ok(())
    }

    /// Whether an output is missing or was never committed.
    pub(crate) fn output_updated(&mut self, path: PathId) -> bool {
        let node = &mut self.nodes[path.0];
        if let Some(updated) = node.updated {
            return updated;
        }
        let updated = node.persisted.is_none() || !node.file.exists();
        if updated {
            vprintln!("  {}: no committed output", node.id);
        }
        node.updated = Some(updated);
        updated
    }

    /// Whether an output must be rebuilt.
    ///
    /// A stale output loses its committed digest until
    /// [`mark_rebuilt`](Self::mark_rebuilt) is called, so a failed action
    /// leaves it stale for the next run.
    pub fn needs_rebuild(&mut self, path: PathId) -> Result<bool> {
        self.needs_rebuild_in(path, &mut Traversal::new())
    }

    pub(crate) fn needs_rebuild_in(
        &mut self,
        path: PathId,
        traversal: &mut Traversal,
    ) -> Result<bool> {
        let upstream = self.dependencies_updated_in(path, traversal)?;
        let stale = self.output_updated(path) || upstream;
        if stale {
            let node = &mut self.nodes[path.0];
            node.persisted = None;
            node.awaiting_rebuild = true;
        }
        Ok(stale)
    }

    /// Record that the action for an output succeeded.
    ///
    /// Recomputes the digest from the freshly written file.
    pub fn mark_rebuilt(&mut self, path: PathId) -> Result<()> {
        let node = &mut self.nodes[path.0];
        let digest = node.source.digest()?;
        if digest.is_none() {
            wprintln!("{} was not created by its action", node.id);
        }
        node.live = Some(digest.clone());
        node.persisted = digest;
        node.updated = Some(true);
        node.awaiting_rebuild = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use kiln_core::Digest;

    use crate::registry::Registry;

    #[test]
    fn inputs_cannot_take_declared_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = Registry::open(dir.path(), "build", "state.json").unwrap();
        let a = reg.input("a.c");
        let b = reg.input("b.c");
        assert!(reg.set_dependencies(a, &[b]).is_err());
    }

    #[test]
    fn redeclaring_same_set_keeps_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.c"), "a").unwrap();
        fs::write(dir.path().join("b.c"), "b").unwrap();
        let mut reg = Registry::open(dir.path(), "build", "state.json").unwrap();
        let a = reg.input("a.c");
        let b = reg.input("b.c");
        let out = reg.output("build/lib.a");

        reg.set_dependencies(out, &[a, b]).unwrap();
        reg.dependencies_updated(out).unwrap();
        reg.set_dependencies(out, &[b, a, a]).unwrap();
        let deps = reg.dependencies(out).unwrap();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].snapshot(), Some(&Digest::of_bytes(b"a")));
        assert_eq!(deps[1].snapshot(), Some(&Digest::of_bytes(b"b")));
    }

    #[test]
    fn missing_output_needs_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = Registry::open(dir.path(), "build", "state.json").unwrap();
        let out = reg.output("build/a.o");
        reg.set_dependencies(out, &[]).unwrap();
        assert!(reg.needs_rebuild(out).unwrap());
        assert!(reg.snapshot().paths["build/a.o"].digest.is_none());
    }

    #[test]
    fn mark_rebuilt_commits_file_digest() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = Registry::open(dir.path(), "build", "state.json").unwrap();
        let out = reg.output("a.o");
        assert!(reg.needs_rebuild(out).unwrap());
        fs::write(dir.path().join("a.o"), "object").unwrap();
        reg.mark_rebuilt(out).unwrap();
        assert_eq!(reg.persisted_digest(out), Some(&Digest::of_bytes(b"object")));
        assert_eq!(
            reg.snapshot().paths["a.o"].digest,
            Some(Digest::of_bytes(b"object"))
        );
    }
}
