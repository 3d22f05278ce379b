//! Staleness rules for input paths.

use anyhow::{Context, Result};
use kiln_core::vprintln;

use crate::path::{Dependency, PathId};
use crate::registry::Registry;
use crate::traversal::Traversal;

impl Registry {
    /// Whether an input changed since it was last committed.
    ///
    /// A new or modified input is always updated and has its dependency list
    /// regenerated. An unmodified input is updated only if one of its
    /// discovered dependencies moved.
    pub(crate) fn input_updated(
        &mut self,
        path: PathId,
        traversal: &mut Traversal,
    ) -> Result<bool> {
        if let Some(updated) = self.nodes[path.0].updated {
            return Ok(updated);
        }

        let live = self.digest(path)?;
        let node = &self.nodes[path.0];
        if node.persisted.is_none() || node.persisted != live {
            vprintln!("  {}: content changed", node.id);
            self.regenerate_dependencies(path)?;
            self.dependencies_updated_in(path, traversal)?;
            return Ok(true);
        }

        if self.nodes[path.0].dependencies.is_none() {
            self.regenerate_dependencies(path)?;
        }
        let updated = self.dependencies_updated_in(path, traversal)?;
        self.nodes[path.0].updated = Some(updated);
        Ok(updated)
    }

    /// Replace the dependency list of an input with freshly discovered edges.
    ///
    /// The input is marked updated before any discovered path is visited so
    /// that a query reaching it again through its own dependencies sees a
    /// settled answer.
    fn regenerate_dependencies(&mut self, path: PathId) -> Result<()> {
        let node = &mut self.nodes[path.0];
        node.persisted = None;
        node.updated = Some(true);
        node.dependencies = Some(Vec::new());

        let Some(generator) = node.generator.clone() else {
            return Ok(());
        };
        let id = node.id.clone();
        let file = node.file.clone();

        let discovered = generator
            .generate(&id, &file)
            .with_context(|| format!("failed to discover dependencies of {id}"))?;
        vprintln!("  {id}: {} dependencies discovered", discovered.len());

        let mut edges = Vec::with_capacity(discovered.len());
        for dep in discovered.iter().filter(|dep| **dep != id) {
            let target = self.input(dep);
            if target != path && !edges.iter().any(|edge: &Dependency| edge.target == target) {
                edges.push(Dependency::new(target));
            }
        }
        self.nodes[path.0].dependencies = Some(edges);
        Ok(())
    }
}
