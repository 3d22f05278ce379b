//! Re-entrancy guard for staleness traversal.
//!
//! Every staleness query carries a [`Traversal`] recording which paths are
//! currently having their dependencies walked. Reaching one of them again
//! means the graph has a cycle, which is fatal.

use std::collections::HashSet;

use anyhow::{Result, bail};
use kiln_core::BuildError;

use crate::path::PathId;

/// The set of paths whose dependencies are being walked right now.
#[derive(Debug, Default)]
pub struct Traversal {
    in_progress: HashSet<PathId>,
}

impl Traversal {
    /// Start an empty traversal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` as in progress, failing if it already is.
    pub fn enter(&mut self, id: PathId, name: &str) -> Result<()> {
        if !self.in_progress.insert(id) {
            bail!(BuildError::CircularDependency {
                path: name.to_string(),
            });
        }
        Ok(())
    }

    /// Mark `id` as finished.
    pub fn leave(&mut self, id: PathId) {
        self.in_progress.remove(&id);
    }

    /// Whether `id` is currently being walked.
    pub fn is_active(&self, id: PathId) -> bool {
        self.in_progress.contains(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reentry_is_circular() {
        let mut tr = Traversal::new();
        tr.enter(PathId(0), "a.h").unwrap();
        tr.enter(PathId(1), "b.h").unwrap();
        let err = tr.enter(PathId(0), "a.h").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::CircularDependency { path }) if path == "a.h"
        ));
    }

    #[test]
    fn leave_allows_revisit() {
        let mut tr = Traversal::new();
        tr.enter(PathId(3), "x").unwrap();
        tr.leave(PathId(3));
        assert!(!tr.is_active(PathId(3)));
        tr.enter(PathId(3), "x").unwrap();
        assert!(tr.is_active(PathId(3)));
    }
}
