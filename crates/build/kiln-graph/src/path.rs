//! Artifact nodes and dependency edges.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use kiln_core::{Digest, DigestSource};
use serde::{Deserialize, Serialize};

use crate::discover::DependsGenerator;

/// Whether an artifact is a source or a build product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathKind {
    /// A leaf artifact, typically a source file.
    Input,
    /// An artifact produced by a build action.
    Output,
}

impl fmt::Display for PathKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// Handle to a path inside a [`Registry`](crate::Registry).
///
/// Handles are only meaningful for the registry that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathId(pub(crate) usize);

/// An edge to another path with a snapshot of its digest.
///
/// Comparing the snapshot with the target's live digest tells whether the
/// target changed since the edge was last trusted, without walking further
/// upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub(crate) target: PathId,
    pub(crate) snapshot: Option<Digest>,
}

impl Dependency {
    /// A fresh edge that has never been trusted.
    pub(crate) fn new(target: PathId) -> Self {
        Self {
            target,
            snapshot: None,
        }
    }

    /// The path this edge points to.
    pub fn target(&self) -> PathId {
        self.target
    }

    /// The digest recorded when the edge was last evaluated.
    pub fn snapshot(&self) -> Option<&Digest> {
        self.snapshot.as_ref()
    }
}

/// Per-artifact state for the current run.
pub(crate) struct Node {
    pub(crate) id: String,
    pub(crate) kind: PathKind,
    /// Location on disk, resolved against the registry root.
    pub(crate) file: PathBuf,
    pub(crate) source: DigestSource,
    /// Memoized live digest; the inner `None` means the file is absent.
    pub(crate) live: Option<Option<Digest>>,
    /// Digest committed by the previous run.
    pub(crate) persisted: Option<Digest>,
    /// `None` until the dependency list has been materialized.
    pub(crate) dependencies: Option<Vec<Dependency>>,
    /// Memoized staleness for this run.
    pub(crate) updated: Option<bool>,
    /// Set once an output is found stale, cleared when its action succeeds.
    /// Also set on inputs found changed in a run that failed.
    pub(crate) awaiting_rebuild: bool,
    /// Resolved by build logic during this run, not only loaded from state.
    pub(crate) touched: bool,
    pub(crate) generator: Option<Arc<dyn DependsGenerator>>,
}

impl Node {
    pub(crate) fn new(id: String, kind: PathKind, file: PathBuf) -> Self {
        Self {
            id,
            kind,
            source: DigestSource::File(file.clone()),
            file,
            live: None,
            persisted: None,
            dependencies: None,
            updated: None,
            awaiting_rebuild: false,
            touched: false,
            generator: None,
        }
    }

    /// The digest that should be written to the state file.
    pub(crate) fn committed_digest(&self) -> Option<Digest> {
        if self.awaiting_rebuild {
            return None;
        }
        self.live
            .clone()
            .flatten()
            .or_else(|| self.persisted.clone())
    }
}

/// Render a relative path as an artifact id, using `/` on every platform.
pub fn id_for(path: &Path) -> String {
    let mut id = String::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                if !id.is_empty() && !id.ends_with('/') {
                    id.push('/');
                }
                id.push_str(&part.to_string_lossy());
            }
            Component::ParentDir => {
                if !id.is_empty() && !id.ends_with('/') {
                    id.push('/');
                }
                id.push_str("..");
            }
            Component::CurDir => {}
            Component::RootDir => id.push('/'),
            Component::Prefix(prefix) => id.push_str(&prefix.as_os_str().to_string_lossy()),
        }
    }
    id
}
