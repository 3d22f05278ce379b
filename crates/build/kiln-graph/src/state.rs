//! On-disk form of the path registry.
//!
//! The state file is a JSON object mapping each artifact id to its last
//! committed digest, its kind, and the snapshot of its dependency edges:
//!
//! ```json
//! {
//!   "build/a.o": {
//!     "digest": "9f86…",
//!     "kind": "output",
//!     "dependencies": [{ "path": "a.c", "digest": "60303…" }]
//!   }
//! }
//! ```
//!
//! `dependencies` is omitted for paths whose dependency list was never
//! materialized, which is different from an empty list.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use kiln_core::{Digest, wprintln};
use serde::{Deserialize, Serialize};

use crate::path::PathKind;

/// Persisted record for a single artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRecord {
    /// Digest at the end of the last run, or `null` if none was committed.
    pub digest: Option<Digest>,
    /// Whether the artifact is a source or a build product.
    pub kind: PathKind,
    /// Dependency edges with their snapshot digests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<DependencyRecord>>,
}

/// Persisted dependency edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRecord {
    /// Id of the dependency target.
    pub path: String,
    /// The target's digest when the edge was last trusted.
    pub digest: Option<Digest>,
}

/// The full persisted registry, keyed by artifact id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateFile {
    /// Records by artifact id, sorted for stable output.
    pub paths: BTreeMap<String, PathRecord>,
}

impl StateFile {
    /// Load the state file.
    ///
    /// A missing file yields an empty state. A file that cannot be parsed is
    /// discarded with a warning, which makes every artifact look new.
    pub fn load(path: &Path) -> Result<Self> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read build state {}", path.display()));
            }
        };

        match serde_json::from_str(&data) {
            Ok(state) => Ok(state),
            Err(e) => {
                wprintln!("ignoring unreadable build state {}: {e}", path.display());
                Ok(Self::default())
            }
        }
    }

    /// Save the state file atomically (write to tmp, then rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = Path::new(&tmp_name);

        let json =
            serde_json::to_string_pretty(self).context("failed to serialize build state")?;
        fs::write(tmp_path, json).context("failed to write temporary build state")?;
        fs::rename(tmp_path, path).context("failed to atomically replace build state")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StateFile {
        let mut state = StateFile::default();
        state.paths.insert(
            "a.c".into(),
            PathRecord {
                digest: Some(Digest::from_hex("aa11")),
                kind: PathKind::Input,
                dependencies: Some(vec![DependencyRecord {
                    path: "a.h".into(),
                    digest: None,
                }]),
            },
        );
        state.paths.insert(
            "a.h".into(),
            PathRecord {
                digest: Some(Digest::from_hex("bb22")),
                kind: PathKind::Input,
                dependencies: None,
            },
        );
        state.paths.insert(
            "build/a.o".into(),
            PathRecord {
                digest: None,
                kind: PathKind::Output,
                dependencies: Some(vec![DependencyRecord {
                    path: "a.c".into(),
                    digest: Some(Digest::from_hex("aa11")),
                }]),
            },
        );
        state
    }

    #[test]
    fn missing_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateFile::load(&dir.path().join("state.json")).unwrap();
        assert!(state.paths.is_empty());
    }

    #[test]
    fn save_then_load_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build/state.json");
        let state = sample();
        state.save(&path).unwrap();
        assert_eq!(StateFile::load(&path).unwrap(), state);
        assert!(!dir.path().join("build/state.json.tmp").exists());
    }

    #[test]
    fn json_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["build/a.o"]["kind"], "output");
        assert!(json["build/a.o"]["digest"].is_null());
        assert_eq!(json["build/a.o"]["dependencies"][0]["path"], "a.c");
        assert_eq!(json["build/a.o"]["dependencies"][0]["digest"], "aa11");
        assert!(json["a.h"].get("dependencies").is_none());
    }

    #[test]
    fn corrupt_file_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(StateFile::load(&path).unwrap().paths.is_empty());
    }
}
