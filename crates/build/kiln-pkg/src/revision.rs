//! Package revision records.
//!
//! A revision identifies one exact build of a package: the digest of its
//! version followed by the revision digests of its dependencies, in declared
//! order. The record is a two-line text file holding the digest and the
//! version it was computed for.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result, bail};
use kiln_core::{BuildError, Digest};

/// File name of the revision record inside a package directory.
pub const REVISION_FILE: &str = "revision";

/// A committed package revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    /// Chained digest.
    pub hash: Digest,
    /// The package version the digest was computed for.
    pub version: String,
}

impl Revision {
    /// Chain `version` with the revisions of the dependencies, in order.
    pub fn chain<'a>(
        version: &'a str,
        dependencies: impl IntoIterator<Item = &'a Revision>,
    ) -> Self {
        let hashes = dependencies.into_iter().map(|rev| rev.hash.as_str());
        let parts = std::iter::once(version).chain(hashes);
        Self {
            hash: Digest::of_parts(parts),
            version: version.to_string(),
        }
    }

    /// Read a record. A missing file means no committed revision.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        Self::parse(&text, path).map(Some)
    }

    /// Parse the two-line record format.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let mut lines = text.lines();
        let (Some(hash), Some(version), None) = (lines.next(), lines.next(), lines.next()) else {
            bail!(BuildError::InvalidRevisionRecord {
                path: path.to_path_buf(),
            });
        };
        if hash.is_empty() || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            bail!(BuildError::InvalidRevisionRecord {
                path: path.to_path_buf(),
            });
        }
        Ok(Self {
            hash: Digest::from_hex(hash),
            version: version.to_string(),
        })
    }

    /// Write the record.
    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, format!("{}\n{}\n", self.hash, self.version))
            .with_context(|| format!("failed to write {}", path.display()))
    }

    /// Delete a record. Deleting a missing record is not an error.
    pub fn remove(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
        }
    }
}
