//! Content digests for files and caller-supplied tokens.
//!
//! Every digest is a lowercase hex SHA-256 string. Files are hashed by
//! content; non-file artifacts (a package version, a compiler identity) are
//! hashed from a token the caller provides.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

/// A hex-encoded SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Hash a byte slice.
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Hash a caller-supplied token such as a version string.
    pub fn of_token(token: &str) -> Self {
        Self::of_bytes(token.as_bytes())
    }

    /// Hash a sequence of parts in order, as if they were concatenated.
    pub fn of_parts<'a>(parts: impl IntoIterator<Item = &'a str>) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Hash a file's contents. An absent file has no digest.
    pub fn of_file(path: &Path) -> Result<Option<Self>> {
        match fs::read(path) {
            Ok(data) => Ok(Some(Self::of_bytes(&data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e)
                .with_context(|| format!("failed to read file for hashing: {}", path.display())),
        }
    }

    /// Wrap an already-computed hex string, e.g. one loaded from disk.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// The hex representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where an artifact's digest comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestSource {
    /// Hash the file's contents; absent files have no digest.
    File(PathBuf),
    /// Hash a fixed token supplied by the caller.
    Token(String),
}

impl DigestSource {
    /// Compute the current digest.
    pub fn digest(&self) -> Result<Option<Digest>> {
        match self {
            Self::File(path) => Digest::of_file(path),
            Self::Token(token) => Ok(Some(Digest::of_token(token))),
        }
    }
}
