//! Package descriptors as declared in the project manifest.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Everything needed to fetch, configure and install one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PackageDescriptor {
    /// Unique package id, also the name of its directory.
    pub id: String,
    /// Version label. Changing it invalidates the package and its dependents.
    pub version: String,
    /// Ids of packages that must be built first, in the order their revisions
    /// are chained.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// What an outdated package discards before rebuilding.
    #[serde(default)]
    pub clean: CleanPolicy,
    /// Where the sources come from.
    pub source: SourceAcquisition,
    /// Variables added to the clean build environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Configure and build inside the source tree instead of `build/`.
    #[serde(default)]
    pub in_tree: bool,
    /// Commands of the configure stage.
    #[serde(default)]
    pub configure: Vec<Vec<String>>,
    /// Commands of the build and install stage.
    #[serde(default)]
    pub build: Vec<Vec<String>>,
}

/// How much of a previous build an outdated package throws away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanPolicy {
    /// Wipe the configure state, build tree and prefix.
    #[default]
    Full,
    /// Keep a finished configure stage and only repeat the build stage.
    KeepConfigure,
}

/// Where a package's sources come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SourceAcquisition {
    /// A release tarball at `<url><name>-<version>.tar.<format>`.
    Archive {
        /// Base URL the tarball name is appended to.
        url: String,
        /// Tarball name, defaulting to the package id.
        #[serde(default)]
        name: Option<String>,
        /// Compression of the tarball.
        #[serde(default)]
        format: ArchiveFormat,
    },
    /// A git repository cloned into `src/`.
    Git {
        /// Clone URL.
        url: String,
        /// Branch to clone and track.
        #[serde(default = "default_branch")]
        branch: String,
    },
    /// A git submodule of the project, relative to the project root.
    Submodule {
        /// Submodule path.
        path: PathBuf,
    },
    /// A directory already present in the project.
    Local {
        /// Directory relative to the project root.
        path: PathBuf,
    },
}

fn default_branch() -> String {
    "master".to_string()
}

/// Tarball compression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    /// `.tar.gz`
    Gz,
    /// `.tar.bz2`
    #[default]
    Bz2,
    /// `.tar.xz`
    Xz,
}

impl ArchiveFormat {
    /// The file extension after `.tar.`.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Gz => "gz",
            Self::Bz2 => "bz2",
            Self::Xz => "xz",
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl PackageDescriptor {
    /// Reject descriptors that cannot be built.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            bail!("package id must not be empty");
        }
        if self.id.contains(['/', '\\']) || self.id == "." || self.id == ".." {
            bail!("package id `{}` must be a plain directory name", self.id);
        }
        if self.version.is_empty() {
            bail!("package `{}` has an empty version", self.id);
        }
        if self.dependencies.iter().any(|dep| *dep == self.id) {
            bail!("package `{}` depends on itself", self.id);
        }
        for (stage, commands) in [("configure", &self.configure), ("build", &self.build)] {
            if commands.iter().any(Vec::is_empty) {
                bail!("package `{}` has an empty {stage} command", self.id);
            }
        }
        Ok(())
    }

    /// The archive base name, for archive sources.
    pub fn archive_name(&self) -> Option<&str> {
        match &self.source {
            SourceAcquisition::Archive { name, .. } => {
                Some(name.as_deref().unwrap_or(&self.id))
            }
            _ => None,
        }
    }
}
