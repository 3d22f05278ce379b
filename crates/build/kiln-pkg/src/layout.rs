//! On-disk layout of a package directory.
//!
//! ```text
//! <packages>/<id>/
//!     src/ or <name>-<version>/   sources
//!     build/                      build tree (absent for in-tree builds)
//!     install/                    prefix
//!     configured                  checkpoint: configure stage finished
//!     built                       checkpoint: build stage finished
//!     revision                    revision record, see `revision`
//! ```

use std::path::{Path, PathBuf};

use crate::descriptor::{PackageDescriptor, SourceAcquisition};
use crate::revision::REVISION_FILE;

/// Resolved paths of one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageLayout {
    dir: PathBuf,
    src: PathBuf,
    build: PathBuf,
}

impl PackageLayout {
    /// Lay out `pkg` under `packages_dir`. Submodule and local sources resolve
    /// against the project `root`.
    pub fn new(packages_dir: &Path, root: &Path, pkg: &PackageDescriptor) -> Self {
        let dir = packages_dir.join(&pkg.id);
        let src = match &pkg.source {
            SourceAcquisition::Archive { name, .. } => {
                let name = name.as_deref().unwrap_or(&pkg.id);
                dir.join(format!("{name}-{}", pkg.version))
            }
            SourceAcquisition::Git { .. } => dir.join("src"),
            SourceAcquisition::Submodule { path } | SourceAcquisition::Local { path } => {
                root.join(path)
            }
        };
        let build = if pkg.in_tree { src.clone() } else { dir.join("build") };
        Self { dir, src, build }
    }

    /// The package directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The source tree.
    pub fn src(&self) -> &Path {
        &self.src
    }

    /// Where configure and build commands run.
    pub fn build_dir(&self) -> &Path {
        &self.build
    }

    /// Whether the build runs inside the source tree.
    pub fn in_tree(&self) -> bool {
        self.build == self.src
    }

    /// The install prefix.
    pub fn install(&self) -> PathBuf {
        self.dir.join("install")
    }

    /// Checkpoint written after the configure stage.
    pub fn configured_marker(&self) -> PathBuf {
        self.dir.join("configured")
    }

    /// Checkpoint written after the build stage.
    pub fn built_marker(&self) -> PathBuf {
        self.dir.join("built")
    }

    /// The revision record.
    pub fn revision_file(&self) -> PathBuf {
        self.dir.join(REVISION_FILE)
    }
}
