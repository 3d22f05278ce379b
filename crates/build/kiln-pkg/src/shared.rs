//! Shared cache of installed packages.
//!
//! Finished prefixes are published under `<dir>/<id>/<revision>/` so other
//! checkouts (or CI jobs) with an identical revision chain can copy them in
//! instead of building.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use kiln_core::vprintln;

use crate::layout::PackageLayout;
use crate::revision::{REVISION_FILE, Revision};
use crate::source::remove_dir;

/// A directory of published package installs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedCache {
    dir: PathBuf,
}

impl SharedCache {
    /// Use `dir` as the cache root.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The cache root.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry(&self, id: &str, revision: &Revision) -> PathBuf {
        self.dir.join(id).join(revision.hash.as_str())
    }

    /// Find a published install of `id` at exactly `revision`.
    pub fn lookup(&self, id: &str, revision: &Revision) -> Result<Option<PathBuf>> {
        let entry = self.entry(id, revision);
        if !entry.join("install").is_dir() {
            return Ok(None);
        }
        match Revision::read(&entry.join(REVISION_FILE))? {
            Some(recorded) if recorded == *revision => Ok(Some(entry)),
            _ => {
                vprintln!("  shared cache: ignoring incomplete entry {}", entry.display());
                Ok(None)
            }
        }
    }

    /// Replace the prefix of a package with a published one.
    pub fn restore(&self, entry: &Path, layout: &PackageLayout) -> Result<()> {
        vprintln!("  shared cache: restoring {}", entry.display());
        remove_dir(&layout.install())?;
        copy_dir_recursive(&entry.join("install"), &layout.install())
    }

    /// Publish the prefix of a freshly built package.
    ///
    /// The entry is staged next to its final location and renamed into place,
    /// so readers never see a partial install. Existing entries are kept.
    pub fn publish(&self, id: &str, revision: &Revision, layout: &PackageLayout) -> Result<()> {
        let entry = self.entry(id, revision);
        if entry.exists() {
            return Ok(());
        }
        let parent = self.dir.join(id);
        let staging = parent.join(format!(".tmp-{}", revision.hash));
        remove_dir(&staging)?;

        copy_dir_recursive(&layout.install(), &staging.join("install"))?;
        revision.write(&staging.join(REVISION_FILE))?;
        fs::rename(&staging, &entry)
            .with_context(|| format!("failed to publish {} to the shared cache", entry.display()))?;
        vprintln!("  shared cache: published {}", entry.display());
        Ok(())
    }
}

/// Recursively copy a directory, recreating symlinks on unix.
fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("failed to create {}", dst.display()))?;
    for entry in fs::read_dir(src).with_context(|| format!("failed to read {}", src.display()))? {
        let entry = entry?;
        let ty = entry.file_type()?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if ty.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else if ty.is_symlink() {
            copy_symlink(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)
                .with_context(|| format!("failed to copy {}", src_path.display()))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let target = fs::read_link(src)?;
    std::os::unix::fs::symlink(&target, dst)
        .with_context(|| format!("failed to link {}", dst.display()))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst).with_context(|| format!("failed to copy {}", src.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{CleanPolicy, PackageDescriptor, SourceAcquisition};

    fn layout(dir: &Path) -> PackageLayout {
        let pkg = PackageDescriptor {
            id: "rust".into(),
            version: "1.0".into(),
            dependencies: Vec::new(),
            clean: CleanPolicy::Full,
            source: SourceAcquisition::Local { path: "rust".into() },
            env: Default::default(),
            in_tree: false,
            configure: Vec::new(),
            build: Vec::new(),
        };
        PackageLayout::new(&dir.join("vendor"), dir, &pkg)
    }

    #[test]
    fn publish_then_restore() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SharedCache::new(dir.path().join("cache"));
        let revision = Revision::chain("1.0", []);

        let built = layout(&dir.path().join("a"));
        fs::create_dir_all(built.install().join("bin")).unwrap();
        fs::write(built.install().join("bin/rustc"), "elf").unwrap();
        cache.publish("rust", &revision, &built).unwrap();

        let entry = cache.lookup("rust", &revision).unwrap().unwrap();
        let fresh = layout(&dir.path().join("b"));
        cache.restore(&entry, &fresh).unwrap();
        assert_eq!(fs::read_to_string(fresh.install().join("bin/rustc")).unwrap(), "elf");
    }

    #[test]
    fn other_revisions_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SharedCache::new(dir.path().join("cache"));
        let built = layout(dir.path());
        fs::create_dir_all(built.install()).unwrap();
        cache.publish("rust", &Revision::chain("1.0", []), &built).unwrap();

        assert!(cache.lookup("rust", &Revision::chain("1.1", [])).unwrap().is_none());
        assert!(cache.lookup("cargo", &Revision::chain("1.0", [])).unwrap().is_none());
    }

    #[test]
    fn entry_without_record_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SharedCache::new(dir.path());
        let revision = Revision::chain("1.0", []);
        let entry = dir.path().join("rust").join(revision.hash.as_str());
        fs::create_dir_all(entry.join("install")).unwrap();
        assert!(cache.lookup("rust", &revision).unwrap().is_none());
    }
}
