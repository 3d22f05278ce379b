//! Fetching and updating package sources.

use std::fs::{self, File};
use std::path::Path;

use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use kiln_core::exec::argv;
use kiln_core::{BuildError, CommandEnv, CommandRunner, dprintln, vprintln};

use crate::descriptor::{ArchiveFormat, PackageDescriptor, SourceAcquisition};
use crate::layout::PackageLayout;

/// Result of updating a git checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The checked-out commit did not change, or there was nothing to update.
    Unchanged,
    /// The branch moved to a new commit.
    Moved,
}

/// Make the sources of `pkg` available at `layout.src()`.
pub fn materialize(
    pkg: &PackageDescriptor,
    layout: &PackageLayout,
    root: &Path,
    runner: &dyn CommandRunner,
) -> Result<()> {
    let env = CommandEnv::inherit();
    match &pkg.source {
        SourceAcquisition::Archive { url, format, .. } => {
            if layout.src().exists() {
                return Ok(());
            }
            let name = pkg.archive_name().unwrap_or(&pkg.id);
            let tarball = format!("{name}-{}.tar.{format}", pkg.version);
            let tarball_path = layout.dir().join(&tarball);
            fs::create_dir_all(layout.dir())
                .with_context(|| format!("failed to create {}", layout.dir().display()))?;
            if !tarball_path.exists() {
                let download = format!("{url}{tarball}");
                runner.execute(
                    &argv(["curl", "-fL", "-o", tarball.as_str(), download.as_str()]),
                    layout.dir(),
                    &env,
                )?;
            }
            unpack(&tarball_path, *format, layout.dir(), runner)?;
            if !layout.src().exists() {
                bail!(
                    "unpacked {tarball} but expected directory {} not found",
                    layout.src().display()
                );
            }
        }
        SourceAcquisition::Git { url, branch } => {
            if layout.src().join(".git").exists() {
                return Ok(());
            }
            fs::create_dir_all(layout.dir())
                .with_context(|| format!("failed to create {}", layout.dir().display()))?;
            let dest = layout.src().to_string_lossy().into_owned();
            runner.execute(
                &argv(["git", "clone", "-b", branch.as_str(), url.as_str(), dest.as_str()]),
                layout.dir(),
                &env,
            )?;
        }
        SourceAcquisition::Submodule { path } => {
            let path = path.to_string_lossy().into_owned();
            runner.execute(
                &argv(["git", "submodule", "update", "--init", path.as_str()]),
                root,
                &env,
            )?;
        }
        SourceAcquisition::Local { .. } => {
            if !layout.src().is_dir() {
                bail!(
                    "source directory {} of package `{}` does not exist",
                    layout.src().display(),
                    pkg.id
                );
            }
        }
    }
    Ok(())
}

/// Unpack a tarball into `dest`.
///
/// Gzip is handled in-process; bzip2 and xz go through the system `tar`.
fn unpack(
    tarball: &Path,
    format: ArchiveFormat,
    dest: &Path,
    runner: &dyn CommandRunner,
) -> Result<()> {
    match format {
        ArchiveFormat::Gz => {
            vprintln!("  unpacking {}", tarball.display());
            let file = File::open(tarball)
                .with_context(|| format!("failed to open {}", tarball.display()))?;
            let mut archive = tar::Archive::new(GzDecoder::new(file));
            archive
                .unpack(dest)
                .with_context(|| format!("extracting {}", tarball.display()))
        }
        ArchiveFormat::Bz2 | ArchiveFormat::Xz => {
            let flag = if format == ArchiveFormat::Bz2 { "-jxf" } else { "-Jxf" };
            let tarball = tarball.to_string_lossy().into_owned();
            runner.execute(&argv(["tar", flag, tarball.as_str()]), dest, &CommandEnv::inherit())
        }
    }
}

/// Remove sources that [`materialize`] can recreate unattended.
///
/// Only unpacked archives qualify; checkouts may hold local work.
pub fn clean(pkg: &PackageDescriptor, layout: &PackageLayout) -> Result<()> {
    if matches!(pkg.source, SourceAcquisition::Archive { .. }) {
        remove_dir(layout.src())?;
    }
    Ok(())
}

/// Bring a git checkout up to date with its upstream branch.
///
/// Refuses to touch a checkout whose `origin` is not the declared URL, that
/// has modified tracked files, or whose branch has diverged from
/// `origin/<branch>`. Non-git sources and missing checkouts are left alone.
pub fn update(
    pkg: &PackageDescriptor,
    layout: &PackageLayout,
    runner: &dyn CommandRunner,
) -> Result<UpdateOutcome> {
    let SourceAcquisition::Git { url, branch } = &pkg.source else {
        return Ok(UpdateOutcome::Unchanged);
    };
    let repo = layout.src();
    if !repo.join(".git").exists() {
        vprintln!("  {}: no checkout to update", pkg.id);
        return Ok(UpdateOutcome::Unchanged);
    }

    let env = CommandEnv::inherit();
    let git = |args: &[&str]| git_output(runner, repo, args);

    let remote = git(&["remote", "get-url", "origin"][..])?;
    if remote != *url && Some(&remote) != ssh_url(url).as_ref() {
        bail!(BuildError::RemoteMismatch {
            repo: repo.to_path_buf(),
            local: remote,
            required: url.clone(),
        });
    }
    if !git(&["status", "-uno", "--porcelain"][..])?.is_empty() {
        bail!(BuildError::DirtyCheckout {
            repo: repo.to_path_buf(),
        });
    }

    let upstream = format!("origin/{branch}");
    let local = git(&["rev-parse", branch.as_str()][..])?;
    if local != git(&["rev-parse", upstream.as_str()][..])? {
        bail!(BuildError::DivergedBranch {
            repo: repo.to_path_buf(),
            branch: branch.clone(),
        });
    }

    for args in [
        vec!["git", "fetch", "origin"],
        vec!["git", "checkout", branch.as_str()],
        vec!["git", "reset", "--hard", upstream.as_str()],
    ] {
        runner.execute(&argv(args), repo, &env)?;
    }

    if git(&["rev-parse", branch.as_str()][..])? == local {
        return Ok(UpdateOutcome::Unchanged);
    }
    dprintln!("Must rebuild {}", pkg.id);
    Ok(UpdateOutcome::Moved)
}

fn git_output(runner: &dyn CommandRunner, repo: &Path, args: &[&str]) -> Result<String> {
    let mut cmd = argv(["git"]);
    cmd.extend(args.iter().map(|arg| (*arg).to_string()));
    Ok(runner.capture(&cmd, repo, &CommandEnv::inherit())?.trim().to_string())
}

/// The SSH form of an HTTPS clone URL: `https://host/path` → `git@host:path`.
fn ssh_url(url: &str) -> Option<String> {
    let rest = url.strip_prefix("https://")?;
    Some(format!("git@{}", rest.replacen('/', ":", 1)))
}

pub(crate) fn remove_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        vprintln!("  removing {}", dir.display());
        fs::remove_dir_all(dir).with_context(|| format!("failed to remove {}", dir.display()))?;
    }
    Ok(())
}
