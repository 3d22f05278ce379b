//! Staged, checkpointed package builds.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use kiln_core::{BuildError, CommandEnv, CommandRunner, dprintln, vprintln};

use crate::descriptor::PackageDescriptor;
use crate::layout::PackageLayout;
use crate::revision::{REVISION_FILE, Revision};
use crate::shared::SharedCache;
use crate::source::{self, UpdateOutcome, remove_dir};
use crate::state::{BuildPlan, Checkpoints, Lifecycle, PackageState, Wipe};

/// What a package operation should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Build whatever is out of date.
    Build,
    /// Remove build products and checkpoints without building.
    Clean,
    /// Update git checkouts, cleaning packages whose sources moved.
    Update,
}

/// Result of [`PackageBuilder::check_outdated`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outdated {
    /// Whether the committed revision differed from the current one.
    pub outdated: bool,
    /// The revision a successful build will commit.
    pub revision: Revision,
}

/// Non-mutating view of a package, for status reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageStatus {
    /// Committed when the revision record matches the current inputs.
    pub state: PackageState,
    /// Stage checkpoints present on disk.
    pub checkpoints: Checkpoints,
}

/// Builds packages under a shared packages directory.
pub struct PackageBuilder {
    packages_dir: PathBuf,
    root: PathBuf,
    runner: Arc<dyn CommandRunner>,
    shared: Option<SharedCache>,
    jobs: usize,
}

impl PackageBuilder {
    /// Build packages under `packages_dir` of the project at `root`.
    pub fn new(
        packages_dir: impl Into<PathBuf>,
        root: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            packages_dir: packages_dir.into(),
            root: root.into(),
            runner,
            shared: None,
            jobs: 1,
        }
    }

    /// Consult and feed a shared cache.
    #[must_use]
    pub fn with_shared_cache(mut self, cache: SharedCache) -> Self {
        self.shared = Some(cache);
        self
    }

    /// Value substituted for `{jobs}` in package commands.
    #[must_use]
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// The directory layout of `pkg`.
    pub fn layout(&self, pkg: &PackageDescriptor) -> PackageLayout {
        PackageLayout::new(&self.packages_dir, &self.root, pkg)
    }

    /// Chain the version of `pkg` with the committed revisions of its
    /// dependencies.
    ///
    /// Fails if a dependency has no revision record, which means it was not
    /// built first.
    pub fn compute_revision(&self, pkg: &PackageDescriptor) -> Result<Revision> {
        let mut dependencies = Vec::with_capacity(pkg.dependencies.len());
        for dep in &pkg.dependencies {
            let record = self.packages_dir.join(dep).join(REVISION_FILE);
            let Some(revision) = Revision::read(&record)? else {
                anyhow::bail!(BuildError::MissingRevision {
                    package: pkg.id.clone(),
                    dependency: dep.clone(),
                });
            };
            dependencies.push(revision);
        }
        Ok(Revision::chain(&pkg.version, &dependencies))
    }

    /// Decide whether `pkg` must be rebuilt.
    ///
    /// Deletes the revision record whatever the answer, so a failure before
    /// [`build`](Self::build) commits leaves the package dirty.
    pub fn check_outdated(&self, pkg: &PackageDescriptor) -> Result<Outdated> {
        let revision = self.compute_revision(pkg)?;
        let record = self.layout(pkg).revision_file();
        let committed = Revision::read(&record)?;
        Revision::remove(&record)?;

        let outdated = committed.as_ref() != Some(&revision);
        if outdated {
            vprintln!("  {}: revision changed", pkg.id);
        }
        Ok(Outdated { outdated, revision })
    }

    /// Run the stages `pkg` still needs and commit its revision.
    ///
    /// Returns whether anything was built or restored from the shared cache.
    pub fn build(&self, pkg: &PackageDescriptor, outdated: &Outdated) -> Result<bool> {
        let layout = self.layout(pkg);
        let mut lifecycle = Lifecycle::new(PackageState::Dirty);
        lifecycle.begin()?;

        let plan = BuildPlan::new(outdated.outdated, pkg.clean, Checkpoints::read(&layout));
        if plan.is_noop() {
            vprintln!("  {}: up to date", pkg.id);
            self.commit(&layout, &outdated.revision, &mut lifecycle)?;
            return Ok(false);
        }

        if let Some(cache) = &self.shared {
            if let Some(entry) = cache.lookup(&pkg.id, &outdated.revision)? {
                dprintln!("Restoring {} from the shared cache", pkg.id);
                self.wipe(&layout, Wipe::Everything)?;
                cache.restore(&entry, &layout)?;
                touch(&layout.configured_marker())?;
                touch(&layout.built_marker())?;
                self.commit(&layout, &outdated.revision, &mut lifecycle)?;
                return Ok(true);
            }
        }

        self.wipe(&layout, plan.wipe)?;
        dprintln!("Building {}", pkg.id);

        let install = layout.install();
        create_dir(&install)?;
        create_dir(layout.build_dir())?;
        let env = CommandEnv::clean().with_overrides(&pkg.env);

        if plan.configure {
            source::materialize(pkg, &layout, &self.root, self.runner.as_ref())?;
            self.run_stage(&layout, &pkg.configure, &env)
                .with_context(|| format!("failed to configure {}", pkg.id))?;
            touch(&layout.configured_marker())?;
        }

        if plan.build {
            self.run_stage(&layout, &pkg.build, &env)
                .with_context(|| format!("failed to build {}", pkg.id))?;
            touch(&layout.built_marker())?;
        }

        self.commit(&layout, &outdated.revision, &mut lifecycle)?;
        if let Some(cache) = &self.shared {
            cache.publish(&pkg.id, &outdated.revision, &layout)?;
        }
        Ok(true)
    }

    fn run_stage(
        &self,
        layout: &PackageLayout,
        commands: &[Vec<String>],
        env: &CommandEnv,
    ) -> Result<()> {
        let src = layout.src().to_string_lossy().into_owned();
        let prefix = layout.install().to_string_lossy().into_owned();
        let jobs = self.jobs.to_string();
        for command in commands {
            let argv: Vec<String> = command
                .iter()
                .map(|arg| {
                    arg.replace("{src}", &src)
                        .replace("{prefix}", &prefix)
                        .replace("{jobs}", &jobs)
                })
                .collect();
            self.runner.execute(&argv, layout.build_dir(), env)?;
        }
        Ok(())
    }

    fn commit(
        &self,
        layout: &PackageLayout,
        revision: &Revision,
        lifecycle: &mut Lifecycle,
    ) -> Result<()> {
        create_dir(layout.dir())?;
        revision.write(&layout.revision_file())?;
        lifecycle.commit()
    }

    fn wipe(&self, layout: &PackageLayout, wipe: Wipe) -> Result<()> {
        match wipe {
            Wipe::Nothing => Ok(()),
            Wipe::BuiltMarker => remove_file(&layout.built_marker()),
            Wipe::Everything => {
                remove_file(&layout.configured_marker())?;
                remove_file(&layout.built_marker())?;
                if !layout.in_tree() {
                    remove_dir(layout.build_dir())?;
                }
                remove_dir(&layout.install())
            }
        }
    }

    /// Remove the build products, checkpoints and revision of `pkg`.
    pub fn clean(&self, pkg: &PackageDescriptor) -> Result<()> {
        let layout = self.layout(pkg);
        vprintln!("  cleaning {}", pkg.id);
        self.wipe(&layout, Wipe::Everything)?;
        if layout.src().join("Cargo.toml").is_file() {
            remove_dir(&layout.src().join("target"))?;
        }
        source::clean(pkg, &layout)?;
        Revision::remove(&layout.revision_file())
    }

    /// Update the sources of `pkg`, cleaning it if they moved.
    pub fn update(&self, pkg: &PackageDescriptor) -> Result<UpdateOutcome> {
        let layout = self.layout(pkg);
        let outcome = source::update(pkg, &layout, self.runner.as_ref())?;
        if outcome == UpdateOutcome::Moved {
            dprintln!("Cleaning {}", pkg.id);
            self.clean(pkg)?;
        }
        Ok(outcome)
    }

    /// Apply `mode` to `pkg`.
    ///
    /// Returns whether `pkg` changed on disk: built, cleaned, or moved to a
    /// new upstream commit.
    pub fn run(&self, pkg: &PackageDescriptor, mode: BuildMode) -> Result<bool> {
        match mode {
            BuildMode::Build => {
                let outdated = self.check_outdated(pkg)?;
                self.build(pkg, &outdated)
            }
            BuildMode::Clean => self.clean(pkg).map(|()| true),
            BuildMode::Update => Ok(self.update(pkg)? == UpdateOutcome::Moved),
        }
    }

    /// Report the state of `pkg` without touching anything.
    pub fn status(&self, pkg: &PackageDescriptor) -> Result<PackageStatus> {
        let layout = self.layout(pkg);
        let checkpoints = Checkpoints::read(&layout);
        let current = match self.compute_revision(pkg) {
            Ok(revision) => Some(revision),
            Err(e)
                if matches!(
                    e.downcast_ref::<BuildError>(),
                    Some(BuildError::MissingRevision { .. })
                ) =>
            {
                None
            }
            Err(e) => return Err(e),
        };
        let committed = Revision::read(&layout.revision_file())?;
        let state = match (current, committed) {
            (Some(current), Some(committed)) if current == committed && checkpoints.built => {
                PackageState::Committed
            }
            _ => PackageState::Dirty,
        };
        Ok(PackageStatus { state, checkpoints })
    }
}

fn create_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))
}

fn touch(path: &Path) -> Result<()> {
    fs::write(path, "").with_context(|| format!("failed to write {}", path.display()))
}

fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{CleanPolicy, SourceAcquisition};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        commands: Mutex<Vec<(String, PathBuf)>>,
    }

    impl CommandRunner for Recorder {
        fn execute(&self, argv: &[String], cwd: &Path, _: &CommandEnv) -> Result<()> {
            self.commands.lock().unwrap().push((argv.join(" "), cwd.to_path_buf()));
            Ok(())
        }

        fn capture(&self, _: &[String], _: &Path, _: &CommandEnv) -> Result<String> {
            Ok(String::new())
        }
    }

    fn local(dir: &Path, id: &str, deps: &[&str]) -> PackageDescriptor {
        fs::create_dir_all(dir.join("third_party").join(id)).unwrap();
        PackageDescriptor {
            id: id.into(),
            version: "v1".into(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            clean: CleanPolicy::Full,
            source: SourceAcquisition::Local {
                path: Path::new("third_party").join(id),
            },
            env: Default::default(),
            in_tree: false,
            configure: vec![vec!["{src}/configure".into(), "--prefix={prefix}".into()]],
            build: vec![
                vec!["make".into(), "-j{jobs}".into()],
                vec!["make".into(), "install".into()],
            ],
        }
    }

    fn builder(dir: &Path, runner: &Arc<Recorder>) -> PackageBuilder {
        PackageBuilder::new(dir.join("vendor"), dir, runner.clone()).with_jobs(8)
    }

    #[test]
    fn placeholders_are_expanded() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(Recorder::default());
        let pkg = local(dir.path(), "binutils", &[]);
        builder(dir.path(), &runner).run(&pkg, BuildMode::Build).unwrap();

        let commands = runner.commands.lock().unwrap();
        let src = dir.path().join("third_party/binutils");
        let prefix = dir.path().join("vendor/binutils/install");
        assert_eq!(
            commands[0].0,
            format!("{}/configure --prefix={}", src.display(), prefix.display())
        );
        assert_eq!(commands[0].1, dir.path().join("vendor/binutils/build"));
        assert_eq!(commands[1].0, "make -j8");
    }

    #[test]
    fn missing_dependency_revision_is_an_ordering_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(Recorder::default());
        let pkg = local(dir.path(), "newlib", &["binutils"]);
        let err = builder(dir.path(), &runner).check_outdated(&pkg).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::MissingRevision { dependency, .. }) if dependency == "binutils"
        ));
    }

    #[test]
    fn status_does_not_invalidate() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(Recorder::default());
        let pkg = local(dir.path(), "binutils", &[]);
        let b = builder(dir.path(), &runner);
        assert_eq!(b.status(&pkg).unwrap().state, PackageState::Dirty);

        b.run(&pkg, BuildMode::Build).unwrap();
        assert_eq!(b.status(&pkg).unwrap().state, PackageState::Committed);
        assert_eq!(b.status(&pkg).unwrap().state, PackageState::Committed);
        assert!(b.layout(&pkg).revision_file().exists());
    }

    #[test]
    fn clean_removes_products() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(Recorder::default());
        let pkg = local(dir.path(), "binutils", &[]);
        let b = builder(dir.path(), &runner);
        b.run(&pkg, BuildMode::Build).unwrap();

        b.run(&pkg, BuildMode::Clean).unwrap();
        let layout = b.layout(&pkg);
        assert!(!layout.configured_marker().exists());
        assert!(!layout.built_marker().exists());
        assert!(!layout.install().exists());
        assert!(!layout.build_dir().exists());
        assert!(!layout.revision_file().exists());
        assert!(layout.src().exists());
    }

    #[test]
    fn clean_removes_cargo_target_dir() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(Recorder::default());
        let pkg = local(dir.path(), "cargo", &[]);
        let b = builder(dir.path(), &runner);
        let src = b.layout(&pkg).src().to_path_buf();
        fs::create_dir_all(src.join("target/release")).unwrap();
        fs::write(src.join("Cargo.toml"), "[package]\nname = \"cargo\"\n").unwrap();

        b.run(&pkg, BuildMode::Clean).unwrap();
        assert!(!src.join("target").exists());
        assert!(src.join("Cargo.toml").exists());
    }

    #[test]
    fn target_dir_without_manifest_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(Recorder::default());
        let pkg = local(dir.path(), "binutils", &[]);
        let b = builder(dir.path(), &runner);
        let src = b.layout(&pkg).src().to_path_buf();
        fs::create_dir_all(src.join("target")).unwrap();

        b.run(&pkg, BuildMode::Clean).unwrap();
        assert!(src.join("target").exists());
    }

    #[test]
    fn run_reports_whether_work_was_done() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(Recorder::default());
        let pkg = local(dir.path(), "binutils", &[]);
        let b = builder(dir.path(), &runner);
        assert!(b.run(&pkg, BuildMode::Build).unwrap());
        assert!(!b.run(&pkg, BuildMode::Build).unwrap());
        assert!(!b.run(&pkg, BuildMode::Update).unwrap());
        assert!(b.run(&pkg, BuildMode::Clean).unwrap());
    }

    #[test]
    fn update_ignores_non_git_sources() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(Recorder::default());
        let pkg = local(dir.path(), "binutils", &[]);
        let outcome = builder(dir.path(), &runner).update(&pkg).unwrap();
        assert_eq!(outcome, UpdateOutcome::Unchanged);
        assert!(runner.commands.lock().unwrap().is_empty());
    }
}
