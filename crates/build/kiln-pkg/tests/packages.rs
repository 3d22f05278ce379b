//! End-to-end package builds driven by a recording command runner.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use kiln_core::{BuildError, CommandEnv, CommandRunner};
use kiln_pkg::{
    BuildMode, CleanPolicy, PackageBuilder, PackageDescriptor, Revision, SharedCache,
    SourceAcquisition,
};

/// Records every executed command; fails those containing `fail_on`.
#[derive(Default)]
struct Recorder {
    commands: Mutex<Vec<String>>,
    fail_on: Mutex<Option<String>>,
}

impl Recorder {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.commands.lock().unwrap())
    }

    fn fail_on(&self, pattern: Option<&str>) {
        *self.fail_on.lock().unwrap() = pattern.map(str::to_string);
    }
}

impl CommandRunner for Recorder {
    fn execute(&self, argv: &[String], _: &Path, _: &CommandEnv) -> Result<()> {
        let line = argv.join(" ");
        self.commands.lock().unwrap().push(line.clone());
        if let Some(pattern) = &*self.fail_on.lock().unwrap() {
            if line.contains(pattern.as_str()) {
                anyhow::bail!(BuildError::CommandFailed {
                    command: argv[0].clone(),
                    code: 2,
                });
            }
        }
        Ok(())
    }

    fn capture(&self, _: &[String], _: &Path, _: &CommandEnv) -> Result<String> {
        Ok(String::new())
    }
}

struct Project {
    _dir: tempfile::TempDir,
    root: PathBuf,
    runner: Arc<Recorder>,
}

impl Project {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        Self {
            _dir: dir,
            root,
            runner: Arc::new(Recorder::default()),
        }
    }

    fn builder(&self) -> PackageBuilder {
        PackageBuilder::new(self.root.join("vendor"), &self.root, self.runner.clone())
    }

    fn package(&self, id: &str, version: &str, deps: &[&str]) -> PackageDescriptor {
        let path = Path::new("third_party").join(id);
        fs::create_dir_all(self.root.join(&path)).unwrap();
        PackageDescriptor {
            id: id.into(),
            version: version.into(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            clean: CleanPolicy::Full,
            source: SourceAcquisition::Local { path },
            env: Default::default(),
            in_tree: false,
            configure: vec![vec!["cmake".into(), format!("-DPKG={id}")]],
            build: vec![
                vec!["ninja".into(), format!("{id}-all")],
                vec!["ninja".into(), "install".into()],
            ],
        }
    }

    fn revision(&self, id: &str) -> Option<Revision> {
        Revision::read(&self.root.join("vendor").join(id).join("revision")).unwrap()
    }
}

#[test]
fn version_bump_rebuilds() {
    let project = Project::new();
    let builder = project.builder();

    let v1 = project.package("llvm", "v1", &[]);
    let check = builder.check_outdated(&v1).unwrap();
    assert!(check.outdated);
    builder.build(&v1, &check).unwrap();
    let r1 = project.revision("llvm").unwrap();
    assert_eq!(project.runner.take(), ["cmake -DPKG=llvm", "ninja llvm-all", "ninja install"]);

    let check = builder.check_outdated(&v1).unwrap();
    assert!(!check.outdated);
    assert!(!builder.build(&v1, &check).unwrap());
    assert!(project.runner.take().is_empty());
    assert_eq!(project.revision("llvm"), Some(r1.clone()));

    let v2 = project.package("llvm", "v2", &[]);
    let check = builder.check_outdated(&v2).unwrap();
    assert!(check.outdated);
    builder.build(&v2, &check).unwrap();
    assert_eq!(project.runner.take(), ["cmake -DPKG=llvm", "ninja llvm-all", "ninja install"]);
    let r2 = project.revision("llvm").unwrap();
    assert_ne!(r1, r2);
    assert_eq!(r2.version, "v2");
}

#[test]
fn failed_build_stays_outdated() {
    let project = Project::new();
    let builder = project.builder();
    let pkg = project.package("rust", "1.0", &[]);
    builder.run(&pkg, BuildMode::Build).unwrap();
    project.runner.take();

    let bumped = project.package("rust", "1.1", &[]);
    project.runner.fail_on(Some("ninja install"));
    let err = builder.run(&bumped, BuildMode::Build).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::CommandFailed { code: 2, .. })
    ));
    assert!(project.revision("rust").is_none());
    assert!(project.root.join("vendor/rust/configured").exists());

    project.runner.fail_on(None);
    project.runner.take();
    let check = builder.check_outdated(&bumped).unwrap();
    assert!(check.outdated);
    builder.build(&bumped, &check).unwrap();
    assert_eq!(project.runner.take(), ["cmake -DPKG=rust", "ninja rust-all", "ninja install"]);
}

#[test]
fn failure_right_after_check_keeps_package_dirty() {
    let project = Project::new();
    let builder = project.builder();
    let pkg = project.package("rust", "1.0", &[]);
    builder.run(&pkg, BuildMode::Build).unwrap();

    let check = builder.check_outdated(&pkg).unwrap();
    assert!(!check.outdated);
    // Process dies here, before `build` commits.
    drop(check);

    assert!(builder.check_outdated(&pkg).unwrap().outdated);
}

#[test]
fn dependency_rebuild_invalidates_dependents() {
    let project = Project::new();
    let builder = project.builder();
    let binutils = project.package("binutils", "2.25", &[]);
    let newlib = project.package("newlib", "avery", &["binutils"]);
    builder.run(&binutils, BuildMode::Build).unwrap();
    builder.run(&newlib, BuildMode::Build).unwrap();
    project.runner.take();

    builder.run(&binutils, BuildMode::Build).unwrap();
    assert!(!builder.check_outdated(&newlib).unwrap().outdated);

    let bumped = project.package("binutils", "2.26", &[]);
    builder.run(&bumped, BuildMode::Build).unwrap();
    let check = builder.check_outdated(&newlib).unwrap();
    assert!(check.outdated);
}

#[test]
fn keep_configure_policy_skips_configure() {
    let project = Project::new();
    let builder = project.builder();
    let mut pkg = project.package("llvm", "v1", &[]);
    pkg.clean = CleanPolicy::KeepConfigure;
    builder.run(&pkg, BuildMode::Build).unwrap();
    project.runner.take();

    pkg.version = "v2".into();
    builder.run(&pkg, BuildMode::Build).unwrap();
    assert_eq!(project.runner.take(), ["ninja llvm-all", "ninja install"]);
}

#[test]
fn shared_cache_short_circuits_build() {
    let cache_dir = tempfile::tempdir().unwrap();
    let cache = SharedCache::new(cache_dir.path());

    let first = Project::new();
    let pkg = first.package("llvm", "v1", &[]);
    let builder = first.builder().with_shared_cache(cache.clone());
    builder.run(&pkg, BuildMode::Build).unwrap();
    assert_eq!(first.runner.take().len(), 3);

    let second = Project::new();
    let pkg = second.package("llvm", "v1", &[]);
    assert!(second.builder().with_shared_cache(cache).run(&pkg, BuildMode::Build).unwrap());
    assert!(second.runner.take().is_empty());
    assert!(second.root.join("vendor/llvm/built").exists());
    assert!(second.root.join("vendor/llvm/install").is_dir());
    assert_eq!(second.revision("llvm"), first.revision("llvm"));
}
