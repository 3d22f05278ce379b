//! Kiln build driver.
//!
//! Builds the external packages declared in `kiln.toml` (each staged,
//! checkpointed and revision-chained to its dependencies), then runs the
//! file rules through the incremental engine so only stale outputs are
//! recreated.
//!
//! Pipeline: load kiln.toml → validate → order packages → build packages →
//!           open state → process rules → save state.

mod cli;
mod config;
mod rules;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use config::Manifest;
use kiln_core::{CommandRunner, ProcessRunner, dprintln};
use kiln_graph::Registry;
use kiln_pkg::{BuildMode, PackageBuilder, SharedCache};

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    kiln_core::verbose::init(cli.quiet, cli.verbose);

    match cli.command {
        cli::Command::Build => cmd_build(&cli),
        cli::Command::Deps(ref args) => cmd_deps(&cli, args),
        cli::Command::Clean(ref args) => cmd_clean(args),
        cli::Command::Status => cmd_status(&cli),
    }
}

/// Load the manifest of the enclosing project.
fn load_project() -> Result<(std::path::PathBuf, Manifest)> {
    let root = config::find_project_root()?;
    let manifest = Manifest::load(&root)?;
    Ok((root, manifest))
}

fn runner() -> Arc<dyn CommandRunner> {
    Arc::new(ProcessRunner)
}

fn package_builder(
    cli: &cli::Cli,
    root: &Path,
    manifest: &Manifest,
    runner: Arc<dyn CommandRunner>,
) -> PackageBuilder {
    let builder = PackageBuilder::new(manifest.packages_dir(root), root, runner)
        .with_jobs(manifest.jobs(cli.jobs));
    match manifest.shared_cache_dir(root) {
        Some(dir) => builder.with_shared_cache(SharedCache::new(dir)),
        None => builder,
    }
}

/// Run `mode` over every package, dependencies first, counting the packages
/// it changed.
fn run_packages(
    cli: &cli::Cli,
    root: &Path,
    manifest: &Manifest,
    runner: Arc<dyn CommandRunner>,
    mode: BuildMode,
) -> Result<usize> {
    let builder = package_builder(cli, root, manifest, runner);
    let mut changed = 0;
    for pkg in manifest.package_order()? {
        if builder.run(pkg, mode)? {
            changed += 1;
        }
    }
    Ok(changed)
}

fn cmd_build(cli: &cli::Cli) -> Result<()> {
    let start = Instant::now();
    let (root, manifest) = load_project()?;
    let runner = runner();

    let packages = run_packages(cli, &root, &manifest, runner.clone(), BuildMode::Build)?;

    let mut registry = Registry::open(&root, &manifest.build.dir, &manifest.build.state)?;
    let summary = registry.run(|reg| rules::build_rules(reg, &manifest, &runner))?;

    println!(
        "Finished in {:.2}s: {} package(s) and {} output(s) rebuilt, {} up to date",
        start.elapsed().as_secs_f64(),
        packages,
        summary.rebuilt,
        summary.fresh,
    );
    Ok(())
}

fn cmd_deps(cli: &cli::Cli, args: &cli::DepsArgs) -> Result<()> {
    let (root, manifest) = load_project()?;
    if manifest.packages.is_empty() {
        println!("No packages declared in {}.", config::MANIFEST);
        return Ok(());
    }
    let mode = if args.update { BuildMode::Update } else { BuildMode::Build };
    let changed = run_packages(cli, &root, &manifest, runner(), mode)?;
    if args.update {
        println!("{changed} package source(s) moved; run `kiln deps` to rebuild.");
    } else {
        println!("{changed} package(s) rebuilt, {} up to date.", manifest.packages.len() - changed);
    }
    Ok(())
}

fn cmd_clean(args: &cli::CleanArgs) -> Result<()> {
    let (root, manifest) = load_project()?;
    if args.packages {
        let builder = PackageBuilder::new(manifest.packages_dir(&root), &root, runner());
        for pkg in manifest.package_order()? {
            dprintln!("Cleaning {}", pkg.id);
            builder.run(pkg, BuildMode::Clean)?;
        }
    }

    let build_dir = root.join(&manifest.build.dir);
    if build_dir.exists() {
        std::fs::remove_dir_all(&build_dir)?;
        println!("Removed {}", build_dir.display());
    } else if !args.packages {
        println!("Nothing to clean.");
    }
    Ok(())
}

fn cmd_status(cli: &cli::Cli) -> Result<()> {
    let (root, manifest) = load_project()?;
    let builder = package_builder(cli, &root, &manifest, runner());

    for pkg in manifest.package_order()? {
        let status = builder.status(pkg)?;
        let mut stages = Vec::new();
        if status.checkpoints.configured {
            stages.push("configured");
        }
        if status.checkpoints.built {
            stages.push("built");
        }
        if stages.is_empty() {
            println!("{:<20} {}", pkg.id, status.state);
        } else {
            println!("{:<20} {} ({})", pkg.id, status.state, stages.join(", "));
        }
    }

    let mut registry = Registry::open(&root, &manifest.build.dir, &manifest.build.state)?;
    let stale = rules::stale_rules(&mut registry, &manifest)?;
    if stale.is_empty() {
        println!("All {} output(s) up to date.", manifest.rules.len());
    } else {
        for output in &stale {
            println!("stale: {output}");
        }
    }
    Ok(())
}
