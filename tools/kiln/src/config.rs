//! Project manifest (`kiln.toml`) loading and validation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail, ensure};
use kiln_pkg::PackageDescriptor;
use serde::Deserialize;

/// File name of the project manifest.
pub const MANIFEST: &str = "kiln.toml";

/// A parsed `kiln.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Global build settings.
    #[serde(default)]
    pub build: BuildSection,
    /// File rules, run in declaration order.
    #[serde(default, rename = "rule")]
    pub rules: Vec<RuleDef>,
    /// External packages, built before any rule.
    #[serde(default, rename = "package")]
    pub packages: Vec<PackageDescriptor>,
}

/// The `[build]` table.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BuildSection {
    /// Build directory, relative to the project root.
    #[serde(default = "default_dir")]
    pub dir: String,
    /// State file name inside the build directory.
    #[serde(default = "default_state")]
    pub state: String,
    /// Directory holding one subdirectory per package.
    #[serde(default = "default_packages")]
    pub packages: String,
    /// Parallelism substituted for `{jobs}`; 0 or absent means the CPU count.
    #[serde(default)]
    pub jobs: Option<usize>,
    /// Shared package cache directory.
    #[serde(default)]
    pub shared_cache: Option<PathBuf>,
    /// Dependency discovery command; the input id is appended.
    #[serde(default = "default_discover")]
    pub discover: Vec<String>,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            state: default_state(),
            packages: default_packages(),
            jobs: None,
            shared_cache: None,
            discover: default_discover(),
        }
    }
}

fn default_dir() -> String {
    "build".into()
}

fn default_state() -> String {
    "state.json".into()
}

fn default_packages() -> String {
    "vendor".into()
}

fn default_discover() -> Vec<String> {
    kiln_core::exec::argv(["clang++", "-MM", "-MT", "out"])
}

/// A `[[rule]]`: one output produced from a set of inputs.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDef {
    /// Output id, relative to the project root.
    pub output: String,
    /// Glob patterns, or the exact output id of an earlier rule.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Argv with `{output}`, `{input}` and `{inputs}` placeholders.
    pub command: Vec<String>,
    /// Discover header dependencies of every input.
    #[serde(default)]
    pub discover: bool,
}

impl Manifest {
    /// Read and validate `kiln.toml` from `root`.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(MANIFEST);
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let manifest = Self::parse(&text).with_context(|| format!("invalid {}", path.display()))?;
        Ok(manifest)
    }

    /// Parse and validate manifest text.
    pub fn parse(text: &str) -> Result<Self> {
        let manifest: Self = toml::from_str(text)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check referential integrity of packages and rules, and that packages
    /// form no dependency cycle.
    pub fn validate(&self) -> Result<()> {
        validate_build(&self.build)?;
        validate_packages(&self.packages)?;
        validate_rules(&self.rules)?;
        self.package_order()?;
        Ok(())
    }

    /// Packages ordered so that every dependency precedes its dependents.
    ///
    /// Independent packages keep their declaration order.
    pub fn package_order(&self) -> Result<Vec<&PackageDescriptor>> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for pkg in &self.packages {
            in_degree.insert(pkg.id.as_str(), pkg.dependencies.len());
            for dep in &pkg.dependencies {
                dependents.entry(dep.as_str()).or_default().push(pkg.id.as_str());
            }
        }

        // Kahn's algorithm, seeded in declaration order.
        let mut queue: VecDeque<&str> = self
            .packages
            .iter()
            .filter(|pkg| pkg.dependencies.is_empty())
            .map(|pkg| pkg.id.as_str())
            .collect();
        let mut sorted: Vec<&str> = Vec::new();
        while let Some(id) = queue.pop_front() {
            sorted.push(id);
            if let Some(next) = dependents.get(id) {
                for dependent in next {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(*dependent);
                        }
                    }
                }
            }
        }

        if sorted.len() != self.packages.len() {
            let stuck: Vec<&str> = self
                .packages
                .iter()
                .map(|pkg| pkg.id.as_str())
                .filter(|id| !sorted.contains(id))
                .collect();
            bail!("dependency cycle detected among packages: {}", stuck.join(", "));
        }

        let by_id: HashMap<&str, &PackageDescriptor> =
            self.packages.iter().map(|pkg| (pkg.id.as_str(), pkg)).collect();
        Ok(sorted.into_iter().filter_map(|id| by_id.get(id).copied()).collect())
    }

    /// Effective parallelism: `override_jobs`, then `[build] jobs`, then the
    /// CPU count.
    pub fn jobs(&self, override_jobs: Option<usize>) -> usize {
        match override_jobs.filter(|&n| n > 0).or(self.build.jobs) {
            None | Some(0) => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            Some(n) => n,
        }
    }

    /// The packages directory under `root`.
    pub fn packages_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.build.packages)
    }

    /// The shared cache directory, resolved against `root`.
    pub fn shared_cache_dir(&self, root: &Path) -> Option<PathBuf> {
        self.build.shared_cache.as_ref().map(|dir| root.join(dir))
    }
}

fn validate_build(build: &BuildSection) -> Result<()> {
    ensure!(!build.dir.is_empty(), "[build] dir must not be empty");
    ensure!(!build.state.is_empty(), "[build] state must not be empty");
    ensure!(!build.packages.is_empty(), "[build] packages must not be empty");
    ensure!(!build.discover.is_empty(), "[build] discover must name a program");
    Ok(())
}

fn validate_packages(packages: &[PackageDescriptor]) -> Result<()> {
    let mut seen = HashSet::new();
    for pkg in packages {
        ensure!(seen.insert(pkg.id.as_str()), "duplicate package '{}'", pkg.id);
        pkg.validate()?;
    }
    for pkg in packages {
        for dep in &pkg.dependencies {
            ensure!(
                seen.contains(dep.as_str()),
                "package '{}' depends on unknown package '{dep}'",
                pkg.id
            );
        }
    }
    Ok(())
}

fn validate_rules(rules: &[RuleDef]) -> Result<()> {
    let outputs: HashSet<&str> = rules.iter().map(|rule| rule.output.as_str()).collect();
    let mut earlier = HashSet::new();
    for rule in rules {
        ensure!(!rule.output.is_empty(), "rule has an empty output");
        ensure!(
            !rule.command.is_empty(),
            "rule '{}' has no command",
            rule.output
        );
        for input in &rule.inputs {
            if outputs.contains(input.as_str()) && !earlier.contains(input.as_str()) {
                bail!(
                    "rule '{}' uses '{input}', which must be declared before it",
                    rule.output
                );
            }
        }
        ensure!(
            earlier.insert(rule.output.as_str()),
            "duplicate rule output '{}'",
            rule.output
        );
    }
    Ok(())
}

/// Find the project root by walking up from the current directory until a
/// directory containing `kiln.toml` is found.
pub fn find_project_root() -> Result<PathBuf> {
    let dir = std::env::current_dir().context("failed to get current directory")?;
    find_project_root_from(dir)
}

/// Like [`find_project_root`], starting at `dir`.
pub fn find_project_root_from(mut dir: PathBuf) -> Result<PathBuf> {
    loop {
        if dir.join(MANIFEST).is_file() {
            return Ok(dir);
        }
        if !dir.pop() {
            bail!("could not find project root (no {MANIFEST} found)");
        }
    }
}
