//! Wiring of `[[rule]]` entries into the file-level engine.

use std::sync::Arc;

use anyhow::Result;
use kiln_core::{CommandEnv, CommandRunner, vprintln};
use kiln_graph::{CompilerDiscoverer, FileSet, PathKind, Registry};

use crate::config::{Manifest, RuleDef};

/// Counts from one pass over the rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleSummary {
    /// Outputs whose command ran.
    pub rebuilt: usize,
    /// Outputs that were already up to date.
    pub fresh: usize,
}

/// Bring every rule output up to date, in declaration order.
pub fn build_rules(
    registry: &mut Registry,
    manifest: &Manifest,
    runner: &Arc<dyn CommandRunner>,
) -> Result<RuleSummary> {
    let discoverer = Arc::new(CompilerDiscoverer::new(
        manifest.build.discover.clone(),
        registry.root(),
        runner.clone(),
    ));
    let root = registry.root().to_path_buf();
    registry.ignore_dir(manifest.packages_dir(&root));

    let mut summary = RuleSummary::default();
    for rule in &manifest.rules {
        let inputs = resolve_inputs(registry, manifest, rule)?;
        if rule.discover {
            for path in inputs.iter() {
                if registry.kind(path) == PathKind::Input {
                    registry.set_generator(path, discoverer.clone());
                }
            }
        }
        let ids = inputs.ids(registry);
        if ids.is_empty() {
            vprintln!("  rule {}: no inputs matched", rule.output);
        }

        let ran = registry.process(&rule.output, &ids, |output, inputs| {
            let argv = expand_command(&rule.command, output, inputs);
            runner.execute(&argv, &root, &CommandEnv::inherit())
        })?;
        if ran {
            summary.rebuilt += 1;
        } else {
            summary.fresh += 1;
        }
    }
    Ok(summary)
}

/// Outputs a build would recreate, without running anything.
///
/// Dependency discovery is not run, so an input whose content changed
/// reports only its own change. The registry must not be saved afterwards.
pub fn stale_rules(registry: &mut Registry, manifest: &Manifest) -> Result<Vec<String>> {
    let packages_dir = manifest.packages_dir(registry.root());
    registry.ignore_dir(packages_dir);
    let mut stale = Vec::new();
    for rule in &manifest.rules {
        let inputs = resolve_inputs(registry, manifest, rule)?;
        let targets: Vec<_> = inputs.iter().collect();
        let output = registry.output(&rule.output);
        registry.set_dependencies(output, &targets)?;
        if registry.needs_rebuild(output)? {
            stale.push(rule.output.clone());
        }
    }
    Ok(stale)
}

/// Register the inputs of `rule`.
///
/// An input naming another rule's output is used as is; everything else is a
/// glob pattern over the project.
fn resolve_inputs(
    registry: &mut Registry,
    manifest: &Manifest,
    rule: &RuleDef,
) -> Result<FileSet> {
    let mut set = FileSet::new();
    let mut patterns = Vec::new();
    for input in &rule.inputs {
        if manifest.rules.iter().any(|other| other.output == *input) {
            set.add(registry.input(input));
        } else {
            patterns.push(input.as_str());
        }
    }
    if !patterns.is_empty() {
        for path in FileSet::glob(registry, &patterns)?.iter() {
            set.add(path);
        }
    }
    Ok(set)
}

/// Substitute placeholders in a rule command.
///
/// An argument that is exactly `{inputs}` expands to one argument per input;
/// elsewhere `{inputs}` joins them with spaces. `{input}` is the first input.
pub fn expand_command(command: &[String], output: &str, inputs: &[String]) -> Vec<String> {
    let first = inputs.first().map_or("", String::as_str);
    let joined = inputs.join(" ");
    let mut argv = Vec::with_capacity(command.len() + inputs.len());
    for arg in command {
        if arg == "{inputs}" {
            argv.extend(inputs.iter().cloned());
            continue;
        }
        argv.push(
            arg.replace("{output}", output)
                .replace("{inputs}", &joined)
                .replace("{input}", first),
        );
    }
    argv
}
