//! The build orchestrator.

use std::fs;

use anyhow::{Context, Result};
use kiln_core::dprintln;

use crate::registry::Registry;

impl Registry {
    /// Bring `output` up to date with respect to `inputs`.
    ///
    /// Runs `action(output, inputs)` only when the output is stale, then
    /// commits the digest of the file it produced. Returns whether the action
    /// ran. An error from the action aborts the run and leaves the output
    /// stale.
    ///
    /// Call this at most once per output per run: a second call re-runs the
    /// action because staleness is not re-derived within a run.
    pub fn process<F>(&mut self, output: &str, inputs: &[String], action: F) -> Result<bool>
    where
        F: FnOnce(&str, &[String]) -> Result<()>,
    {
        let targets: Vec<_> = inputs.iter().map(|id| self.input(id)).collect();
        let path = self.output(output);
        self.set_dependencies(path, &targets)?;

        if !self.needs_rebuild(path)? {
            return Ok(false);
        }

        dprintln!("Creating {output}");
        if let Some(dir) = self.file(path).parent() {
            fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        }
        action(output, inputs).with_context(|| format!("failed to create {output}"))?;
        self.mark_rebuilt(path)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::fs;

    use crate::registry::Registry;

    #[test]
    fn action_receives_ids() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.c"), "int main(){}").unwrap();
        let mut reg = Registry::open(dir.path(), "build", "state.json").unwrap();
        let root = dir.path().to_path_buf();

        let ran = reg
            .process("build/a.o", &["a.c".to_string()], |out, ins| {
                assert_eq!(out, "build/a.o");
                assert_eq!(ins, ["a.c".to_string()]);
                fs::write(root.join(out), "obj")?;
                Ok(())
            })
            .unwrap();
        assert!(ran);
        assert!(dir.path().join("build").is_dir());
    }

    #[test]
    fn failed_action_leaves_output_stale() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.c"), "int main(){}").unwrap();

        let mut reg = Registry::open(dir.path(), "build", "state.json").unwrap();
        let result = reg.run(|reg| {
            reg.process("a.o", &["a.c".to_string()], |_, _| anyhow::bail!("cc failed"))
        });
        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("failed to create a.o"));

        let calls = Cell::new(0);
        let mut reg = Registry::open(dir.path(), "build", "state.json").unwrap();
        let ran = reg
            .process("a.o", &["a.c".to_string()], |_, _| {
                calls.set(calls.get() + 1);
                fs::write(dir.path().join("a.o"), "obj")?;
                Ok(())
            })
            .unwrap();
        assert!(ran);
        assert_eq!(calls.get(), 1);
    }
}
