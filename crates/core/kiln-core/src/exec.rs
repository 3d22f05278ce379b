//! External command execution.
//!
//! Commands are described as argv vectors and run through a [`CommandRunner`]
//! so the engines can be driven by a recording fake in tests. The
//! environment a command sees is built per invocation from a [`CommandEnv`];
//! the process environment itself is never modified.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

use anyhow::{Context, Result, bail};

use crate::error::BuildError;

/// Variables carried over from the parent process into a clean environment.
const PASSTHROUGH_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LOGNAME",
    "SHELL",
    "TERM",
    "TMPDIR",
    "TMP",
    "TEMP",
    "LANG",
    "LC_ALL",
    // Windows / MSYS2 essentials.
    "SYSTEMROOT",
    "COMSPEC",
    "PATHEXT",
    "WINDIR",
    "USERPROFILE",
    "APPDATA",
    "LOCALAPPDATA",
    "MSYSTEM",
];

/// The environment an external command runs with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandEnv {
    /// When set, the child starts from an empty environment.
    clear: bool,
    vars: BTreeMap<String, String>,
}

impl CommandEnv {
    /// Inherit the parent environment unchanged.
    pub fn inherit() -> Self {
        Self::default()
    }

    /// Start from an empty environment plus the passthrough whitelist.
    pub fn clean() -> Self {
        Self::clean_from(PASSTHROUGH_VARS.iter().filter_map(|&key| {
            std::env::var(key).ok().map(|value| (key.to_string(), value))
        }))
    }

    /// Start from an empty environment holding exactly `vars`.
    pub fn clean_from(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            clear: true,
            vars: vars.into_iter().collect(),
        }
    }

    /// Layer overrides on top, replacing existing values.
    #[must_use]
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, String>) -> Self {
        for (key, value) in overrides {
            self.vars.insert(key.clone(), value.clone());
        }
        self
    }

    /// Look up a variable that will be set explicitly for the child.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Whether the child starts from an empty environment.
    pub fn is_clean(&self) -> bool {
        self.clear
    }

    /// Apply this environment to a command about to be spawned.
    pub fn apply(&self, cmd: &mut Command) {
        if self.clear {
            cmd.env_clear();
        }
        cmd.envs(&self.vars);
    }
}

/// Runs external commands on behalf of the engines.
pub trait CommandRunner {
    /// Echo and run a command with its output passed through to the user.
    fn execute(&self, argv: &[String], cwd: &Path, env: &CommandEnv) -> Result<()>;

    /// Run a command quietly and return its standard output.
    fn capture(&self, argv: &[String], cwd: &Path, env: &CommandEnv) -> Result<String>;
}

/// [`CommandRunner`] that spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    fn command(argv: &[String], cwd: &Path, env: &CommandEnv) -> Result<Command> {
        let Some((program, args)) = argv.split_first() else {
            bail!("cannot run an empty command");
        };
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(cwd);
        env.apply(&mut cmd);
        Ok(cmd)
    }
}

impl CommandRunner for ProcessRunner {
    fn execute(&self, argv: &[String], cwd: &Path, env: &CommandEnv) -> Result<()> {
        let mut cmd = Self::command(argv, cwd, env)?;
        crate::dprintln!("{}", argv.join(" "));
        let status = cmd
            .stdin(Stdio::null())
            .status()
            .with_context(|| format!("failed to run `{}`", argv[0]))?;
        check_status(&argv[0], status)
    }

    fn capture(&self, argv: &[String], cwd: &Path, env: &CommandEnv) -> Result<String> {
        let mut cmd = Self::command(argv, cwd, env)?;
        crate::vprintln!("  capture: {}", argv.join(" "));
        let output = cmd
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .with_context(|| format!("failed to run `{}`", argv[0]))?;
        check_status(&argv[0], output.status)?;
        String::from_utf8(output.stdout)
            .with_context(|| format!("`{}` produced non-UTF-8 output", argv[0]))
    }
}

fn check_status(program: &str, status: ExitStatus) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    bail!(BuildError::CommandFailed {
        command: program.to_string(),
        code: status.code().unwrap_or(-1),
    })
}

/// Build an argv vector from string literals.
pub fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}
