//! Package build state, independent of the filesystem.
//!
//! A package moves Dirty → Building → Committed. The files under the package
//! directory (checkpoints, revision record) are what persists this across
//! runs; the types here decide what to do with them.

use std::fmt;

use anyhow::{Result, bail};

use crate::descriptor::CleanPolicy;
use crate::layout::PackageLayout;

/// Where a package is in its build lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PackageState {
    /// No trusted revision record; the package must be built.
    #[default]
    Dirty,
    /// A build attempt is running.
    Building,
    /// The revision record matches the current inputs.
    Committed,
}

impl fmt::Display for PackageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dirty => f.write_str("dirty"),
            Self::Building => f.write_str("building"),
            Self::Committed => f.write_str("committed"),
        }
    }
}

/// Checked transitions between [`PackageState`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lifecycle {
    state: PackageState,
}

impl Lifecycle {
    /// Start in `state`.
    pub fn new(state: PackageState) -> Self {
        Self { state }
    }

    /// The current state.
    pub fn state(&self) -> PackageState {
        self.state
    }

    /// Drop any committed revision. Valid from every state.
    pub fn invalidate(&mut self) {
        self.state = PackageState::Dirty;
    }

    /// Start a build attempt.
    pub fn begin(&mut self) -> Result<()> {
        if self.state != PackageState::Dirty {
            bail!("cannot start a build from the {} state", self.state);
        }
        self.state = PackageState::Building;
        Ok(())
    }

    /// Finish a build attempt successfully.
    pub fn commit(&mut self) -> Result<()> {
        if self.state != PackageState::Building {
            bail!("cannot commit a build from the {} state", self.state);
        }
        self.state = PackageState::Committed;
        Ok(())
    }
}

/// Which stage checkpoints exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checkpoints {
    /// The configure stage finished.
    pub configured: bool,
    /// The build and install stage finished.
    pub built: bool,
}

impl Checkpoints {
    /// Look at the checkpoint files of a package.
    pub fn read(layout: &PackageLayout) -> Self {
        Self {
            configured: layout.configured_marker().exists(),
            built: layout.built_marker().exists(),
        }
    }
}

/// What to discard before running the stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wipe {
    /// Keep everything.
    Nothing,
    /// Forget that the build stage finished.
    BuiltMarker,
    /// Forget both stages and remove the build tree and prefix.
    Everything,
}

/// The work one build attempt has to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildPlan {
    /// State to discard first.
    pub wipe: Wipe,
    /// Run the configure stage.
    pub configure: bool,
    /// Run the build and install stage.
    pub build: bool,
}

impl BuildPlan {
    /// Decide the work for a package.
    ///
    /// An up-to-date package only resumes stages whose checkpoint is missing.
    /// An outdated one discards state according to `policy` and runs every
    /// stage that no longer has a checkpoint.
    pub fn new(outdated: bool, policy: CleanPolicy, checkpoints: Checkpoints) -> Self {
        let wipe = match (outdated, policy) {
            (false, _) => Wipe::Nothing,
            (true, CleanPolicy::Full) => Wipe::Everything,
            (true, CleanPolicy::KeepConfigure) => Wipe::BuiltMarker,
        };
        let (configured, built) = match wipe {
            Wipe::Nothing => (checkpoints.configured, checkpoints.built),
            Wipe::BuiltMarker => (checkpoints.configured, false),
            Wipe::Everything => (false, false),
        };
        Self {
            wipe,
            configure: !configured,
            build: !built,
        }
    }

    /// Whether the attempt has nothing to do.
    pub fn is_noop(&self) -> bool {
        self.wipe == Wipe::Nothing && !self.configure && !self.build
    }
}
