//! Builds of coarse external packages (toolchains, libraries) into private
//! prefixes.
//!
//! Each package gets its own directory holding its sources, build tree,
//! install prefix, stage checkpoints and revision record. A package's
//! revision chains its version with the revisions of the packages it depends
//! on, so rebuilding a dependency invalidates every dependent.
//!
//! The revision record is deleted before a build is attempted and written
//! back only once every stage has succeeded. A crash anywhere in between
//! leaves the package dirty for the next run.

pub mod builder;
pub mod descriptor;
pub mod layout;
pub mod revision;
pub mod shared;
pub mod source;
pub mod state;

pub use builder::{BuildMode, Outdated, PackageBuilder, PackageStatus};
pub use descriptor::{ArchiveFormat, CleanPolicy, PackageDescriptor, SourceAcquisition};
pub use layout::PackageLayout;
pub use revision::Revision;
pub use shared::SharedCache;
pub use state::{BuildPlan, Checkpoints, Lifecycle, PackageState, Wipe};
