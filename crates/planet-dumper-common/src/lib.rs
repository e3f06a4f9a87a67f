//! planet-dumper-common: shared types and the error taxonomy.
//!
//! - **Errors**: [`Error`] covers every failure category of a dump run and
//!   maps each one to an [`ExitCode`].
//! - **Types**: [`SequenceNumber`], [`CleanupMode`], [`StageKind`] and the
//!   [`DumpMetadata`] record published with every artifact.
//!
//! # Examples
//!
//! ```
//! use planet_dumper_common::{Error, ExitCode, StageKind};
//!
//! let err = Error::stage_failed(StageKind::Conversion, "planet-dump-ng", Some(2));
//! assert_eq!(err.exit_code(), ExitCode::PlanetDumpNgError);
//! ```

pub mod error;
pub mod types;

pub use error::{Error, ExitCode, Result};
pub use types::*;
