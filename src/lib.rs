//! planet-dumper: produce an OSM planet dump for a replication state and
//! publish it.
//!
//! This library crate exposes the pipeline for the binary and for
//! integration testing.

pub mod cli;
pub mod config;
pub mod notifications;
pub mod pipeline;
pub mod sequence;
pub mod storage;
pub mod upstream;
