//! Shared type definitions for the statetape workspace.
//!
//! This crate holds the identifiers and scalar aliases that flow between the
//! log itself (`statetape-log`), the producers that feed it, and the engine
//! binary.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for log and producer identities

pub mod ids;

pub use ids::{LogId, ProducerId};

/// A discrete time index identifying a position in a tape.
///
/// Steps are unsigned, so the "negative step" class of malformed input is
/// unrepresentable.
pub type Step = u64;
