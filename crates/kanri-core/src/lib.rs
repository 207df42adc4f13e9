//! Shared vocabulary for the kanri crates: branded identifiers.

pub mod ids;
