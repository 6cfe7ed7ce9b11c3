//! Tripwire: provenance tracing, BLAKE3 hashing, drift detection.

pub mod drift;
pub mod eventlog;
pub mod hasher;
