//! WWAPI: the retrieval chatbot's infrastructure as a typed resource graph.
//!
//! Two stacks (backend and frontend) synthesize to a deterministic cloud
//! assembly. Applies are recorded in BLAKE3 state locks with a JSONL
//! provenance log, so plans, drift checks, and teardown work offline.

pub mod cli;
pub mod core;
pub mod error;
pub mod resources;
pub mod stacks;
pub mod tripwire;
