//! Core logic: types, parsing, graph construction, ordering, synthesis,
//! planning, and recording.

pub mod assembly;
pub mod codegen;
pub mod executor;
pub mod intrinsic;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod stack;
pub mod state;
pub mod types;
