//! Typed builders for provider resources.
//!
//! Each builder returns a [`ResourceDecl`](crate::core::types::ResourceDecl)
//! or declares a group of related resources into a
//! [`Stack`](crate::core::stack::Stack).

pub mod container;
pub mod gateway;
pub mod iam;
pub mod lambda;
pub mod network;
pub mod parameter;
pub mod search;
pub mod storage;
