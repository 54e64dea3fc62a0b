//! Common test utilities

#![allow(dead_code)]

pub mod scripted_registry;
pub mod test_fixtures;

pub use scripted_registry::{Reply, ScriptedRegistry};
pub use test_fixtures::*;
