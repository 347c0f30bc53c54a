//! Test module organization
//!
//! This module re-exports test helpers for use in test files.

#[allow(dead_code)]
mod helpers;

#[allow(unused_imports)]
pub use helpers::*;
