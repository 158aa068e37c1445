//! FlexAGE assessment workflow.
//!
//! Students submit work against entries, an evaluator scores each submission
//! in the background, and a per-(student, entry) lifecycle tracks where the
//! pair stands.

pub mod access;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod evaluator;
pub mod gemini;
pub mod lifecycle;
pub mod model;
pub mod runner;
pub mod store;
