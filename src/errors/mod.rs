//! # Error Handling
//!
//! Error taxonomy for the albkeeper reconciliation engine.
//!
//! Errors fall into four classes that drive control flow:
//! - *not found* conditions (no matching certificate, no stack) are handled locally
//! - *transient provider errors* are collected into the per-pass problem list
//! - *configuration errors* skip a single endpoint or stack
//! - *unexpected faults* are contained at the pass boundary by the driver

pub mod types;

pub use types::{ControllerError, Result};
