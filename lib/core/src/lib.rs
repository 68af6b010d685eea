//! Core identifiers and error handling for nodeflow.
//!
//! This crate provides the foundational types shared by the workflow engine
//! and the runner: ULID-backed identifiers and the rootcause `Result` alias.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ParseIdError, RunId, SubscriptionId, WorkflowId};
