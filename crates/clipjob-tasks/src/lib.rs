//! External clip-generation task APIs.
//!
//! This crate provides:
//! - The [`TaskApi`] contract the orchestrator polls against
//! - Per-provider polling policies
//! - HTTP adapters for Klap (tasks and exports) and Submagic
//! - A registry mapping provider names to adapters

pub mod api;
pub mod error;
mod http;
pub mod klap;
pub mod submagic;

pub use api::{PollPolicy, TaskApi, TaskRegistry};
pub use error::{TaskApiError, TaskApiResult};
pub use klap::{KlapClient, KlapConfig, KlapExportApi};
pub use submagic::{SubmagicClient, SubmagicConfig};
