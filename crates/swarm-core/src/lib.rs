//! # swarm-core
//!
//! Core types, traits, and abstractions for the swarm research job queue.
//!
//! This crate provides the data model (records, jobs, transitions), the
//! error taxonomy, and the capability traits that backends (`JobStore`,
//! `JobQueue`) and upstream sources (`Searcher`) implement.

pub mod defaults;
pub mod error;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result, SearchError};
pub use models::*;
pub use traits::*;
pub use uuid_utils::{extract_timestamp, is_v7, new_v7};
