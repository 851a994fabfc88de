//! # swarm-jobs
//!
//! Research job processing for the swarm research queue.
//!
//! This crate provides:
//! - [`ResearchService`]: submit, inspect and cancel jobs
//! - [`JobWorker`]: N loops that claim jobs and run the searcher
//! - [`Scheduler`]: promotes due retries from the delayed set
//! - [`BackoffPolicy`]: capped exponential backoff with jitter
//! - Progress notifications via broadcast channels
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use swarm_agents::MockSearcher;
//! use swarm_db::Backends;
//! use swarm_jobs::{CreateJobRequest, ResearchService, WorkerBuilder, WorkerConfig};
//!
//! let backends = Backends::in_memory();
//! let service = ResearchService::from_backends(backends.clone());
//!
//! let handle = WorkerBuilder::from_backends(backends)
//!     .with_config(WorkerConfig::from_env())
//!     .with_searcher(Arc::new(MockSearcher::new()))
//!     .build()?
//!     .start();
//!
//! let id = service.submit(CreateJobRequest::new("climate change", 5)).await?;
//!
//! // Listen for events
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! // Graceful shutdown
//! handle.shutdown().await?;
//! ```

pub mod backoff;
pub mod retention;
pub mod scheduler;
pub mod service;
pub mod worker;

// Re-export core types
pub use swarm_core::*;

pub use backoff::BackoffPolicy;
pub use retention::RetentionSweep;
pub use scheduler::Scheduler;
pub use service::{ResearchService, ServiceStats};
pub use worker::{JobWorker, LoopOutcome, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle};
