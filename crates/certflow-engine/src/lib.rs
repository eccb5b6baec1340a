//! Certflow Engine
//!
//! This crate schedules workflow runs onto the runtime interpreter.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                             │
//! │  - start_run(workflow, trigger) persists a Pending run      │
//! │  - recover_interrupted_runs / cleanup_runs housekeeping     │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Dispatcher                           │
//! │  - FIFO queue, bounded worker pool                          │
//! │  - one active run per workflow, cancel, shutdown            │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  RunInvoker (GraphRunInvoker)               │
//! │  - walks the run's graph snapshot with the runtime Invoker  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod dispatcher;
mod engine;
mod error;
mod housekeeping;
mod invoker;

pub use config::{BRANCH_POLICY_ENV, DispatcherConfig, EngineConfig, MAX_WORKERS_ENV, RetryPolicy};
pub use dispatcher::{Dispatcher, WorkflowWorkItem};
pub use engine::Engine;
pub use error::EngineError;
pub use housekeeping::{cleanup_runs, recover_interrupted_runs};
pub use invoker::{GraphRunInvoker, RunInvoker, RunReport};
