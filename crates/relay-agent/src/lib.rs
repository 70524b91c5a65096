//! Agent runtime: task orchestration, worker dispatch, and proactive scheduling.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐     ┌──────────────┐     ┌─────────┐
//! │ Proactive  │────>│ Orchestrator │────>│ Workers │
//! │ Scheduler  │     │ (dispatch)   │     │ (tasks) │
//! └────────────┘     └──────┬───────┘     └─────────┘
//!                           │
//!                    relay-kernel
//!                 (queue + engine + bus)
//! ```
//!
//! ## Modules
//!
//! - [`orchestrator`] -- capability-based task routing, dependency gating,
//!   and retry-with-demotion failure recovery.
//! - [`worker`] -- the `Worker` trait and the built-in specialised workers.
//! - [`proactive`] -- cron-driven recurring task generation.
//! - [`config`] -- runtime configuration, loaded from TOML.
//! - [`error`] -- agent error types.
//! - [`telemetry`] -- tracing subscriber setup for tests and embedders.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod proactive;
pub mod telemetry;
pub mod worker;

pub use config::RuntimeConfig;
pub use error::{AgentError, Result};
pub use orchestrator::{Orchestrator, OrchestratorOutcome};
pub use proactive::{ProactiveFire, ProactiveJob, ProactiveScheduler};
pub use telemetry::init_tracing;
pub use worker::{
    CommunicationWorker, MeetingPrepWorker, ResearchWorker, ScheduleOptimizerWorker,
    TaskDecompositionWorker, Worker, WorkerStatus,
};
