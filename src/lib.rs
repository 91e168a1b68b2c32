//! # Agent Orchestrator
//!
//! A multi-worker task orchestrator: it routes work items to a fleet
//! of heterogeneous remote agents discovered over the network, tracks
//! their liveness, and drives a self-healing execution loop that
//! survives worker timeouts, crashes, and partial failures.
//!
//! ## Architecture
//!
//! - **Agent Registry**: process-global `agent_id -> (card, status,
//!   context)` map, the single source of truth for liveness.
//! - **Discovery**: periodic port-range scan that populates the
//!   registry and detects agents coming back online.
//! - **Router**: capability-based selection via an external oracle.
//! - **Dispatcher**: the atomic reserve -> send -> await -> release
//!   cycle and the timeout/crash state machine.
//! - **Worker-Pool Scheduler**: per-agent workers draining a shared
//!   FIFO queue for bulk, capability-matched execution.
//! - **Recovery Loop**: revives BROKEN agents in the background.
//! - **Dashboard Aggregator**: read-only views over the registry and
//!   histories.
//! - **Workflow Endpoints**: thin HTTP compositions over the above.

/// HTTP API server and endpoints
pub mod api;
/// Southbound RPC client to remote agents
pub mod agent_client;
/// Authentication and authorization
pub mod auth;
/// System configuration
pub mod config;
/// System-wide constants
pub mod constants;
/// Read-only dashboard aggregation
pub mod dashboard;
/// Atomic reserve/send/await/release dispatch cycle
pub mod dispatcher;
/// Periodic agent discovery
pub mod discovery;
/// Error types and handling
pub mod error;
/// Task, error, and log ring buffers
pub mod history;
/// In-process log capture feeding the dashboard's log history
pub mod logging;
/// Core data models
pub mod models;
/// Background recovery of broken agents
pub mod recovery;
/// Process-wide agent registry
pub mod registry;
/// Capability-based agent routing
pub mod router;
/// Worker-pool scheduler for bulk execution
pub mod scheduler;
/// Default HTTP test-management adapter
pub mod test_management;
/// Input validation and sanitization
pub mod validation;
/// Workflow endpoint compositions
pub mod workflows;

pub use error::{OrchestratorError, Result};
