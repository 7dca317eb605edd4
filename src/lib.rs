#![allow(clippy::doc_markdown)] // Allow technical terms in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Care Pathway Core
//!
//! Execution engine for clinical care pathways.
//!
//! ## Overview
//!
//! A published [`WorkflowTemplate`](models::WorkflowTemplate) describes a
//! pathway as task definitions linked by success and failure edges, with
//! decision points and safety gates. Instantiating it for a patient creates
//! a workflow instance and its task instances; the engine then drives task,
//! order and workflow lifecycles through their state machines and reacts
//! to the events they emit.
//!
//! ## Key Features
//!
//! - **State machines** for tasks, orders and workflows with guarded transitions
//! - **Event propagation**: completing a task activates the next one, failures
//!   retry or take the recovery path, workflows settle from their tasks
//! - **Compensation** for cancelled orders with bounded retries
//! - **SLA enforcement**: overdue tasks are flagged and escalated
//! - **Clinical instructions** that hold propagation until acknowledged
//! - **Optimistic concurrency** with per-entity locking
//!
//! ## Module Organization
//!
//! - [`models`] - Templates, instances, orders, compensations, instructions
//! - [`state_machine`] - Task, order and workflow transition rules
//! - [`orchestration`] - Engine commands, event dispatcher, SLA monitor, compensation
//! - [`events`] - Lifecycle events and the partitioned event bus
//! - [`repository`] - Versioned storage capability and in-memory implementation
//! - [`notification`] - Preferences, channels and delivery
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use care_pathway::orchestration::{BootstrapConfig, EngineBootstrap};
//!
//! # async fn example() -> anyhow::Result<()> {
//! care_pathway::logging::init_structured_logging();
//! let system = EngineBootstrap::bootstrap(BootstrapConfig::default()).await?;
//! let engine = system.engine().clone();
//! // engine.create_workflow("patient-42", template_id).await?;
//! system.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # All tests
//! ```

pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod notification;
pub mod orchestration;
pub mod repository;
pub mod state_machine;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigManager, EngineConfig};
pub use error::{CarePathwayError, Result};
pub use events::{EventBus, EventContext, LifecycleEvent, PartitionedEventBus};
pub use models::{
    CompensationAction, Instruction, Order, TaskDefinition, TaskInstance, WorkflowInstance,
    WorkflowTemplate,
};
pub use orchestration::{CarePathwayEngine, EngineBootstrap, EngineSystem, EventDispatcher};
pub use repository::{InMemoryRepository, Repository};
pub use state_machine::{OrderState, TaskState, WorkflowState};
