//! # Orchestration
//!
//! Runtime side of the engine.
//!
//! ## Components
//!
//! - **CarePathwayEngine**: command surface for workflows, tasks, orders,
//!   instructions and decisions. Serializes changes per entity and
//!   publishes lifecycle events once changes are persisted.
//! - **EventDispatcher**: turns lifecycle events into follow-up commands
//!   (next-task activation, retries, recovery paths, order auto-activation,
//!   compensation, failed-workflow escalation).
//! - **CompensationEngine**: plans and executes the saga actions owed by a
//!   cancelled order, with bounded retries.
//! - **SlaMonitor**: periodic detection and escalation of overdue tasks.
//! - **EngineSystem**: starts the bus consumers and background loops and
//!   stops them on shutdown.
//!
//! Lock order is workflow before task. External calls (notifications,
//! compensation handlers) never run while an entity lock is held.

pub mod bootstrap;
pub mod compensation;
pub mod engine;
pub mod event_dispatcher;
pub mod locks;
pub mod sla_monitor;

pub use bootstrap::{BootstrapConfig, EngineBootstrap, EngineSystem, SystemStatus};
pub use compensation::{
    CancelOrderHandler, CompensationEngine, CompensationHandler, CompensationReport,
    CompensationRetrier, ManualFollowUpHandler, NotifyLabHandler, ReverseChargeHandler,
    SendNotificationHandler,
};
pub use engine::{CarePathwayEngine, WorkflowProgress};
pub use event_dispatcher::EventDispatcher;
pub use locks::{EntityGuard, EntityLocks};
pub use sla_monitor::{breach_reason, SlaBreach, SlaMonitor, SlaReport};
