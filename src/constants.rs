//! # System Constants
//!
//! Operational boundaries of the care pathway engine: retry budgets, sweep
//! intervals, event-bus topics and escalation roles.

/// Event-bus topics, one per lifecycle event category
pub mod topics {
    pub const TASK_EVENTS: &str = "workflow-task-events";
    pub const ORDER_EVENTS: &str = "workflow-order-events";
    pub const WORKFLOW_EVENTS: &str = "workflow-state-events";

    pub const ALL: [&str; 3] = [TASK_EVENTS, ORDER_EVENTS, WORKFLOW_EVENTS];
}

/// Consumer group names used when subscribing to the bus
pub mod groups {
    pub const TASK_CONSUMER: &str = "workflow-engine-task-consumer";
    pub const ORDER_CONSUMER: &str = "workflow-engine-order-consumer";
    pub const WORKFLOW_CONSUMER: &str = "workflow-engine-state-consumer";
}

/// Escalation targets derived from an assignee's role prefix
pub mod escalation {
    pub const NURSE_MANAGER: &str = "NURSE_MANAGER";
    pub const LAB_DIRECTOR: &str = "LAB_DIRECTOR";
    pub const PHARMACY_MANAGER: &str = "PHARMACY_MANAGER";
    pub const SUPERVISOR: &str = "SUPERVISOR";

    /// Assignee used when the engine itself escalates
    pub const SYSTEM_ACTOR: &str = "SYSTEM";

    /// (prefix, target) pairs checked in order
    pub const DEFAULT_ROLE_PREFIXES: [(&str, &str); 3] = [
        ("NURSE", NURSE_MANAGER),
        ("LAB", LAB_DIRECTOR),
        ("PHARMACY", PHARMACY_MANAGER),
    ];
}

pub mod system {
    pub const DEFAULT_TASK_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_COMPENSATION_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_NOTIFICATION_MAX_RETRIES: u32 = 3;

    /// SLA sweep cadence (5 minutes)
    pub const DEFAULT_SLA_CHECK_INTERVAL_SECONDS: u64 = 300;
    pub const DEFAULT_SLA_BATCH_SIZE: usize = 100;

    pub const DEFAULT_COMPENSATION_RETRY_INTERVAL_SECONDS: u64 = 300;
    pub const DEFAULT_NOTIFICATION_RETRY_INTERVAL_SECONDS: u64 = 300;

    pub const DEFAULT_DISPATCHER_WORKERS: usize = 4;
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

    /// Upper bound on chained activations caused by a single originating event
    pub const DEFAULT_MAX_PROPAGATION_DEPTH: u32 = 64;

    pub const WORKFLOW_FAILED_ESCALATION_REASON: &str =
        "Workflow execution failed - escalating for review";
}

/// Triggering event recorded on synthesized compensation actions
pub const ORDER_CANCELLED_TRIGGER: &str = "ORDER_CANCELLED";
