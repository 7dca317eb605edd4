//! # Order
//!
//! Clinical order placed within a workflow (lab test, imaging, medication, ...).
//! Status changes go through [`OrderStateMachine`](crate::state_machine::OrderStateMachine).

use crate::models::Versioned;
use crate::state_machine::OrderState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    LabTest,
    Imaging,
    Procedure,
    Medication,
    ControlledSubstance,
    Surgery,
    Consultation,
    Appointment,
    SupplyRequest,
    Equipment,
    Custom,
}

impl OrderType {
    pub const ALL: [OrderType; 11] = [
        Self::LabTest,
        Self::Imaging,
        Self::Procedure,
        Self::Medication,
        Self::ControlledSubstance,
        Self::Surgery,
        Self::Consultation,
        Self::Appointment,
        Self::SupplyRequest,
        Self::Equipment,
        Self::Custom,
    ];

    /// Order types activated automatically once authorized
    pub fn auto_activates(&self) -> bool {
        matches!(self, Self::LabTest | Self::Imaging)
    }

    /// State a recorded result moves the order to
    pub fn result_state(&self) -> OrderState {
        match self {
            Self::Medication => OrderState::Dispensed,
            _ => OrderState::Resulted,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LabTest => "LAB_TEST",
            Self::Imaging => "IMAGING",
            Self::Procedure => "PROCEDURE",
            Self::Medication => "MEDICATION",
            Self::ControlledSubstance => "CONTROLLED_SUBSTANCE",
            Self::Surgery => "SURGERY",
            Self::Consultation => "CONSULTATION",
            Self::Appointment => "APPOINTMENT",
            Self::SupplyRequest => "SUPPLY_REQUEST",
            Self::Equipment => "EQUIPMENT",
            Self::Custom => "CUSTOM",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderPriority {
    #[default]
    Normal,
    High,
    Critical,
}

/// Parameters for placing a new order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub workflow_id: Uuid,
    pub order_type: OrderType,
    pub description: String,
    pub order_code: Option<String>,
    pub department_target: Option<String>,
    pub ordered_by: Option<String>,
    pub priority: OrderPriority,
    pub estimated_cost_cents: Option<i64>,
}

impl NewOrder {
    pub fn new(workflow_id: Uuid, order_type: OrderType, description: impl Into<String>) -> Self {
        Self {
            workflow_id,
            order_type,
            description: description.into(),
            order_code: None,
            department_target: None,
            ordered_by: None,
            priority: OrderPriority::Normal,
            estimated_cost_cents: None,
        }
    }

    pub fn ordered_by(mut self, user: impl Into<String>) -> Self {
        self.ordered_by = Some(user.into());
        self
    }

    pub fn for_department(mut self, department: impl Into<String>) -> Self {
        self.department_target = Some(department.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.order_code = Some(code.into());
        self
    }

    pub fn with_priority(mut self, priority: OrderPriority) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: Uuid,
    pub workflow_id: Uuid,
    pub order_type: OrderType,
    pub status: OrderState,
    pub description: String,
    pub order_code: Option<String>,
    pub department_target: Option<String>,
    pub ordered_by: Option<String>,
    pub authorized_by: Option<String>,
    pub verified_by: Option<String>,
    pub authorized_at: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub resulted_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub result: Option<String>,
    pub priority: OrderPriority,
    pub estimated_cost_cents: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Order {
    pub fn new(request: NewOrder, now: DateTime<Utc>) -> Self {
        Self {
            order_id: Uuid::new_v4(),
            workflow_id: request.workflow_id,
            order_type: request.order_type,
            status: OrderState::Proposed,
            description: request.description,
            order_code: request.order_code,
            department_target: request.department_target,
            ordered_by: request.ordered_by,
            authorized_by: None,
            verified_by: None,
            authorized_at: None,
            activated_at: None,
            started_at: None,
            resulted_at: None,
            verified_at: None,
            closed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            result: None,
            priority: request.priority,
            estimated_cost_cents: request.estimated_cost_cents,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }
}

impl Versioned for Order {
    const ENTITY: &'static str = "Order";

    fn id(&self) -> Uuid {
        self.order_id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}
