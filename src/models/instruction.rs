use crate::error::{CarePathwayError, Result};
use crate::models::Versioned;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstructionType {
    /// Nothing by mouth
    Npo,
    Isolation,
    DischargeRestriction,
    DietRestriction,
    ActivityRestriction,
    Monitoring,
    Precaution,
    Custom,
}

/// Standing clinical instruction attached to a workflow.
///
/// While an active blocking instruction is unacknowledged, task completions in
/// its workflow do not release their successors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub instruction_id: Uuid,
    pub workflow_id: Uuid,
    pub instruction_type: InstructionType,
    pub text: String,
    pub blocking: bool,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub acknowledged_notes: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Instruction {
    pub fn new(
        workflow_id: Uuid,
        instruction_type: InstructionType,
        text: impl Into<String>,
        blocking: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            instruction_id: Uuid::new_v4(),
            workflow_id,
            instruction_type,
            text: text.into(),
            blocking,
            acknowledged: false,
            acknowledged_at: None,
            acknowledged_by: None,
            acknowledged_notes: None,
            active: true,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn holds_propagation(&self) -> bool {
        self.active && self.blocking && !self.acknowledged
    }

    pub fn acknowledge(
        &mut self,
        user: impl Into<String>,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.acknowledged {
            return Err(CarePathwayError::conflict(format!(
                "Instruction {} is already acknowledged",
                self.instruction_id
            )));
        }
        self.acknowledged = true;
        self.acknowledged_by = Some(user.into());
        self.acknowledged_notes = notes;
        self.acknowledged_at = Some(now);
        self.updated_at = now;
        Ok(())
    }
}

impl Versioned for Instruction {
    const ENTITY: &'static str = "Instruction";

    fn id(&self) -> Uuid {
        self.instruction_id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}
