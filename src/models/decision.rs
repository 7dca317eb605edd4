//! # Decision Logic
//!
//! Conditional branch points inside a care pathway template.
//!
//! ## Overview
//!
//! A `DecisionLogic` inspects one clinical fact (`data_point`) and routes the
//! pathway to either its true-path or false-path task definition. Facts are
//! supplied at evaluation time as a JSON object; scalar values are compared
//! through their string rendering, numeric operators parse both sides as `f64`.
//!
//! ## Membership Operators
//!
//! `IN` and `NOT_IN` check whether the *expected* string contains the actual
//! value as a substring. With `expected = "A,B,C"` and actual `"B"` the result
//! is `true`, but so is actual `","`. Rules should be authored with that in mind.

use crate::error::{CarePathwayError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    Contains,
    NotContains,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl DecisionOperator {
    pub const ALL: [DecisionOperator; 12] = [
        Self::Equals,
        Self::NotEquals,
        Self::GreaterThan,
        Self::LessThan,
        Self::GreaterThanOrEqual,
        Self::LessThanOrEqual,
        Self::Contains,
        Self::NotContains,
        Self::In,
        Self::NotIn,
        Self::IsNull,
        Self::IsNotNull,
    ];

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::GreaterThan | Self::LessThan | Self::GreaterThanOrEqual | Self::LessThanOrEqual
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "EQUALS",
            Self::NotEquals => "NOT_EQUALS",
            Self::GreaterThan => "GREATER_THAN",
            Self::LessThan => "LESS_THAN",
            Self::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
            Self::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
            Self::Contains => "CONTAINS",
            Self::NotContains => "NOT_CONTAINS",
            Self::In => "IN",
            Self::NotIn => "NOT_IN",
            Self::IsNull => "IS_NULL",
            Self::IsNotNull => "IS_NOT_NULL",
        }
    }
}

impl fmt::Display for DecisionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DecisionOperator {
    type Err = CarePathwayError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| CarePathwayError::validation(format!("Unsupported operator: {s}")))
    }
}

/// Evaluate `actual <operator> expected`.
///
/// An absent value satisfies only `IS_NULL`. Numeric operators fail with a
/// validation error when either side does not parse as a number.
pub fn evaluate(operator: DecisionOperator, actual: Option<&str>, expected: &str) -> Result<bool> {
    let Some(actual) = actual else {
        return Ok(operator == DecisionOperator::IsNull);
    };

    let outcome = match operator {
        DecisionOperator::Equals => actual == expected,
        DecisionOperator::NotEquals => actual != expected,
        DecisionOperator::Contains => actual.contains(expected),
        DecisionOperator::NotContains => !actual.contains(expected),
        DecisionOperator::GreaterThan => {
            let (a, e) = parse_operands(actual, expected)?;
            a > e
        }
        DecisionOperator::LessThan => {
            let (a, e) = parse_operands(actual, expected)?;
            a < e
        }
        DecisionOperator::GreaterThanOrEqual => {
            let (a, e) = parse_operands(actual, expected)?;
            a >= e
        }
        DecisionOperator::LessThanOrEqual => {
            let (a, e) = parse_operands(actual, expected)?;
            a <= e
        }
        DecisionOperator::In => expected.contains(actual),
        DecisionOperator::NotIn => !expected.contains(actual),
        DecisionOperator::IsNull => false,
        DecisionOperator::IsNotNull => true,
    };

    Ok(outcome)
}

fn parse_operands(actual: &str, expected: &str) -> Result<(f64, f64)> {
    let parse = |raw: &str| {
        raw.trim().parse::<f64>().map_err(|_| {
            CarePathwayError::validation(format!("Value '{raw}' is not numeric"))
        })
    };
    Ok((parse(actual)?, parse(expected)?))
}

/// Render a fact for comparison; JSON null counts as absent
pub fn fact_as_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// A conditional branch point inside a template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionLogic {
    pub decision_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Key looked up in the supplied facts
    pub data_point: String,
    pub operator: DecisionOperator,
    pub expected_value: String,
    pub true_path_task_id: Uuid,
    pub false_path_task_id: Uuid,
}

impl DecisionLogic {
    pub fn new(
        name: impl Into<String>,
        data_point: impl Into<String>,
        operator: DecisionOperator,
        expected_value: impl Into<String>,
        true_path_task_id: Uuid,
        false_path_task_id: Uuid,
    ) -> Self {
        Self {
            decision_id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            data_point: data_point.into(),
            operator,
            expected_value: expected_value.into(),
            true_path_task_id,
            false_path_task_id,
        }
    }

    pub fn evaluate(&self, actual: Option<&str>) -> Result<bool> {
        evaluate(self.operator, actual, &self.expected_value)
    }

    /// Pick the branch for the given facts
    pub fn route(&self, facts: &HashMap<String, Value>) -> Result<Uuid> {
        let actual = facts.get(&self.data_point).and_then(fact_as_string);
        let outcome = self.evaluate(actual.as_deref())?;
        Ok(if outcome {
            self.true_path_task_id
        } else {
            self.false_path_task_id
        })
    }
}
