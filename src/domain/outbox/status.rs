//! Delivery status of an outbox row.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::{StateMachine, ValidationError};

/// Where an outbox row is in the delivery pipeline.
///
/// `Published` and `Failed` are terminal. A row leaves `Publishing` only
/// through the retry/failure transitions driven by the relay or the lease
/// sweeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Staged by a producer, waiting for `next_attempt_at`
    Pending,
    /// Leased by exactly one relay worker
    Publishing,
    /// Accepted by the broker
    Published,
    /// Attempts exhausted; kept for operator inspection
    Failed,
}

impl OutboxStatus {
    /// Storage representation, matching the `status` column check constraint.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Publishing => "publishing",
            OutboxStatus::Published => "published",
            OutboxStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "publishing" => Ok(OutboxStatus::Publishing),
            "published" => Ok(OutboxStatus::Published),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(ValidationError::invalid_format(
                "status",
                format!("unknown outbox status '{}'", other),
            )),
        }
    }
}

impl StateMachine for OutboxStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use OutboxStatus::*;
        matches!(
            (self, target),
            (Pending, Publishing)
                | (Publishing, Published)
                | (Publishing, Pending)
                | (Publishing, Failed)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use OutboxStatus::*;
        match self {
            Pending => vec![Publishing],
            Publishing => vec![Published, Pending, Failed],
            Published => vec![],
            Failed => vec![],
        }
    }
}
