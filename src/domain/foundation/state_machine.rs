//! Lifecycle state machines.

use super::ValidationError;

/// A status enum whose values move along a fixed set of edges.
///
/// Implementors list their outgoing edges once; checked transitions and
/// terminal detection follow from that list.
pub trait StateMachine: Sized + Copy + PartialEq + std::fmt::Debug {
    /// Outgoing edges from this state. Empty for terminal states.
    fn valid_transitions(&self) -> Vec<Self>;

    fn can_transition_to(&self, target: &Self) -> bool {
        self.valid_transitions().contains(target)
    }

    /// Returns `target` when the edge exists.
    fn transition_to(&self, target: Self) -> Result<Self, ValidationError> {
        if self.can_transition_to(&target) {
            Ok(target)
        } else {
            Err(ValidationError::invalid_format(
                "status",
                format!("no transition from {:?} to {:?}", self, target),
            ))
        }
    }

    fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }
}
