//! Errors raised while building or driving a state machine.

use crate::capability::CapabilitySet;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("state {state} is not registered with this machine")]
    UnknownState { state: String },

    #[error("begin state has not been set")]
    BeginStateUnset,

    #[error("unsupported capability combination: {capabilities}")]
    UnsupportedCombination { capabilities: CapabilitySet },

    #[error("cannot {event} while {state}")]
    IllegalTransition { state: String, event: String },
}

impl LifecycleError {
    pub(crate) fn unknown_state(state: impl ToString) -> Self {
        Self::UnknownState {
            state: state.to_string(),
        }
    }

    pub(crate) fn illegal(state: impl ToString, event: impl ToString) -> Self {
        Self::IllegalTransition {
            state: state.to_string(),
            event: event.to_string(),
        }
    }

    /// Setup mistakes, as opposed to a request made from the wrong state.
    pub fn is_configuration(&self) -> bool {
        !self.is_illegal_transition()
    }

    pub fn is_illegal_transition(&self) -> bool {
        matches!(self, Self::IllegalTransition { .. })
    }

    pub fn error_code(&self) -> &str {
        match self {
            Self::UnknownState { .. } => "unknown_state",
            Self::BeginStateUnset => "begin_state_unset",
            Self::UnsupportedCombination { .. } => "unsupported_combination",
            Self::IllegalTransition { .. } => "illegal_transition",
        }
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;
