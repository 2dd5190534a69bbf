//! A small table-driven finite state machine.
//!
//! The machine is synchronous and owns no lock. Whoever owns it is expected to
//! serialize access, call [`StateMachine::check_transition`] before doing the
//! work an event stands for, and only call [`StateMachine::transition`] once
//! that work has succeeded.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

use crate::error::{LifecycleError, Result};
use crate::state::{ServiceEvent, ServiceState};

#[derive(Debug, Clone)]
pub struct StateMachine<S = ServiceState, E = ServiceEvent> {
    states: HashSet<S>,
    table: HashMap<(S, E), S>,
    /// Registration order of table keys, for stable reporting.
    order: Vec<(S, E)>,
    begin: Option<S>,
    current: Option<S>,
}

impl<S, E> Default for StateMachine<S, E>
where
    S: Copy + Eq + Hash + fmt::Display,
    E: Copy + Eq + Hash + fmt::Display,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S, E> StateMachine<S, E>
where
    S: Copy + Eq + Hash + fmt::Display,
    E: Copy + Eq + Hash + fmt::Display,
{
    pub fn new() -> Self {
        Self {
            states: HashSet::new(),
            table: HashMap::new(),
            order: Vec::new(),
            begin: None,
            current: None,
        }
    }

    /// Register a state. Adding a state twice is a no-op.
    pub fn add_state(&mut self, state: S) -> &mut Self {
        self.states.insert(state);
        self
    }

    /// Register `from --event--> to`. Both states must already be known.
    ///
    /// Registering the same `(from, event)` pair again replaces its target.
    pub fn add_transition(&mut self, event: E, from: S, to: S) -> Result<&mut Self> {
        for state in [from, to] {
            if !self.states.contains(&state) {
                return Err(LifecycleError::unknown_state(state));
            }
        }
        if self.table.insert((from, event), to).is_none() {
            self.order.push((from, event));
        }
        Ok(self)
    }

    pub fn set_begin_state(&mut self, state: S) -> Result<&mut Self> {
        if !self.states.contains(&state) {
            return Err(LifecycleError::unknown_state(state));
        }
        self.begin = Some(state);
        Ok(self)
    }

    /// Put the machine back in its begin state.
    pub fn reset(&mut self) -> Result<S> {
        let begin = self.begin.ok_or(LifecycleError::BeginStateUnset)?;
        self.current = Some(begin);
        Ok(begin)
    }

    /// Whether `event` is legal from the current state. Never mutates.
    pub fn check_transition(&self, event: E) -> bool {
        self.current
            .is_some_and(|current| self.table.contains_key(&(current, event)))
    }

    /// Like [`check_transition`](Self::check_transition), but reports why not.
    pub fn ensure_transition(&self, event: E) -> Result<S> {
        let current = self.current.ok_or(LifecycleError::BeginStateUnset)?;
        self.table
            .get(&(current, event))
            .copied()
            .ok_or_else(|| LifecycleError::illegal(current, event))
    }

    /// Apply `event`, returning the new state. On failure the current state
    /// is left untouched.
    pub fn transition(&mut self, event: E) -> Result<S> {
        let next = self.ensure_transition(event)?;
        self.current = Some(next);
        Ok(next)
    }

    /// Current state, or `None` before the first [`reset`](Self::reset).
    pub fn state(&self) -> Option<S> {
        self.current
    }

    pub fn begin_state(&self) -> Option<S> {
        self.begin
    }

    pub fn contains_state(&self, state: S) -> bool {
        self.states.contains(&state)
    }

    pub fn states(&self) -> impl Iterator<Item = S> + '_ {
        self.states.iter().copied()
    }

    /// Events that have a table entry from the current state, in the order
    /// their transitions were registered.
    pub fn permitted_events(&self) -> Vec<E> {
        match self.current {
            Some(current) => self
                .order
                .iter()
                .filter(|(from, _)| *from == current)
                .map(|(_, event)| *event)
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn transition_count(&self) -> usize {
        self.table.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ServiceEvent::*;
    use ServiceState::*;

    fn start_stop() -> StateMachine {
        let mut machine = StateMachine::new();
        machine.add_state(Stopped).add_state(Running);
        machine.add_transition(Start, Stopped, Running).unwrap();
        machine.add_transition(Stop, Running, Stopped).unwrap();
        machine.set_begin_state(Stopped).unwrap();
        machine.reset().unwrap();
        machine
    }

    #[test]
    fn duplicate_add_state_is_noop() {
        let mut machine: StateMachine = StateMachine::new();
        machine.add_state(Running).add_state(Running);
        assert_eq!(machine.states().count(), 1);
    }

    #[test]
    fn transition_to_unknown_state_rejected() {
        let mut machine: StateMachine = StateMachine::new();
        machine.add_state(Stopped);
        let err = machine.add_transition(Start, Stopped, Running).unwrap_err();
        assert_eq!(
            err,
            LifecycleError::UnknownState {
                state: "running".to_string()
            }
        );
        assert!(err.is_configuration());
        assert_eq!(machine.transition_count(), 0);
    }

    #[test]
    fn reset_without_begin_state_fails() {
        let mut machine: StateMachine = StateMachine::new();
        machine.add_state(Stopped);
        assert_eq!(machine.reset(), Err(LifecycleError::BeginStateUnset));
        assert_eq!(machine.state(), None);
    }

    #[test]
    fn begin_state_must_be_registered() {
        let mut machine: StateMachine = StateMachine::new();
        assert!(machine.set_begin_state(Running).is_err());
    }

    #[test]
    fn reset_returns_to_begin() {
        let mut machine = start_stop();
        machine.transition(Start).unwrap();
        assert_eq!(machine.state(), Some(Running));
        assert_eq!(machine.reset(), Ok(Stopped));
        assert_eq!(machine.state(), Some(Stopped));
    }

    #[test]
    fn check_transition_is_pure() {
        let machine = start_stop();
        assert!(machine.check_transition(Start));
        assert!(!machine.check_transition(Stop));
        assert_eq!(machine.state(), Some(Stopped));
    }

    #[test]
    fn check_before_reset_is_false() {
        let mut machine: StateMachine = StateMachine::new();
        machine.add_state(Stopped).add_state(Running);
        machine.add_transition(Start, Stopped, Running).unwrap();
        assert!(!machine.check_transition(Start));
        assert_eq!(machine.transition(Start), Err(LifecycleError::BeginStateUnset));
    }

    #[test]
    fn illegal_transition_leaves_state_alone() {
        let mut machine = start_stop();
        let err = machine.transition(Stop).unwrap_err();
        assert_eq!(err, LifecycleError::illegal(Stopped, Stop));
        assert_eq!(machine.state(), Some(Stopped));
    }

    #[test]
    fn round_trip() {
        let mut machine = start_stop();
        for _ in 0..3 {
            assert_eq!(machine.transition(Start), Ok(Running));
            assert_eq!(machine.transition(Stop), Ok(Stopped));
        }
    }

    #[test]
    fn permitted_events_follow_current_state() {
        let mut machine = start_stop();
        assert_eq!(machine.permitted_events(), vec![Start]);
        machine.transition(Start).unwrap();
        assert_eq!(machine.permitted_events(), vec![Stop]);
    }

    #[test]
    fn works_with_custom_state_types() {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        enum Door {
            Open,
            Shut,
        }
        impl fmt::Display for Door {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{self:?}")
            }
        }

        let mut machine: StateMachine<Door, &'static str> = StateMachine::new();
        machine.add_state(Door::Open).add_state(Door::Shut);
        machine.add_transition("close", Door::Open, Door::Shut).unwrap();
        machine.set_begin_state(Door::Open).unwrap();
        machine.reset().unwrap();
        assert_eq!(machine.transition("close"), Ok(Door::Shut));
        assert_eq!(
            machine.transition("close").unwrap_err().to_string(),
            "cannot close while Shut"
        );
    }
}
