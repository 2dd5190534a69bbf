//! Capability sets and the canonical machine for each supported combination.

use std::fmt;

use crate::error::{LifecycleError, Result};
use crate::machine::StateMachine;
use crate::service::Service;
use crate::state::{ServiceEvent, ServiceState};

bitflags::bitflags! {
    /// Lifecycle operations a service supports.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct CapabilitySet: u8 {
        const INITIALIZABLE = 1 << 0;
        const STARTABLE = 1 << 1;
        const SUSPENDABLE = 1 << 2;
        const DESTROYABLE = 1 << 3;
    }
}

impl Default for CapabilitySet {
    fn default() -> Self {
        CapabilitySet::empty()
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                f.write_str("+")?;
            }
            first = false;
            f.write_str(&name.to_ascii_lowercase())?;
        }
        Ok(())
    }
}

const I: CapabilitySet = CapabilitySet::INITIALIZABLE;
const S: CapabilitySet = CapabilitySet::STARTABLE;
const P: CapabilitySet = CapabilitySet::SUSPENDABLE;
const D: CapabilitySet = CapabilitySet::DESTROYABLE;

/// Every combination that maps onto a machine.
pub const SUPPORTED_COMBINATIONS: [CapabilitySet; 9] = [
    I,
    S,
    S.union(P),
    I.union(S),
    I.union(D),
    I.union(S).union(D),
    S.union(P).union(D),
    I.union(S).union(P),
    I.union(S).union(P).union(D),
];

impl CapabilitySet {
    pub fn is_supported(&self) -> bool {
        SUPPORTED_COMBINATIONS.contains(self)
    }
}

/// Build the machine for `capabilities`, already reset to its begin state.
pub fn create_state_machine(capabilities: CapabilitySet) -> Result<StateMachine> {
    use ServiceEvent::*;
    use ServiceState::*;

    if !capabilities.is_supported() {
        return Err(LifecycleError::UnsupportedCombination { capabilities });
    }

    let initializable = capabilities.contains(I);
    let startable = capabilities.contains(S);
    let mut machine = StateMachine::new();

    if initializable {
        machine.add_state(Uninitialized).add_state(Initialized);
        machine.add_transition(Initialize, Uninitialized, Initialized)?;
    }

    if startable {
        machine.add_state(Stopped).add_state(Running);
        machine.add_transition(Start, Stopped, Running)?;
        machine.add_transition(Stop, Running, Stopped)?;
        if initializable {
            machine.add_transition(Start, Initialized, Running)?;
        }
    }

    if capabilities.contains(P) {
        machine.add_state(Suspended);
        machine.add_transition(Suspend, Running, Suspended)?;
        machine.add_transition(Resume, Suspended, Running)?;
    }

    if capabilities.contains(D) {
        machine.add_state(Destroyed);
        if startable {
            machine.add_transition(Destroy, Stopped, Destroyed)?;
        }
        if initializable {
            machine.add_transition(Destroy, Initialized, Destroyed)?;
            machine.add_transition(Initialize, Destroyed, Initialized)?;
        }
    }

    machine.set_begin_state(if initializable { Uninitialized } else { Stopped })?;
    machine.reset()?;
    Ok(machine)
}

/// Build the machine for whatever `service` says it can do.
pub fn create_state_machine_for<T: Service + ?Sized>(service: &T) -> Result<StateMachine> {
    create_state_machine(service.capabilities())
}
