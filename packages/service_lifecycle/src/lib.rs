//! Service Lifecycle - validated state machines for long-running components
//!
//! Every tail, monitor or plugin gets the same start/stop/suspend/resume
//! semantics: a [`StateMachine`] whose topology is picked from the service's
//! [`CapabilitySet`].
//!
//! # Example
//!
//! ```
//! use service_lifecycle::{CapabilitySet, ServiceEvent, ServiceState, create_state_machine};
//!
//! let mut machine =
//!     create_state_machine(CapabilitySet::STARTABLE | CapabilitySet::SUSPENDABLE).unwrap();
//! assert_eq!(machine.state(), Some(ServiceState::Stopped));
//!
//! // Check first, do the work, then commit.
//! assert!(machine.check_transition(ServiceEvent::Start));
//! machine.transition(ServiceEvent::Start).unwrap();
//!
//! // Resuming something that isn't suspended is refused.
//! assert!(machine.transition(ServiceEvent::Resume).is_err());
//! assert_eq!(machine.state(), Some(ServiceState::Running));
//! ```

pub mod capability;
mod error;
mod machine;
pub mod service;
mod state;

pub use capability::{
    CapabilitySet, SUPPORTED_COMBINATIONS, create_state_machine, create_state_machine_for,
};
pub use error::{LifecycleError, Result};
pub use machine::StateMachine;
pub use service::{Destroyable, Initializable, Service, Startable, Suspendable};
pub use state::{ServiceEvent, ServiceState};
