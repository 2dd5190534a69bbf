//! Traits describing what a long-running component can do.
//!
//! Methods take `&self`: services are shared between the thread that owns
//! them and whatever worker they drive, so they keep their own interior
//! locking.

use crate::capability::CapabilitySet;
use crate::state::ServiceState;

/// A component whose lifecycle is governed by a [`StateMachine`](crate::StateMachine).
pub trait Service {
    fn capabilities(&self) -> CapabilitySet;

    fn state(&self) -> ServiceState;
}

pub trait Initializable {
    type Error;

    fn initialize(&self) -> Result<(), Self::Error>;
}

pub trait Startable {
    type Error;

    fn start(&self) -> Result<(), Self::Error>;

    fn stop(&self) -> Result<(), Self::Error>;

    fn is_running(&self) -> bool;
}

pub trait Suspendable: Startable {
    fn suspend(&self) -> Result<(), Self::Error>;

    fn resume(&self) -> Result<(), Self::Error>;

    fn is_suspended(&self) -> bool;
}

pub trait Destroyable {
    type Error;

    fn destroy(&self) -> Result<(), Self::Error>;
}
