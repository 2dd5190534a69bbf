//! Lifecycle states and the events that move a service between them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
    Suspended,
    Destroyed,
}

impl ServiceState {
    pub const ALL: [ServiceState; 6] = [
        Self::Uninitialized,
        Self::Initialized,
        Self::Running,
        Self::Stopped,
        Self::Suspended,
        Self::Destroyed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Suspended => "suspended",
            Self::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown service state: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceEvent {
    /// uninitialized|destroyed → initialized
    Initialize,
    /// stopped|initialized → running
    Start,
    /// running → stopped
    Stop,
    /// running → suspended
    Suspend,
    /// suspended → running
    Resume,
    /// stopped|initialized → destroyed
    Destroy,
}

impl ServiceEvent {
    pub const ALL: [ServiceEvent; 6] = [
        Self::Initialize,
        Self::Start,
        Self::Stop,
        Self::Suspend,
        Self::Resume,
        Self::Destroy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Suspend => "suspend",
            Self::Resume => "resume",
            Self::Destroy => "destroy",
        }
    }
}

impl fmt::Display for ServiceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| format!("unknown service event: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_display_parses_back() {
        for state in ServiceState::ALL {
            assert_eq!(state.to_string().parse::<ServiceState>(), Ok(state));
        }
    }

    #[test]
    fn event_display_parses_back() {
        for event in ServiceEvent::ALL {
            assert_eq!(event.to_string().parse::<ServiceEvent>(), Ok(event));
        }
    }

    #[test]
    fn unknown_names_rejected() {
        assert!("paused".parse::<ServiceState>().is_err());
        assert!("Start".parse::<ServiceEvent>().is_err());
    }

    #[test]
    fn serde_uses_lowercase() {
        let json = serde_json::to_string(&ServiceState::Suspended).unwrap();
        assert_eq!(json, "\"suspended\"");
        let back: ServiceEvent = serde_json::from_str("\"resume\"").unwrap();
        assert_eq!(back, ServiceEvent::Resume);
    }
}
