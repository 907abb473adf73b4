use serde::{Deserialize, Serialize};
use std::fmt;

/// Liveness of an instance as reported by its registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ComponentStatus {
    #[default]
    Unreachable,
    Up,
    Tombstone,
    Offline,
    Down,
}

impl ComponentStatus {
    /// Parse a PD store `state_name`
    pub fn from_store_state(state: &str) -> Self {
        match state.trim().to_ascii_lowercase().as_str() {
            "up" => ComponentStatus::Up,
            "tombstone" => ComponentStatus::Tombstone,
            "offline" => ComponentStatus::Offline,
            "down" => ComponentStatus::Down,
            _ => ComponentStatus::Unreachable,
        }
    }

    pub fn is_up(&self) -> bool {
        *self == ComponentStatus::Up
    }
}

impl fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentStatus::Unreachable => write!(f, "unreachable"),
            ComponentStatus::Up => write!(f, "up"),
            ComponentStatus::Tombstone => write!(f, "tombstone"),
            ComponentStatus::Offline => write!(f, "offline"),
            ComponentStatus::Down => write!(f, "down"),
        }
    }
}
