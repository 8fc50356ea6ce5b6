/*!
 * Session Types
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a session; `Closed` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unloaded,
    Loaded,
    Attached,
    Running,
    Closed,
}

impl SessionState {
    /// Whether attachments may be made in this state
    pub fn can_attach(&self) -> bool {
        matches!(self, SessionState::Loaded | SessionState::Attached)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unloaded => "unloaded",
            SessionState::Loaded => "loaded",
            SessionState::Attached => "attached",
            SessionState::Running => "running",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
