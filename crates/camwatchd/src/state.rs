//! Daemon state.
//!
//! Owned by the controller behind one `RwLock`; every execution context
//! goes through that lock, so there is no unsynchronized cross-context
//! mutation.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmState {
    Disarmed,
    Armed,
}

#[derive(Debug)]
pub struct DaemonState {
    pub arm: ArmState,
    /// Most recent motion edge. With creepy_mode this is recorded even
    /// while disarmed.
    pub last_motion: Option<DateTime<Utc>>,
}

impl DaemonState {
    pub fn new(start_armed: bool) -> Self {
        Self {
            arm: if start_armed { ArmState::Armed } else { ArmState::Disarmed },
            last_motion: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.arm == ArmState::Armed
    }

    pub fn motion_report(&self) -> String {
        match self.last_motion {
            Some(t) => format!("\nLast motion: {}", t.format("%Y-%m-%d %H:%M:%S")),
            None => String::new(),
        }
    }
}
