//! Reselection retry timer

use serde::{Deserialize, Serialize};

use crate::tickable::Ticks;

/// One-shot deadline in controller ticks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReselectTimer {
    deadline: Option<Ticks>,
}

impl ReselectTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms (or re-arms) the timer
    pub fn schedule(&mut self, deadline: Ticks) {
        self.deadline = Some(deadline);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Ticks> {
        self.deadline
    }

    /// Disarms and returns true if the deadline has passed
    pub fn take_expired(&mut self, now: Ticks) -> bool {
        match self.deadline {
            Some(d) if d <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
