use std::sync::atomic::{AtomicU32, Ordering};

use crate::models::CallLimits;
use crate::services::transport::UserState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdlePolicy {
    messages: Vec<String>,
    max_messages: u32,
}

impl IdlePolicy {
    pub fn from_limits(limits: &CallLimits) -> Self {
        Self {
            messages: limits
                .idle_messages
                .iter()
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect(),
            max_messages: limits.max_idle_messages,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.messages.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdleAction {
    Ignore,
    /// The caller came back; the counter is back at zero.
    Reset,
    Speak(String),
    Terminate,
}

/// How many idle prompts went out since the caller was last active.
#[derive(Debug, Default)]
pub struct IdleCounter {
    count: AtomicU32,
}

impl IdleCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::Release);
    }

    /// Advances the counter for one user-state transition and says what the
    /// session should do about it.
    pub fn on_transition(&self, policy: &IdlePolicy, old: UserState, new: UserState) -> IdleAction {
        if old == UserState::Away && new != UserState::Away {
            self.reset();
            return IdleAction::Reset;
        }
        if new != UserState::Away || !policy.is_enabled() {
            return IdleAction::Ignore;
        }

        let current = self.count();
        if current >= policy.max_messages {
            return IdleAction::Terminate;
        }
        let message = &policy.messages[current as usize % policy.messages.len()];
        self.count.store(current + 1, Ordering::Release);
        IdleAction::Speak(message.clone())
    }
}
