//! Power domain: how an execution started, and how it ends.

/// Why this execution started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootKind {
    /// Power-on, flash or watchdog reset: start a fresh record
    Cold,
    /// Wake-up from deep sleep or a forced restart: continue from the persisted record
    Resume,
}

/// Radio state the next execution starts with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioMode {
    Enabled,
    Disabled,
}

/// What the power domain is asked to do when the node goes dormant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DormancyPlan {
    pub sleep_seconds: u32,
    pub radio: RadioMode,
}

/// Platform primitives that end the current execution.
pub trait DeviceControl {
    /// Full device restart. Durable state survives, everything else is lost.
    fn restart(&mut self) -> !;

    /// Powers the device down until the wake-up timer fires. The next
    /// execution starts with [`BootKind::Resume`].
    fn enter_dormancy(&mut self, plan: DormancyPlan) -> !;
}

/// Monotonic milliseconds since boot
pub trait Clock {
    fn now_ms(&self) -> u64;
}
