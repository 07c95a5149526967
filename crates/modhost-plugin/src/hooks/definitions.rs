//! Signal definitions shared by both event families.

use serde::{Deserialize, Serialize};

/// What a prefix (or an owner-grouped callback) wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HookAction {
    /// Run the remaining callbacks and the original call.
    Continue,
    /// Stop here. For a hook-bound channel the original call and every
    /// postfix are skipped and the current result slot is returned.
    Halt,
}

impl HookAction {
    pub fn is_halt(self) -> bool {
        matches!(self, Self::Halt)
    }
}

impl From<bool> for HookAction {
    /// `true` means "proceed".
    fn from(proceed: bool) -> Self {
        if proceed { Self::Continue } else { Self::Halt }
    }
}

/// A host interception point.
///
/// Implemented by marker types, usually through [`hook_signal!`](crate::hook_signal).
/// `Args` is what the intercepted call receives, `Output` what it returns;
/// the result slot a prefix may fill starts as `Output::default()`.
pub trait HookSignal: 'static {
    type Args: 'static;
    type Output: Default + 'static;

    /// Host symbol the hook is installed at.
    const SYMBOL: &'static str;
}

/// A signal raised by mod code and routed to owner-grouped callbacks.
///
/// Implemented by marker types, usually through [`mod_signal!`](crate::mod_signal).
pub trait ModSignal: 'static {
    type Args: 'static;
    type Output: Default + 'static;

    /// Name used in logs.
    const NAME: &'static str;
}
