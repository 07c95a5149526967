//! Owner-grouped event channels: callbacks raised by mod code, indexed by
//! the module that registered them so a module's callbacks can be revoked
//! in bulk.

pub mod channel;
pub mod registry;

pub use channel::{ModCallback, ModEventChannel};
pub use registry::ModEventRegistry;
