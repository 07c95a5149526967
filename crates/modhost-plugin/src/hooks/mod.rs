//! Hook-bound event channels: prefix/postfix callbacks wrapped around one
//! host interception point each.

pub mod definitions;
pub mod dispatcher;
pub mod registry;

pub use definitions::{HookAction, HookSignal, ModSignal};
pub use dispatcher::{HookChannel, Original, Postfix, Prefix};
pub use registry::HookRegistry;
