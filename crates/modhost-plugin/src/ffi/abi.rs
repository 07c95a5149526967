//! Entry-point ABI shared by the host and plugin modules.
//!
//! Every module exports `plugin_main`:
//!
//! ```c
//! bool plugin_main(LoaderContext* ctx);
//! ```
//!
//! The context stays owned by the host; the module may only use it for the
//! duration of the call, except for the heap and event handles it clones.

use crate::context::LoaderContext;

/// Name of the exported entry point.
pub const PLUGIN_MAIN_SYMBOL: &str = "plugin_main";

/// Signature of `plugin_main`. Unwinding is allowed to cross the boundary
/// so the host can turn a panic into an entry-point failure.
pub type PluginMainFn = unsafe extern "C-unwind" fn(*mut LoaderContext) -> bool;

/// Reinterprets a resolved symbol address as an entry point.
///
/// # Safety
/// `address` must be the address of a function with the
/// [`PluginMainFn`] signature.
pub unsafe fn entry_from_address(address: usize) -> Option<PluginMainFn> {
    if address == 0 {
        return None;
    }
    Some(unsafe { std::mem::transmute::<*const (), PluginMainFn>(address as *const ()) })
}
