//! Panic boundary around module entry points.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::context::LoaderContext;

use super::abi::PluginMainFn;

/// Calls `entry` with `ctx`, converting `false` and panics into an error
/// message.
pub fn invoke_entry_point(entry: PluginMainFn, ctx: &mut LoaderContext) -> Result<(), String> {
    let raw: *mut LoaderContext = ctx;
    match panic::catch_unwind(AssertUnwindSafe(|| unsafe { entry(raw) })) {
        Ok(true) => Ok(()),
        Ok(false) => Err("plugin_main returned false".to_string()),
        Err(payload) => Err(format!("plugin_main panicked: {}", panic_message(payload.as_ref()))),
    }
}

/// Module-side half of the boundary: dereferences the raw context and runs
/// `body` without letting a panic escape.
///
/// # Safety
/// `ctx` must be null or point to a live `LoaderContext` that is not
/// aliased for the duration of the call.
pub unsafe fn run_entry<F>(ctx: *mut LoaderContext, body: F) -> bool
where
    F: FnOnce(&mut LoaderContext) -> bool,
{
    let Some(ctx) = (unsafe { ctx.as_mut() }) else {
        return false;
    };
    panic::catch_unwind(AssertUnwindSafe(|| body(ctx))).unwrap_or(false)
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_variants() {
        let err = panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(err.as_ref()), "boom");

        let err = panic::catch_unwind(|| panic!("{} {}", "formatted", 1)).unwrap_err();
        assert_eq!(panic_message(err.as_ref()), "formatted 1");
    }

    #[test]
    fn test_run_entry_rejects_null() {
        assert!(!unsafe { run_entry(std::ptr::null_mut(), |_| true) });
    }
}
