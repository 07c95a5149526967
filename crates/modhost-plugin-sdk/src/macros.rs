//! Entry-point export macro.

/// Exports `handler` as the module's `plugin_main`.
///
/// `handler` is any `FnOnce(&mut LoaderContext) -> bool`. A panic inside it
/// is caught and reported to the host as a failed initialization.
///
/// # Example
/// ```rust,ignore
/// export_plugin_main!(|ctx| {
///     info!(module = ctx.module_name(), "loaded");
///     true
/// });
/// ```
#[macro_export]
macro_rules! export_plugin_main {
    ($handler:expr) => {
        #[unsafe(no_mangle)]
        #[allow(improper_ctypes_definitions)]
        pub unsafe extern "C-unwind" fn plugin_main(
            ctx: *mut $crate::modhost_plugin::context::LoaderContext,
        ) -> bool {
            unsafe { $crate::modhost_plugin::ffi::run_entry(ctx, $handler) }
        }
    };
}
