//! Convenience macros for declaring signals and entry points.

/// Declares a marker type implementing [`HookSignal`](crate::hooks::HookSignal).
///
/// # Example
/// ```rust,ignore
/// hook_signal!(pub PlayerJump: "Player::jump", (f32) -> bool);
/// hook_signal!(SceneTick: "Scene::tick", (u64));
/// ```
#[macro_export]
macro_rules! hook_signal {
    ($vis:vis $name:ident : $symbol:literal, ($args:ty) -> $out:ty) => {
        $vis struct $name;

        impl $crate::hooks::HookSignal for $name {
            type Args = $args;
            type Output = $out;
            const SYMBOL: &'static str = $symbol;
        }
    };
    ($vis:vis $name:ident : $symbol:literal, ($args:ty)) => {
        $crate::hook_signal!($vis $name: $symbol, ($args) -> ());
    };
}

/// Declares a marker type implementing [`ModSignal`](crate::hooks::ModSignal).
///
/// # Example
/// ```rust,ignore
/// mod_signal!(pub ImguiDraw, (()));
/// mod_signal!(pub ChatCommand, (String) -> bool);
/// ```
#[macro_export]
macro_rules! mod_signal {
    ($vis:vis $name:ident, ($args:ty) -> $out:ty) => {
        $vis struct $name;

        impl $crate::hooks::ModSignal for $name {
            type Args = $args;
            type Output = $out;
            const NAME: &'static str = stringify!($name);
        }
    };
    ($vis:vis $name:ident, ($args:ty)) => {
        $crate::mod_signal!($vis $name, ($args) -> ());
    };
}

/// Defines an entry function with the `plugin_main` signature that runs
/// `body` behind the panic boundary.
///
/// The function is not exported under any symbol; publish it through a
/// [`CodeTable`](crate::linker::CodeTable) or use the SDK's
/// `export_plugin_main!` for native modules.
///
/// # Example
/// ```rust,ignore
/// plugin_entry!(pub greeter_main, |ctx| {
///     tracing::info!(dir = ctx.load_directory().as_str(), "hello");
///     true
/// });
/// ```
#[macro_export]
macro_rules! plugin_entry {
    ($vis:vis $name:ident, $body:expr) => {
        #[allow(improper_ctypes_definitions)]
        $vis unsafe extern "C-unwind" fn $name(ctx: *mut $crate::context::LoaderContext) -> bool {
            unsafe { $crate::ffi::safety::run_entry(ctx, $body) }
        }
    };
}
