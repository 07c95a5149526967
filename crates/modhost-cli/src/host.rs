//! The host program the CLI loads modules into.
//!
//! Publishes a few host symbols, installs the host's hook sites and
//! compiles in the entry points that table images may reference.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use modhost_core::config::PluginConfig;
use modhost_core::error::AppError;
use modhost_plugin::linker::LinkBackend;
use modhost_plugin::prelude::*;
use modhost_plugin::{CodeTable, HostSymbols, LoaderSession, TableBackend};
use tracing::{debug, info};

mod_signal!(pub HostTick, (u64) -> u64);
hook_signal!(pub HostGreeting: "Host::greeting", (String) -> String);

static HOST_FRAMES: AtomicU64 = AtomicU64::new(0);

/// Host exports visible to module imports.
pub fn host_symbols() -> Arc<HostSymbols> {
    let symbols = Arc::new(HostSymbols::new());
    symbols.define_address("host::frames", &HOST_FRAMES as *const AtomicU64 as usize);
    symbols.define_function("Host::greeting", |name: &String| format!("hello, {name}"));
    symbols
}

/// Hook sites of the host, installed once for the life of the process.
pub fn install_hooks(
    symbols: &HostSymbols,
    capacity: usize,
) -> Result<Arc<HookRegistry>, AppError> {
    let hooks = Arc::new(HookRegistry::new(capacity));
    hooks
        .install_at_symbol::<HostGreeting>(symbols)
        .map_err(|e| AppError::plugin(format!("Failed to install host hooks: {e}")))?;
    Ok(hooks)
}

plugin_entry!(pub noop_main, |ctx| {
    debug!(module = ctx.module_name(), "noop module initialized");
    true
});

plugin_entry!(pub hello_main, |ctx| {
    info!(
        module = ctx.module_name(),
        load_directory = %ctx.load_directory(),
        reload = ctx.is_reload(),
        "Hello from a builtin module"
    );
    let name = ctx.module_name().to_string();
    ctx.add_event::<HostTick, _>(move |total: &mut u64, frame: &u64| {
        *total += frame;
        debug!(module = %name, frame, "tick");
        HookAction::Continue
    })
    .is_ok()
});

plugin_entry!(pub shout_main, |ctx| {
    ctx.add_hook_postfix::<HostGreeting, _>(|greeting: &mut String, _: &String| {
        *greeting = greeting.to_uppercase();
    })
    .is_ok()
});

plugin_entry!(pub arena_main, |ctx| ctx.create_child_heap(64 * 1024).is_ok());

/// Entry points compiled into the host, by code name.
pub fn builtin_code() -> CodeTable {
    let mut table = CodeTable::new();
    table.insert_entry("builtin::noop", noop_main);
    table.insert_entry("builtin::hello", hello_main);
    table.insert_entry("builtin::shout", shout_main);
    table.insert_entry("builtin::arena", arena_main);
    table
}

/// Names accepted by `pack --entry`.
pub fn builtin_names() -> Vec<String> {
    let mut names: Vec<_> = [
        "builtin::noop",
        "builtin::hello",
        "builtin::shout",
        "builtin::arena",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    names.sort();
    names
}

#[cfg(feature = "dynamic")]
fn backend(native: bool) -> Result<Box<dyn LinkBackend>, AppError> {
    if native {
        let cache = std::env::temp_dir().join("modhost-native");
        return Ok(Box::new(modhost_plugin::linker::NativeBackend::new(cache)));
    }
    Ok(Box::new(TableBackend::new(builtin_code())))
}

#[cfg(not(feature = "dynamic"))]
fn backend(native: bool) -> Result<Box<dyn LinkBackend>, AppError> {
    if native {
        return Err(AppError::not_implemented(
            "native modules need the `dynamic` feature",
        ));
    }
    Ok(Box::new(TableBackend::new(builtin_code())))
}

/// Everything the CLI needs to run a session.
pub struct Host {
    pub session: LoaderSession,
    pub hooks: Arc<HookRegistry>,
}

impl Host {
    pub fn new(config: &PluginConfig, native: bool) -> Result<Self, AppError> {
        let symbols = host_symbols();
        let hooks = install_hooks(&symbols, config.hook_capacity)?;
        let session = LoaderSession::new(config.clone(), backend(native)?, symbols, hooks.clone())?;
        Ok(Self { session, hooks })
    }

    /// Raises one host frame on every module listening for ticks.
    pub fn tick(&self) -> u64 {
        let frame = HOST_FRAMES.fetch_add(1, Ordering::SeqCst) + 1;
        self.session.events().run::<HostTick>(&frame)
    }

    /// Runs the greeting hook site.
    pub fn greet(&self, name: &str) -> Result<String, AppError> {
        self.hooks
            .invoke::<HostGreeting>(&name.to_string())
            .map_err(|e| AppError::plugin(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table_matches_names() {
        let table = builtin_code();
        for name in builtin_names() {
            assert!(table.get(&name).is_some(), "{name} missing");
        }
    }

    #[test]
    fn test_greeting_hook_runs_original() {
        let symbols = host_symbols();
        let hooks = install_hooks(&symbols, 4).unwrap();
        assert_eq!(
            hooks.invoke::<HostGreeting>(&"mod".to_string()).unwrap(),
            "hello, mod"
        );
    }
}
