//! # modhost-plugin-sdk
//!
//! SDK for writing ModHost plugin modules.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use modhost_plugin_sdk::prelude::*;
//!
//! mod_signal!(pub Frame, (u64));
//!
//! fn init(ctx: &mut LoaderContext) -> bool {
//!     info!(dir = %ctx.load_directory(), reload = ctx.is_reload(), "Hello from a module");
//!     ctx.add_event::<Frame, _>(|_: &mut (), frame: &u64| {
//!         debug!(frame, "tick");
//!         HookAction::Continue
//!     })
//!     .is_ok()
//! }
//!
//! export_plugin_main!(init);
//! ```
//!
//! Build the crate as a `cdylib`, then wrap the shared object with
//! `modhost pack --native`. The module must be built with the same
//! toolchain and `modhost-plugin` version as the host, since the loader
//! context is passed by pointer.

pub mod macros;

pub use modhost_plugin;
pub use tracing;

/// Prelude for convenient imports.
pub mod prelude {
    pub use modhost_plugin::prelude::*;
    pub use tracing::{debug, error, info, trace, warn};

    pub use crate::export_plugin_main;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::prelude::*;
    use modhost_plugin::ModEventRegistry;

    mod_signal!(Frame, (u64) -> u64);

    fn init(ctx: &mut LoaderContext) -> bool {
        ctx.add_event::<Frame, _>(|out: &mut u64, frame: &u64| {
            *out = frame * 2;
            HookAction::Continue
        })
        .is_ok()
    }

    export_plugin_main!(init);

    #[test]
    fn test_exported_entry_runs_handler() {
        let events = Arc::new(ModEventRegistry::new());
        let id = ModuleId::new(1);
        events.register_owner(id, "sdk");

        let mut ctx = LoaderContext::new(
            id,
            "sdk",
            PluginHeap::root("sdk", 16 * 1024).unwrap(),
            LoadDirectory::default(),
            false,
            events.clone(),
            Arc::new(HookRegistry::new(4)),
        );

        assert!(unsafe { plugin_main(&mut ctx) });
        assert_eq!(events.run::<Frame>(&21), 42);
        assert!(!unsafe { plugin_main(std::ptr::null_mut()) });
    }
}
