//! Prelude for convenient imports.

pub use crate::context::{LoadDirectory, LoaderContext};
pub use crate::error::{EventError, HeapError, PluginError, PluginResult};
pub use crate::ffi::{PLUGIN_MAIN_SYMBOL, PluginMainFn};
pub use crate::heap::{HeapBlock, HeapStats, PluginHeap};
pub use crate::hooks::{HookAction, HookRegistry, HookSignal, ModSignal};
pub use crate::events::ModEventRegistry;
pub use crate::registry::ModuleId;

pub use crate::{hook_signal, mod_signal, plugin_entry};
