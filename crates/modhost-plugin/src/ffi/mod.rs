//! Entry-point ABI and the panic boundary around it.

pub mod abi;
pub mod safety;

pub use abi::{PluginMainFn, PLUGIN_MAIN_SYMBOL};
pub use safety::{invoke_entry_point, run_entry};
