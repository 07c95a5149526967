//! # modhost-plugin
//!
//! Plugin loading engine for ModHost. Provides:
//!
//! - Module discovery, validation and content fingerprinting
//! - A bounded, thread-safe plugin heap with bulk release
//! - Trust manifest construction and a manifest-gated module linker
//! - Hook-bound channels (prefix/original/postfix) for host interception points
//! - Owner-grouped event channels with per-module revocation
//! - A loader session driving load, unload and reload
//! - Optional native loading via `libloading` (feature `dynamic`)

pub mod context;
pub mod discovery;
pub mod error;
pub mod events;
pub mod ffi;
pub mod fingerprint;
pub mod heap;
pub mod hooks;
pub mod image;
pub mod linker;
pub mod macros;
pub mod manifest;
pub mod prelude;
pub mod registry;
pub mod session;

pub use context::{LoadDirectory, LoaderContext};
pub use error::{PluginError, PluginResult};
pub use events::ModEventRegistry;
pub use fingerprint::Fingerprint;
pub use heap::{HeapBlock, HeapStats, PluginHeap};
pub use hooks::{HookAction, HookRegistry, HookSignal, ModSignal};
pub use linker::{CodeTable, HostSymbols, LinkBackend, ModuleLinker, TableBackend};
pub use registry::{ModuleId, ModuleState, PluginModule, PluginRegistry};
pub use session::{LoadReport, LoaderSession};
