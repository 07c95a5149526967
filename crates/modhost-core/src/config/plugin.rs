//! Plugin loader configuration.

use serde::{Deserialize, Serialize};

/// Size of the per-session plugin heap (5 MiB).
pub const DEFAULT_HEAP_SIZE: usize = 5 * 1024 * 1024;

/// Size of the long-lived host pool the session heap is carved from (16 MiB).
pub const DEFAULT_HOST_POOL_SIZE: usize = 16 * 1024 * 1024;

/// Owner identifier written into every trust manifest by default.
pub const DEFAULT_PROGRAM_ID: u64 = 0x0100_0000_0000_0000;

/// Default number of (prefix, postfix) pairs a hook-bound channel can hold.
pub const DEFAULT_HOOK_CAPACITY: usize = 100;

/// Plugin loader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Root directory scanned for module images.
    #[serde(default = "default_plugin_directory")]
    pub directory: String,
    /// File extension (without the dot) a module image must carry.
    /// An empty string disables filtering.
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Size in bytes of the plugin heap created for each load session.
    #[serde(default = "default_heap_size")]
    pub heap_size: usize,
    /// Size in bytes of the host pool the plugin heap is a child of.
    #[serde(default = "default_host_pool_size")]
    pub host_pool_size: usize,
    /// Owning-program identifier stamped into the trust manifest.
    #[serde(default = "default_program_id")]
    pub program_id: u64,
    /// Prefix removed from a module's directory to form its load directory.
    #[serde(default)]
    pub strip_prefix: String,
    /// Whether to load plugins on startup.
    #[serde(default = "default_true")]
    pub auto_load: bool,
    /// Capacity of each hook-bound channel.
    #[serde(default = "default_hook_capacity")]
    pub hook_capacity: usize,
}

impl PluginConfig {
    /// The extension filter, or `None` when every file matches.
    pub fn extension_filter(&self) -> Option<&str> {
        let ext = self.extension.trim_start_matches('.');
        if ext.is_empty() { None } else { Some(ext) }
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            directory: default_plugin_directory(),
            extension: default_extension(),
            heap_size: default_heap_size(),
            host_pool_size: default_host_pool_size(),
            program_id: default_program_id(),
            strip_prefix: String::new(),
            auto_load: default_true(),
            hook_capacity: default_hook_capacity(),
        }
    }
}

fn default_plugin_directory() -> String {
    "./plugins".to_string()
}

fn default_extension() -> String {
    "nro".to_string()
}

fn default_heap_size() -> usize {
    DEFAULT_HEAP_SIZE
}

fn default_host_pool_size() -> usize {
    DEFAULT_HOST_POOL_SIZE
}

fn default_program_id() -> u64 {
    DEFAULT_PROGRAM_ID
}

fn default_true() -> bool {
    true
}

fn default_hook_capacity() -> usize {
    DEFAULT_HOOK_CAPACITY
}
