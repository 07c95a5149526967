//! Context handed to a module's `plugin_main`.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::error::{EventError, HeapError};
use crate::events::ModEventRegistry;
use crate::heap::PluginHeap;
use crate::hooks::{HookAction, HookRegistry, HookSignal, ModSignal};
use crate::registry::ModuleId;

/// Capacity of the load-directory field, terminator included.
pub const LOAD_DIRECTORY_CAPACITY: usize = 0x40;

/// Directory a module was loaded from, relative to the configured prefix.
///
/// Holds at most `LOAD_DIRECTORY_CAPACITY - 1` bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadDirectory(String);

impl LoadDirectory {
    pub const MAX_LEN: usize = LOAD_DIRECTORY_CAPACITY - 1;

    /// Returns `None` when `value` does not fit.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        (value.len() <= Self::MAX_LEN).then_some(Self(value))
    }

    /// Like [`LoadDirectory::new`], but logs and falls back to an empty
    /// directory when `value` does not fit.
    pub fn or_empty(value: impl Into<String>) -> Self {
        let value = value.into();
        let len = value.len();
        Self::new(value).unwrap_or_else(|| {
            warn!(len, max = Self::MAX_LEN, "Load directory too long, passing empty");
            Self::default()
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for LoadDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything a module may use while its entry point runs.
///
/// The context is owned by the session. Modules keep what they need by
/// cloning the heap or the registries; the child heap is written back.
pub struct LoaderContext {
    module_id: ModuleId,
    module_name: String,
    heap: PluginHeap,
    load_directory: LoadDirectory,
    is_reload: bool,
    child_heap: Option<PluginHeap>,
    events: Arc<ModEventRegistry>,
    hooks: Arc<HookRegistry>,
}

impl LoaderContext {
    pub fn new(
        module_id: ModuleId,
        module_name: impl Into<String>,
        heap: PluginHeap,
        load_directory: LoadDirectory,
        is_reload: bool,
        events: Arc<ModEventRegistry>,
        hooks: Arc<HookRegistry>,
    ) -> Self {
        Self {
            module_id,
            module_name: module_name.into(),
            heap,
            load_directory,
            is_reload,
            child_heap: None,
            events,
            hooks,
        }
    }

    pub fn module_id(&self) -> ModuleId {
        self.module_id
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// The session heap shared by every module.
    pub fn heap(&self) -> &PluginHeap {
        &self.heap
    }

    pub fn load_directory(&self) -> &LoadDirectory {
        &self.load_directory
    }

    pub fn is_reload(&self) -> bool {
        self.is_reload
    }

    pub fn events(&self) -> &Arc<ModEventRegistry> {
        &self.events
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    /// Registers an owner-grouped callback on behalf of this module.
    pub fn add_event<S, F>(&self, callback: F) -> Result<usize, EventError>
    where
        S: ModSignal,
        F: Fn(&mut S::Output, &S::Args) -> HookAction + Send + Sync + 'static,
    {
        self.events.add::<S, F>(self.module_id, callback)
    }

    pub fn add_hook_prefix<S, F>(&self, prefix: F) -> Result<usize, EventError>
    where
        S: HookSignal,
        F: Fn(&mut S::Output, &S::Args) -> HookAction + Send + Sync + 'static,
    {
        self.hooks.add_prefix::<S, F>(prefix)
    }

    pub fn add_hook_postfix<S, F>(&self, postfix: F) -> Result<usize, EventError>
    where
        S: HookSignal,
        F: Fn(&mut S::Output, &S::Args) + Send + Sync + 'static,
    {
        self.hooks.add_postfix::<S, F>(postfix)
    }

    /// Hands a heap back to the host for introspection. The host keeps it
    /// alive but never frees it explicitly.
    pub fn set_child_heap(&mut self, heap: PluginHeap) {
        self.child_heap = Some(heap);
    }

    /// Carves a child heap out of the session heap and records it.
    pub fn create_child_heap(&mut self, size: usize) -> Result<PluginHeap, HeapError> {
        let child = self
            .heap
            .create_child(format!("{}-child", self.module_name), size)?;
        self.child_heap = Some(child.clone());
        Ok(child)
    }

    pub fn child_heap(&self) -> Option<&PluginHeap> {
        self.child_heap.as_ref()
    }

    pub(crate) fn take_child_heap(&mut self) -> Option<PluginHeap> {
        self.child_heap.take()
    }
}

impl fmt::Debug for LoaderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderContext")
            .field("module_id", &self.module_id)
            .field("module_name", &self.module_name)
            .field("heap", &self.heap.name())
            .field("load_directory", &self.load_directory)
            .field("is_reload", &self.is_reload)
            .field("child_heap", &self.child_heap.as_ref().map(PluginHeap::name))
            .finish()
    }
}
