//! Loader session: owns every piece of plugin state for one load/unload
//! cycle and drives modules through
//! `Discovered → Validated → Linked → Initialized`.
//!
//! Per-module failures are logged and isolated. Only a rejected trust
//! manifest aborts a load.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use modhost_core::config::plugin::PluginConfig;

use crate::context::{LoadDirectory, LoaderContext};
use crate::discovery::{discover, FileSystem, LocalFileSystem};
use crate::error::{PluginError, PluginResult};
use crate::events::ModEventRegistry;
use crate::ffi::abi::entry_from_address;
use crate::ffi::{invoke_entry_point, PLUGIN_MAIN_SYMBOL};
use crate::heap::{HeapBlock, HeapStats, PluginHeap, DEFAULT_ALIGN};
use crate::hooks::HookRegistry;
use crate::linker::{HostSymbols, LinkBackend, LinkHandle, ModuleLinker};
use crate::manifest::TrustManifest;
use crate::registry::{Admission, EntryOutcome, ModuleState, PluginModule, PluginRegistry};

/// Tally of one `load` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub is_reload: bool,
    pub discovered: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub link_failures: usize,
    pub entry_failures: usize,
    pub initialized: usize,
}

/// Plugin state of one host.
pub struct LoaderSession {
    id: Uuid,
    config: PluginConfig,
    fs: Arc<dyn FileSystem>,
    host_pool: PluginHeap,
    heap: Option<PluginHeap>,
    linker: ModuleLinker,
    registry: PluginRegistry,
    events: Arc<ModEventRegistry>,
    hooks: Arc<HookRegistry>,
    manifest: Option<TrustManifest>,
    loaded: bool,
}

impl LoaderSession {
    /// Creates a session reading modules from the local filesystem.
    ///
    /// `hooks` is shared with the host and outlives the session.
    pub fn new(
        config: PluginConfig,
        backend: Box<dyn LinkBackend>,
        symbols: Arc<HostSymbols>,
        hooks: Arc<HookRegistry>,
    ) -> PluginResult<Self> {
        Self::with_filesystem(config, backend, symbols, hooks, Arc::new(LocalFileSystem))
    }

    pub fn with_filesystem(
        config: PluginConfig,
        backend: Box<dyn LinkBackend>,
        symbols: Arc<HostSymbols>,
        hooks: Arc<HookRegistry>,
        fs: Arc<dyn FileSystem>,
    ) -> PluginResult<Self> {
        let id = Uuid::new_v4();
        let host_pool = PluginHeap::root("host-pool", config.host_pool_size)?;
        let linker = ModuleLinker::new(backend, symbols);

        info!(
            session_id = %id,
            backend = linker.backend_name(),
            host_pool = config.host_pool_size,
            heap_size = config.heap_size,
            "Loader session created"
        );

        Ok(Self {
            id,
            config,
            fs,
            host_pool,
            heap: None,
            linker,
            registry: PluginRegistry::new(),
            events: Arc::new(ModEventRegistry::new()),
            hooks,
            manifest: None,
            loaded: false,
        })
    }

    /// Loads every module under `root`.
    ///
    /// Fails only when the session is already loaded, the session heap
    /// cannot be created, or the trust manifest is rejected. In the last
    /// case every accepted module is released before returning.
    pub fn load(&mut self, root: &Path, is_reload: bool) -> PluginResult<LoadReport> {
        if self.loaded {
            return Err(PluginError::AlreadyLoaded);
        }

        let mut report = LoadReport {
            is_reload,
            ..LoadReport::default()
        };

        self.linker.initialize();
        let heap = self.host_pool.create_child("plugin-heap", self.config.heap_size)?;

        // Discovery and validation
        let files = discover(self.fs.as_ref(), root, self.config.extension_filter());
        report.discovered = files.len();

        for file in files {
            let path = file.path.clone();
            match self.registry.validate_and_register(file, &heap, &self.linker) {
                Ok(Admission::Accepted(id)) => {
                    report.accepted += 1;
                    debug!(module_id = %id, path = %path.display(), "Module accepted");
                }
                Ok(Admission::Duplicate(fingerprint)) => {
                    report.duplicates += 1;
                    info!(
                        path = %path.display(),
                        fingerprint = %fingerprint.short(),
                        "Duplicate module skipped"
                    );
                }
                Ok(Admission::Invalid(reason)) => {
                    report.rejected += 1;
                    warn!(path = %path.display(), reason = %reason, "Rejected invalid module image");
                }
                Err(e) => {
                    report.rejected += 1;
                    warn!(path = %path.display(), error = %e, "Module could not be registered");
                }
            }
        }

        // Trust manifest
        let manifest = match self.register_manifest(&heap) {
            Ok(manifest) => manifest,
            Err(e) => {
                error!(root = %root.display(), error = %e, "Trust manifest rejected, aborting load");
                self.release(heap);
                return Err(e);
            }
        };

        // Link and initialize
        for module in self.registry.modules_mut() {
            let handle = match link_module(&mut self.linker, &heap, module) {
                Ok(handle) => handle,
                Err(e) => {
                    report.link_failures += 1;
                    module.state = ModuleState::LinkFailed;
                    warn!(module = %module.name, error = %e, "Module link failed");
                    continue;
                }
            };

            self.events.register_owner(module.id, module.name.clone());
            let load_directory = load_directory_of(module, &self.config.strip_prefix);
            let mut ctx = LoaderContext::new(
                module.id,
                module.name.clone(),
                heap.clone(),
                load_directory,
                is_reload,
                self.events.clone(),
                self.hooks.clone(),
            );

            let outcome = run_entry_point(&self.linker, handle, module, &mut ctx);
            module.child_heap = ctx.take_child_heap();

            match outcome {
                Ok(()) => {
                    report.initialized += 1;
                    module.state = ModuleState::Initialized(EntryOutcome::Succeeded);
                    info!(
                        module = %module.name,
                        fingerprint = %module.fingerprint.short(),
                        "Module initialized"
                    );
                }
                Err(e) => {
                    report.entry_failures += 1;
                    module.state = ModuleState::Initialized(EntryOutcome::Failed);
                    let revoked = self.events.retire_owner(module.id);
                    warn!(module = %module.name, error = %e, revoked, "Module initialization failed");
                }
            }
        }

        self.heap = Some(heap);
        self.manifest = Some(manifest);
        self.loaded = true;

        info!(
            session_id = %self.id,
            root = %root.display(),
            is_reload,
            discovered = report.discovered,
            accepted = report.accepted,
            duplicates = report.duplicates,
            rejected = report.rejected,
            link_failures = report.link_failures,
            entry_failures = report.entry_failures,
            initialized = report.initialized,
            "Plugins loaded"
        );
        Ok(report)
    }

    /// [`load`](Self::load) reduced to success or failure. The details go
    /// to the log.
    pub fn load_all(&mut self, root: &Path, is_reload: bool) -> bool {
        match self.load(root, is_reload) {
            Ok(_) => true,
            Err(e) => {
                error!(root = %root.display(), error = %e, "Plugin load failed");
                false
            }
        }
    }

    /// Unlinks every module, clears owner-grouped events and hook callbacks
    /// and releases the session heap. Installed hooks stay wired.
    pub fn unload_all(&mut self) -> bool {
        if !self.loaded {
            debug!(session_id = %self.id, "Nothing to unload");
            return true;
        }

        // Callbacks go first: their code may live in the modules.
        self.events.reset();
        self.hooks.clear_all();

        let modules = self.registry.reset();
        let count = modules.len();
        for module in &modules {
            if let Some(handle) = module.link {
                self.linker.unlink(handle);
            }
        }
        drop(modules);

        self.manifest = None;
        self.linker.unregister_manifest();

        let mut ok = true;
        if let Some(heap) = self.heap.take() {
            if let Err(e) = heap.free_all() {
                error!(heap = heap.name(), error = %e, "Plugin heap release failed");
                ok = false;
            }
        }
        if !self.release_host_pool() {
            ok = false;
        }
        if let Err(e) = self.linker.finalize() {
            error!(error = %e, "Module linker finalize failed");
            ok = false;
        }

        self.loaded = false;
        info!(session_id = %self.id, modules = count, "Plugins unloaded");
        ok
    }

    /// Unloads everything, then loads `root` again with the reload flag set.
    pub fn reload(&mut self, root: &Path) -> bool {
        if !self.unload_all() {
            return false;
        }
        self.load_all(root, true)
    }

    /// Revokes the owner-grouped events of the first module whose name
    /// contains `name`.
    ///
    /// The module stays linked and its memory stays allocated until
    /// [`unload_all`](Self::unload_all).
    pub fn unload_plugin_by_name(&mut self, name: &str) -> bool {
        match self.registry.index_by_name(name) {
            Some(index) => self.unload_plugin_by_index(index),
            None => {
                warn!(name, "No plugin matches name");
                false
            }
        }
    }

    /// Revokes the owner-grouped events of the module at `index` and refuses
    /// any it registers afterwards.
    ///
    /// The module stays linked and its memory stays allocated until
    /// [`unload_all`](Self::unload_all).
    pub fn unload_plugin_by_index(&mut self, index: usize) -> bool {
        let Some(module) = self.registry.get(index) else {
            warn!(index, count = self.registry.len(), "Plugin index out of range");
            return false;
        };
        let removed = self.events.retire_owner(module.id);
        warn!(
            module = %module.name,
            removed,
            "Single-module unload only revokes events; module stays linked until unload_all"
        );
        true
    }

    fn register_manifest(&mut self, heap: &PluginHeap) -> PluginResult<TrustManifest> {
        let manifest = self.registry.build_manifest(heap, self.config.program_id)?;
        let bytes = manifest.bytes()?;
        self.linker.register_manifest(&bytes, self.config.program_id)?;
        drop(bytes);
        Ok(manifest)
    }

    /// Tears down a load that failed before any module was linked.
    fn release(&mut self, heap: PluginHeap) {
        self.registry.reset();
        self.manifest = None;
        self.linker.unregister_manifest();
        if let Err(e) = heap.free_all() {
            error!(heap = heap.name(), error = %e, "Plugin heap release failed");
        }
        drop(heap);
        self.release_host_pool();
        if let Err(e) = self.linker.finalize() {
            error!(error = %e, "Module linker finalize failed");
        }
    }

    /// Returns every carve to the host pool. Heap handles still held by
    /// modules go stale instead of pinning pool memory.
    fn release_host_pool(&self) -> bool {
        match self.host_pool.free_all() {
            Ok(()) => true,
            Err(e) => {
                error!(heap = self.host_pool.name(), error = %e, "Host pool release failed");
                false
            }
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn plugin_count(&self) -> usize {
        self.registry.len()
    }

    /// Display names in discovery order.
    pub fn plugin_names(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn plugins(&self) -> &[PluginModule] {
        self.registry.modules()
    }

    pub fn plugin(&self, index: usize) -> Option<&PluginModule> {
        self.registry.get(index)
    }

    /// Index of the first plugin whose name contains `name`.
    pub fn plugin_index_by_name(&self, name: &str) -> Option<usize> {
        self.registry.index_by_name(name)
    }

    /// Session heap; present while loaded.
    pub fn heap(&self) -> Option<&PluginHeap> {
        self.heap.as_ref()
    }

    pub fn heap_stats(&self) -> Option<HeapStats> {
        self.heap.as_ref().map(PluginHeap::stats)
    }

    pub fn host_pool_stats(&self) -> HeapStats {
        self.host_pool.stats()
    }

    pub fn manifest(&self) -> Option<&TrustManifest> {
        self.manifest.as_ref()
    }

    pub fn linker(&self) -> &ModuleLinker {
        &self.linker
    }

    pub fn events(&self) -> &Arc<ModEventRegistry> {
        &self.events
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }
}

impl Drop for LoaderSession {
    fn drop(&mut self) {
        if self.loaded {
            self.unload_all();
        }
    }
}

impl std::fmt::Debug for LoaderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderSession")
            .field("id", &self.id)
            .field("loaded", &self.loaded)
            .field("plugins", &self.registry.len())
            .field("linker", &self.linker)
            .finish()
    }
}

/// Allocates scratch memory for `module` and links it.
fn link_module(
    linker: &mut ModuleLinker,
    heap: &PluginHeap,
    module: &mut PluginModule,
) -> PluginResult<LinkHandle> {
    let mut scratch: HeapBlock =
        heap.allocate_zeroed(module.scratch_size.max(DEFAULT_ALIGN), DEFAULT_ALIGN)?;
    let handle = {
        let image = module.image.bytes()?;
        let mut buffer = scratch.bytes_mut()?;
        linker.link(&image, &mut buffer)?
    };
    module.scratch = Some(scratch);
    module.link = Some(handle);
    module.state = ModuleState::Linked;
    Ok(handle)
}

/// Resolves and runs `plugin_main` behind the panic boundary.
fn run_entry_point(
    linker: &ModuleLinker,
    handle: LinkHandle,
    module: &PluginModule,
    ctx: &mut LoaderContext,
) -> PluginResult<()> {
    let address = linker.lookup_symbol(handle, PLUGIN_MAIN_SYMBOL)?;
    // SAFETY: modules export `plugin_main` with the `PluginMainFn` signature.
    let entry = unsafe { entry_from_address(address) }
        .ok_or_else(|| PluginError::SymbolNotFound(PLUGIN_MAIN_SYMBOL.to_string()))?;

    invoke_entry_point(entry, ctx).map_err(|reason| PluginError::EntryPointFailure {
        module: module.name.clone(),
        reason,
    })
}

/// The module's directory with the configured prefix removed.
fn load_directory_of(module: &PluginModule, strip_prefix: &str) -> LoadDirectory {
    let directory = module.directory.as_path();
    let relative = if strip_prefix.is_empty() {
        directory
    } else {
        directory.strip_prefix(strip_prefix).unwrap_or(directory)
    };
    LoadDirectory::or_empty(relative.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageBuilder;
    use crate::linker::{CodeTable, TableBackend};

    unsafe extern "C-unwind" fn ok_main(_: *mut LoaderContext) -> bool {
        true
    }

    fn session() -> LoaderSession {
        let mut table = CodeTable::new();
        table.insert_entry("ok::main", ok_main);
        let config = PluginConfig {
            heap_size: 256 * 1024,
            host_pool_size: 1024 * 1024,
            ..PluginConfig::default()
        };
        LoaderSession::new(
            config,
            Box::new(TableBackend::new(table)),
            Arc::new(HostSymbols::new()),
            Arc::new(HookRegistry::new(8)),
        )
        .unwrap()
    }

    fn write(dir: &Path, name: &str, tag: u8) {
        let image = ImageBuilder::table()
            .export(PLUGIN_MAIN_SYMBOL, "ok::main")
            .bss(16)
            .payload(vec![tag; 4])
            .build();
        std::fs::write(dir.join(name), image).unwrap();
    }

    #[test]
    fn test_empty_root_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session();
        let report = session.load(&dir.path().join("missing"), false).unwrap();
        assert_eq!(report.discovered, 0);
        assert!(session.is_loaded());
        assert_eq!(session.plugin_count(), 0);
        assert!(session.unload_all());
    }

    #[test]
    fn test_second_load_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.nro", 1);
        let mut session = session();
        assert!(session.load_all(dir.path(), false));
        assert!(matches!(
            session.load(dir.path(), false),
            Err(PluginError::AlreadyLoaded)
        ));
        assert!(session.reload(dir.path()));
        assert_eq!(session.plugin_count(), 1);
    }

    #[test]
    fn test_unload_releases_heap_and_linker() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.nro", 1);
        write(dir.path(), "b.nro", 2);
        let mut session = session();
        let report = session.load(dir.path(), false).unwrap();
        assert_eq!(report.initialized, 2);
        assert_eq!(session.linker().live_count(), 2);
        assert!(session.heap_stats().unwrap().used > 0);

        assert!(session.unload_all());
        assert!(session.heap().is_none());
        assert!(!session.linker().is_initialized());
        assert_eq!(session.linker().live_count(), 0);
        assert!(session.manifest().is_none());
    }

    #[test]
    fn test_load_directory_strips_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("skins");
        std::fs::create_dir(&sub).unwrap();
        write(&sub, "a.nro", 1);

        let mut session = session();
        session.load(dir.path(), false).unwrap();
        let module = session.plugin(0).unwrap();

        let dir_str = dir.path().to_string_lossy().into_owned();
        assert_eq!(load_directory_of(module, &dir_str).as_str(), "skins");
        assert_eq!(load_directory_of(module, "/elsewhere").as_str(), sub.to_string_lossy());
    }
}
