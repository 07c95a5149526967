//! Module linker: sizes, links and unlinks module images against one
//! registered trust manifest.
//!
//! [`ModuleLinker`] owns the linker state and enforces its preconditions;
//! the actual binding is done by a [`LinkBackend`].

pub mod symbols;
pub mod table;

#[cfg(feature = "dynamic")]
pub mod native;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{PluginError, PluginResult};
use crate::fingerprint::Fingerprint;
use crate::manifest::TrustManifest;

pub use symbols::{HostFn, HostSymbols, SymbolResolver};
pub use table::{CodeTable, TableBackend};

#[cfg(feature = "dynamic")]
pub use native::NativeBackend;

/// Backend-scoped identifier of one linked image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendHandle(pub u64);

/// Linker-scoped identifier of one linked image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkHandle(u64);

/// Binds module images to executable code.
pub trait LinkBackend: Send + Sync + fmt::Debug {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Scratch bytes the image needs once linked. Fails with
    /// [`PluginError::InvalidImage`] when the bytes are not a module this
    /// backend understands.
    fn query_size(&self, image: &[u8]) -> PluginResult<usize>;

    /// Links `image`, binding every import eagerly.
    fn link(
        &mut self,
        image: &[u8],
        scratch: &mut [u8],
        symbols: &dyn SymbolResolver,
    ) -> PluginResult<BackendHandle>;

    /// Address of an exported symbol.
    fn lookup(&self, handle: BackendHandle, symbol: &str) -> Option<usize>;

    /// Releases a linked image. Scratch memory is not touched.
    fn unlink(&mut self, handle: BackendHandle);
}

#[derive(Debug)]
struct RegisteredManifest {
    owner_id: u64,
    trusted: HashSet<Fingerprint>,
}

/// Stateful front of a [`LinkBackend`].
#[derive(Debug)]
pub struct ModuleLinker {
    backend: Box<dyn LinkBackend>,
    symbols: Arc<HostSymbols>,
    initialized: bool,
    manifest: Option<RegisteredManifest>,
    live: HashMap<LinkHandle, BackendHandle>,
    next_handle: u64,
}

impl ModuleLinker {
    pub fn new(backend: Box<dyn LinkBackend>, symbols: Arc<HostSymbols>) -> Self {
        Self {
            backend,
            symbols,
            initialized: false,
            manifest: None,
            live: HashMap::new(),
            next_handle: 1,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn symbols(&self) -> &Arc<HostSymbols> {
        &self.symbols
    }

    /// Brings the linker up. Idempotent.
    pub fn initialize(&mut self) {
        if !self.initialized {
            debug!(backend = self.backend.name(), "Module linker initialized");
        }
        self.initialized = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Tears the linker down. Every module must be unlinked first.
    pub fn finalize(&mut self) -> PluginResult<()> {
        if !self.live.is_empty() {
            return Err(PluginError::LinkerBusy(self.live.len()));
        }
        self.manifest = None;
        self.initialized = false;
        debug!(backend = self.backend.name(), "Module linker finalized");
        Ok(())
    }

    /// Registers an encoded trust manifest issued for `owner_id`.
    pub fn register_manifest(&mut self, bytes: &[u8], owner_id: u64) -> PluginResult<()> {
        if !self.initialized {
            return Err(PluginError::LinkerNotInitialized);
        }
        if self.manifest.is_some() {
            return Err(PluginError::ManifestRegistration(
                "a manifest is already registered".to_string(),
            ));
        }

        let parsed = TrustManifest::parse(bytes)?;
        if parsed.owner_id != owner_id {
            return Err(PluginError::ManifestRegistration(format!(
                "owner {:#018x} does not match program {:#018x}",
                parsed.owner_id, owner_id
            )));
        }

        info!(
            owner_id = format_args!("{owner_id:#018x}"),
            fingerprints = parsed.fingerprints.len(),
            "Trust manifest registered"
        );
        self.manifest = Some(RegisteredManifest {
            owner_id,
            trusted: parsed.fingerprints.into_iter().collect(),
        });
        Ok(())
    }

    /// Drops the registered manifest, if any.
    pub fn unregister_manifest(&mut self) {
        if let Some(manifest) = self.manifest.take() {
            debug!(
                owner_id = format_args!("{:#018x}", manifest.owner_id),
                "Trust manifest unregistered"
            );
        }
    }

    pub fn has_manifest(&self) -> bool {
        self.manifest.is_some()
    }

    pub fn query_size(&self, image: &[u8]) -> PluginResult<usize> {
        self.backend.query_size(image)
    }

    /// Links one image into `scratch`.
    ///
    /// Preconditions are checked before any memory is touched: the linker
    /// must be initialized and a manifest registered.
    pub fn link(&mut self, image: &[u8], scratch: &mut [u8]) -> PluginResult<LinkHandle> {
        if !self.initialized {
            return Err(PluginError::LinkerNotInitialized);
        }
        let manifest = self
            .manifest
            .as_ref()
            .ok_or(PluginError::NoManifestRegistered)?;

        let fingerprint =
            Fingerprint::of_image(image).map_err(|e| PluginError::LinkFailure(e.to_string()))?;
        if !manifest.trusted.contains(&fingerprint) {
            return Err(PluginError::LinkFailure(format!(
                "fingerprint {fingerprint} is not in the registered manifest"
            )));
        }

        let required = self.backend.query_size(image)?;
        if scratch.len() < required {
            return Err(PluginError::LinkFailure(format!(
                "scratch buffer of {} bytes, {required} required",
                scratch.len()
            )));
        }

        let backend_handle = self.backend.link(image, scratch, self.symbols.as_ref())?;
        let handle = LinkHandle(self.next_handle);
        self.next_handle += 1;
        self.live.insert(handle, backend_handle);
        Ok(handle)
    }

    /// Resolves an exported symbol of a linked module.
    pub fn lookup_symbol(&self, handle: LinkHandle, symbol: &str) -> PluginResult<usize> {
        self.live
            .get(&handle)
            .and_then(|backend_handle| self.backend.lookup(*backend_handle, symbol))
            .ok_or_else(|| PluginError::SymbolNotFound(symbol.to_string()))
    }

    /// Unlinks a module. Unknown handles are logged and ignored.
    pub fn unlink(&mut self, handle: LinkHandle) {
        match self.live.remove(&handle) {
            Some(backend_handle) => self.backend.unlink(backend_handle),
            None => warn!(handle = handle.0, "Unlink of unknown module handle"),
        }
    }

    /// Number of currently linked modules.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}
