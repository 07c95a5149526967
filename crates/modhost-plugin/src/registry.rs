//! Plugin registry: validates, fingerprints and deduplicates module images
//! and tracks the modules accepted in the current session.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::discovery::DiscoveredFile;
use crate::error::{PluginError, PluginResult};
use crate::fingerprint::Fingerprint;
use crate::heap::{HeapBlock, HeapStats, PluginHeap, PAGE_SIZE};
use crate::linker::{LinkHandle, ModuleLinker};
use crate::manifest::TrustManifest;

/// Session-scoped identifier of an accepted module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ModuleId(u32);

impl ModuleId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of running a module's entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOutcome {
    Succeeded,
    Failed,
}

/// Lifecycle state of an accepted module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    Validated,
    Linked,
    LinkFailed,
    Initialized(EntryOutcome),
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validated => write!(f, "validated"),
            Self::Linked => write!(f, "linked"),
            Self::LinkFailed => write!(f, "link failed"),
            Self::Initialized(EntryOutcome::Succeeded) => write!(f, "initialized"),
            Self::Initialized(EntryOutcome::Failed) => write!(f, "init failed"),
        }
    }
}

/// Result of offering one image to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Kept; scratch memory is not allocated yet.
    Accepted(ModuleId),
    /// Same content as an earlier module; memory already released.
    Duplicate(Fingerprint),
    /// Not a module image; memory already released.
    Invalid(String),
}

/// One accepted module.
#[derive(Debug)]
pub struct PluginModule {
    pub(crate) id: ModuleId,
    pub(crate) name: String,
    pub(crate) file_name: String,
    pub(crate) directory: PathBuf,
    pub(crate) fingerprint: Fingerprint,
    pub(crate) image: HeapBlock,
    pub(crate) scratch_size: usize,
    pub(crate) scratch: Option<HeapBlock>,
    pub(crate) link: Option<LinkHandle>,
    pub(crate) state: ModuleState,
    pub(crate) child_heap: Option<PluginHeap>,
    pub(crate) loaded_at: DateTime<Utc>,
}

impl PluginModule {
    pub fn id(&self) -> ModuleId {
        self.id
    }

    /// Display name: the file stem.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File name including extension.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Directory the image was discovered in.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn image_size(&self) -> usize {
        self.image.len()
    }

    /// Scratch size reported by the linker's size query.
    pub fn scratch_size(&self) -> usize {
        self.scratch_size
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    pub fn is_linked(&self) -> bool {
        self.link.is_some()
    }

    pub fn entry_succeeded(&self) -> bool {
        self.state == ModuleState::Initialized(EntryOutcome::Succeeded)
    }

    /// Heap the module created for itself during initialization.
    pub fn child_heap(&self) -> Option<&PluginHeap> {
        self.child_heap.as_ref()
    }

    pub fn child_heap_stats(&self) -> Option<HeapStats> {
        self.child_heap.as_ref().map(PluginHeap::stats)
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

/// Accepted modules of one load session.
#[derive(Debug)]
pub struct PluginRegistry {
    /// Membership set; `None` once the manifest has been built.
    fingerprints: Option<HashSet<Fingerprint>>,
    modules: Vec<PluginModule>,
    next_id: u32,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            fingerprints: Some(HashSet::new()),
            modules: Vec::new(),
            next_id: 1,
        }
    }

    /// Copies `file` into page-aligned heap memory, sizes it through the
    /// linker and admits it unless its fingerprint is already known.
    ///
    /// Rejected images are released before returning.
    pub fn validate_and_register(
        &mut self,
        file: DiscoveredFile,
        heap: &PluginHeap,
        linker: &ModuleLinker,
    ) -> PluginResult<Admission> {
        let Some(fingerprints) = self.fingerprints.as_mut() else {
            return Err(PluginError::RegistrySealed);
        };

        let DiscoveredFile { path, bytes, .. } = file;
        let mut image = heap.allocate(bytes.len(), PAGE_SIZE)?;
        image.bytes_mut()?.copy_from_slice(&bytes);
        drop(bytes);

        let (scratch_size, fingerprint) = {
            let view = image.bytes()?;
            let scratch_size = match linker.query_size(&view) {
                Ok(size) => size,
                Err(e) => return Ok(Admission::Invalid(e.to_string())),
            };
            let fingerprint = match Fingerprint::of_image(&view) {
                Ok(fp) => fp,
                Err(e) => return Ok(Admission::Invalid(e.to_string())),
            };
            (scratch_size, fingerprint)
        };

        if !fingerprints.insert(fingerprint) {
            debug!(path = %path.display(), fingerprint = %fingerprint.short(), "Duplicate image released");
            return Ok(Admission::Duplicate(fingerprint));
        }

        let id = ModuleId(self.next_id);
        self.next_id += 1;

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_name = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let directory = path.parent().map(Path::to_path_buf).unwrap_or_default();

        self.modules.push(PluginModule {
            id,
            name,
            file_name,
            directory,
            fingerprint,
            image,
            scratch_size,
            scratch: None,
            link: None,
            state: ModuleState::Validated,
            child_heap: None,
            loaded_at: Utc::now(),
        });
        Ok(Admission::Accepted(id))
    }

    /// Builds the trust manifest over the accepted modules, in acceptance
    /// order, and seals the registry.
    pub fn build_manifest(&mut self, heap: &PluginHeap, owner_id: u64) -> PluginResult<TrustManifest> {
        if self.fingerprints.is_none() {
            return Err(PluginError::RegistrySealed);
        }
        let ordered: Vec<Fingerprint> = self.modules.iter().map(|m| m.fingerprint).collect();
        let manifest = TrustManifest::build(heap, owner_id, &ordered)?;
        self.fingerprints = None;

        info!(
            modules = manifest.count(),
            size = manifest.total_size(),
            "Trust manifest built"
        );
        Ok(manifest)
    }

    /// Whether the manifest has been built.
    pub fn is_sealed(&self) -> bool {
        self.fingerprints.is_none()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn modules(&self) -> &[PluginModule] {
        &self.modules
    }

    pub(crate) fn modules_mut(&mut self) -> &mut [PluginModule] {
        &mut self.modules
    }

    pub fn get(&self, index: usize) -> Option<&PluginModule> {
        self.modules.get(index)
    }

    pub fn find(&self, id: ModuleId) -> Option<&PluginModule> {
        self.modules.iter().find(|m| m.id == id)
    }

    /// Display names in acceptance order.
    pub fn names(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.name.clone()).collect()
    }

    /// Index of the first module whose name contains `needle`.
    pub fn index_by_name(&self, needle: &str) -> Option<usize> {
        self.modules.iter().position(|m| m.name.contains(needle))
    }

    /// Drops every module and reopens the registry.
    pub fn reset(&mut self) -> Vec<PluginModule> {
        self.fingerprints = Some(HashSet::new());
        self.next_id = 1;
        std::mem::take(&mut self.modules)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
