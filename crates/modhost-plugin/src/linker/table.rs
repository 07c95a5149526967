//! In-process link backend.
//!
//! Module code is compiled into the host and published in a [`CodeTable`];
//! a table image names which entries it exports and which host symbols it
//! imports. Imports are bound eagerly: every resolved address is written as
//! a little-endian `u64` slot right after the module's bss region.

use std::collections::HashMap;

use tracing::debug;

use super::{BackendHandle, LinkBackend, SymbolResolver};
use crate::error::{PluginError, PluginResult};
use crate::ffi::abi::PluginMainFn;
use crate::image::{self, ImageKind, ParsedImage, IMPORT_SLOT_SIZE};

/// Compiled-in code addressable by name.
#[derive(Debug, Clone, Default)]
pub struct CodeTable {
    entries: HashMap<String, usize>,
}

impl CodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a raw code address.
    pub fn insert(&mut self, name: impl Into<String>, address: usize) {
        self.entries.insert(name.into(), address);
    }

    /// Publishes a module entry point.
    pub fn insert_entry(&mut self, name: impl Into<String>, entry: PluginMainFn) {
        self.insert(name, entry as usize);
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.entries.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug)]
struct LinkedTable {
    exports: HashMap<String, usize>,
}

/// Links table images against a [`CodeTable`].
#[derive(Debug)]
pub struct TableBackend {
    table: CodeTable,
    linked: HashMap<u64, LinkedTable>,
    next: u64,
}

impl TableBackend {
    pub fn new(table: CodeTable) -> Self {
        Self {
            table,
            linked: HashMap::new(),
            next: 1,
        }
    }

    fn parse(image: &[u8]) -> PluginResult<ParsedImage<'_>> {
        let parsed = image::parse(image).map_err(|e| PluginError::InvalidImage(e.to_string()))?;
        if parsed.header.kind != ImageKind::Table {
            return Err(PluginError::InvalidImage(format!(
                "{:?} image cannot be linked in-process",
                parsed.header.kind
            )));
        }
        Ok(parsed)
    }
}

impl LinkBackend for TableBackend {
    fn name(&self) -> &'static str {
        "table"
    }

    fn query_size(&self, image: &[u8]) -> PluginResult<usize> {
        Ok(Self::parse(image)?.scratch_size())
    }

    fn link(
        &mut self,
        image: &[u8],
        scratch: &mut [u8],
        symbols: &dyn SymbolResolver,
    ) -> PluginResult<BackendHandle> {
        let parsed = Self::parse(image)?;

        let mut exports = HashMap::with_capacity(parsed.exports.len());
        for export in &parsed.exports {
            let address = self.table.get(&export.target).ok_or_else(|| {
                PluginError::LinkFailure(format!(
                    "export '{}' names unknown code '{}'",
                    export.symbol, export.target
                ))
            })?;
            exports.insert(export.symbol.clone(), address);
        }

        let mut resolved = Vec::with_capacity(parsed.imports.len());
        for import in &parsed.imports {
            let address = symbols.resolve_symbol(import).ok_or_else(|| {
                PluginError::LinkFailure(format!("unresolved import '{import}'"))
            })?;
            resolved.push(address);
        }

        let bss = parsed.header.bss_size as usize;
        scratch[..bss].fill(0);
        for (slot, address) in scratch[bss..]
            .chunks_exact_mut(IMPORT_SLOT_SIZE)
            .zip(&resolved)
        {
            slot.copy_from_slice(&(*address as u64).to_le_bytes());
        }

        let id = self.next;
        self.next += 1;
        debug!(
            handle = id,
            exports = exports.len(),
            imports = resolved.len(),
            "Table image linked"
        );
        self.linked.insert(id, LinkedTable { exports });
        Ok(BackendHandle(id))
    }

    fn lookup(&self, handle: BackendHandle, symbol: &str) -> Option<usize> {
        self.linked.get(&handle.0)?.exports.get(symbol).copied()
    }

    fn unlink(&mut self, handle: BackendHandle) {
        self.linked.remove(&handle.0);
    }
}
