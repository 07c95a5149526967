//! Native shared-object link backend (`dynamic` feature).
//!
//! The payload of a native image is written to `<cache>/<fingerprint>.so`
//! and opened with eager binding, so unresolved symbols fail the load
//! instead of the first call.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::{debug, warn};

use super::{BackendHandle, LinkBackend, SymbolResolver};
use crate::error::{PluginError, PluginResult};
use crate::fingerprint::Fingerprint;
use crate::image::{self, ImageKind, ParsedImage};

struct LoadedLibrary {
    library: Library,
    path: PathBuf,
}

/// Links native images through the platform dynamic loader.
pub struct NativeBackend {
    cache_dir: PathBuf,
    libraries: HashMap<u64, LoadedLibrary>,
    next: u64,
}

impl NativeBackend {
    /// Creates a backend writing shared objects below `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            libraries: HashMap::new(),
            next: 1,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn parse(image: &[u8]) -> PluginResult<ParsedImage<'_>> {
        let parsed = image::parse(image).map_err(|e| PluginError::InvalidImage(e.to_string()))?;
        if parsed.header.kind != ImageKind::Native {
            return Err(PluginError::InvalidImage(format!(
                "{:?} image carries no native payload",
                parsed.header.kind
            )));
        }
        if parsed.payload.is_empty() {
            return Err(PluginError::InvalidImage("empty native payload".to_string()));
        }
        Ok(parsed)
    }

    fn open(path: &Path) -> Result<Library, libloading::Error> {
        #[cfg(unix)]
        {
            use libloading::os::unix::{Library as UnixLibrary, RTLD_LOCAL, RTLD_NOW};
            unsafe { UnixLibrary::open(Some(path), RTLD_NOW | RTLD_LOCAL) }.map(Library::from)
        }
        #[cfg(not(unix))]
        {
            unsafe { Library::new(path) }
        }
    }
}

impl LinkBackend for NativeBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    fn query_size(&self, image: &[u8]) -> PluginResult<usize> {
        Ok(Self::parse(image)?.header.bss_size as usize)
    }

    fn link(
        &mut self,
        image: &[u8],
        scratch: &mut [u8],
        _symbols: &dyn SymbolResolver,
    ) -> PluginResult<BackendHandle> {
        let parsed = Self::parse(image)?;
        let fingerprint =
            Fingerprint::of_image(image).map_err(|e| PluginError::InvalidImage(e.to_string()))?;

        std::fs::create_dir_all(&self.cache_dir)?;
        let path = self.cache_dir.join(format!("{fingerprint}.so"));
        std::fs::write(&path, parsed.payload)?;

        let library = Self::open(&path).map_err(|e| {
            PluginError::LinkFailure(format!("dlopen '{}': {e}", path.display()))
        })?;

        let bss = parsed.header.bss_size as usize;
        scratch[..bss].fill(0);

        let id = self.next;
        self.next += 1;
        debug!(handle = id, path = %path.display(), "Native image linked");
        self.libraries.insert(id, LoadedLibrary { library, path });
        Ok(BackendHandle(id))
    }

    fn lookup(&self, handle: BackendHandle, symbol: &str) -> Option<usize> {
        let loaded = self.libraries.get(&handle.0)?;
        let symbol: libloading::Symbol<'_, *const ()> =
            unsafe { loaded.library.get(symbol.as_bytes()) }.ok()?;
        Some(*symbol as usize)
    }

    fn unlink(&mut self, handle: BackendHandle) {
        if let Some(loaded) = self.libraries.remove(&handle.0) {
            let LoadedLibrary { library, path } = loaded;
            if let Err(e) = library.close() {
                warn!(path = %path.display(), error = %e, "Failed to close native module");
            }
            if let Err(e) = std::fs::remove_file(&path) {
                debug!(path = %path.display(), error = %e, "Cached module not removed");
            }
        }
    }
}

impl std::fmt::Debug for NativeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeBackend")
            .field("cache_dir", &self.cache_dir)
            .field("loaded_count", &self.libraries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageBuilder;
    use crate::linker::HostSymbols;

    #[test]
    fn test_garbage_payload_fails_to_link() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = NativeBackend::new(dir.path());
        let image = ImageBuilder::native(b"not an elf object".to_vec()).build();

        assert_eq!(backend.query_size(&image).unwrap(), 0);
        let err = backend
            .link(&image, &mut [], &HostSymbols::new())
            .unwrap_err();
        assert!(matches!(err, PluginError::LinkFailure(_)));
    }

    #[test]
    fn test_table_images_are_rejected() {
        let backend = NativeBackend::new("unused");
        let image = ImageBuilder::table().build();
        assert!(matches!(
            backend.query_size(&image),
            Err(PluginError::InvalidImage(_))
        ));
    }
}
