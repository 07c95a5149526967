//! Error types for the plugin loading engine.
//!
//! Per-module failures are reported through [`PluginError`] and isolated by
//! the session; only manifest registration aborts a whole load.

use modhost_core::error::{AppError, ErrorKind};
use thiserror::Error;

use crate::fingerprint::Fingerprint;
use crate::registry::ModuleId;

/// Result alias used throughout the engine.
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors raised by the plugin heap.
#[derive(Debug, Error)]
pub enum HeapError {
    /// The arena has no hole large enough for the request.
    #[error("heap '{heap}' out of memory: requested {size} bytes aligned to {align}")]
    OutOfMemory {
        /// Heap name.
        heap: String,
        /// Requested size.
        size: usize,
        /// Requested alignment.
        align: usize,
    },
    /// The block outlived a `free_all` of its heap or of an ancestor.
    #[error("block from heap '{0}' belongs to a released generation")]
    StaleBlock(String),
    /// Size/alignment pair rejected by `Layout`.
    #[error("invalid layout: size {size}, align {align}")]
    InvalidLayout {
        /// Requested size.
        size: usize,
        /// Requested alignment.
        align: usize,
    },
    /// A child heap does not fit into its parent.
    #[error("child heap of {requested} bytes does not fit into '{parent}'")]
    ChildTooLarge {
        /// Parent heap name.
        parent: String,
        /// Requested child size.
        requested: usize,
    },
    /// Heap size below the arena minimum.
    #[error("heap '{heap}' needs at least {minimum} bytes, got {size}")]
    TooSmall {
        /// Heap name.
        heap: String,
        /// Requested size.
        size: usize,
        /// Minimum accepted size.
        minimum: usize,
    },
}

/// Errors raised while parsing a module image.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),
    #[error("unsupported image version {0}")]
    UnsupportedVersion(u32),
    #[error("unknown image kind {0}")]
    UnknownKind(u32),
    #[error("truncated image: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("declared image size {declared} outside [{minimum}, {available}]")]
    SizeOutOfRange {
        declared: usize,
        minimum: usize,
        available: usize,
    },
    #[error("invalid string in symbol table: {0}")]
    InvalidString(String),
}

/// Errors raised by the hook-bound and owner-grouped event channels.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Hook-bound channel reached its fixed capacity.
    #[error("hook channel is full ({capacity} callbacks)")]
    ChannelFull { capacity: usize },
    /// Registration attempted while the channel is dispatching.
    #[error("channel is dispatching; registration refused")]
    DispatchInProgress,
    /// The owner is not a live, initialised module of this session.
    #[error("module {0} cannot own events")]
    UnknownOwner(ModuleId),
    /// The owner has no callbacks on this signal.
    #[error("no events registered for module {0}")]
    OwnerNotFound(ModuleId),
    /// Single-index removal out of range.
    #[error("event index {index} out of range for {len} callbacks")]
    IndexOutOfRange { index: usize, len: usize },
    /// The hook site has not been installed.
    #[error("hook '{0}' is not installed")]
    HookNotInstalled(&'static str),
    /// The hook site has already been installed.
    #[error("hook '{0}' is already installed")]
    AlreadyInstalled(&'static str),
    /// Host symbol lookup failed.
    #[error("host symbol '{0}' not found")]
    SymbolMissing(String),
    /// Host symbol exists with a different signature.
    #[error("host symbol '{0}' has a different signature")]
    SignatureMismatch(String),
}

/// Errors raised by the loader.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Image format unrecognised or the size query failed.
    #[error("invalid module image: {0}")]
    InvalidImage(String),

    /// Content already registered in this session.
    #[error("duplicate module fingerprint {0}")]
    DuplicateFingerprint(Fingerprint),

    /// Relocation or symbol binding failed.
    #[error("link failure: {0}")]
    LinkFailure(String),

    /// A required symbol is not exported by the module.
    #[error("symbol '{0}' not found")]
    SymbolNotFound(String),

    /// The linker rejected the trust manifest.
    #[error("trust manifest registration failed: {0}")]
    ManifestRegistration(String),

    /// `plugin_main` returned false or panicked.
    #[error("entry point of '{module}' failed: {reason}")]
    EntryPointFailure { module: String, reason: String },

    /// `link` called with no manifest registered.
    #[error("no trust manifest registered")]
    NoManifestRegistered,

    /// Linker used before `initialize` or after `finalize`.
    #[error("module linker is not initialized")]
    LinkerNotInitialized,

    /// `finalize` called while modules are still linked.
    #[error("module linker still has {0} linked modules")]
    LinkerBusy(usize),

    /// The registry no longer accepts modules once the manifest is built.
    #[error("registry sealed: trust manifest already built")]
    RegistrySealed,

    /// The session already holds a loaded module set.
    #[error("session already loaded; unload first")]
    AlreadyLoaded,

    #[error(transparent)]
    Heap(#[from] HeapError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PluginError> for AppError {
    fn from(err: PluginError) -> Self {
        let kind = match &err {
            PluginError::Io(_) => ErrorKind::Storage,
            _ => ErrorKind::Plugin,
        };
        AppError::with_source(kind, err.to_string(), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_error_maps_to_app_error() {
        let err: AppError = PluginError::NoManifestRegistered.into();
        assert_eq!(err.kind, ErrorKind::Plugin);
        assert!(err.message.contains("no trust manifest"));

        let io = std::io::Error::other("disk");
        let err: AppError = PluginError::from(io).into();
        assert_eq!(err.kind, ErrorKind::Storage);
    }

    #[test]
    fn test_sub_errors_convert() {
        let err: PluginError = EventError::DispatchInProgress.into();
        assert!(matches!(err, PluginError::Event(EventError::DispatchInProgress)));

        let err: PluginError = ImageError::BadMagic(7).into();
        assert_eq!(err.to_string(), "bad magic 0x00000007");
    }
}
