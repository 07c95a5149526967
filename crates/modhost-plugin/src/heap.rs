//! Bounded, lockable arena for plugin allocations.
//!
//! A [`PluginHeap`] is either a root pool taken from the global allocator or
//! a child carved out of another heap. Each heap keeps a free-list arena
//! (`linked_list_allocator`) behind a mutex, so plugin threads may allocate
//! concurrently.
//!
//! `free_all` releases every allocation of a heap at once by bumping its
//! epoch. A [`HeapBlock`] remembers the epoch it was allocated in; once that
//! epoch is gone (for its own heap or any ancestor) the block is stale and
//! its memory can no longer be reached.

use std::alloc::Layout;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::Arc;

use linked_list_allocator::Heap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde::Serialize;
use tracing::debug;

use crate::error::HeapError;

/// Allocation granularity for module images and manifests.
pub const PAGE_SIZE: usize = 0x1000;

/// Alignment used when the caller does not ask for one.
pub const DEFAULT_ALIGN: usize = 8;

/// Smallest heap the arena can manage.
pub const MIN_HEAP_SIZE: usize = 256;

/// Rounds `value` up to a multiple of `align` (a power of two).
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

struct Arena(Heap);

// The arena only holds pointers into memory owned by the heap it lives in.
unsafe impl Send for Arena {}

enum Region {
    Owned { base: NonNull<u8>, layout: Layout },
    Carved(HeapBlock),
}

struct HeapInner {
    name: String,
    base: NonNull<u8>,
    size: usize,
    region: Region,
    arena: Mutex<Arena>,
    epoch: RwLock<u64>,
}

unsafe impl Send for HeapInner {}
unsafe impl Sync for HeapInner {}

impl Drop for HeapInner {
    fn drop(&mut self) {
        if let Region::Owned { base, layout } = &self.region {
            unsafe { std::alloc::dealloc(base.as_ptr(), *layout) };
        }
    }
}

type Pins<'a> = Vec<RwLockReadGuard<'a, u64>>;

/// Handle to a plugin heap. Cloning shares the same arena.
#[derive(Clone)]
pub struct PluginHeap {
    inner: Arc<HeapInner>,
}

/// Usage snapshot of a heap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeapStats {
    pub name: String,
    pub size: usize,
    pub used: usize,
    pub free: usize,
}

impl PluginHeap {
    /// Creates a root pool of `size` bytes from the global allocator.
    pub fn root(name: impl Into<String>, size: usize) -> Result<Self, HeapError> {
        let name = name.into();
        let size = align_up(check_size(&name, size)?, PAGE_SIZE);
        let layout = Layout::from_size_align(size, PAGE_SIZE).map_err(|_| {
            HeapError::InvalidLayout {
                size,
                align: PAGE_SIZE,
            }
        })?;

        let raw = unsafe { std::alloc::alloc(layout) };
        let base = NonNull::new(raw).ok_or_else(|| HeapError::OutOfMemory {
            heap: name.clone(),
            size,
            align: PAGE_SIZE,
        })?;

        debug!(heap = %name, size, "Created root heap");
        Ok(Self::with_region(name, base, size, Region::Owned { base, layout }))
    }

    /// Carves a child heap of `size` bytes out of this heap.
    ///
    /// The child stays usable until this heap is released with
    /// [`free_all`](Self::free_all); after that every operation on the child
    /// reports [`HeapError::StaleBlock`].
    pub fn create_child(&self, name: impl Into<String>, size: usize) -> Result<Self, HeapError> {
        let name = name.into();
        let size = align_up(check_size(&name, size)?, PAGE_SIZE);
        let block = self.allocate(size, PAGE_SIZE).map_err(|e| match e {
            HeapError::OutOfMemory { .. } => HeapError::ChildTooLarge {
                parent: self.inner.name.clone(),
                requested: size,
            },
            other => other,
        })?;
        let base = block.ptr;

        debug!(heap = %name, parent = %self.inner.name, size, "Created child heap");
        Ok(Self::with_region(name, base, size, Region::Carved(block)))
    }

    fn with_region(name: String, base: NonNull<u8>, size: usize, region: Region) -> Self {
        let arena = unsafe { Heap::new(base.as_ptr(), size) };
        Self {
            inner: Arc::new(HeapInner {
                name,
                base,
                size,
                region,
                arena: Mutex::new(Arena(arena)),
                epoch: RwLock::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Total arena size in bytes.
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Whether two handles refer to the same heap.
    pub fn same_heap(&self, other: &PluginHeap) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether the memory backing this heap is still owned by its ancestors.
    pub fn is_live(&self) -> bool {
        let mut pins = Vec::new();
        self.pin(&mut pins).is_ok()
    }

    pub fn stats(&self) -> HeapStats {
        let arena = self.inner.arena.lock();
        HeapStats {
            name: self.inner.name.clone(),
            size: self.inner.size,
            used: arena.0.used(),
            free: arena.0.free(),
        }
    }

    /// Allocates `size` bytes aligned to `align`.
    pub fn allocate(&self, size: usize, align: usize) -> Result<HeapBlock, HeapError> {
        let layout = Layout::from_size_align(size.max(1), align)
            .map_err(|_| HeapError::InvalidLayout { size, align })?;

        let mut pins = Vec::new();
        self.pin(&mut pins)?;
        let epoch = **pins.first().ok_or_else(|| HeapError::StaleBlock(self.inner.name.clone()))?;

        let ptr = self
            .inner
            .arena
            .lock()
            .0
            .allocate_first_fit(layout)
            .map_err(|_| HeapError::OutOfMemory {
                heap: self.inner.name.clone(),
                size,
                align,
            })?;
        drop(pins);

        Ok(HeapBlock {
            heap: self.clone(),
            epoch,
            ptr,
            layout,
            len: size,
        })
    }

    /// Allocates with [`DEFAULT_ALIGN`].
    pub fn alloc(&self, size: usize) -> Result<HeapBlock, HeapError> {
        self.allocate(size, DEFAULT_ALIGN)
    }

    /// Allocates and zero-fills.
    pub fn allocate_zeroed(&self, size: usize, align: usize) -> Result<HeapBlock, HeapError> {
        let mut block = self.allocate(size, align)?;
        block.bytes_mut()?.fill(0);
        Ok(block)
    }

    /// Moves `block` into a new allocation of `new_size` bytes, keeping its
    /// alignment and the common prefix of its contents.
    pub fn reallocate(&self, block: HeapBlock, new_size: usize) -> Result<HeapBlock, HeapError> {
        let mut fresh = self.allocate(new_size, block.layout.align())?;
        {
            let src = block.bytes()?;
            let mut dst = fresh.bytes_mut()?;
            let n = src.len().min(dst.len());
            dst[..n].copy_from_slice(&src[..n]);
        }
        drop(block);
        Ok(fresh)
    }

    /// Releases every allocation of this heap at once.
    ///
    /// Outstanding blocks become stale; child heaps carved from this heap
    /// stop working. Must not be called while holding a block guard from
    /// this heap on the same thread.
    pub fn free_all(&self) -> Result<(), HeapError> {
        let mut pins = Vec::new();
        self.pin_region(&mut pins)?;

        let mut epoch = self.inner.epoch.write();
        let mut arena = self.inner.arena.lock();
        arena.0 = unsafe { Heap::new(self.inner.base.as_ptr(), self.inner.size) };
        *epoch += 1;

        debug!(heap = %self.inner.name, epoch = *epoch, "Heap released");
        Ok(())
    }

    /// Read-locks the epoch of this heap and of every ancestor.
    fn pin<'a>(&'a self, pins: &mut Pins<'a>) -> Result<(), HeapError> {
        pins.push(self.inner.epoch.read_recursive());
        self.pin_region(pins)
    }

    fn pin_region<'a>(&'a self, pins: &mut Pins<'a>) -> Result<(), HeapError> {
        match &self.inner.region {
            Region::Owned { .. } => Ok(()),
            Region::Carved(block) => block.pin(pins),
        }
    }
}

impl fmt::Debug for PluginHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHeap")
            .field("name", &self.inner.name)
            .field("size", &self.inner.size)
            .finish()
    }
}

fn check_size(name: &str, size: usize) -> Result<usize, HeapError> {
    if size < MIN_HEAP_SIZE {
        return Err(HeapError::TooSmall {
            heap: name.to_string(),
            size,
            minimum: MIN_HEAP_SIZE,
        });
    }
    Ok(size)
}

/// One allocation from a [`PluginHeap`], freed on drop.
pub struct HeapBlock {
    heap: PluginHeap,
    epoch: u64,
    ptr: NonNull<u8>,
    layout: Layout,
    len: usize,
}

unsafe impl Send for HeapBlock {}
unsafe impl Sync for HeapBlock {}

impl HeapBlock {
    /// Requested length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn align(&self) -> usize {
        self.layout.align()
    }

    /// Address of the first byte.
    pub fn address(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// The heap this block came from.
    pub fn heap(&self) -> &PluginHeap {
        &self.heap
    }

    pub fn is_stale(&self) -> bool {
        let mut pins = Vec::new();
        self.pin(&mut pins).is_err()
    }

    /// Shared view of the block's bytes.
    pub fn bytes(&self) -> Result<BlockRef<'_>, HeapError> {
        let mut pins = Vec::new();
        self.pin(&mut pins)?;
        let slice = unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) };
        Ok(BlockRef { _pins: pins, slice })
    }

    /// Exclusive view of the block's bytes.
    pub fn bytes_mut(&mut self) -> Result<BlockMut<'_>, HeapError> {
        let ptr = self.ptr;
        let len = self.len;
        let mut pins = Vec::new();
        self.pin(&mut pins)?;
        let slice = unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), len) };
        Ok(BlockMut { _pins: pins, slice })
    }

    fn pin<'a>(&'a self, pins: &mut Pins<'a>) -> Result<(), HeapError> {
        let current = self.heap.inner.epoch.read_recursive();
        if *current != self.epoch {
            return Err(HeapError::StaleBlock(self.heap.inner.name.clone()));
        }
        pins.push(current);
        self.heap.pin_region(pins)
    }
}

impl Drop for HeapBlock {
    fn drop(&mut self) {
        let this = &*self;
        let mut pins = Vec::new();
        if this.pin(&mut pins).is_ok() {
            let mut arena = this.heap.inner.arena.lock();
            unsafe { arena.0.deallocate(this.ptr, this.layout) };
        }
    }
}

impl fmt::Debug for HeapBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapBlock")
            .field("heap", &self.heap.inner.name)
            .field("address", &format_args!("{:#x}", self.address()))
            .field("len", &self.len)
            .field("align", &self.layout.align())
            .finish()
    }
}

/// Shared guard over a live block.
pub struct BlockRef<'a> {
    _pins: Pins<'a>,
    slice: &'a [u8],
}

impl Deref for BlockRef<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.slice
    }
}

/// Exclusive guard over a live block.
pub struct BlockMut<'a> {
    _pins: Pins<'a>,
    slice: &'a mut [u8],
}

impl Deref for BlockMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.slice
    }
}

impl DerefMut for BlockMut<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.slice
    }
}
