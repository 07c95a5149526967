//! Hook-bound channel: runs the prefix/original/postfix chain of one
//! interception point.
//!
//! On `invoke`:
//! - Prefixes run in registration order. The first one returning
//!   [`HookAction::Halt`] ends the call: the original is skipped, no postfix
//!   runs, and the result slot is returned as the prefix left it.
//! - Otherwise the original runs once and its return value replaces the
//!   result slot.
//! - Postfixes then run in registration order and may edit the result.
//!
//! The callback list has a fixed capacity and is only ever cleared as a
//! whole. A callback registering into the channel that is dispatching it is
//! refused; other threads wait for the dispatch to finish.

use std::fmt;
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use tracing::trace;

use super::definitions::{HookAction, HookSignal};
use crate::error::EventError;

/// Gating callback run before the original call.
pub type Prefix<S> = Box<
    dyn Fn(&mut <S as HookSignal>::Output, &<S as HookSignal>::Args) -> HookAction + Send + Sync,
>;

/// Observing callback run after the original call.
pub type Postfix<S> =
    Box<dyn Fn(&mut <S as HookSignal>::Output, &<S as HookSignal>::Args) + Send + Sync>;

/// The intercepted host function.
pub type Original<S> =
    Box<dyn Fn(&<S as HookSignal>::Args) -> <S as HookSignal>::Output + Send + Sync>;

struct HookPair<S: HookSignal> {
    prefix: Option<Prefix<S>>,
    postfix: Option<Postfix<S>>,
}

/// Callback chain wired to one interception point.
pub struct HookChannel<S: HookSignal> {
    original: Original<S>,
    pairs: RwLock<Vec<HookPair<S>>>,
    capacity: usize,
    dispatching: Mutex<Vec<ThreadId>>,
}

/// Marks the current thread as dispatching until dropped.
struct DispatchMark<'a> {
    threads: &'a Mutex<Vec<ThreadId>>,
    id: ThreadId,
}

impl<'a> DispatchMark<'a> {
    fn enter(threads: &'a Mutex<Vec<ThreadId>>) -> Self {
        let id = thread::current().id();
        threads.lock().push(id);
        Self { threads, id }
    }
}

impl Drop for DispatchMark<'_> {
    fn drop(&mut self) {
        let mut threads = self.threads.lock();
        if let Some(pos) = threads.iter().position(|t| *t == self.id) {
            threads.swap_remove(pos);
        }
    }
}

impl<S: HookSignal> HookChannel<S> {
    pub fn new(original: Original<S>, capacity: usize) -> Self {
        Self {
            original,
            pairs: RwLock::new(Vec::with_capacity(capacity)),
            capacity,
            dispatching: Mutex::new(Vec::new()),
        }
    }

    /// Write access to the pairs, refused on a thread that is dispatching
    /// this channel.
    fn pairs_mut(&self) -> Result<RwLockWriteGuard<'_, Vec<HookPair<S>>>, EventError> {
        let id = thread::current().id();
        if self.dispatching.lock().contains(&id) {
            return Err(EventError::DispatchInProgress);
        }
        Ok(self.pairs.write())
    }

    /// Appends a (prefix, postfix) pair and returns its slot.
    pub fn add(
        &self,
        prefix: Option<Prefix<S>>,
        postfix: Option<Postfix<S>>,
    ) -> Result<usize, EventError> {
        let mut pairs = self.pairs_mut()?;
        if pairs.len() >= self.capacity {
            return Err(EventError::ChannelFull {
                capacity: self.capacity,
            });
        }
        pairs.push(HookPair { prefix, postfix });
        Ok(pairs.len() - 1)
    }

    /// Drops every registered pair.
    pub fn clear(&self) -> Result<(), EventError> {
        let mut pairs = self.pairs_mut()?;
        pairs.clear();
        Ok(())
    }

    /// Runs the chain for one intercepted call.
    pub fn invoke(&self, args: &S::Args) -> S::Output {
        let _mark = DispatchMark::enter(&self.dispatching);
        let pairs = self.pairs.read_recursive();
        let mut result = S::Output::default();

        for pair in pairs.iter() {
            if let Some(prefix) = &pair.prefix {
                if prefix(&mut result, args).is_halt() {
                    trace!(hook = S::SYMBOL, "Prefix halted the call");
                    return result;
                }
            }
        }

        result = (self.original)(args);

        for pair in pairs.iter() {
            if let Some(postfix) = &pair.postfix {
                postfix(&mut result, args);
            }
        }
        result
    }

    /// Number of registered pairs.
    pub fn len(&self) -> usize {
        self.pairs.read_recursive().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<S: HookSignal> fmt::Debug for HookChannel<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookChannel")
            .field("symbol", &S::SYMBOL)
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
