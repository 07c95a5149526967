//! Owner-grouped event registry for one load session.
//!
//! Only live owners may register callbacks. The session adds a module to the
//! owner directory right before running its entry point and retires it when
//! the entry point fails, which also revokes anything it registered.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::channel::{ModCallback, ModEventChannel};
use crate::error::EventError;
use crate::hooks::definitions::{HookAction, ModSignal};
use crate::registry::ModuleId;

trait ErasedModChannel: Send + Sync {
    fn remove_owner(&self, owner: ModuleId) -> usize;
    fn clear(&self);
    fn len(&self) -> usize;
}

impl<S: ModSignal> ErasedModChannel for ModEventChannel<S> {
    fn remove_owner(&self, owner: ModuleId) -> usize {
        ModEventChannel::remove_owner(self, owner)
    }

    fn clear(&self) {
        ModEventChannel::clear(self)
    }

    fn len(&self) -> usize {
        ModEventChannel::len(self)
    }
}

struct SignalEntry {
    name: &'static str,
    channel: Arc<dyn Any + Send + Sync>,
    ops: Arc<dyn ErasedModChannel>,
}

/// Signal channels and the owners allowed to use them.
#[derive(Default)]
pub struct ModEventRegistry {
    owners: RwLock<BTreeMap<ModuleId, String>>,
    signals: RwLock<HashMap<TypeId, SignalEntry>>,
}

impl ModEventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits `owner` as a callback owner.
    pub fn register_owner(&self, owner: ModuleId, name: impl Into<String>) {
        self.owners.write().insert(owner, name.into());
    }

    /// Revokes `owner`: drops its callbacks everywhere and refuses new ones.
    pub fn retire_owner(&self, owner: ModuleId) -> usize {
        let name = self.owners.write().remove(&owner);
        let removed = self.remove_events(owner);
        debug!(owner = %owner, name = ?name, removed, "Event owner retired");
        removed
    }

    pub fn is_owner(&self, owner: ModuleId) -> bool {
        self.owners.read().contains_key(&owner)
    }

    pub fn owner_name(&self, owner: ModuleId) -> Option<String> {
        self.owners.read().get(&owner).cloned()
    }

    fn channel<S: ModSignal>(&self) -> Option<Arc<ModEventChannel<S>>> {
        let signals = self.signals.read();
        signals
            .get(&TypeId::of::<S>())?
            .channel
            .clone()
            .downcast::<ModEventChannel<S>>()
            .ok()
    }

    fn channel_or_create<S: ModSignal>(&self) -> Arc<ModEventChannel<S>> {
        if let Some(channel) = self.channel::<S>() {
            return channel;
        }
        let mut signals = self.signals.write();
        if let Some(existing) = signals.get(&TypeId::of::<S>()) {
            if let Ok(channel) = existing.channel.clone().downcast::<ModEventChannel<S>>() {
                return channel;
            }
        }

        let channel = Arc::new(ModEventChannel::<S>::new());
        let erased: Arc<dyn Any + Send + Sync> = channel.clone();
        signals.insert(
            TypeId::of::<S>(),
            SignalEntry {
                name: S::NAME,
                channel: erased,
                ops: channel.clone(),
            },
        );
        channel
    }

    /// Registers `callback` for `owner` on signal `S`.
    pub fn add<S, F>(&self, owner: ModuleId, callback: F) -> Result<usize, EventError>
    where
        S: ModSignal,
        F: Fn(&mut S::Output, &S::Args) -> HookAction + Send + Sync + 'static,
    {
        let owners = self.owners.read();
        if !owners.contains_key(&owner) {
            return Err(EventError::UnknownOwner(owner));
        }
        let callback: ModCallback<S> = Arc::new(callback);
        let index = self.channel_or_create::<S>().add(owner, callback);
        debug!(signal = S::NAME, owner = %owner, index, "Mod event registered");
        Ok(index)
    }

    /// Raises `S`. Without callbacks this returns `Output::default()`.
    pub fn run<S: ModSignal>(&self, args: &S::Args) -> S::Output {
        match self.channel::<S>() {
            Some(channel) => channel.run(args),
            None => S::Output::default(),
        }
    }

    /// Drops every callback `owner` registered, on every signal.
    pub fn remove_events(&self, owner: ModuleId) -> usize {
        let channels: Vec<_> = self
            .signals
            .read()
            .values()
            .map(|s| s.ops.clone())
            .collect();
        channels.iter().map(|c| c.remove_owner(owner)).sum()
    }

    /// Drops `owner`'s callback at `index` on signal `S`.
    pub fn remove_event<S: ModSignal>(&self, owner: ModuleId, index: usize) -> Result<(), EventError> {
        self.channel::<S>()
            .ok_or(EventError::OwnerNotFound(owner))?
            .remove_at(owner, index)
    }

    /// Drops every callback of signal `S`.
    pub fn remove_all_events<S: ModSignal>(&self) {
        if let Some(channel) = self.channel::<S>() {
            channel.clear();
        }
    }

    /// Drops every callback of every signal. Owners stay registered.
    pub fn clear_all(&self) {
        let channels: Vec<_> = self
            .signals
            .read()
            .values()
            .map(|s| s.ops.clone())
            .collect();
        for channel in channels {
            channel.clear();
        }
    }

    /// Clears every signal and forgets every owner.
    pub fn reset(&self) {
        self.clear_all();
        let owners = std::mem::take(&mut *self.owners.write());
        if !owners.is_empty() {
            info!(owners = owners.len(), "Mod event owners released");
        }
    }

    /// Callbacks registered on `S`.
    pub fn len<S: ModSignal>(&self) -> usize {
        self.channel::<S>().map(|c| c.len()).unwrap_or(0)
    }

    /// Callbacks `owner` registered on `S`.
    pub fn owner_len<S: ModSignal>(&self, owner: ModuleId) -> usize {
        self.channel::<S>().map(|c| c.owner_len(owner)).unwrap_or(0)
    }

    /// Names of every signal with its callback count.
    pub fn signals(&self) -> Vec<(&'static str, usize)> {
        let mut out: Vec<_> = self
            .signals
            .read()
            .values()
            .map(|s| (s.name, s.ops.len()))
            .collect();
        out.sort();
        out
    }
}

impl std::fmt::Debug for ModEventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModEventRegistry")
            .field("owners", &self.owners.read().len())
            .field("signals", &self.signals.read().len())
            .finish()
    }
}
