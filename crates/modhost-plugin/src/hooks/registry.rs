//! Hook registry: one typed [`HookChannel`] per installed interception
//! point, keyed by the signal's marker type.
//!
//! The registry lives as long as the host. Unloading a plugin session drops
//! the callbacks modules registered but leaves every hook installed.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use super::definitions::{HookAction, HookSignal};
use super::dispatcher::{HookChannel, Postfix, Prefix};
use crate::error::EventError;
use crate::linker::HostSymbols;

/// Type-independent operations on an installed channel.
trait ErasedChannel: Send + Sync {
    fn clear(&self) -> Result<(), EventError>;
    fn len(&self) -> usize;
}

impl<S: HookSignal> ErasedChannel for HookChannel<S> {
    fn clear(&self) -> Result<(), EventError> {
        HookChannel::clear(self)
    }

    fn len(&self) -> usize {
        HookChannel::len(self)
    }
}

struct InstalledHook {
    symbol: &'static str,
    channel: Arc<dyn Any + Send + Sync>,
    ops: Arc<dyn ErasedChannel>,
}

/// Registry of installed hook sites.
pub struct HookRegistry {
    hooks: RwLock<HashMap<TypeId, InstalledHook>>,
    capacity: usize,
}

impl HookRegistry {
    /// Creates a registry whose channels hold `capacity` pairs each.
    pub fn new(capacity: usize) -> Self {
        Self {
            hooks: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Installs `S` around an explicit host function.
    pub fn install<S, F>(&self, original: F) -> Result<(), EventError>
    where
        S: HookSignal,
        F: Fn(&S::Args) -> S::Output + Send + Sync + 'static,
    {
        let mut hooks = self.hooks.write();
        if hooks.contains_key(&TypeId::of::<S>()) {
            return Err(EventError::AlreadyInstalled(S::SYMBOL));
        }

        let channel = Arc::new(HookChannel::<S>::new(Box::new(original), self.capacity));
        let erased: Arc<dyn Any + Send + Sync> = channel.clone();
        hooks.insert(
            TypeId::of::<S>(),
            InstalledHook {
                symbol: S::SYMBOL,
                channel: erased,
                ops: channel,
            },
        );

        info!(hook = S::SYMBOL, capacity = self.capacity, "Hook installed");
        Ok(())
    }

    /// Installs `S` at the host function published under `S::SYMBOL`.
    pub fn install_at_symbol<S: HookSignal>(&self, symbols: &HostSymbols) -> Result<(), EventError> {
        let original = symbols.resolve_function::<S::Args, S::Output>(S::SYMBOL)?;
        self.install::<S, _>(move |args: &S::Args| original(args))
    }

    fn channel<S: HookSignal>(&self) -> Result<Arc<HookChannel<S>>, EventError> {
        let hooks = self.hooks.read();
        let hook = hooks
            .get(&TypeId::of::<S>())
            .ok_or(EventError::HookNotInstalled(S::SYMBOL))?;
        hook.channel
            .clone()
            .downcast::<HookChannel<S>>()
            .map_err(|_| EventError::SignatureMismatch(S::SYMBOL.to_string()))
    }

    /// Registers a (prefix, postfix) pair on `S`.
    pub fn add<S: HookSignal>(
        &self,
        prefix: Option<Prefix<S>>,
        postfix: Option<Postfix<S>>,
    ) -> Result<usize, EventError> {
        self.channel::<S>()?.add(prefix, postfix)
    }

    pub fn add_prefix<S, F>(&self, prefix: F) -> Result<usize, EventError>
    where
        S: HookSignal,
        F: Fn(&mut S::Output, &S::Args) -> HookAction + Send + Sync + 'static,
    {
        self.add::<S>(Some(Box::new(prefix)), None)
    }

    pub fn add_postfix<S, F>(&self, postfix: F) -> Result<usize, EventError>
    where
        S: HookSignal,
        F: Fn(&mut S::Output, &S::Args) + Send + Sync + 'static,
    {
        self.add::<S>(None, Some(Box::new(postfix)))
    }

    /// Runs the chain of `S` as the intercepted call site would.
    pub fn invoke<S: HookSignal>(&self, args: &S::Args) -> Result<S::Output, EventError> {
        let channel = self.channel::<S>()?;
        Ok(channel.invoke(args))
    }

    /// Removes every callback of `S`.
    pub fn clear<S: HookSignal>(&self) -> Result<(), EventError> {
        self.channel::<S>()?.clear()
    }

    /// Removes every callback of every installed hook. Hooks stay installed.
    pub fn clear_all(&self) {
        let installed: Vec<_> = self
            .hooks
            .read()
            .values()
            .map(|h| (h.symbol, h.ops.clone()))
            .collect();
        for (symbol, ops) in installed {
            if let Err(e) = ops.clear() {
                warn!(hook = symbol, error = %e, "Hook channel not cleared");
            }
        }
    }

    /// Registered pairs on `S`; zero when not installed.
    pub fn len<S: HookSignal>(&self) -> usize {
        self.hooks
            .read()
            .get(&TypeId::of::<S>())
            .map(|h| h.ops.len())
            .unwrap_or(0)
    }

    pub fn is_installed<S: HookSignal>(&self) -> bool {
        self.hooks.read().contains_key(&TypeId::of::<S>())
    }

    /// Symbols of every installed hook with their callback counts.
    pub fn installed(&self) -> Vec<(&'static str, usize)> {
        let mut out: Vec<_> = self
            .hooks
            .read()
            .values()
            .map(|h| (h.symbol, h.ops.len()))
            .collect();
        out.sort();
        out
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new(modhost_core::config::plugin::DEFAULT_HOOK_CAPACITY)
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("installed", &self.hooks.read().len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook_signal;

    hook_signal!(Jump: "Player::jump", (f32) -> bool);
    hook_signal!(Tick: "Scene::tick", (u64) -> ());

    #[test]
    fn test_install_add_invoke() {
        let hooks = HookRegistry::new(8);
        hooks.install::<Jump, _>(|height: &f32| *height > 1.0).unwrap();

        assert!(hooks.invoke::<Jump>(&2.0).unwrap());
        hooks
            .add_prefix::<Jump, _>(|out: &mut bool, h: &f32| {
                *out = false;
                HookAction::from(*h < 10.0)
            })
            .unwrap();
        assert!(!hooks.invoke::<Jump>(&20.0).unwrap());
        assert!(hooks.invoke::<Jump>(&2.0).unwrap());
        assert_eq!(hooks.len::<Jump>(), 1);
    }

    #[test]
    fn test_not_installed_and_double_install() {
        let hooks = HookRegistry::default();
        assert_eq!(
            hooks.add_postfix::<Tick, _>(|_: &mut (), _: &u64| {}),
            Err(EventError::HookNotInstalled("Scene::tick"))
        );
        hooks.install::<Tick, _>(|_: &u64| ()).unwrap();
        assert_eq!(
            hooks.install::<Tick, _>(|_: &u64| ()),
            Err(EventError::AlreadyInstalled("Scene::tick"))
        );
    }

    #[test]
    fn test_install_at_symbol() {
        let symbols = HostSymbols::new();
        symbols.define_function("Player::jump", |h: &f32| *h > 0.5);

        let hooks = HookRegistry::new(4);
        hooks.install_at_symbol::<Jump>(&symbols).unwrap();
        assert!(hooks.invoke::<Jump>(&1.0).unwrap());

        let missing = HookRegistry::new(4);
        assert_eq!(
            missing.install_at_symbol::<Tick>(&symbols),
            Err(EventError::SymbolMissing("Scene::tick".to_string()))
        );
    }

    #[test]
    fn test_clear_all_keeps_hooks_installed() {
        let hooks = HookRegistry::new(4);
        hooks.install::<Jump, _>(|_: &f32| true).unwrap();
        hooks.install::<Tick, _>(|_: &u64| ()).unwrap();
        hooks.add_postfix::<Jump, _>(|_: &mut bool, _: &f32| {}).unwrap();
        hooks.add_postfix::<Tick, _>(|_: &mut (), _: &u64| {}).unwrap();

        hooks.clear_all();
        assert_eq!(hooks.installed(), vec![("Player::jump", 0), ("Scene::tick", 0)]);
        assert!(hooks.is_installed::<Jump>());
    }
}
