//! Owner-grouped channel for one [`ModSignal`].
//!
//! Callbacks are boxed on the global allocator, not the plugin heap. They
//! are still bound to the session: [`ModEventRegistry::reset`] drops them
//! all before any module is unlinked.
//!
//! [`ModEventRegistry::reset`]: crate::events::ModEventRegistry::reset

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::EventError;
use crate::hooks::definitions::{HookAction, ModSignal};
use crate::registry::ModuleId;

/// Callback registered on an owner-grouped channel.
pub type ModCallback<S> = Arc<
    dyn Fn(&mut <S as ModSignal>::Output, &<S as ModSignal>::Args) -> HookAction + Send + Sync,
>;

/// Callbacks of one signal, grouped by owner in registration order.
pub struct ModEventChannel<S: ModSignal> {
    owners: Mutex<Vec<(ModuleId, Vec<ModCallback<S>>)>>,
}

impl<S: ModSignal> ModEventChannel<S> {
    pub fn new() -> Self {
        Self {
            owners: Mutex::new(Vec::new()),
        }
    }

    /// Appends `callback` to `owner`'s list and returns its index there.
    pub fn add(&self, owner: ModuleId, callback: ModCallback<S>) -> usize {
        let mut owners = self.owners.lock();
        match owners.iter_mut().find(|(id, _)| *id == owner) {
            Some((_, callbacks)) => {
                callbacks.push(callback);
                callbacks.len() - 1
            }
            None => {
                owners.push((owner, vec![callback]));
                0
            }
        }
    }

    /// Runs every callback, owner by owner. A callback returning
    /// [`HookAction::Halt`] stops the whole run.
    ///
    /// Runs on a snapshot, so callbacks may register or remove events.
    pub fn run(&self, args: &S::Args) -> S::Output {
        let snapshot: Vec<ModCallback<S>> = self
            .owners
            .lock()
            .iter()
            .flat_map(|(_, callbacks)| callbacks.iter().cloned())
            .collect();

        let mut result = S::Output::default();
        for callback in snapshot {
            if callback(&mut result, args).is_halt() {
                break;
            }
        }
        result
    }

    /// Drops every callback of `owner`. Returns how many were removed.
    pub fn remove_owner(&self, owner: ModuleId) -> usize {
        let mut owners = self.owners.lock();
        match owners.iter().position(|(id, _)| *id == owner) {
            Some(pos) => owners.remove(pos).1.len(),
            None => 0,
        }
    }

    /// Drops `owner`'s callback at `index`.
    pub fn remove_at(&self, owner: ModuleId, index: usize) -> Result<(), EventError> {
        let mut owners = self.owners.lock();
        let pos = owners
            .iter()
            .position(|(id, _)| *id == owner)
            .ok_or(EventError::OwnerNotFound(owner))?;
        let callbacks = &mut owners[pos].1;
        if index >= callbacks.len() {
            return Err(EventError::IndexOutOfRange {
                index,
                len: callbacks.len(),
            });
        }
        callbacks.remove(index);
        if callbacks.is_empty() {
            owners.remove(pos);
        }
        Ok(())
    }

    /// Drops every callback of every owner.
    pub fn clear(&self) {
        self.owners.lock().clear();
    }

    /// Total callbacks.
    pub fn len(&self) -> usize {
        self.owners.lock().iter().map(|(_, c)| c.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Callbacks registered by `owner`.
    pub fn owner_len(&self, owner: ModuleId) -> usize {
        self.owners
            .lock()
            .iter()
            .find(|(id, _)| *id == owner)
            .map(|(_, c)| c.len())
            .unwrap_or(0)
    }
}

impl<S: ModSignal> Default for ModEventChannel<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ModSignal> fmt::Debug for ModEventChannel<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModEventChannel")
            .field("signal", &S::NAME)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Score;
    impl ModSignal for Score {
        type Args = u32;
        type Output = Vec<String>;
        const NAME: &'static str = "Score";
    }

    fn tagged(tag: &'static str) -> ModCallback<Score> {
        Arc::new(move |out: &mut Vec<String>, points: &u32| {
            out.push(format!("{tag}:{points}"));
            HookAction::Continue
        })
    }

    #[test]
    fn test_owner_then_append_order() {
        let ch = ModEventChannel::<Score>::new();
        let (a, b) = (ModuleId::new(1), ModuleId::new(2));
        ch.add(b, tagged("b0"));
        ch.add(a, tagged("a0"));
        ch.add(b, tagged("b1"));

        assert_eq!(ch.run(&3), vec!["b0:3", "b1:3", "a0:3"]);
    }

    #[test]
    fn test_halt_stops_the_run() {
        let ch = ModEventChannel::<Score>::new();
        ch.add(ModuleId::new(1), tagged("first"));
        ch.add(
            ModuleId::new(1),
            Arc::new(|_: &mut Vec<String>, _: &u32| HookAction::Halt),
        );
        ch.add(ModuleId::new(2), tagged("never"));
        assert_eq!(ch.run(&0), vec!["first:0"]);
    }

    #[test]
    fn test_remove_at_bounds() {
        let ch = ModEventChannel::<Score>::new();
        let a = ModuleId::new(1);
        ch.add(a, tagged("x"));
        ch.add(a, tagged("y"));

        assert_eq!(
            ch.remove_at(a, 2),
            Err(EventError::IndexOutOfRange { index: 2, len: 2 })
        );
        assert_eq!(
            ch.remove_at(ModuleId::new(9), 0),
            Err(EventError::OwnerNotFound(ModuleId::new(9)))
        );
        ch.remove_at(a, 0).unwrap();
        assert_eq!(ch.run(&1), vec!["y:1"]);
        ch.remove_at(a, 0).unwrap();
        assert!(ch.is_empty());
        assert_eq!(ch.run(&1), Vec::<String>::new());
    }
}
