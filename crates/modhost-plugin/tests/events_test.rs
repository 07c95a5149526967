//! Integration tests for hook-bound and owner-grouped events across a
//! plugin session.

mod helpers;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use helpers::{Jump, TestHost};
use modhost_plugin::prelude::*;

hook_signal!(Spawn: "World::spawn", (u32) -> u32);

#[test]
fn test_owner_bulk_removal() {
    let mut host = TestHost::new();
    host.write_module("a.nro", "collect_three", 1);
    host.write_module("b.nro", "collect_two", 2);
    host.load();
    assert_eq!(host.collect(), vec!["a", "a", "a", "b", "b"]);

    let a = host.session.plugin(0).unwrap().id();
    assert_eq!(host.session.events().remove_events(a), 3);
    assert_eq!(host.collect(), vec!["b", "b"]);
}

#[test]
fn test_single_and_global_event_removal() {
    let mut host = TestHost::new();
    host.write_module("a.nro", "collect_three", 1);
    host.load();

    let a = host.session.plugin(0).unwrap().id();
    let events = host.session.events();
    assert!(matches!(
        events.remove_event::<helpers::Collect>(a, 3),
        Err(EventError::IndexOutOfRange { index: 3, len: 3 })
    ));
    events.remove_event::<helpers::Collect>(a, 0).unwrap();
    assert_eq!(events.owner_len::<helpers::Collect>(a), 2);

    events.remove_all_events::<helpers::Collect>();
    assert!(host.collect().is_empty());
}

#[test]
fn test_no_callbacks_is_a_no_op() {
    let host = TestHost::new();
    assert!(host.collect().is_empty());

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    host.hooks
        .install::<Spawn, _>(move |id: &u32| {
            seen.fetch_add(1, Ordering::SeqCst);
            id + 1
        })
        .unwrap();
    assert_eq!(host.hooks.invoke::<Spawn>(&41).unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_prefix_short_circuit() {
    let host = TestHost::new();
    let original_calls = Arc::new(AtomicUsize::new(0));
    let trace = Arc::new(Mutex::new(Vec::new()));

    let seen = original_calls.clone();
    host.hooks
        .install::<Spawn, _>(move |id: &u32| {
            seen.fetch_add(1, Ordering::SeqCst);
            *id
        })
        .unwrap();

    let t = trace.clone();
    host.hooks
        .add::<Spawn>(
            Some(Box::new(move |out: &mut u32, _: &u32| {
                t.lock().unwrap().push("p1");
                *out = 7;
                HookAction::Halt
            })),
            Some(Box::new(|_: &mut u32, _: &u32| panic!("postfix after halt"))),
        )
        .unwrap();
    let t = trace.clone();
    host.hooks
        .add::<Spawn>(
            Some(Box::new(move |_: &mut u32, _: &u32| {
                t.lock().unwrap().push("p2");
                HookAction::Continue
            })),
            None,
        )
        .unwrap();

    assert_eq!(host.hooks.invoke::<Spawn>(&1).unwrap(), 7);
    assert_eq!(original_calls.load(Ordering::SeqCst), 0);
    assert_eq!(*trace.lock().unwrap(), vec!["p1"]);
}

#[test]
fn test_continuing_prefixes_run_original_once() {
    let host = TestHost::new();
    let original_calls = Arc::new(AtomicUsize::new(0));
    let trace = Arc::new(Mutex::new(Vec::new()));

    let seen = original_calls.clone();
    host.hooks
        .install::<Spawn, _>(move |id: &u32| {
            seen.fetch_add(1, Ordering::SeqCst);
            *id * 10
        })
        .unwrap();

    for tag in ["s1", "s2"] {
        let pre = trace.clone();
        let post = trace.clone();
        host.hooks
            .add::<Spawn>(
                Some(Box::new(move |_: &mut u32, _: &u32| {
                    pre.lock().unwrap().push(format!("{tag}-prefix"));
                    HookAction::Continue
                })),
                Some(Box::new(move |out: &mut u32, _: &u32| {
                    post.lock().unwrap().push(format!("{tag}-postfix"));
                    *out += 1;
                })),
            )
            .unwrap();
    }

    assert_eq!(host.hooks.invoke::<Spawn>(&3).unwrap(), 32);
    assert_eq!(original_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        *trace.lock().unwrap(),
        vec!["s1-prefix", "s2-prefix", "s1-postfix", "s2-postfix"]
    );
}

#[test]
fn test_unload_clears_module_hooks_but_keeps_them_installed() {
    let mut host = TestHost::new();
    host.hooks
        .install_at_symbol::<Jump>(host.session.linker().symbols())
        .unwrap();
    host.write_module("guard.nro", "jump_guard", 1);
    host.load();

    assert!(host.hooks.invoke::<Jump>(&5.0).unwrap());
    assert!(!host.hooks.invoke::<Jump>(&50.0).unwrap());

    assert!(host.session.unload_all());
    assert!(host.hooks.is_installed::<Jump>());
    assert_eq!(host.hooks.len::<Jump>(), 0);
    assert!(host.hooks.invoke::<Jump>(&50.0).unwrap());
}

#[test]
fn test_reload_does_not_stack_module_hooks() {
    let mut host = TestHost::new();
    host.hooks
        .install_at_symbol::<Jump>(host.session.linker().symbols())
        .unwrap();
    host.write_module("guard.nro", "jump_guard", 1);
    host.load();

    let root = host.root().to_path_buf();
    let mut counts = vec![host.hooks.len::<Jump>()];
    for _ in 0..3 {
        assert!(host.session.reload(&root));
        counts.push(host.hooks.len::<Jump>());
    }
    assert_eq!(counts, vec![1, 1, 1, 1]);
    assert!(!host.hooks.invoke::<Jump>(&50.0).unwrap());
}

#[test]
fn test_hook_capacity_is_enforced() {
    let host = TestHost::new();
    host.hooks.install::<Spawn, _>(|id: &u32| *id).unwrap();
    for _ in 0..8 {
        host.hooks
            .add_postfix::<Spawn, _>(|_: &mut u32, _: &u32| {})
            .unwrap();
    }
    assert_eq!(
        host.hooks.add_postfix::<Spawn, _>(|_: &mut u32, _: &u32| {}),
        Err(EventError::ChannelFull { capacity: 8 })
    );
}
