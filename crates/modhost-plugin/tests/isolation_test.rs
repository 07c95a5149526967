//! Integration tests for per-module failure isolation.

mod helpers;

use std::sync::Arc;

use helpers::{capture_logs, module_image, TestHost};
use modhost_plugin::error::HeapError;
use modhost_plugin::fingerprint::Fingerprint;
use modhost_plugin::image::ImageBuilder;
use modhost_plugin::manifest::TrustManifest;
use modhost_plugin::prelude::*;
use modhost_plugin::{HostSymbols, ModuleLinker, ModuleState, TableBackend};

#[test]
fn test_corrupt_file_is_rejected_and_logged() {
    let mut host = TestHost::new();
    host.write_module("valid.nro", "ok", 1);
    host.write("corrupt.nro", b"this is not a module image at all");

    let (report, logs) = capture_logs(|| host.load());
    assert_eq!(report.discovered, 2);
    assert_eq!(report.rejected, 1);
    assert!(host.session.is_loaded());
    assert_eq!(host.session.plugin_count(), 1);
    assert_eq!(host.session.plugin_names(), vec!["valid"]);

    assert!(logs.contains("Rejected invalid module image"), "logs: {logs}");
    assert!(logs.contains("corrupt.nro"), "logs: {logs}");
}

#[test]
fn test_link_before_manifest_fails_without_touching_memory() {
    let image = module_image("ok", 1);
    let mut linker = ModuleLinker::new(
        Box::new(TableBackend::new(helpers::code_table())),
        Arc::new(HostSymbols::new()),
    );
    let mut scratch = vec![0xAAu8; 128];

    assert!(matches!(
        linker.link(&image, &mut scratch),
        Err(PluginError::LinkerNotInitialized)
    ));

    linker.initialize();
    assert!(matches!(
        linker.link(&image, &mut scratch),
        Err(PluginError::NoManifestRegistered)
    ));
    assert!(scratch.iter().all(|b| *b == 0xAA));
    assert_eq!(linker.live_count(), 0);
}

#[test]
fn test_untrusted_image_fails_to_link() {
    let heap = PluginHeap::root("isolation", 64 * 1024).unwrap();
    let trusted = module_image("ok", 1);
    let stranger = module_image("ok", 2);

    let mut linker = ModuleLinker::new(
        Box::new(TableBackend::new(helpers::code_table())),
        Arc::new(HostSymbols::new()),
    );
    linker.initialize();
    let manifest =
        TrustManifest::build(&heap, 7, &[Fingerprint::of_image(&trusted).unwrap()]).unwrap();
    linker
        .register_manifest(&manifest.bytes().unwrap(), 7)
        .unwrap();

    let mut scratch = vec![0u8; 128];
    assert!(linker.link(&trusted, &mut scratch).is_ok());
    assert!(matches!(
        linker.link(&stranger, &mut scratch),
        Err(PluginError::LinkFailure(_))
    ));
}

#[test]
fn test_entry_failures_do_not_stop_the_load() {
    let mut host = TestHost::new();
    host.write_module("a_good.nro", "collect_one", 1);
    host.write_module("b_panics.nro", "panic", 2);
    host.write_module("c_raw_panics.nro", "raw_panic", 3);
    host.write_module("d_quits.nro", "false", 4);
    host.write_module("e_good.nro", "collect_one", 5);

    let report = host.load();
    assert_eq!(report.initialized, 2);
    assert_eq!(report.entry_failures, 3);
    assert_eq!(host.session.plugin_count(), 5);

    // The quitter registered a callback before failing; it was revoked.
    assert_eq!(host.collect(), vec!["a_good", "e_good"]);
    for index in 1..4 {
        let module = host.session.plugin(index).unwrap();
        assert!(module.is_linked());
        assert!(!module.entry_succeeded());
    }
    assert!(host.session.unload_all());
}

#[test]
fn test_link_failures_are_isolated() {
    let mut host = TestHost::new();
    let unknown_code = ImageBuilder::table()
        .export(PLUGIN_MAIN_SYMBOL, "test::missing")
        .build();
    let unresolved_import = ImageBuilder::table()
        .export(PLUGIN_MAIN_SYMBOL, "test::ok")
        .import("host::nothing")
        .build();
    let resolved_import = ImageBuilder::table()
        .export(PLUGIN_MAIN_SYMBOL, "test::ok")
        .import("host::version")
        .bss(8)
        .build();
    let no_entry = ImageBuilder::table().bss(8).payload(vec![1]).build();

    host.write("a.nro", &unknown_code);
    host.write("b.nro", &unresolved_import);
    host.write("c.nro", &resolved_import);
    host.write("d.nro", &no_entry);

    let report = host.load();
    assert_eq!(report.accepted, 4);
    assert_eq!(report.link_failures, 2);
    assert_eq!(report.initialized, 1);
    assert_eq!(report.entry_failures, 1);

    let states: Vec<_> = host.session.plugins().iter().map(|m| m.state()).collect();
    assert_eq!(states[0], ModuleState::LinkFailed);
    assert_eq!(states[1], ModuleState::LinkFailed);
    assert!(host.session.plugin(2).unwrap().entry_succeeded());
    assert!(!host.session.plugin(3).unwrap().entry_succeeded());
    assert_eq!(host.session.linker().live_count(), 2);
}

#[test]
fn test_manifest_failure_aborts_load() {
    let mut config = TestHost::config();
    // One page: room for one image, none left for the manifest.
    config.heap_size = 4096;
    let mut host = TestHost::with_config(config);
    host.write_module("a.nro", "ok", 1);

    let root = host.root().to_path_buf();
    let result = host.session.load(&root, false);
    assert!(matches!(
        result,
        Err(PluginError::Heap(HeapError::OutOfMemory { .. }))
    ));
    assert!(!host.session.is_loaded());
    assert_eq!(host.session.plugin_count(), 0);
    assert_eq!(host.session.host_pool_stats().used, 0);
    assert!(!host.session.load_all(&root, false));
}
