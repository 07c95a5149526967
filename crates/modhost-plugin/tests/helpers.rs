//! Shared helpers for loader integration tests.

#![allow(dead_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use modhost_core::config::plugin::PluginConfig;
use modhost_plugin::image::ImageBuilder;
use modhost_plugin::prelude::*;
use modhost_plugin::{CodeTable, HostSymbols, LoadReport, LoaderSession, TableBackend};
use tempfile::TempDir;

mod_signal!(pub Collect, (()) -> Vec<String>);
mod_signal!(pub LoadDir, (()) -> String);
mod_signal!(pub ReloadFlag, (()) -> bool);
hook_signal!(pub Jump: "Player::jump", (f32) -> bool);

/// Address published for the `host::version` import.
pub const HOST_VERSION_ADDRESS: usize = 0x0001_0203;

fn push_name(ctx: &LoaderContext, times: usize) -> bool {
    (0..times).all(|_| {
        let name = ctx.module_name().to_string();
        ctx.add_event::<Collect, _>(move |out: &mut Vec<String>, _: &()| {
            out.push(name.clone());
            HookAction::Continue
        })
        .is_ok()
    })
}

plugin_entry!(pub ok_main, |_ctx| true);

plugin_entry!(pub collect_one_main, |ctx| push_name(ctx, 1));

plugin_entry!(pub collect_two_main, |ctx| push_name(ctx, 2));

plugin_entry!(pub collect_three_main, |ctx| push_name(ctx, 3));

plugin_entry!(pub false_main, |ctx| {
    push_name(ctx, 1);
    false
});

plugin_entry!(pub panic_main, |_ctx| -> bool { panic!("module exploded") });

plugin_entry!(pub child_heap_main, |ctx| ctx.create_child_heap(8192).is_ok());

plugin_entry!(pub report_dir_main, |ctx| {
    let dir = ctx.load_directory().to_string();
    let reload = ctx.is_reload();
    ctx.add_event::<LoadDir, _>(move |out: &mut String, _: &()| {
        out.clone_from(&dir);
        HookAction::Continue
    })
    .is_ok()
        && ctx
            .add_event::<ReloadFlag, _>(move |out: &mut bool, _: &()| {
                *out = reload;
                HookAction::Continue
            })
            .is_ok()
});

plugin_entry!(pub jump_guard_main, |ctx| {
    ctx.add_hook_prefix::<Jump, _>(|out: &mut bool, height: &f32| {
        if *height > 10.0 {
            *out = false;
            HookAction::Halt
        } else {
            HookAction::Continue
        }
    })
    .is_ok()
});

/// Entry point that panics without the module-side boundary.
pub unsafe extern "C-unwind" fn raw_panic_main(_: *mut LoaderContext) -> bool {
    panic!("raw entry exploded")
}

/// Every entry above, published under `test::<name>`.
pub fn code_table() -> CodeTable {
    let mut table = CodeTable::new();
    let entries: [(&str, PluginMainFn); 10] = [
        ("ok", ok_main),
        ("collect_one", collect_one_main),
        ("collect_two", collect_two_main),
        ("collect_three", collect_three_main),
        ("false", false_main),
        ("panic", panic_main),
        ("raw_panic", raw_panic_main),
        ("child_heap", child_heap_main),
        ("report_dir", report_dir_main),
        ("jump_guard", jump_guard_main),
    ];
    for (name, entry) in entries {
        table.insert_entry(format!("test::{name}"), entry);
    }
    table
}

/// A table image whose `plugin_main` is `test::<entry>`. `tag` varies the
/// content, and therefore the fingerprint, without changing behavior.
pub fn module_image(entry: &str, tag: u8) -> Vec<u8> {
    ImageBuilder::table()
        .export(PLUGIN_MAIN_SYMBOL, format!("test::{entry}"))
        .bss(64)
        .payload(vec![tag; 16])
        .build()
}

/// A plugin directory plus a session reading from it.
pub struct TestHost {
    pub dir: TempDir,
    pub session: LoaderSession,
    pub hooks: Arc<HookRegistry>,
}

impl TestHost {
    pub fn new() -> Self {
        Self::with_config(Self::config())
    }

    pub fn config() -> PluginConfig {
        PluginConfig {
            heap_size: 512 * 1024,
            host_pool_size: 2 * 1024 * 1024,
            ..PluginConfig::default()
        }
    }

    pub fn with_config(config: PluginConfig) -> Self {
        Self::build(tempfile::tempdir().expect("temp dir"), config)
    }

    /// A host whose load directories are relative to the plugin root.
    pub fn stripping_root() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = PluginConfig {
            strip_prefix: dir.path().to_string_lossy().into_owned(),
            ..Self::config()
        };
        Self::build(dir, config)
    }

    fn build(dir: TempDir, config: PluginConfig) -> Self {
        let symbols = Arc::new(HostSymbols::new());
        symbols.define_address("host::version", HOST_VERSION_ADDRESS);
        symbols.define_function("Player::jump", |height: &f32| *height > 0.0);

        let hooks = Arc::new(HookRegistry::new(8));
        let session = LoaderSession::new(
            config,
            Box::new(TableBackend::new(code_table())),
            symbols,
            hooks.clone(),
        )
        .expect("session");

        Self {
            dir,
            session,
            hooks,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Writes `bytes` at `relative` under the plugin root.
    pub fn write(&self, relative: &str, bytes: &[u8]) -> PathBuf {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create dir");
        }
        std::fs::write(&path, bytes).expect("write module");
        path
    }

    pub fn write_module(&self, relative: &str, entry: &str, tag: u8) -> PathBuf {
        self.write(relative, &module_image(entry, tag))
    }

    pub fn load(&mut self) -> LoadReport {
        let root = self.dir.path().to_path_buf();
        self.session.load(&root, false).expect("load")
    }

    pub fn collect(&self) -> Vec<String> {
        self.session.events().run::<Collect>(&())
    }
}

/// In-memory log sink for `tracing`.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("log buffer")).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("log buffer").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs `f` with a subscriber writing into a buffer and returns the output.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let value = tracing::subscriber::with_default(subscriber, f);
    (value, buffer.contents())
}
