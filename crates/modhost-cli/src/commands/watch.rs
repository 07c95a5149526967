//! Keep a plugin directory loaded and reload it when its content changes.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use clap::Args;
use tracing::{info, warn};

use crate::host::Host;
use crate::output;
use modhost_core::config::AppConfig;
use modhost_core::error::AppError;
use modhost_plugin::Fingerprint;
use modhost_plugin::discovery::{LocalFileSystem, discover};

/// Arguments for the watch command
#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Plugin directory (defaults to `plugins.directory`)
    pub dir: Option<String>,

    /// Polling interval in seconds
    #[arg(short, long, default_value = "2")]
    pub interval: u64,

    /// Link native images instead of builtin table images
    #[arg(long)]
    pub native: bool,
}

/// Fingerprints of every valid image under `root`.
fn snapshot(root: &Path, extension: Option<&str>) -> BTreeSet<Fingerprint> {
    discover(&LocalFileSystem, root, extension)
        .iter()
        .filter_map(|file| Fingerprint::of_image(&file.bytes).ok())
        .collect()
}

/// Execute the watch command
pub async fn execute(args: &WatchArgs, config: &AppConfig) -> Result<(), AppError> {
    let root = super::plugin_root(args.dir.as_deref(), config);
    let extension = config.plugins.extension_filter().map(str::to_string);
    let mut host = Host::new(&config.plugins, args.native)?;

    if config.plugins.auto_load {
        host.session.load(&root, false)?;
    }
    let mut current = snapshot(&root, extension.as_deref());
    output::print_success(&format!(
        "Watching '{}' ({} plugins), Ctrl-C to stop",
        root.display(),
        host.session.plugin_count()
    ));

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval.max(1)));
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let next = snapshot(&root, extension.as_deref());
                if next == current {
                    if host.session.is_loaded() {
                        host.tick();
                    }
                    continue;
                }
                info!(root = %root.display(), before = current.len(), after = next.len(), "Plugin directory changed");
                current = next;
                let reloaded = if host.session.is_loaded() {
                    host.session.reload(&root)
                } else {
                    host.session.load_all(&root, false)
                };
                if reloaded {
                    output::print_success(&format!("Reloaded {} plugins", host.session.plugin_count()));
                } else {
                    warn!(root = %root.display(), "Reload failed");
                    output::print_warning("Reload failed, see log");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    if !host.session.unload_all() {
        return Err(AppError::plugin("Unload did not complete cleanly"));
    }
    output::print_success("Plugins unloaded");
    Ok(())
}
