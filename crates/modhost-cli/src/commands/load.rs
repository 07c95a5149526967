//! Load a plugin directory once and report what happened.

use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use crate::host::Host;
use crate::output::{self, OutputFormat};
use modhost_core::config::AppConfig;
use modhost_core::error::AppError;
use modhost_plugin::{LoadReport, LoaderSession};

/// Arguments for the load command
#[derive(Debug, Args)]
pub struct LoadArgs {
    /// Plugin directory (defaults to `plugins.directory`)
    pub dir: Option<String>,

    /// Host frames to raise on loaded modules before unloading
    #[arg(long, default_value = "0")]
    pub ticks: u64,

    /// Run the greeting hook site with this name before unloading
    #[arg(long)]
    pub greet: Option<String>,

    /// Link native images instead of builtin table images
    #[arg(long)]
    pub native: bool,
}

/// One row of the plugin table.
#[derive(Debug, Serialize, Tabled)]
pub struct PluginRow {
    #[tabled(rename = "#")]
    pub index: usize,
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "File")]
    pub file: String,
    #[tabled(rename = "State")]
    pub state: String,
    #[tabled(rename = "Fingerprint")]
    pub fingerprint: String,
    #[tabled(rename = "Scratch")]
    pub scratch: usize,
    #[tabled(rename = "Child heap")]
    pub child_heap: String,
}

/// Rows for every module of `session`.
pub fn plugin_rows(session: &LoaderSession) -> Vec<PluginRow> {
    session
        .plugins()
        .iter()
        .enumerate()
        .map(|(index, module)| PluginRow {
            index,
            name: module.name().to_string(),
            file: module.file_name().to_string(),
            state: module.state().to_string(),
            fingerprint: module.fingerprint().short(),
            scratch: module.scratch_size(),
            child_heap: module
                .child_heap_stats()
                .map(|s| format!("{}/{}", s.used, s.size))
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct LoadSummary<'a> {
    report: &'a LoadReport,
    plugins: Vec<PluginRow>,
    heap: Option<modhost_plugin::HeapStats>,
    ticks: Option<u64>,
    greeting: Option<String>,
}

/// Execute the load command
pub async fn execute(
    args: &LoadArgs,
    config: &AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let root = super::plugin_root(args.dir.as_deref(), config);
    let mut host = Host::new(&config.plugins, args.native)?;

    let report = host.session.load(&root, false)?;

    let ticks = (args.ticks > 0).then(|| (0..args.ticks).map(|_| host.tick()).sum::<u64>());
    let greeting = args
        .greet
        .as_deref()
        .map(|name| host.greet(name))
        .transpose()?;

    match format {
        OutputFormat::Json => {
            let summary = LoadSummary {
                report: &report,
                plugins: plugin_rows(&host.session),
                heap: host.session.heap_stats(),
                ticks,
                greeting,
            };
            output::print_json(&summary);
        }
        OutputFormat::Table => {
            println!("Loaded '{}':", root.display());
            output::print_kv("Discovered", &report.discovered.to_string());
            output::print_kv("Accepted", &report.accepted.to_string());
            output::print_kv("Duplicates", &report.duplicates.to_string());
            output::print_kv("Rejected", &report.rejected.to_string());
            output::print_kv("Link failures", &report.link_failures.to_string());
            output::print_kv("Entry failures", &report.entry_failures.to_string());
            if let Some(heap) = host.session.heap_stats() {
                output::print_kv("Heap", &format!("{} of {} bytes used", heap.used, heap.size));
            }
            if let Some(total) = ticks {
                output::print_kv("Tick total", &total.to_string());
            }
            if let Some(greeting) = &greeting {
                output::print_kv("Greeting", greeting);
            }
            println!();
            output::print_list(&plugin_rows(&host.session), format);
        }
    }

    if report.initialized < report.accepted {
        output::print_warning(&format!(
            "{} of {} modules did not initialize",
            report.accepted - report.initialized,
            report.accepted
        ));
    }

    if !host.session.unload_all() {
        return Err(AppError::plugin("Unload did not complete cleanly"));
    }
    Ok(())
}
