//! Pack a module image.

use std::path::PathBuf;

use clap::Args;

use crate::host;
use crate::output;
use modhost_core::error::AppError;
use modhost_plugin::Fingerprint;
use modhost_plugin::ffi::PLUGIN_MAIN_SYMBOL;
use modhost_plugin::image::ImageBuilder;

/// Arguments for the pack command
#[derive(Debug, Args)]
pub struct PackArgs {
    /// Output image path
    #[arg(short, long)]
    pub output: PathBuf,

    /// Builtin code exported as `plugin_main` (table images)
    #[arg(long, conflicts_with = "native")]
    pub entry: Option<String>,

    /// Shared object wrapped as a native image
    #[arg(long)]
    pub native: Option<PathBuf>,

    /// Host symbols the module imports
    #[arg(long = "import")]
    pub imports: Vec<String>,

    /// Zero-initialized bytes the module needs once linked
    #[arg(long, default_value = "0")]
    pub bss: u32,

    /// Free-form bytes appended to a table image, to vary its fingerprint
    #[arg(long)]
    pub tag: Option<String>,
}

/// Execute the pack command
pub async fn execute(args: &PackArgs) -> Result<(), AppError> {
    let mut builder = match (&args.entry, &args.native) {
        (Some(entry), None) => {
            if !host::builtin_names().iter().any(|name| name == entry) {
                return Err(AppError::validation(format!(
                    "Unknown builtin '{entry}', expected one of: {}",
                    host::builtin_names().join(", ")
                )));
            }
            let payload = args.tag.clone().unwrap_or_default().into_bytes();
            ImageBuilder::table()
                .export(PLUGIN_MAIN_SYMBOL, entry.clone())
                .payload(payload)
        }
        (None, Some(path)) => {
            let shared_object = tokio::fs::read(path)
                .await
                .map_err(|e| AppError::storage(format!("Failed to read '{}': {e}", path.display())))?;
            ImageBuilder::native(shared_object)
        }
        _ => {
            return Err(AppError::validation(
                "Exactly one of --entry or --native is required",
            ));
        }
    };

    for import in &args.imports {
        builder = builder.import(import.clone());
    }
    let image = builder.bss(args.bss).build();

    if let Some(parent) = args.output.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AppError::storage(format!("Failed to create dir: {e}")))?;
    }
    tokio::fs::write(&args.output, &image)
        .await
        .map_err(|e| AppError::storage(format!("Failed to write image: {e}")))?;

    let fingerprint = Fingerprint::of_image(&image)
        .map_err(|e| AppError::internal(format!("Packed image is invalid: {e}")))?;
    output::print_success(&format!(
        "Wrote '{}' ({} bytes, fingerprint {})",
        args.output.display(),
        image.len(),
        fingerprint.short()
    ));
    Ok(())
}
