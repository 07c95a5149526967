//! Inspect a module image without loading it.

use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use crate::output::{self, OutputFormat};
use modhost_core::error::AppError;
use modhost_plugin::Fingerprint;
use modhost_plugin::image;

/// Arguments for the inspect command
#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Module image to inspect
    pub path: PathBuf,
}

#[derive(Debug, Serialize)]
struct ImageInfo {
    path: String,
    file_size: usize,
    kind: String,
    version: u32,
    image_size: u32,
    bss_size: u32,
    scratch_size: usize,
    payload_size: usize,
    exports: Vec<(String, String)>,
    imports: Vec<String>,
    fingerprint: Fingerprint,
}

/// Execute the inspect command
pub async fn execute(args: &InspectArgs, format: OutputFormat) -> Result<(), AppError> {
    let bytes = tokio::fs::read(&args.path)
        .await
        .map_err(|e| AppError::storage(format!("Failed to read '{}': {e}", args.path.display())))?;

    let parsed = image::parse(&bytes)
        .map_err(|e| AppError::validation(format!("Not a module image: {e}")))?;
    let fingerprint = Fingerprint::of_image(&bytes)
        .map_err(|e| AppError::validation(format!("Not a module image: {e}")))?;

    let info = ImageInfo {
        path: args.path.display().to_string(),
        file_size: bytes.len(),
        kind: format!("{:?}", parsed.header.kind).to_lowercase(),
        version: parsed.header.version,
        image_size: parsed.header.image_size,
        bss_size: parsed.header.bss_size,
        scratch_size: parsed.scratch_size(),
        payload_size: parsed.payload.len(),
        exports: parsed
            .exports
            .iter()
            .map(|e| (e.symbol.clone(), e.target.clone()))
            .collect(),
        imports: parsed.imports.clone(),
        fingerprint,
    };

    match format {
        OutputFormat::Json => output::print_json(&info),
        OutputFormat::Table => {
            println!("Module image '{}':", info.path);
            output::print_kv("Kind", &info.kind);
            output::print_kv("Version", &info.version.to_string());
            output::print_kv("Image size", &info.image_size.to_string());
            output::print_kv("File size", &info.file_size.to_string());
            output::print_kv("Bss size", &info.bss_size.to_string());
            output::print_kv("Scratch size", &info.scratch_size.to_string());
            output::print_kv("Payload size", &info.payload_size.to_string());
            output::print_kv("Fingerprint", &info.fingerprint.to_hex());
            for (symbol, target) in &info.exports {
                output::print_kv("Export", &format!("{symbol} -> {target}"));
            }
            for import in &info.imports {
                output::print_kv("Import", import);
            }
        }
    }
    Ok(())
}
