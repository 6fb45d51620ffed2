//! Subcommand implementations.

pub mod assemble;
pub mod chat;
pub mod config_cmd;
pub mod memory;

use std::path::PathBuf;
use strata_config::AppConfig;
use strata_core::session::Attachment;

pub(crate) fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

/// Read each file as text; the file name becomes the attachment name.
pub(crate) fn read_attachments(paths: &[PathBuf]) -> Result<Vec<Attachment>, Box<dyn std::error::Error>> {
    paths
        .iter()
        .map(|path| -> Result<Attachment, Box<dyn std::error::Error>> {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            Ok(Attachment::new(name, text))
        })
        .collect()
}
