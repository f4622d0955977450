//! Collaborator import command (`quadro import`).

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use quadro::board::import::{self, ImportFormat};
use quadro::config::QuadroConfig;

pub fn cmd_import(
    project_dir: &Path,
    config: &QuadroConfig,
    company_id: &str,
    format: &str,
    delimiter: Option<char>,
    file: &Path,
) -> Result<()> {
    let format = ImportFormat::from_str(format).map_err(anyhow::Error::msg)?;
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let delimiter = match delimiter {
        Some(c) if c.is_ascii() => c as u8,
        Some(c) => anyhow::bail!("Delimiter must be a single ASCII character, got '{}'", c),
        None => import::detect_delimiter(&content),
    };
    let rows = import::read_csv(content.as_bytes(), delimiter)?;

    let db = super::open_db(project_dir, config)?;
    let report = import::import_collaborators(&db, company_id, format, &rows)?;

    println!(
        "Imported {} new, updated {}, rejected {} ({} layout)",
        report.imported,
        report.updated,
        report.rejected.len(),
        format.as_str()
    );
    for rejection in &report.rejected {
        println!("  line {}: {}", rejection.line, rejection.reason);
    }
    Ok(())
}
