//! Per-question result records, persisted as append-only JSONL after the
//! whole batch completes.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One line of the batch output file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultRecord {
    /// Directory name of the question file.
    pub question_file_path: String,
    /// Extracted function code; empty when extraction failed.
    pub function: String,
    /// Extracted entry-point name; empty when extraction failed.
    pub function_name: String,
}

/// Write one JSONL line per record.
pub fn write_results(path: &Path, records: &[ResultRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create results dir {}", parent.display()))?;
    }
    let mut file =
        fs::File::create(path).with_context(|| format!("create results {}", path.display()))?;
    for record in records {
        let line = serde_json::to_string(record).context("serialize result record")?;
        writeln!(file, "{line}").with_context(|| format!("write {}", path.display()))?;
    }
    Ok(())
}
