//! The `import` command: JSON-lines ingestion against a schema.

use super::{CliError, CliResult};
use crate::json;
use spyglass_core::node::Node;
use spyglass_core::{ArchiveConfig, IndexConfig};
use spyglass_types::TableSlice;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{info, warn};

pub fn run(
    data_dir: &Path,
    schema_path: &Path,
    read: Option<&Path>,
    batch: usize,
) -> CliResult {
    let schema_text = std::fs::read_to_string(schema_path)
        .map_err(|e| CliError::Config(format!("cannot read schema {}: {e}", schema_path.display())))?;
    let layout = json::parse_schema(&schema_text)
        .map_err(CliError::Config)?
        .flatten();
    let mut node = Node::open(
        data_dir,
        IndexConfig::default(),
        ArchiveConfig::default(),
    )?;

    let input: Box<dyn BufRead> = match read {
        Some(path) => Box::new(BufReader::new(File::open(path).map_err(|e| {
            CliError::Config(format!("cannot read {}: {e}", path.display()))
        })?)),
        None => Box::new(BufReader::new(std::io::stdin())),
    };

    let batch = batch.max(1);
    let mut rows = Vec::with_capacity(batch);
    let mut imported = 0u64;
    let mut skipped = 0u64;
    for (number, line) in input.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed = serde_json::from_str(&line)
            .map_err(|e| e.to_string())
            .and_then(|value| json::row_from_json(&layout, &value));
        match parsed {
            Ok(row) => rows.push(row),
            Err(e) => {
                warn!(line = number + 1, error = %e, "skipping event");
                skipped += 1;
                continue;
            }
        }
        if rows.len() == batch {
            ingest(&mut node, &layout, &mut rows, &mut imported)?;
        }
    }
    ingest(&mut node, &layout, &mut rows, &mut imported)?;
    node.flush()?;
    info!(imported, skipped, "import finished");
    println!("{imported}");
    Ok(())
}

fn ingest(
    node: &mut Node,
    layout: &spyglass_types::Type,
    rows: &mut Vec<Vec<spyglass_types::Data>>,
    imported: &mut u64,
) -> CliResult {
    if rows.is_empty() {
        return Ok(());
    }
    let count = rows.len() as u64;
    let slice = TableSlice::new(layout.clone(), std::mem::take(rows))
        .map_err(|e| CliError::Runtime(e.to_string()))?;
    node.ingest(&slice)?;
    *imported += count;
    Ok(())
}
