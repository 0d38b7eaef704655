//! The `status` command: report node state.

use super::CliResult;
use spyglass_core::node::Node;
use spyglass_core::{ArchiveConfig, IndexConfig};
use std::path::Path;

pub fn run(data_dir: &Path) -> CliResult {
    let node = Node::open(
        data_dir,
        IndexConfig::default(),
        ArchiveConfig::default(),
    )?;
    let status = serde_json::json!({
        "data_dir": data_dir.display().to_string(),
        "partitions": node.partitions(),
        "segments": node.segments(),
        "events": node.events(),
    });
    println!("{status}");
    Ok(())
}
