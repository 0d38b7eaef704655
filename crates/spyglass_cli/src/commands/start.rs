//! The `start` command: run a node until standard input closes.

use super::CliResult;
use spyglass_core::node::Node;
use spyglass_core::{ArchiveConfig, IndexConfig};
use std::io::BufRead;
use std::path::Path;
use tracing::info;

pub fn run(data_dir: &Path) -> CliResult {
    let mut node = Node::open(
        data_dir,
        IndexConfig::default(),
        ArchiveConfig::default(),
    )?;
    info!(
        data_dir = %data_dir.display(),
        partitions = node.partitions(),
        segments = node.segments(),
        "node running; close stdin to stop"
    );
    // Remote sources connect through the clustering layer; standalone
    // mode just holds the node open.
    for line in std::io::stdin().lock().lines() {
        line?;
    }
    node.flush()?;
    info!("node stopped");
    Ok(())
}
