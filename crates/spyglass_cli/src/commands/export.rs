//! The `export` command: query, hydrate, print.

use super::{CliError, CliResult};
use crate::json;
use spyglass_core::node::Node;
use spyglass_core::scheduler::QueryReply;
use spyglass_core::{ArchiveConfig, IndexConfig};
use spyglass_types::parse_expression;
use std::path::Path;
use tracing::debug;

pub fn run(data_dir: &Path, expr: &str, limit: Option<usize>) -> CliResult {
    let expr = parse_expression(expr)
        .map_err(|e| CliError::Config(format!("bad expression: {e}")))?;
    let mut node = Node::open(
        data_dir,
        IndexConfig::default(),
        ArchiveConfig::default(),
    )?;
    let (summary, replies) = node.lookup(expr)?;
    debug!(hits = summary.hits, scheduled = summary.scheduled, "query started");
    if summary.hits == 0 {
        return Ok(());
    }
    let mut printed_partitions = 0usize;
    let drain_round = |node: &Node| -> Result<usize, CliError> {
        let mut count = 0usize;
        loop {
            match replies
                .recv()
                .map_err(|_| CliError::Runtime("scheduler went away".into()))?
            {
                QueryReply::Hits { ids, .. } => {
                    for event in node.extract(&ids)? {
                        println!("{}", json::event_to_json(&event));
                    }
                    count += 1;
                }
                QueryReply::Done => return Ok(count),
            }
        }
    };
    printed_partitions += drain_round(&node)?;
    if let Some(query_id) = summary.query_id {
        loop {
            if limit.is_some_and(|l| printed_partitions >= l) {
                node.cancel(query_id);
                break;
            }
            match node.continue_query(query_id, 1) {
                Ok(0) | Err(_) => break,
                Ok(_) => printed_partitions += drain_round(&node)?,
            }
        }
    }
    Ok(())
}
