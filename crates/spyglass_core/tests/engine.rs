//! End-to-end engine tests: ingest, prune, query, hydrate.

use spyglass_core::bitmap::EwahBitmap;
use spyglass_core::node::Node;
use spyglass_core::scheduler::QueryReply;
use spyglass_core::{ArchiveConfig, IndexConfig};
use spyglass_types::{parse_expression, Data, RecordField, TableSlice, Type};
use std::sync::mpsc::Receiver;

fn flow_layout() -> Type {
    Type::record(vec![
        RecordField::new("ts", Type::timestamp()),
        RecordField::new("orig_h", Type::address()),
        RecordField::new("resp_p", Type::port()),
        RecordField::new("uri", Type::string()),
        RecordField::new("bytes", Type::count()),
    ])
    .with_name("flow")
}

fn flows(rows: &[(i64, &str, &str, &str, Option<u64>)]) -> TableSlice {
    TableSlice::new(
        flow_layout(),
        rows.iter()
            .map(|(ts, host, port, uri, bytes)| {
                vec![
                    Data::Timestamp(*ts),
                    Data::Address(host.parse().unwrap()),
                    Data::Port(port.parse().unwrap()),
                    Data::String((*uri).into()),
                    bytes.map_or(Data::Nil, Data::Count),
                ]
            })
            .collect(),
    )
    .unwrap()
}

fn small_node(dir: &std::path::Path, taste: usize, partition_size: u64) -> Node {
    Node::open(
        dir,
        IndexConfig {
            max_partition_size: partition_size,
            taste_partitions: taste,
            num_workers: 2,
            ..IndexConfig::default()
        },
        ArchiveConfig {
            max_events_per_chunk: 4,
            ..ArchiveConfig::default()
        },
    )
    .unwrap()
}

fn drain(rx: &Receiver<QueryReply>) -> EwahBitmap {
    let mut all = EwahBitmap::new();
    loop {
        match rx.recv().expect("reply") {
            QueryReply::Hits { ids, .. } => all |= &ids,
            QueryReply::Done => return all,
        }
    }
}

fn query(node: &mut Node, expr: &str) -> Vec<u64> {
    let parsed = parse_expression(expr).unwrap();
    let (summary, rx) = node.lookup(parsed).unwrap();
    let mut result = if summary.hits > 0 {
        drain(&rx)
    } else {
        EwahBitmap::new()
    };
    if let Some(query_id) = summary.query_id {
        while node.continue_query(query_id, 1).unwrap_or(0) > 0 {
            result |= &drain(&rx);
        }
    }
    result.ones().collect()
}

fn seeded_node(dir: &std::path::Path) -> Node {
    let mut node = small_node(dir, 8, 1024);
    node.ingest(&flows(&[
        (1_000_000_000, "10.0.0.1", "22/tcp", "", Some(100)),
        (2_000_000_000, "10.0.0.2", "53/udp", "/dns", None),
        (3_000_000_000, "192.168.0.1", "80/tcp", "/index.html", Some(9000)),
        (4_000_000_000, "::1", "443/tcp", "/login", Some(40)),
        (5_000_000_000, "10.0.0.3", "8080/tcp", "/admin/login", Some(7)),
    ]))
    .unwrap();
    node.flush().unwrap();
    node
}

#[test]
fn port_range_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let mut node = seeded_node(dir.path());
    assert_eq!(query(&mut node, "resp_p > 100/tcp"), vec![3, 4]);
    assert_eq!(query(&mut node, "resp_p == 53/udp"), vec![1]);
    assert_eq!(query(&mut node, "resp_p == 53/tcp"), Vec::<u64>::new());
}

#[test]
fn address_and_subnet_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let mut node = seeded_node(dir.path());
    assert_eq!(query(&mut node, "orig_h in 10.0.0.0/24"), vec![0, 1, 4]);
    assert_eq!(query(&mut node, "orig_h != ::1"), vec![0, 1, 2, 4]);
    assert_eq!(query(&mut node, ":addr == 192.168.0.1"), vec![2]);
}

#[test]
fn substring_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let mut node = seeded_node(dir.path());
    assert_eq!(query(&mut node, "uri ni \"login\""), vec![3, 4]);
    assert_eq!(query(&mut node, "uri == \"\""), vec![0]);
    assert_eq!(query(&mut node, "uri == \"/dns\""), vec![1]);
}

#[test]
fn nil_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let mut node = seeded_node(dir.path());
    // Row 1 has a nil byte count: no operator sees it...
    assert_eq!(query(&mut node, "bytes >= 0"), vec![0, 2, 3, 4]);
    // ...except the nil comparisons.
    assert_eq!(query(&mut node, "bytes == nil"), vec![1]);
    assert_eq!(query(&mut node, "bytes != nil"), vec![0, 2, 3, 4]);
}

#[test]
fn conjunctions_intersect_and_disjunctions_unite() {
    let dir = tempfile::tempdir().unwrap();
    let mut node = seeded_node(dir.path());
    let a: Vec<u64> = query(&mut node, "orig_h in 10.0.0.0/8");
    let b: Vec<u64> = query(&mut node, "bytes >= 50");
    let both = query(&mut node, "orig_h in 10.0.0.0/8 && bytes >= 50");
    let either = query(&mut node, "orig_h in 10.0.0.0/8 || bytes >= 50");
    let intersection: Vec<u64> = a.iter().copied().filter(|x| b.contains(x)).collect();
    let mut union: Vec<u64> = a.clone();
    union.extend(b.iter().copied().filter(|x| !a.contains(x)));
    union.sort_unstable();
    assert_eq!(both, intersection);
    assert_eq!(either, union);
}

#[test]
fn normalization_preserves_results() {
    let dir = tempfile::tempdir().unwrap();
    let mut node = seeded_node(dir.path());
    let direct = query(&mut node, "bytes < 50 && resp_p > 100/tcp");
    let negated = query(&mut node, "! (bytes >= 50 || resp_p <= 100/tcp)");
    let flipped = query(&mut node, "50 > bytes && 100/tcp < resp_p");
    assert_eq!(direct, negated);
    assert_eq!(direct, flipped);
    assert_eq!(direct, vec![3, 4]);
}

#[test]
fn hydration_round_trips_events() {
    let dir = tempfile::tempdir().unwrap();
    let mut node = seeded_node(dir.path());
    let parsed = parse_expression("uri ni \"login\"").unwrap();
    let (_, rx) = node.lookup(parsed).unwrap();
    let ids = drain(&rx);
    let events = node.extract(&ids).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].id, 3);
    assert_eq!(events[0].timestamp, 4_000_000_000);
    assert_eq!(events[0].type_name(), "flow");
    let Data::Record(values) = &events[0].data else {
        panic!("expected a record");
    };
    assert_eq!(values[3], Data::String("/login".into()));
}

#[test]
fn taste_boundaries() {
    for total in [1usize, 2, 3, 4] {
        let dir = tempfile::tempdir().unwrap();
        // taste_partitions = 3, partition size 2: `total` partitions.
        let mut node = small_node(dir.path(), 3, 2);
        for p in 0..total {
            node.ingest(&flows(&[
                (p as i64, "10.0.0.1", "80/tcp", "/", Some(1)),
                (p as i64, "10.0.0.2", "81/tcp", "/", Some(2)),
            ]))
            .unwrap();
        }
        node.flush().unwrap();
        let parsed = parse_expression("bytes >= 1").unwrap();
        let (summary, rx) = node.lookup(parsed).unwrap();
        assert_eq!(summary.hits, total);
        assert_eq!(summary.scheduled, total.min(3));
        assert_eq!(summary.query_id.is_some(), total > 3);
        let mut ids = drain(&rx);
        if let Some(query_id) = summary.query_id {
            while node.continue_query(query_id, 1).unwrap_or(0) > 0 {
                ids |= &drain(&rx);
            }
        }
        assert_eq!(ids.count_ones(), total as u64 * 2);
    }
}

#[test]
fn mixed_layouts_coexist() {
    let dir = tempfile::tempdir().unwrap();
    let mut node = small_node(dir.path(), 8, 1024);
    node.ingest(&flows(&[(1, "10.0.0.1", "80/tcp", "/", Some(1))]))
        .unwrap();
    let dns_layout = Type::record(vec![
        RecordField::new("ts", Type::timestamp()),
        RecordField::new("query", Type::string()),
    ])
    .with_name("dns");
    let dns = TableSlice::new(
        dns_layout,
        vec![vec![Data::Timestamp(2), Data::String("example.com".into())]],
    )
    .unwrap();
    node.ingest(&dns).unwrap();
    node.flush().unwrap();
    // A layout switch seals the first partition; IDs stay dense.
    assert_eq!(node.partitions(), 2);
    assert_eq!(node.events(), 2);
    assert_eq!(query(&mut node, "query ni \"example\""), vec![1]);
    assert_eq!(query(&mut node, "uri == \"/\""), vec![0]);
}
