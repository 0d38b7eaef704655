//! Shared fixtures for the Spyglass benchmarks.

use spyglass_core::index::ValueIndex;
use spyglass_types::{Data, Type};

/// Builds a port index over a repeating set of well-known ports.
pub fn port_index(rows: u64) -> ValueIndex {
    let ports: Vec<Data> = ["22/tcp", "53/udp", "80/tcp", "443/tcp", "8080/tcp"]
        .iter()
        .map(|p| Data::Port(p.parse().expect("fixture port")))
        .collect();
    let mut index = ValueIndex::make(&Type::port()).expect("port index");
    for row in 0..rows {
        index
            .append(&ports[(row % ports.len() as u64) as usize])
            .expect("fixture append");
    }
    index
}

/// Builds an address index with a mix of v4 and v6 rows.
pub fn address_index(rows: u64) -> ValueIndex {
    let mut index = ValueIndex::make(&Type::address()).expect("address index");
    for row in 0..rows {
        let addr = if row % 7 == 0 {
            format!("fe80::{:x}", row % 65_536)
        } else {
            format!("10.{}.{}.{}", row / 65_536 % 256, row / 256 % 256, row % 256)
        };
        index
            .append(&Data::Address(addr.parse().expect("fixture address")))
            .expect("fixture append");
    }
    index
}
