//! # Spyglass Types
//!
//! The type lattice and data model that flow through every layer of
//! Spyglass, plus the boolean expression AST used for queries.
//!
//! This crate provides:
//! - A structurally compared, reference-counted [`Type`]
//! - The tagged-union [`Data`] value representation
//! - Events and table slices (the batch ingest unit)
//! - Relational operators and the query [`Expression`] AST
//! - Expression normalization and a small expression parser

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod data;
mod error;
mod event;
mod expr;
mod operator;
mod parse;
mod schema;
mod slice;

pub use data::{Address, Data, Port, Protocol, Subnet};
pub use error::{TypeError, TypeResult};
pub use event::Event;
pub use expr::{Expression, Extractor, Operand, Predicate};
pub use operator::RelOp;
pub use parse::parse_expression;
pub use schema::{Attribute, RecordField, Type, TypeKind};
pub use slice::TableSlice;

/// Checks whether a data value conforms to a type.
///
/// `Data::Nil` conforms to every type. Containers are checked recursively;
/// record values must match their layout field for field.
pub fn type_check(t: &Type, x: &Data) -> bool {
    data::type_check(t, x)
}
