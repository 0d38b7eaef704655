//! The type lattice.
//!
//! A [`Type`] is a cheaply clonable handle to a structurally compared type
//! drawn from a fixed sum of kinds. Types carry an optional name and an
//! ordered list of key/value attributes. Strict equality (`==`) honors
//! names and attributes; [`Type::congruent`] ignores them and compares the
//! underlying structure only, resolving alias chains on both sides.

use std::fmt;
use std::sync::Arc;

/// A key/value annotation attached to a type.
///
/// Attributes parameterize index construction, e.g. `{skip}`,
/// `{base, "[10, 10]"}`, or `{max_length, "256"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Attribute {
    /// The attribute key.
    pub key: String,
    /// The optional attribute value.
    pub value: Option<String>,
}

impl Attribute {
    /// Creates a key-only attribute.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }

    /// Creates a key/value attribute.
    pub fn with_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }
}

/// A named field inside a record type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordField {
    /// The field name. Flattened fields join nested names with `.`.
    pub name: String,
    /// The field type.
    pub ty: Type,
}

impl RecordField {
    /// Creates a record field.
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// The concrete structure of a type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// The type of `nil` and nothing else.
    None,
    /// Boolean.
    Bool,
    /// Signed 64-bit integer.
    Int,
    /// Unsigned 64-bit integer.
    Count,
    /// IEEE 754 double.
    Real,
    /// A signed duration in nanoseconds.
    Timespan,
    /// Nanoseconds since the UNIX epoch.
    Timestamp,
    /// UTF-8 string.
    String,
    /// A regular expression pattern.
    Pattern,
    /// An IPv4 or IPv6 address (IPv4 embedded as v4-in-v6).
    Address,
    /// An IP subnet.
    Subnet,
    /// A transport-layer port with protocol.
    Port,
    /// An enumeration over a fixed, ordered set of names.
    Enumeration(Vec<String>),
    /// A homogeneous, ordered sequence.
    Vector(Type),
    /// A homogeneous, unordered collection.
    Set(Type),
    /// An associative container.
    Map(Type, Type),
    /// An ordered list of named fields.
    Record(Vec<RecordField>),
    /// A type alias; resolves to the underlying type for congruence.
    Alias(Type),
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct TypeInner {
    kind: TypeKind,
    name: Option<String>,
    attributes: Vec<Attribute>,
}

/// The semantic representation of data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Type(Arc<TypeInner>);

impl Type {
    /// Creates an unnamed type without attributes from a kind.
    pub fn new(kind: TypeKind) -> Self {
        Self(Arc::new(TypeInner {
            kind,
            name: None,
            attributes: Vec::new(),
        }))
    }

    /// The `none` type.
    pub fn none() -> Self {
        Self::new(TypeKind::None)
    }

    /// The boolean type.
    pub fn bool() -> Self {
        Self::new(TypeKind::Bool)
    }

    /// The signed integer type.
    pub fn int() -> Self {
        Self::new(TypeKind::Int)
    }

    /// The unsigned counter type.
    pub fn count() -> Self {
        Self::new(TypeKind::Count)
    }

    /// The floating point type.
    pub fn real() -> Self {
        Self::new(TypeKind::Real)
    }

    /// The duration type.
    pub fn timespan() -> Self {
        Self::new(TypeKind::Timespan)
    }

    /// The point-in-time type.
    pub fn timestamp() -> Self {
        Self::new(TypeKind::Timestamp)
    }

    /// The string type.
    pub fn string() -> Self {
        Self::new(TypeKind::String)
    }

    /// The pattern type.
    pub fn pattern() -> Self {
        Self::new(TypeKind::Pattern)
    }

    /// The IP address type.
    pub fn address() -> Self {
        Self::new(TypeKind::Address)
    }

    /// The IP subnet type.
    pub fn subnet() -> Self {
        Self::new(TypeKind::Subnet)
    }

    /// The port type.
    pub fn port() -> Self {
        Self::new(TypeKind::Port)
    }

    /// An enumeration type over the given field names.
    pub fn enumeration(fields: Vec<String>) -> Self {
        Self::new(TypeKind::Enumeration(fields))
    }

    /// A vector type with the given element type.
    pub fn vector(elem: Type) -> Self {
        Self::new(TypeKind::Vector(elem))
    }

    /// A set type with the given element type.
    pub fn set(elem: Type) -> Self {
        Self::new(TypeKind::Set(elem))
    }

    /// A map type with the given key and value types.
    pub fn map(key: Type, value: Type) -> Self {
        Self::new(TypeKind::Map(key, value))
    }

    /// A record type over the given fields.
    pub fn record(fields: Vec<RecordField>) -> Self {
        Self::new(TypeKind::Record(fields))
    }

    /// An alias of the given type.
    pub fn alias(inner: Type) -> Self {
        Self::new(TypeKind::Alias(inner))
    }

    /// Returns a copy of this type with the given name.
    #[must_use]
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self(Arc::new(TypeInner {
            kind: self.0.kind.clone(),
            name: Some(name.into()),
            attributes: self.0.attributes.clone(),
        }))
    }

    /// Returns a copy of this type with an additional attribute.
    #[must_use]
    pub fn with_attribute(&self, attr: Attribute) -> Self {
        let mut attributes = self.0.attributes.clone();
        attributes.push(attr);
        Self(Arc::new(TypeInner {
            kind: self.0.kind.clone(),
            name: self.0.name.clone(),
            attributes,
        }))
    }

    /// The structure of this type.
    pub fn kind(&self) -> &TypeKind {
        &self.0.kind
    }

    /// The optional type name.
    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    /// The ordered attribute list.
    pub fn attributes(&self) -> &[Attribute] {
        &self.0.attributes
    }

    /// Looks up the value of an attribute by key.
    ///
    /// Returns `None` if the attribute is absent, `Some(None)` if it is
    /// present without a value.
    pub fn attribute(&self, key: &str) -> Option<Option<&str>> {
        self.0
            .attributes
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_deref())
    }

    /// Whether the type carries the given key-only attribute.
    pub fn has_attribute(&self, key: &str) -> bool {
        self.attribute(key).is_some()
    }

    /// Resolves alias chains down to the first non-alias type.
    pub fn resolve(&self) -> &Type {
        let mut current = self;
        while let TypeKind::Alias(inner) = current.kind() {
            current = inner;
        }
        current
    }

    /// Structural congruence: equal structure, names and attributes
    /// ignored, aliases resolved on both sides.
    pub fn congruent(&self, other: &Type) -> bool {
        use TypeKind::*;
        match (self.resolve().kind(), other.resolve().kind()) {
            (None, None)
            | (Bool, Bool)
            | (Int, Int)
            | (Count, Count)
            | (Real, Real)
            | (Timespan, Timespan)
            | (Timestamp, Timestamp)
            | (String, String)
            | (Pattern, Pattern)
            | (Address, Address)
            | (Subnet, Subnet)
            | (Port, Port) => true,
            (Enumeration(a), Enumeration(b)) => a == b,
            (Vector(a), Vector(b)) | (Set(a), Set(b)) => a.congruent(b),
            (Map(ka, va), Map(kb, vb)) => ka.congruent(kb) && va.congruent(vb),
            (Record(a), Record(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(x, y)| x.name == y.name && x.ty.congruent(&y.ty))
            }
            _ => false,
        }
    }

    /// Flattens a record type by joining nested field names with `.`.
    ///
    /// Non-record types are returned unchanged. Every record has exactly
    /// one flat representation.
    #[must_use]
    pub fn flatten(&self) -> Type {
        let TypeKind::Record(fields) = self.kind() else {
            return self.clone();
        };
        let mut flat = Vec::new();
        for field in fields {
            flatten_into(&field.name, &field.ty, &mut flat);
        }
        let mut result = Type::record(flat);
        if let Some(name) = self.name() {
            result = result.with_name(name);
        }
        for attr in self.attributes() {
            result = result.with_attribute(attr.clone());
        }
        result
    }

    /// The flattened fields of a record type, or an empty slice otherwise.
    pub fn record_fields(&self) -> &[RecordField] {
        match self.kind() {
            TypeKind::Record(fields) => fields,
            _ => &[],
        }
    }
}

fn flatten_into(prefix: &str, ty: &Type, out: &mut Vec<RecordField>) {
    match ty.kind() {
        TypeKind::Record(fields) => {
            for field in fields {
                let name = format!("{prefix}.{}", field.name);
                flatten_into(&name, &field.ty, out);
            }
        }
        _ => out.push(RecordField::new(prefix, ty.clone())),
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = self.name() {
            return write!(f, "{name}");
        }
        match self.kind() {
            TypeKind::None => write!(f, "none"),
            TypeKind::Bool => write!(f, "bool"),
            TypeKind::Int => write!(f, "int"),
            TypeKind::Count => write!(f, "count"),
            TypeKind::Real => write!(f, "real"),
            TypeKind::Timespan => write!(f, "duration"),
            TypeKind::Timestamp => write!(f, "time"),
            TypeKind::String => write!(f, "string"),
            TypeKind::Pattern => write!(f, "pattern"),
            TypeKind::Address => write!(f, "addr"),
            TypeKind::Subnet => write!(f, "subnet"),
            TypeKind::Port => write!(f, "port"),
            TypeKind::Enumeration(fields) => write!(f, "enum {{{}}}", fields.join(", ")),
            TypeKind::Vector(elem) => write!(f, "vector<{elem}>"),
            TypeKind::Set(elem) => write!(f, "set<{elem}>"),
            TypeKind::Map(k, v) => write!(f, "map<{k}, {v}>"),
            TypeKind::Record(fields) => {
                write!(f, "record {{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.ty)?;
                }
                write!(f, "}}")
            }
            TypeKind::Alias(inner) => write!(f, "{inner}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn_layout() -> Type {
        Type::record(vec![
            RecordField::new(
                "id",
                Type::record(vec![
                    RecordField::new("orig_h", Type::address()),
                    RecordField::new("resp_h", Type::address()),
                    RecordField::new("resp_p", Type::port()),
                ]),
            ),
            RecordField::new("duration", Type::timespan()),
        ])
        .with_name("conn")
    }

    #[test]
    fn flatten_joins_nested_names() {
        let flat = conn_layout().flatten();
        let names: Vec<_> = flat.record_fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["id.orig_h", "id.resp_h", "id.resp_p", "duration"]);
        assert_eq!(flat.name(), Some("conn"));
    }

    #[test]
    fn flatten_is_idempotent() {
        let flat = conn_layout().flatten();
        assert_eq!(flat, flat.flatten());
    }

    #[test]
    fn congruence_ignores_names_and_attributes() {
        let a = Type::count().with_name("bytes");
        let b = Type::count().with_attribute(Attribute::with_value("base", "[10, 10]"));
        assert!(a.congruent(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn congruence_resolves_aliases() {
        let a = Type::alias(Type::address()).with_name("host");
        assert!(a.congruent(&Type::address()));
        assert!(!a.congruent(&Type::subnet()));
    }

    #[test]
    fn strict_equality_honors_attributes() {
        let plain = Type::string();
        let capped = Type::string().with_attribute(Attribute::with_value("max_length", "256"));
        assert_ne!(plain, capped);
        assert_eq!(capped.attribute("max_length"), Some(Some("256")));
        assert!(!capped.has_attribute("skip"));
    }
}
