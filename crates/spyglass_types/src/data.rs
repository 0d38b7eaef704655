//! The tagged-union value representation.

use crate::error::{TypeError, TypeResult};
use crate::schema::{Type, TypeKind};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// An IPv4 or IPv6 address stored as 128 bits.
///
/// IPv4 addresses are embedded in the v4-in-v6 mapped form
/// (`::ffff:a.b.c.d`), so byte-wise operations treat both families
/// uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; 16]);

const V4_PREFIX: [u8; 12] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff];

impl Address {
    /// Creates an address from raw big-endian bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Creates an embedded IPv4 address.
    pub fn from_v4(a: u8, b: u8, c: u8, d: u8) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..12].copy_from_slice(&V4_PREFIX);
        bytes[12..].copy_from_slice(&[a, b, c, d]);
        Self(bytes)
    }

    /// The raw big-endian bytes.
    pub const fn bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Whether this address embeds an IPv4 address.
    pub fn is_v4(&self) -> bool {
        self.0[..12] == V4_PREFIX
    }

    /// Returns this address with all but the top `bits` bits zeroed.
    ///
    /// `bits` counts from the most significant bit of the 128-bit value
    /// and is clamped to 128.
    #[must_use]
    pub fn mask(&self, bits: u8) -> Self {
        let bits = bits.min(128) as usize;
        let mut out = self.0;
        for (i, byte) in out.iter_mut().enumerate() {
            let hi = i * 8;
            if bits <= hi {
                *byte = 0;
            } else if bits < hi + 8 {
                *byte &= 0xffu8 << (hi + 8 - bits);
            }
        }
        Self(out)
    }
}

impl From<Ipv4Addr> for Address {
    fn from(x: Ipv4Addr) -> Self {
        let o = x.octets();
        Self::from_v4(o[0], o[1], o[2], o[3])
    }
}

impl From<Ipv6Addr> for Address {
    fn from(x: Ipv6Addr) -> Self {
        Self(x.octets())
    }
}

impl FromStr for Address {
    type Err = TypeError;

    fn from_str(s: &str) -> TypeResult<Self> {
        if let Ok(v4) = s.parse::<Ipv4Addr>() {
            return Ok(v4.into());
        }
        s.parse::<Ipv6Addr>()
            .map(Into::into)
            .map_err(|_| TypeError::parse(0, format!("invalid IP address: {s}")))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_v4() {
            write!(
                f,
                "{}.{}.{}.{}",
                self.0[12], self.0[13], self.0[14], self.0[15]
            )
        } else {
            Ipv6Addr::from(self.0).fmt(f)
        }
    }
}

/// An IP subnet: a network address plus a prefix length.
///
/// The prefix length is family-relative: up to 32 for embedded IPv4
/// networks and up to 128 otherwise. Host bits are zeroed on
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Subnet {
    network: Address,
    length: u8,
}

impl Subnet {
    /// Creates a subnet, clamping the length to the family maximum and
    /// masking host bits off the network address.
    pub fn new(network: Address, length: u8) -> Self {
        let max = if network.is_v4() { 32 } else { 128 };
        let length = length.min(max);
        let top = if network.is_v4() { 96 + length } else { length };
        Self {
            network: network.mask(top),
            length,
        }
    }

    /// The network address with host bits zeroed.
    pub const fn network(&self) -> &Address {
        &self.network
    }

    /// The family-relative prefix length.
    pub const fn length(&self) -> u8 {
        self.length
    }

    /// The prefix length in the 128-bit address space.
    pub fn top_bits(&self) -> u8 {
        if self.network.is_v4() {
            96 + self.length
        } else {
            self.length
        }
    }

    /// Whether the subnet contains the given address.
    pub fn contains(&self, x: &Address) -> bool {
        if self.network.is_v4() && !x.is_v4() {
            return false;
        }
        x.mask(self.top_bits()) == self.network
    }
}

impl FromStr for Subnet {
    type Err = TypeError;

    fn from_str(s: &str) -> TypeResult<Self> {
        let (addr, len) = s
            .split_once('/')
            .ok_or_else(|| TypeError::parse(0, format!("invalid subnet: {s}")))?;
        let network: Address = addr.parse()?;
        let length: u8 = len
            .parse()
            .map_err(|_| TypeError::parse(0, format!("invalid prefix length: {len}")))?;
        let max = if network.is_v4() { 32 } else { 128 };
        if length > max {
            return Err(TypeError::parse(
                0,
                format!("prefix length {length} exceeds /{max}"),
            ));
        }
        Ok(Self::new(network, length))
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.length)
    }
}

/// Transport-layer protocol of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Protocol {
    /// Protocol not known.
    Unknown = 0,
    /// TCP.
    Tcp = 1,
    /// UDP.
    Udp = 2,
    /// ICMP.
    Icmp = 3,
}

impl Protocol {
    /// Converts a byte to a protocol.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Unknown),
            1 => Some(Self::Tcp),
            2 => Some(Self::Udp),
            3 => Some(Self::Icmp),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "?"),
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
            Self::Icmp => write!(f, "icmp"),
        }
    }
}

/// A transport-layer port with protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Port {
    /// The port number.
    pub number: u16,
    /// The transport protocol.
    pub protocol: Protocol,
}

impl Port {
    /// Creates a port.
    pub const fn new(number: u16, protocol: Protocol) -> Self {
        Self { number, protocol }
    }
}

impl FromStr for Port {
    type Err = TypeError;

    fn from_str(s: &str) -> TypeResult<Self> {
        let (num, proto) = match s.split_once('/') {
            Some((num, proto)) => (num, Some(proto)),
            None => (s, None),
        };
        let number: u16 = num
            .parse()
            .map_err(|_| TypeError::parse(0, format!("invalid port number: {num}")))?;
        let protocol = match proto {
            None | Some("?") => Protocol::Unknown,
            Some("tcp") => Protocol::Tcp,
            Some("udp") => Protocol::Udp,
            Some("icmp") => Protocol::Icmp,
            Some(other) => {
                return Err(TypeError::parse(0, format!("invalid protocol: {other}")));
            }
        };
        Ok(Self { number, protocol })
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.number, self.protocol)
    }
}

/// A data value, mirroring the type lattice plus a distinguished nil.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    /// The absent value.
    Nil,
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// Unsigned 64-bit integer.
    Count(u64),
    /// IEEE 754 double.
    Real(f64),
    /// Duration in nanoseconds.
    Timespan(i64),
    /// Nanoseconds since the UNIX epoch.
    Timestamp(i64),
    /// UTF-8 string.
    String(String),
    /// Regular expression source.
    Pattern(String),
    /// IP address.
    Address(Address),
    /// IP subnet.
    Subnet(Subnet),
    /// Port with protocol.
    Port(Port),
    /// Index into an enumeration's field list.
    Enumeration(u32),
    /// Ordered sequence.
    Vector(Vec<Data>),
    /// Unordered collection.
    Set(Vec<Data>),
    /// Associative container.
    Map(Vec<(Data, Data)>),
    /// Field values of a record, in layout order.
    Record(Vec<Data>),
}

impl Data {
    /// Whether this value is nil.
    pub fn is_nil(&self) -> bool {
        matches!(self, Data::Nil)
    }

    /// A short name for the value's kind, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Data::Nil => "nil",
            Data::Bool(_) => "bool",
            Data::Int(_) => "int",
            Data::Count(_) => "count",
            Data::Real(_) => "real",
            Data::Timespan(_) => "duration",
            Data::Timestamp(_) => "time",
            Data::String(_) => "string",
            Data::Pattern(_) => "pattern",
            Data::Address(_) => "addr",
            Data::Subnet(_) => "subnet",
            Data::Port(_) => "port",
            Data::Enumeration(_) => "enum",
            Data::Vector(_) => "vector",
            Data::Set(_) => "set",
            Data::Map(_) => "map",
            Data::Record(_) => "record",
        }
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Data::Nil => write!(f, "nil"),
            Data::Bool(x) => write!(f, "{x}"),
            Data::Int(x) => write!(f, "{x:+}"),
            Data::Count(x) => write!(f, "{x}"),
            Data::Real(x) => write!(f, "{x}"),
            Data::Timespan(x) => write!(f, "{x}ns"),
            Data::Timestamp(x) => write!(f, "@{x}"),
            Data::String(x) => write!(f, "{x:?}"),
            Data::Pattern(x) => write!(f, "/{x}/"),
            Data::Address(x) => write!(f, "{x}"),
            Data::Subnet(x) => write!(f, "{x}"),
            Data::Port(x) => write!(f, "{x}"),
            Data::Enumeration(x) => write!(f, "#{x}"),
            Data::Vector(xs) => {
                write!(f, "[")?;
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{x}")?;
                }
                write!(f, "]")
            }
            Data::Set(xs) => {
                write!(f, "{{")?;
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{x}")?;
                }
                write!(f, "}}")
            }
            Data::Map(xs) => {
                write!(f, "{{")?;
                for (i, (k, v)) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k} -> {v}")?;
                }
                write!(f, "}}")
            }
            Data::Record(xs) => {
                write!(f, "(")?;
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{x}")?;
                }
                write!(f, ")")
            }
        }
    }
}

pub(crate) fn type_check(t: &Type, x: &Data) -> bool {
    if x.is_nil() {
        return true;
    }
    match (t.resolve().kind(), x) {
        (TypeKind::Bool, Data::Bool(_))
        | (TypeKind::Int, Data::Int(_))
        | (TypeKind::Count, Data::Count(_))
        | (TypeKind::Real, Data::Real(_))
        | (TypeKind::Timespan, Data::Timespan(_))
        | (TypeKind::Timestamp, Data::Timestamp(_))
        | (TypeKind::String, Data::String(_))
        | (TypeKind::Pattern, Data::Pattern(_))
        | (TypeKind::Address, Data::Address(_))
        | (TypeKind::Subnet, Data::Subnet(_))
        | (TypeKind::Port, Data::Port(_)) => true,
        (TypeKind::Enumeration(fields), Data::Enumeration(i)) => (*i as usize) < fields.len(),
        (TypeKind::Vector(elem), Data::Vector(xs)) | (TypeKind::Set(elem), Data::Set(xs)) => {
            xs.iter().all(|x| type_check(elem, x))
        }
        (TypeKind::Map(k, v), Data::Map(xs)) => {
            xs.iter().all(|(key, val)| type_check(k, key) && type_check(v, val))
        }
        (TypeKind::Record(fields), Data::Record(xs)) => {
            fields.len() == xs.len()
                && fields.iter().zip(xs.iter()).all(|(f, x)| type_check(&f.ty, x))
        }
        _ => false,
    }
}
