//! Little-endian binary encoding primitives and the type/data codec.
//!
//! All on-disk formats in Spyglass are hand-rolled little-endian byte
//! layouts with explicit magic and version bytes. This module provides
//! the shared writer helpers (append to a `Vec<u8>`), a cursor-style
//! [`ByteReader`], LEB128 varints for counts, and the self-describing
//! encodings of [`Type`] and [`Data`] used by layout files and segment
//! chunks.

use crate::error::{CoreError, CoreResult};
use spyglass_types::{
    Address, Attribute, Data, Port, Protocol, RecordField, Subnet, Type, TypeKind,
};

// -- writer helpers ----------------------------------------------------------

/// Appends a LEB128-encoded unsigned integer.
pub fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Appends a length-prefixed UTF-8 string.
pub fn put_str(buf: &mut Vec<u8>, s: &str) {
    put_varint(buf, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

/// Appends a length-prefixed byte string.
pub fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    put_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

// -- reader ------------------------------------------------------------------

/// A cursor over a byte slice.
///
/// Every read validates the remaining length and fails with a
/// [`CoreError::Format`] on truncation, so decoders can use `?`
/// throughout.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Creates a reader over the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Whether all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// The number of unconsumed bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// The number of consumed bytes.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Reads `len` raw bytes.
    pub fn bytes(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(CoreError::format_error(format!(
                "truncated input: need {len} bytes, have {}",
                self.remaining()
            )));
        }
        let out = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    /// Reads one byte.
    pub fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.bytes(1)?[0])
    }

    /// Reads a little-endian u16.
    pub fn u16(&mut self) -> CoreResult<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Reads a little-endian u32.
    pub fn u32(&mut self) -> CoreResult<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a little-endian u64.
    pub fn u64(&mut self) -> CoreResult<u64> {
        let b = self.bytes(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Reads a little-endian i64.
    pub fn i64(&mut self) -> CoreResult<i64> {
        self.u64().map(|x| x as i64)
    }

    /// Reads a little-endian f64.
    pub fn f64(&mut self) -> CoreResult<f64> {
        self.u64().map(f64::from_bits)
    }

    /// Reads a LEB128 varint.
    pub fn varint(&mut self) -> CoreResult<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.u8()?;
            if shift == 63 && byte > 1 {
                return Err(CoreError::format_error("varint overflows 64 bits"));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > 63 {
                return Err(CoreError::format_error("varint too long"));
            }
        }
    }

    /// Reads a varint and validates it against a maximum element count.
    pub fn count(&mut self, max: u64, what: &str) -> CoreResult<usize> {
        let n = self.varint()?;
        if n > max {
            return Err(CoreError::format_error(format!(
                "implausible {what} count: {n}"
            )));
        }
        Ok(n as usize)
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn str(&mut self) -> CoreResult<String> {
        let len = self.varint()? as usize;
        let bytes = self.bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CoreError::format_error("invalid UTF-8 in string"))
    }

    /// Reads a length-prefixed byte string.
    pub fn byte_string(&mut self) -> CoreResult<Vec<u8>> {
        let len = self.varint()? as usize;
        Ok(self.bytes(len)?.to_vec())
    }

    /// Consumes and checks a 4-byte magic sequence.
    pub fn expect_magic(&mut self, magic: &[u8; 4], what: &str) -> CoreResult<()> {
        let found = self.bytes(4)?;
        if found != magic {
            return Err(CoreError::format_error(format!("invalid {what} magic")));
        }
        Ok(())
    }
}

// -- type codec --------------------------------------------------------------

const TYPE_NONE: u8 = 0;
const TYPE_BOOL: u8 = 1;
const TYPE_INT: u8 = 2;
const TYPE_COUNT: u8 = 3;
const TYPE_REAL: u8 = 4;
const TYPE_TIMESPAN: u8 = 5;
const TYPE_TIMESTAMP: u8 = 6;
const TYPE_STRING: u8 = 7;
const TYPE_PATTERN: u8 = 8;
const TYPE_ADDRESS: u8 = 9;
const TYPE_SUBNET: u8 = 10;
const TYPE_PORT: u8 = 11;
const TYPE_ENUMERATION: u8 = 12;
const TYPE_VECTOR: u8 = 13;
const TYPE_SET: u8 = 14;
const TYPE_MAP: u8 = 15;
const TYPE_RECORD: u8 = 16;
const TYPE_ALIAS: u8 = 17;

/// Maximum number of fields, attributes, or container elements accepted
/// from untrusted input.
const MAX_ELEMENTS: u64 = 1 << 20;

/// Encodes a type, including its name and attributes.
pub fn encode_type(t: &Type, buf: &mut Vec<u8>) {
    match t.kind() {
        TypeKind::None => buf.push(TYPE_NONE),
        TypeKind::Bool => buf.push(TYPE_BOOL),
        TypeKind::Int => buf.push(TYPE_INT),
        TypeKind::Count => buf.push(TYPE_COUNT),
        TypeKind::Real => buf.push(TYPE_REAL),
        TypeKind::Timespan => buf.push(TYPE_TIMESPAN),
        TypeKind::Timestamp => buf.push(TYPE_TIMESTAMP),
        TypeKind::String => buf.push(TYPE_STRING),
        TypeKind::Pattern => buf.push(TYPE_PATTERN),
        TypeKind::Address => buf.push(TYPE_ADDRESS),
        TypeKind::Subnet => buf.push(TYPE_SUBNET),
        TypeKind::Port => buf.push(TYPE_PORT),
        TypeKind::Enumeration(fields) => {
            buf.push(TYPE_ENUMERATION);
            put_varint(buf, fields.len() as u64);
            for field in fields {
                put_str(buf, field);
            }
        }
        TypeKind::Vector(elem) => {
            buf.push(TYPE_VECTOR);
            encode_type(elem, buf);
        }
        TypeKind::Set(elem) => {
            buf.push(TYPE_SET);
            encode_type(elem, buf);
        }
        TypeKind::Map(k, v) => {
            buf.push(TYPE_MAP);
            encode_type(k, buf);
            encode_type(v, buf);
        }
        TypeKind::Record(fields) => {
            buf.push(TYPE_RECORD);
            put_varint(buf, fields.len() as u64);
            for field in fields {
                put_str(buf, &field.name);
                encode_type(&field.ty, buf);
            }
        }
        TypeKind::Alias(inner) => {
            buf.push(TYPE_ALIAS);
            encode_type(inner, buf);
        }
    }
    match t.name() {
        Some(name) => {
            buf.push(1);
            put_str(buf, name);
        }
        None => buf.push(0),
    }
    put_varint(buf, t.attributes().len() as u64);
    for attr in t.attributes() {
        put_str(buf, &attr.key);
        match &attr.value {
            Some(value) => {
                buf.push(1);
                put_str(buf, value);
            }
            None => buf.push(0),
        }
    }
}

/// Decodes a type.
pub fn decode_type(r: &mut ByteReader<'_>) -> CoreResult<Type> {
    let tag = r.u8()?;
    let mut t = match tag {
        TYPE_NONE => Type::none(),
        TYPE_BOOL => Type::bool(),
        TYPE_INT => Type::int(),
        TYPE_COUNT => Type::count(),
        TYPE_REAL => Type::real(),
        TYPE_TIMESPAN => Type::timespan(),
        TYPE_TIMESTAMP => Type::timestamp(),
        TYPE_STRING => Type::string(),
        TYPE_PATTERN => Type::pattern(),
        TYPE_ADDRESS => Type::address(),
        TYPE_SUBNET => Type::subnet(),
        TYPE_PORT => Type::port(),
        TYPE_ENUMERATION => {
            let n = r.count(MAX_ELEMENTS, "enumeration field")?;
            let mut fields = Vec::with_capacity(n);
            for _ in 0..n {
                fields.push(r.str()?);
            }
            Type::enumeration(fields)
        }
        TYPE_VECTOR => Type::vector(decode_type(r)?),
        TYPE_SET => Type::set(decode_type(r)?),
        TYPE_MAP => {
            let k = decode_type(r)?;
            let v = decode_type(r)?;
            Type::map(k, v)
        }
        TYPE_RECORD => {
            let n = r.count(MAX_ELEMENTS, "record field")?;
            let mut fields = Vec::with_capacity(n);
            for _ in 0..n {
                let name = r.str()?;
                let ty = decode_type(r)?;
                fields.push(RecordField::new(name, ty));
            }
            Type::record(fields)
        }
        TYPE_ALIAS => Type::alias(decode_type(r)?),
        _ => {
            return Err(CoreError::format_error(format!("unknown type tag: {tag}")));
        }
    };
    if r.u8()? != 0 {
        t = t.with_name(r.str()?);
    }
    let attrs = r.count(MAX_ELEMENTS, "attribute")?;
    for _ in 0..attrs {
        let key = r.str()?;
        let attr = if r.u8()? != 0 {
            Attribute::with_value(key, r.str()?)
        } else {
            Attribute::new(key)
        };
        t = t.with_attribute(attr);
    }
    Ok(t)
}

// -- data codec --------------------------------------------------------------

const DATA_NIL: u8 = 0;
const DATA_BOOL: u8 = 1;
const DATA_INT: u8 = 2;
const DATA_COUNT: u8 = 3;
const DATA_REAL: u8 = 4;
const DATA_TIMESPAN: u8 = 5;
const DATA_TIMESTAMP: u8 = 6;
const DATA_STRING: u8 = 7;
const DATA_PATTERN: u8 = 8;
const DATA_ADDRESS: u8 = 9;
const DATA_SUBNET: u8 = 10;
const DATA_PORT: u8 = 11;
const DATA_ENUMERATION: u8 = 12;
const DATA_VECTOR: u8 = 13;
const DATA_SET: u8 = 14;
const DATA_MAP: u8 = 15;
const DATA_RECORD: u8 = 16;

/// Encodes a data value, self-describingly.
pub fn encode_data(x: &Data, buf: &mut Vec<u8>) {
    match x {
        Data::Nil => buf.push(DATA_NIL),
        Data::Bool(b) => {
            buf.push(DATA_BOOL);
            buf.push(u8::from(*b));
        }
        Data::Int(v) => {
            buf.push(DATA_INT);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Data::Count(v) => {
            buf.push(DATA_COUNT);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Data::Real(v) => {
            buf.push(DATA_REAL);
            buf.extend_from_slice(&v.to_bits().to_le_bytes());
        }
        Data::Timespan(v) => {
            buf.push(DATA_TIMESPAN);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Data::Timestamp(v) => {
            buf.push(DATA_TIMESTAMP);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Data::String(s) => {
            buf.push(DATA_STRING);
            put_str(buf, s);
        }
        Data::Pattern(s) => {
            buf.push(DATA_PATTERN);
            put_str(buf, s);
        }
        Data::Address(a) => {
            buf.push(DATA_ADDRESS);
            buf.extend_from_slice(a.bytes());
        }
        Data::Subnet(s) => {
            buf.push(DATA_SUBNET);
            buf.extend_from_slice(s.network().bytes());
            buf.push(s.length());
        }
        Data::Port(p) => {
            buf.push(DATA_PORT);
            buf.extend_from_slice(&p.number.to_le_bytes());
            buf.push(p.protocol as u8);
        }
        Data::Enumeration(i) => {
            buf.push(DATA_ENUMERATION);
            buf.extend_from_slice(&i.to_le_bytes());
        }
        Data::Vector(xs) => {
            buf.push(DATA_VECTOR);
            encode_seq(xs, buf);
        }
        Data::Set(xs) => {
            buf.push(DATA_SET);
            encode_seq(xs, buf);
        }
        Data::Map(xs) => {
            buf.push(DATA_MAP);
            put_varint(buf, xs.len() as u64);
            for (k, v) in xs {
                encode_data(k, buf);
                encode_data(v, buf);
            }
        }
        Data::Record(xs) => {
            buf.push(DATA_RECORD);
            encode_seq(xs, buf);
        }
    }
}

fn encode_seq(xs: &[Data], buf: &mut Vec<u8>) {
    put_varint(buf, xs.len() as u64);
    for x in xs {
        encode_data(x, buf);
    }
}

/// Decodes a data value.
pub fn decode_data(r: &mut ByteReader<'_>) -> CoreResult<Data> {
    let tag = r.u8()?;
    Ok(match tag {
        DATA_NIL => Data::Nil,
        DATA_BOOL => Data::Bool(r.u8()? != 0),
        DATA_INT => Data::Int(r.i64()?),
        DATA_COUNT => Data::Count(r.u64()?),
        DATA_REAL => Data::Real(r.f64()?),
        DATA_TIMESPAN => Data::Timespan(r.i64()?),
        DATA_TIMESTAMP => Data::Timestamp(r.i64()?),
        DATA_STRING => Data::String(r.str()?),
        DATA_PATTERN => Data::Pattern(r.str()?),
        DATA_ADDRESS => {
            let bytes = r.bytes(16)?;
            let mut out = [0u8; 16];
            out.copy_from_slice(bytes);
            Data::Address(Address::from_bytes(out))
        }
        DATA_SUBNET => {
            let bytes = r.bytes(16)?;
            let mut out = [0u8; 16];
            out.copy_from_slice(bytes);
            let length = r.u8()?;
            Data::Subnet(Subnet::new(Address::from_bytes(out), length))
        }
        DATA_PORT => {
            let number = r.u16()?;
            let protocol = Protocol::from_byte(r.u8()?)
                .ok_or_else(|| CoreError::format_error("invalid protocol byte"))?;
            Data::Port(Port::new(number, protocol))
        }
        DATA_ENUMERATION => Data::Enumeration(r.u32()?),
        DATA_VECTOR => Data::Vector(decode_seq(r)?),
        DATA_SET => Data::Set(decode_seq(r)?),
        DATA_MAP => {
            let n = r.count(MAX_ELEMENTS, "map entry")?;
            let mut xs = Vec::with_capacity(n);
            for _ in 0..n {
                let k = decode_data(r)?;
                let v = decode_data(r)?;
                xs.push((k, v));
            }
            Data::Map(xs)
        }
        DATA_RECORD => Data::Record(decode_seq(r)?),
        _ => {
            return Err(CoreError::format_error(format!("unknown data tag: {tag}")));
        }
    })
}

fn decode_seq(r: &mut ByteReader<'_>) -> CoreResult<Vec<Data>> {
    let n = r.count(MAX_ELEMENTS, "sequence element")?;
    let mut xs = Vec::with_capacity(n);
    for _ in 0..n {
        xs.push(decode_data(r)?);
    }
    Ok(xs)
}
