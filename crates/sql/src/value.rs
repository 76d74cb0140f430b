//! Field types and the value codec.
//!
//! Rows serialise as the concatenation of their field values in declared
//! order: `int32`/`int64` little-endian, strings as `[len(4) | utf8]`.
//! Index keys widen integers to `i64`; strings hash to 64 bits with the
//! same Horner fold the engine uses for log checksums.

use std::fmt;

use crate::error::{Result, SqlError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int32,
    Int64,
    Str,
}

impl FieldType {
    pub fn parse(word: &str) -> Result<FieldType> {
        match word {
            "int32" => Ok(FieldType::Int32),
            "int64" => Ok(FieldType::Int64),
            "string" => Ok(FieldType::Str),
            other => Err(SqlError::InvalidField(other.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldType::Int32 => "int32",
            FieldType::Int64 => "int64",
            FieldType::Str => "string",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int32(i32),
    Int64(i64),
    Str(String),
}

impl Value {
    /// Types a literal against a field.
    pub fn parse(ty: FieldType, literal: &str) -> Result<Value> {
        match ty {
            FieldType::Int32 => literal
                .parse()
                .map(Value::Int32)
                .map_err(|_| SqlError::InvalidValues),
            FieldType::Int64 => literal
                .parse()
                .map(Value::Int64)
                .map_err(|_| SqlError::InvalidValues),
            FieldType::Str => Ok(Value::Str(literal.to_string())),
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Value::Int32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Int64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Str(s) => {
                out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
        }
    }

    /// Decodes one value from the front of `buf`, advancing it.
    pub fn decode(ty: FieldType, buf: &mut &[u8]) -> Result<Value> {
        match ty {
            FieldType::Int32 => {
                let bytes = take(buf, 4)?;
                Ok(Value::Int32(i32::from_le_bytes(bytes.try_into().unwrap())))
            }
            FieldType::Int64 => {
                let bytes = take(buf, 8)?;
                Ok(Value::Int64(i64::from_le_bytes(bytes.try_into().unwrap())))
            }
            FieldType::Str => {
                let len = u32::from_le_bytes(take(buf, 4)?.try_into().unwrap()) as usize;
                let bytes = take(buf, len)?;
                String::from_utf8(bytes.to_vec())
                    .map(Value::Str)
                    .map_err(|_| SqlError::InvalidValues)
            }
        }
    }

    /// The 64-bit index key of this value.
    pub fn key(&self) -> i64 {
        match self {
            Value::Int32(v) => *v as i64,
            Value::Int64(v) => *v,
            Value::Str(s) => hash_str(s),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if buf.len() < n {
        return Err(SqlError::InvalidValues);
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

/// Horner fold of a string onto a 64-bit key, multiplier 13331.
pub fn hash_str(s: &str) -> i64 {
    let mut hash = 0u64;
    for &b in s.as_bytes() {
        hash = hash.wrapping_mul(13331).wrapping_add(b as u64);
    }
    hash as i64
}
