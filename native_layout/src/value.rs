/* Values moved in and out of native memory */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A native address. Kept distinct from integers so a handle is never
/// mistaken for a count.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(transparent)]
pub struct Address(usize);

impl Address {
    pub const NULL: Address = Address(0);

    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> usize {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /* Exposes the provenance of `ptr` so the address can be bound later */
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr.expose_provenance())
    }

    pub fn as_ptr(self) -> *mut u8 {
        std::ptr::with_exposed_provenance_mut(self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/* Decoded field contents, widened to a common representation */
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum Value {
    Int(i128),
    Address(Address),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Struct(BTreeMap<String, Value>),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Address(_) => "address",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Struct(_) => "struct",
        }
    }

    pub fn as_int(&self) -> Option<i128> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self {
            Value::Address(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    /// Looks up a member of a struct value.
    pub fn member(&self, name: &str) -> Option<&Value> {
        self.as_struct().and_then(|fields| fields.get(name))
    }

    /// Text for a fixed-length byte field. Writing it zero-pads the rest of
    /// the field, so shorter text ends up NUL terminated.
    pub fn text(s: &str) -> Self {
        Value::Bytes(s.as_bytes().to_vec())
    }

    /// Bytes up to the first NUL, decoded lossily as UTF-8.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Bytes(bytes) => {
                let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
                Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
            }
            _ => None,
        }
    }

    /// Raw integer of `x` in fixed point with `frac_bits` fraction bits,
    /// rounded to nearest. Q16.16 is `frac_bits = 16`.
    pub fn from_fixed(x: f64, frac_bits: u32) -> Self {
        Value::Int((x * 2f64.powi(frac_bits as i32)).round() as i128)
    }

    pub fn as_fixed(&self, frac_bits: u32) -> Option<f64> {
        self.as_int()
            .map(|raw| raw as f64 / 2f64.powi(frac_bits as i32))
    }
}

impl From<i128> for Value {
    fn from(v: i128) -> Self {
        Value::Int(v)
    }
}

macro_rules! int_into_value {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(v as i128)
            }
        })*
    };
}

int_into_value!(i8, i16, i32, i64, u8, u16, u32, u64, isize);

impl From<Address> for Value {
    fn from(a: Address) -> Self {
        Value::Address(a)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Address(a) => write!(f, "{}", a),
            Value::Bytes(b) => {
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Struct(fields) => {
                write!(f, "{{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_stops_at_nul() {
        assert_eq!(Value::text("pcm"), Value::Bytes(b"pcm".to_vec()));
        assert_eq!(
            Value::Bytes(b"mp3\0\0junk".to_vec()).as_text().as_deref(),
            Some("mp3")
        );
        assert_eq!(Value::Bytes(b"full".to_vec()).as_text().as_deref(), Some("full"));
        assert_eq!(Value::Int(1).as_text(), None);
    }

    #[test]
    fn test_q16_fixed_point() {
        assert_eq!(Value::from_fixed(1.0, 16), Value::Int(0x1_0000));
        assert_eq!(Value::from_fixed(-0.5, 16), Value::Int(-0x8000));
        assert_eq!(Value::from_fixed(29.97, 16), Value::Int(1_964_114));
        assert_eq!(Value::Int(0x1_8000).as_fixed(16), Some(1.5));
        assert_eq!(Value::text("x").as_fixed(16), None);
    }
}
