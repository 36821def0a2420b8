/* Primitive field type catalog
 *
 * Every primitive has a fixed size and alignment and encodes in host byte
 * order, matching what the C compiler on this platform would emit. Integer
 * writes are range checked before any byte is touched.
 */

use crate::errors::{CodecError, OverflowError};
use crate::value::{Address, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::mem::{align_of, size_of};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum FieldType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    /// Address-sized integer, never dereferenced by the catalog.
    Pointer,
    /// Uninterpreted block of `n` bytes with byte alignment.
    OpaqueBytes(usize),
}

impl FieldType {
    pub const fn size(&self) -> usize {
        match self {
            FieldType::Int8 => size_of::<i8>(),
            FieldType::Int16 => size_of::<i16>(),
            FieldType::Int32 => size_of::<i32>(),
            FieldType::Int64 => size_of::<i64>(),
            FieldType::UInt8 => size_of::<u8>(),
            FieldType::UInt16 => size_of::<u16>(),
            FieldType::UInt32 => size_of::<u32>(),
            FieldType::UInt64 => size_of::<u64>(),
            FieldType::Pointer => size_of::<usize>(),
            FieldType::OpaqueBytes(n) => *n,
        }
    }

    pub const fn alignment(&self) -> usize {
        match self {
            FieldType::Int8 => align_of::<i8>(),
            FieldType::Int16 => align_of::<i16>(),
            FieldType::Int32 => align_of::<i32>(),
            FieldType::Int64 => align_of::<i64>(),
            FieldType::UInt8 => align_of::<u8>(),
            FieldType::UInt16 => align_of::<u16>(),
            FieldType::UInt32 => align_of::<u32>(),
            FieldType::UInt64 => align_of::<u64>(),
            FieldType::Pointer => align_of::<usize>(),
            FieldType::OpaqueBytes(_) => 1,
        }
    }

    pub const fn is_integer(&self) -> bool {
        !matches!(self, FieldType::Pointer | FieldType::OpaqueBytes(_))
    }

    pub const fn is_signed(&self) -> bool {
        matches!(
            self,
            FieldType::Int8 | FieldType::Int16 | FieldType::Int32 | FieldType::Int64
        )
    }

    /// Accepted write range for integer types.
    ///
    /// An n-bit field takes anything from `-2^(n-1)` to `2^n - 1`, so both the
    /// signed and unsigned spelling of a bit pattern is accepted regardless of
    /// the field's own signedness.
    pub fn range(&self) -> Option<(i128, i128)> {
        if !self.is_integer() {
            return None;
        }
        let bits = (self.size() * 8) as u32;
        Some((-(1i128 << (bits - 1)), (1i128 << bits) - 1))
    }

    pub fn check(&self, value: i128) -> Result<(), OverflowError> {
        match self.range() {
            Some((min, max)) if value >= min && value <= max => Ok(()),
            _ => Err(OverflowError {
                field_type: *self,
                value,
            }),
        }
    }

    /// Zero value of this type, used when padding partial writes.
    pub fn zero(&self) -> Value {
        match self {
            FieldType::Pointer => Value::Address(Address::NULL),
            FieldType::OpaqueBytes(n) => Value::Bytes(vec![0; *n]),
            _ => Value::Int(0),
        }
    }

    fn slot<'a>(&self, view: &'a [u8], at: usize) -> Result<&'a [u8], CodecError> {
        let size = self.size();
        at.checked_add(size)
            .and_then(|end| view.get(at..end))
            .ok_or(CodecError::ViewTooShort {
                offset: at,
                size,
                available: view.len(),
            })
    }

    fn slot_mut<'a>(&self, view: &'a mut [u8], at: usize) -> Result<&'a mut [u8], CodecError> {
        let size = self.size();
        let available = view.len();
        at.checked_add(size)
            .and_then(move |end| view.get_mut(at..end))
            .ok_or(CodecError::ViewTooShort {
                offset: at,
                size,
                available,
            })
    }

    /// Reads the field at `at`.
    ///
    /// Any bit pattern decodes: signed types sign-extend, unsigned types
    /// zero-extend. The only failure is a view that ends before the field.
    pub fn read(&self, view: &[u8], at: usize) -> Result<Value, CodecError> {
        let bytes = self.slot(view, at)?;
        let value = match self {
            FieldType::Int8 => Value::Int(i8::from_ne_bytes([bytes[0]]) as i128),
            FieldType::UInt8 => Value::Int(bytes[0] as i128),
            FieldType::Int16 => Value::Int(i16::from_ne_bytes(array(bytes)) as i128),
            FieldType::UInt16 => Value::Int(u16::from_ne_bytes(array(bytes)) as i128),
            FieldType::Int32 => Value::Int(i32::from_ne_bytes(array(bytes)) as i128),
            FieldType::UInt32 => Value::Int(u32::from_ne_bytes(array(bytes)) as i128),
            FieldType::Int64 => Value::Int(i64::from_ne_bytes(array(bytes)) as i128),
            FieldType::UInt64 => Value::Int(u64::from_ne_bytes(array(bytes)) as i128),
            FieldType::Pointer => {
                Value::Address(Address::new(usize::from_ne_bytes(array(bytes))))
            }
            FieldType::OpaqueBytes(_) => Value::Bytes(bytes.to_vec()),
        };
        Ok(value)
    }

    /// Writes `value` at `at`. On error the view is left untouched.
    pub fn write(&self, view: &mut [u8], at: usize, value: &Value) -> Result<(), CodecError> {
        match (self, value) {
            (FieldType::Pointer, Value::Address(addr)) => {
                let slot = self.slot_mut(view, at)?;
                slot.copy_from_slice(&addr.get().to_ne_bytes());
                Ok(())
            }
            (FieldType::OpaqueBytes(n), Value::Bytes(bytes)) => {
                if bytes.len() > *n {
                    return Err(OverflowError {
                        field_type: *self,
                        value: bytes.len() as i128,
                    }
                    .into());
                }
                let slot = self.slot_mut(view, at)?;
                slot[..bytes.len()].copy_from_slice(bytes);
                slot[bytes.len()..].fill(0);
                Ok(())
            }
            (ty, Value::Int(v)) if ty.is_integer() => self.write_int(view, at, *v),
            (_, other) => Err(CodecError::TypeMismatch {
                field_type: *self,
                found: other.kind_name(),
            }),
        }
    }

    /// Range checks and stores an integer, truncating to the field's width.
    pub fn write_int(&self, view: &mut [u8], at: usize, value: i128) -> Result<(), CodecError> {
        if !self.is_integer() {
            return Err(CodecError::TypeMismatch {
                field_type: *self,
                found: "int",
            });
        }
        self.check(value)?;
        let slot = self.slot_mut(view, at)?;
        match self.size() {
            1 => slot.copy_from_slice(&(value as u8).to_ne_bytes()),
            2 => slot.copy_from_slice(&(value as u16).to_ne_bytes()),
            4 => slot.copy_from_slice(&(value as u32).to_ne_bytes()),
            _ => slot.copy_from_slice(&(value as u64).to_ne_bytes()),
        }
        Ok(())
    }

    /// Reads an integer field, widened to `i128`.
    pub fn read_int(&self, view: &[u8], at: usize) -> Result<i128, CodecError> {
        match self.read(view, at)? {
            Value::Int(v) => Ok(v),
            other => Err(CodecError::TypeMismatch {
                field_type: *self,
                found: other.kind_name(),
            }),
        }
    }
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Int8 => write!(f, "int8"),
            FieldType::Int16 => write!(f, "int16"),
            FieldType::Int32 => write!(f, "int32"),
            FieldType::Int64 => write!(f, "int64"),
            FieldType::UInt8 => write!(f, "uint8"),
            FieldType::UInt16 => write!(f, "uint16"),
            FieldType::UInt32 => write!(f, "uint32"),
            FieldType::UInt64 => write!(f, "uint64"),
            FieldType::Pointer => write!(f, "pointer"),
            FieldType::OpaqueBytes(n) => write!(f, "bytes[{}]", n),
        }
    }
}
