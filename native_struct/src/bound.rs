/* Bound struct instances
 *
 * A `BoundStruct` pairs a shared prototype with a memory region and a base
 * offset into it. Embedded children reuse the parent's region at a deeper
 * offset; remote children bind whatever address a pointer field holds.
 */

use crate::errors::{StructError, StructResult, UseAfterCloseError};
use crate::memory::{Region, SharedRegion};
use native_layout::{
    split_path, Address, FieldError, FieldKind, FieldType, LayoutError, StructPrototype, Value,
};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;

pub struct BoundStruct {
    prototype: Arc<StructPrototype>,
    region: SharedRegion,
    offset: usize,
    owns: bool,
}

impl BoundStruct {
    /// Allocates a zeroed buffer of the prototype's size and binds to it.
    /// The instance owns the buffer and frees it on `close()`.
    pub fn bind_owned(prototype: Arc<StructPrototype>) -> StructResult<Self> {
        let region = Region::allocate(prototype.size(), prototype.alignment())?;
        debug!(
            "Bound '{}' to {} owned bytes",
            prototype.display_name(),
            prototype.size()
        );
        Ok(Self {
            prototype,
            region: region.shared(),
            offset: 0,
            owns: true,
        })
    }

    /// Views `length` bytes at `address` without copying. The memory is
    /// never freed by this instance.
    ///
    /// # Safety
    ///
    /// `address` must point to at least `length` readable and writable bytes
    /// that stay valid for as long as this instance (and any child derived
    /// from it) is used, and nothing else may access them concurrently.
    pub unsafe fn bind_foreign(
        prototype: Arc<StructPrototype>,
        address: Address,
        length: usize,
    ) -> StructResult<Self> {
        if length < prototype.size() {
            return Err(LayoutError::BufferTooSmall {
                required: prototype.size(),
                available: length,
            }
            .into());
        }
        let region = Region::foreign(address, length)?;
        debug!(
            "Bound '{}' to foreign memory at {} ({} bytes)",
            prototype.display_name(),
            address,
            length
        );
        Ok(Self {
            prototype,
            region: region.shared(),
            offset: 0,
            owns: false,
        })
    }

    pub fn prototype(&self) -> &Arc<StructPrototype> {
        &self.prototype
    }

    pub fn len(&self) -> usize {
        self.prototype.size()
    }

    pub fn is_empty(&self) -> bool {
        self.prototype.size() == 0
    }

    pub fn owns_memory(&self) -> bool {
        self.owns
    }

    pub fn is_closed(&self) -> bool {
        self.region.borrow().is_released()
    }

    /// Native address of the first byte of this struct.
    pub fn address(&self) -> StructResult<Address> {
        self.region
            .borrow()
            .address(self.offset)
            .ok_or_else(|| self.closed())
    }

    /// Releases owned memory. A no-op for instances that do not own theirs.
    pub fn close(&mut self) {
        if self.owns && !self.is_closed() {
            debug!("Closing owned '{}'", self.prototype.display_name());
            self.region.borrow_mut().release();
        }
    }

    fn closed(&self) -> StructError {
        UseAfterCloseError {
            prototype: self.prototype.display_name().to_string(),
        }
        .into()
    }

    fn read_at(&self, ty: FieldType, offset: usize, path: &str) -> StructResult<Value> {
        let region = self.region.borrow();
        let view = region
            .slice(self.offset, self.len())
            .ok_or_else(|| self.closed())?;
        ty.read(view, offset)
            .map_err(|err| StructError::codec(path, err))
    }

    fn write_at(&self, ty: FieldType, offset: usize, path: &str, value: &Value) -> StructResult<()> {
        let len = self.len();
        let mut region = self.region.borrow_mut();
        let view = region
            .slice_mut(self.offset, len)
            .ok_or_else(|| self.closed())?;
        ty.write(view, offset, value)
            .map_err(|err| StructError::codec(path, err))
    }

    fn read_kind(&self, kind: &FieldKind, offset: usize, path: &str) -> StructResult<Value> {
        match kind {
            FieldKind::Primitive(ty) => self.read_at(*ty, offset, path),
            FieldKind::Pointer { .. } => self.read_at(FieldType::Pointer, offset, path),
            FieldKind::Array { element, len } => (0..*len)
                .map(|i| self.read_at(*element, offset + i * element.size(), path))
                .collect::<StructResult<Vec<_>>>()
                .map(Value::Array),
            FieldKind::Struct(proto) | FieldKind::Union(proto) => {
                let mut members = BTreeMap::new();
                for field in proto.fields() {
                    let member_path = format!("{}.{}", path, field.name);
                    let value = self.read_kind(&field.kind, offset + field.offset, &member_path)?;
                    members.insert(field.name.clone(), value);
                }
                Ok(Value::Struct(members))
            }
        }
    }

    /// Reads the primitive or array at `path`.
    pub fn get(&self, path: &[&str]) -> StructResult<Value> {
        let field = self.prototype.resolve(path)?;
        match &field.kind {
            FieldKind::Primitive(_) | FieldKind::Array { .. } => {
                self.read_kind(&field.kind, field.offset, &field.path)
            }
            _ => Err(FieldError::NotPrimitive { path: field.path }.into()),
        }
    }

    /// Writes the primitive or array at `path`. Nothing is written if the
    /// value does not fit.
    ///
    /// An array value shorter than the field fills the leading elements and
    /// zeroes the rest, the same rule opaque byte blocks follow.
    pub fn put(&self, path: &[&str], value: Value) -> StructResult<()> {
        let field = self.prototype.resolve(path)?;
        match (&field.kind, &value) {
            (FieldKind::Primitive(ty), _) => self.write_at(*ty, field.offset, &field.path, &value),
            (FieldKind::Array { element, len }, Value::Array(items)) => {
                if items.len() > *len {
                    return Err(FieldError::IndexOutOfRange {
                        path: field.path,
                        index: items.len() - 1,
                        len: *len,
                    }
                    .into());
                }
                /* Encode into a scratch copy so a bad element leaves memory untouched */
                let size = element.size();
                let mut scratch = vec![0u8; size * *len];
                for (i, item) in items.iter().enumerate() {
                    element
                        .write(&mut scratch, i * size, item)
                        .map_err(|err| StructError::codec(&field.path, err))?;
                }
                let mut region = self.region.borrow_mut();
                let view = region
                    .slice_mut(self.offset + field.offset, scratch.len())
                    .ok_or_else(|| self.closed())?;
                view.copy_from_slice(&scratch);
                Ok(())
            }
            (FieldKind::Array { .. }, other) => Err(StructError::Codec {
                path: field.path.clone(),
                source: native_layout::CodecError::TypeMismatch {
                    field_type: FieldType::OpaqueBytes(field.kind.size()),
                    found: other.kind_name(),
                },
            }),
            _ => Err(FieldError::NotPrimitive { path: field.path }.into()),
        }
    }

    /// Reads the address held by a pointer field.
    pub fn get_address(&self, path: &[&str]) -> StructResult<Address> {
        let field = self.prototype.resolve(path)?;
        match field.kind {
            FieldKind::Pointer { .. } | FieldKind::Primitive(FieldType::Pointer) => {
                match self.read_at(FieldType::Pointer, field.offset, &field.path)? {
                    Value::Address(addr) => Ok(addr),
                    _ => Err(FieldError::NotPointer { path: field.path }.into()),
                }
            }
            _ => Err(FieldError::NotPointer { path: field.path }.into()),
        }
    }

    pub fn put_address(&self, path: &[&str], address: Address) -> StructResult<()> {
        let field = self.prototype.resolve(path)?;
        match field.kind {
            FieldKind::Pointer { .. } | FieldKind::Primitive(FieldType::Pointer) => self.write_at(
                FieldType::Pointer,
                field.offset,
                &field.path,
                &Value::Address(address),
            ),
            _ => Err(FieldError::NotPointer { path: field.path }.into()),
        }
    }

    /// Writes every entry of `values`. Nested maps descend into struct and
    /// union fields; addresses land in pointer fields.
    ///
    /// On a union only the member whose value differs from memory is
    /// written, so a snapshot with one edited member commits cleanly. New
    /// values for two members at once fail with `FieldError::UnionConflict`
    /// before anything is written.
    pub fn put_all(&self, values: &BTreeMap<String, Value>) -> StructResult<()> {
        if self.prototype.is_union() {
            return self.put_union(values);
        }
        for (name, value) in values {
            self.put_member(name, value)?;
        }
        Ok(())
    }

    fn put_union(&self, values: &BTreeMap<String, Value>) -> StructResult<()> {
        let mut changed: Option<(&String, &Value)> = None;
        for (name, value) in values {
            let field = self
                .prototype
                .field(name)
                .ok_or_else(|| FieldError::NotFound { path: name.clone() })?;
            if self.read_kind(&field.kind, field.offset, name)? == *value {
                continue;
            }
            if let Some((first, _)) = changed {
                return Err(FieldError::UnionConflict {
                    path: self.prototype.display_name().to_string(),
                    first: first.clone(),
                    second: name.clone(),
                }
                .into());
            }
            changed = Some((name, value));
        }
        match changed {
            Some((name, value)) => self.put_member(name, value),
            None => Ok(()),
        }
    }

    fn put_member(&self, name: &str, value: &Value) -> StructResult<()> {
        let field = self
            .prototype
            .field(name)
            .ok_or_else(|| FieldError::NotFound {
                path: name.to_string(),
            })?;
        match (&field.kind, value) {
            (FieldKind::Struct(_) | FieldKind::Union(_), Value::Struct(members)) => {
                self.wrap_child_embedded(name)?.put_all(members)
            }
            (FieldKind::Pointer { .. }, Value::Address(addr)) => self.put_address(&[name], *addr),
            _ => self.put(&[name], value.clone()),
        }
    }

    /// The whole struct as a `Value::Struct`, unions read through every member.
    pub fn snapshot(&self) -> StructResult<Value> {
        let kind = if self.prototype.is_union() {
            FieldKind::Union(Arc::clone(&self.prototype))
        } else {
            FieldKind::Struct(Arc::clone(&self.prototype))
        };
        let name = self.prototype.display_name().to_string();
        self.read_kind(&kind, 0, &name)
    }

    /// Runs `f` over this struct's bytes.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> StructResult<R> {
        let region = self.region.borrow();
        let view = region
            .slice(self.offset, self.len())
            .ok_or_else(|| self.closed())?;
        Ok(f(view))
    }

    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> StructResult<R> {
        let len = self.len();
        let mut region = self.region.borrow_mut();
        let view = region
            .slice_mut(self.offset, len)
            .ok_or_else(|| self.closed())?;
        Ok(f(view))
    }

    pub fn bytes(&self) -> StructResult<Vec<u8>> {
        self.with_bytes(|b| b.to_vec())
    }

    /// Zero-copy view of a struct or union field. The child shares this
    /// instance's memory and fails with `UseAfterClose` once the owner closes.
    pub fn wrap_child_embedded(&self, name: &str) -> StructResult<BoundStruct> {
        if self.is_closed() {
            return Err(self.closed());
        }
        let path = split_path(name);
        let field = self.prototype.resolve(&path)?;
        let prototype = field
            .kind
            .aggregate()
            .cloned()
            .ok_or(FieldError::NotAggregate { path: field.path })?;
        Ok(BoundStruct {
            prototype,
            region: Rc::clone(&self.region),
            offset: self.offset + field.offset,
            owns: false,
        })
    }

    fn pointer_target(&self, name: &str) -> StructResult<(Vec<String>, Arc<StructPrototype>)> {
        let path = split_path(name);
        let field = self.prototype.resolve(&path)?;
        match field.kind {
            FieldKind::Pointer {
                target: Some(target),
            } => Ok((path.into_iter().map(str::to_string).collect(), target)),
            FieldKind::Pointer { target: None } | FieldKind::Primitive(FieldType::Pointer) => {
                Err(FieldError::OpaquePointer { path: field.path }.into())
            }
            _ => Err(FieldError::NotPointer { path: field.path }.into()),
        }
    }

    /// Binds the struct a pointer field points at. The result views foreign
    /// memory: closing it never touches this instance and vice versa.
    ///
    /// # Safety
    ///
    /// The pointer field must hold the address of a live struct matching the
    /// field's target prototype, valid for as long as the child is used.
    pub unsafe fn wrap_child_remote(&self, name: &str) -> StructResult<BoundStruct> {
        let (path, target) = self.pointer_target(name)?;
        let segments: Vec<&str> = path.iter().map(String::as_str).collect();
        let address = self.get_address(&segments)?;
        if address.is_null() {
            return Err(FieldError::NullPointer {
                path: path.join("."),
            }
            .into());
        }
        debug!("Following pointer '{}' to {}", path.join("."), address);
        let size = target.size();
        BoundStruct::bind_foreign(target, address, size)
    }

    /// Allocates zeroed memory for a pointer field's target, stores its
    /// address in the field and returns a view of it. The allocation is
    /// freed when the owner of this instance's memory closes, or when a
    /// later `allocate_remote` on the same field replaces it. Views of the
    /// replaced target then fail with `UseAfterClose`.
    pub fn allocate_remote(&self, name: &str) -> StructResult<BoundStruct> {
        let (path, target) = self.pointer_target(name)?;
        if self.is_closed() {
            return Err(self.closed());
        }
        let segments: Vec<&str> = path.iter().map(String::as_str).collect();
        let previous = self.get_address(&segments)?;
        let region = Region::allocate(target.size(), target.alignment())?.shared();
        let address = region
            .borrow()
            .address(0)
            .ok_or_else(|| self.closed())?;
        self.put_address(&segments, address)?;
        {
            let mut owner = self.region.borrow_mut();
            /* A target allocated here earlier is replaced, not leaked */
            if !previous.is_null() && owner.release_dependent(previous) {
                debug!("Released previous target of '{}' at {}", path.join("."), previous);
            }
            owner.adopt(Rc::clone(&region));
        }
        debug!(
            "Allocated {} bytes for '{}' at {}",
            target.size(),
            path.join("."),
            address
        );
        Ok(BoundStruct {
            prototype: target,
            region,
            offset: 0,
            owns: false,
        })
    }
}

impl std::fmt::Debug for BoundStruct {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundStruct")
            .field("prototype", &self.prototype.display_name())
            .field("offset", &self.offset)
            .field("len", &self.len())
            .field("owns", &self.owns)
            .field("closed", &self.is_closed())
            .finish()
    }
}
