/* Struct prototypes and the layout engine
 *
 * Fields are placed in declaration order using C rules: each field starts at
 * the cursor rounded up to its own alignment, union members all start at 0,
 * and the total size is padded to the largest member alignment.
 */

use crate::errors::{FieldError, LayoutError, LayoutResult};
use crate::field_type::FieldType;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Primitive(FieldType),
    /// Inline struct, laid out inside the parent.
    Struct(Arc<StructPrototype>),
    /// Inline union, laid out inside the parent.
    Union(Arc<StructPrototype>),
    /// Pointer to separately allocated memory. `None` is an opaque pointer.
    Pointer { target: Option<Arc<StructPrototype>> },
    /// Fixed-size array of primitives.
    Array { element: FieldType, len: usize },
}

impl FieldKind {
    pub fn size(&self) -> usize {
        match self {
            FieldKind::Primitive(ty) => ty.size(),
            FieldKind::Struct(proto) | FieldKind::Union(proto) => proto.size(),
            FieldKind::Pointer { .. } => FieldType::Pointer.size(),
            FieldKind::Array { element, len } => element.size().saturating_mul(*len),
        }
    }

    pub fn alignment(&self) -> usize {
        match self {
            FieldKind::Primitive(ty) => ty.alignment(),
            FieldKind::Struct(proto) | FieldKind::Union(proto) => proto.alignment(),
            FieldKind::Pointer { .. } => FieldType::Pointer.alignment(),
            FieldKind::Array { element, .. } => element.alignment(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldKind::Primitive(_) => "primitive",
            FieldKind::Struct(_) => "struct",
            FieldKind::Union(_) => "union",
            FieldKind::Pointer { .. } => "pointer",
            FieldKind::Array { .. } => "array",
        }
    }

    /// The nested prototype of a struct or union field.
    pub fn aggregate(&self) -> Option<&Arc<StructPrototype>> {
        match self {
            FieldKind::Struct(proto) | FieldKind::Union(proto) => Some(proto),
            _ => None,
        }
    }
}

/// A named field. `offset` is assigned by the layout engine and is relative
/// to the start of the owning prototype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub offset: usize,
    pub kind: FieldKind,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            offset: 0,
            kind,
        }
    }

    pub fn primitive(name: impl Into<String>, ty: FieldType) -> Self {
        Self::new(name, FieldKind::Primitive(ty))
    }

    pub fn structure(name: impl Into<String>, proto: &Arc<StructPrototype>) -> Self {
        Self::new(name, StructPrototype::embed(proto))
    }

    pub fn pointer(name: impl Into<String>, target: Option<&Arc<StructPrototype>>) -> Self {
        Self::new(
            name,
            FieldKind::Pointer {
                target: target.cloned(),
            },
        )
    }

    pub fn array(name: impl Into<String>, element: FieldType, len: usize) -> Self {
        Self::new(name, FieldKind::Array { element, len })
    }
}

/// Where a path landed: absolute offset from the root prototype and the kind
/// found there. Array elements resolve to their primitive type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
    pub path: String,
    pub offset: usize,
    pub kind: FieldKind,
}

/// Immutable struct or union layout, shared through `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructPrototype {
    name: Option<String>,
    fields: Vec<FieldDescriptor>,
    index: HashMap<String, usize>,
    size: usize,
    alignment: usize,
    is_union: bool,
}

impl StructPrototype {
    pub fn builder() -> StructPrototypeBuilder {
        StructPrototypeBuilder::new(false)
    }

    pub fn union_builder() -> StructPrototypeBuilder {
        StructPrototypeBuilder::new(true)
    }

    fn embed(proto: &Arc<StructPrototype>) -> FieldKind {
        if proto.is_union {
            FieldKind::Union(Arc::clone(proto))
        } else {
            FieldKind::Struct(Arc::clone(proto))
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn is_union(&self) -> bool {
        self.is_union
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.index.get(name).map(|idx| &self.fields[*idx])
    }

    /// Walks `path` through nested structs, unions and array indices.
    ///
    /// Pointers are never followed; a path that continues past one fails
    /// with `FieldError::Indirect`.
    pub fn resolve(&self, path: &[&str]) -> Result<ResolvedField, FieldError> {
        let joined = |end: usize| path[..end].join(".");
        if path.is_empty() {
            return Err(FieldError::NotFound {
                path: String::new(),
            });
        }

        let mut proto: &StructPrototype = self;
        let mut base = 0usize;
        let mut i = 0usize;
        loop {
            let field = proto
                .field(path[i])
                .ok_or_else(|| FieldError::NotFound { path: joined(i + 1) })?;
            let offset = base + field.offset;
            i += 1;
            if i == path.len() {
                return Ok(ResolvedField {
                    path: joined(i),
                    offset,
                    kind: field.kind.clone(),
                });
            }

            match &field.kind {
                FieldKind::Struct(inner) | FieldKind::Union(inner) => {
                    proto = inner.as_ref();
                    base = offset;
                }
                FieldKind::Array { element, len } => {
                    let index: usize = path[i]
                        .parse()
                        .map_err(|_| FieldError::NotFound { path: joined(i + 1) })?;
                    if index >= *len {
                        return Err(FieldError::IndexOutOfRange {
                            path: joined(i),
                            index,
                            len: *len,
                        });
                    }
                    i += 1;
                    if i != path.len() {
                        return Err(FieldError::NotFound { path: joined(i + 1) });
                    }
                    return Ok(ResolvedField {
                        path: joined(i),
                        offset: offset + index * element.size(),
                        kind: FieldKind::Primitive(*element),
                    });
                }
                FieldKind::Pointer { .. } => {
                    return Err(FieldError::Indirect { path: joined(i) });
                }
                FieldKind::Primitive(_) => {
                    return Err(FieldError::NotFound { path: joined(i + 1) });
                }
            }
        }
    }
}

/// Splits a dotted path (`"a.b.0"`) into segments.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}

pub(crate) fn align_up(value: usize, alignment: usize) -> Option<usize> {
    value
        .checked_add(alignment - 1)
        .map(|v| v & !(alignment - 1))
}

enum PendingKind {
    Ready(FieldKind),
    InlineUnion(Vec<FieldDescriptor>),
}

struct PendingField {
    name: String,
    kind: PendingKind,
}

pub struct StructPrototypeBuilder {
    name: Option<String>,
    fields: Vec<PendingField>,
    is_union: bool,
}

impl StructPrototypeBuilder {
    fn new(is_union: bool) -> Self {
        Self {
            name: None,
            fields: Vec::new(),
            is_union,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn push(mut self, name: String, kind: PendingKind) -> Self {
        self.fields.push(PendingField { name, kind });
        self
    }

    pub fn add(self, field: FieldDescriptor) -> Self {
        self.push(field.name, PendingKind::Ready(field.kind))
    }

    pub fn add_primitive(self, name: impl Into<String>, ty: FieldType) -> Self {
        self.push(name.into(), PendingKind::Ready(FieldKind::Primitive(ty)))
    }

    /// Inserts a primitive ahead of already added fields.
    pub fn insert_primitive(mut self, index: usize, name: impl Into<String>, ty: FieldType) -> Self {
        let index = index.min(self.fields.len());
        self.fields.insert(
            index,
            PendingField {
                name: name.into(),
                kind: PendingKind::Ready(FieldKind::Primitive(ty)),
            },
        );
        self
    }

    /// Embeds `proto` inline. A union prototype embeds as a union field.
    pub fn add_struct(self, name: impl Into<String>, proto: &Arc<StructPrototype>) -> Self {
        self.push(name.into(), PendingKind::Ready(StructPrototype::embed(proto)))
    }

    /// Embeds a union built from `members` at build time. The union's
    /// prototype is named after the field.
    pub fn add_union(self, name: impl Into<String>, members: Vec<FieldDescriptor>) -> Self {
        self.push(name.into(), PendingKind::InlineUnion(members))
    }

    pub fn add_union_prototype(self, name: impl Into<String>, proto: &Arc<StructPrototype>) -> Self {
        self.push(
            name.into(),
            PendingKind::Ready(FieldKind::Union(Arc::clone(proto))),
        )
    }

    pub fn add_pointer(self, name: impl Into<String>, target: Option<&Arc<StructPrototype>>) -> Self {
        self.push(
            name.into(),
            PendingKind::Ready(FieldKind::Pointer {
                target: target.cloned(),
            }),
        )
    }

    pub fn add_array(self, name: impl Into<String>, element: FieldType, len: usize) -> Self {
        self.push(name.into(), PendingKind::Ready(FieldKind::Array { element, len }))
    }

    /// Lays out every field and freezes the prototype.
    pub fn build(self) -> LayoutResult<Arc<StructPrototype>> {
        let type_name = self.name.clone().unwrap_or_else(|| "<anonymous>".to_string());
        let overflow = || LayoutError::SizeOverflow {
            name: type_name.clone(),
        };

        let mut fields = Vec::with_capacity(self.fields.len());
        let mut index = HashMap::with_capacity(self.fields.len());
        let mut cursor = 0usize;
        let mut max_alignment = 1usize;

        for pending in self.fields {
            if index.contains_key(&pending.name) {
                return Err(LayoutError::DuplicateField { name: pending.name });
            }

            let kind = match pending.kind {
                PendingKind::Ready(kind) => kind,
                PendingKind::InlineUnion(members) => {
                    let inline = members
                        .into_iter()
                        .fold(StructPrototype::union_builder(), |b, m| b.add(m))
                        .named(pending.name.clone())
                        .build()?;
                    FieldKind::Union(inline)
                }
            };
            if let FieldKind::Array { element, len } = &kind {
                if *len == 0 {
                    return Err(LayoutError::EmptyArray { name: pending.name });
                }
                element.size().checked_mul(*len).ok_or_else(overflow)?;
            }

            let alignment = kind.alignment();
            let size = kind.size();
            let offset = if self.is_union {
                0
            } else {
                align_up(cursor, alignment).ok_or_else(overflow)?
            };
            let end = offset.checked_add(size).ok_or_else(overflow)?;
            cursor = cursor.max(end);
            max_alignment = max_alignment.max(alignment);

            index.insert(pending.name.clone(), fields.len());
            fields.push(FieldDescriptor {
                name: pending.name,
                offset,
                kind,
            });
        }

        let size = align_up(cursor, max_alignment).ok_or_else(overflow)?;
        debug!(
            "Built {} '{}': {} fields, size {}, alignment {}",
            if self.is_union { "union" } else { "struct" },
            type_name,
            fields.len(),
            size,
            max_alignment
        );

        Ok(Arc::new(StructPrototype {
            name: self.name,
            fields,
            index,
            size,
            alignment: max_alignment,
            is_union: self.is_union,
        }))
    }
}
