/* Schema-driven definitions
 *
 * A definition document lists type definitions and queries. Types resolve in
 * declaration order into struct prototypes, and each query names the struct
 * it exchanges plus the controls it exposes over that struct's fields.
 */

use crate::errors::DefinitionError;
use crate::field_type::FieldType;
use crate::prototype::{
    split_path, FieldDescriptor, FieldKind, StructPrototype, StructPrototypeBuilder,
};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ffi::{c_long, c_ulong};
use std::mem::size_of;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/* ============================================================================
   Schema
   ============================================================================ */

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct DefinitionDocument {
    #[serde(default)]
    pub types: Vec<TypeSchema>,
    #[serde(default)]
    pub queries: Vec<QuerySchema>,
    /// Named query indices that queries may refer to instead of numbers.
    #[serde(default)]
    pub indices: BTreeMap<String, u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TypeSchema {
    Alias { name: String, alias: String },
    Enum { name: String, values: Vec<String> },
    Struct { name: String, fields: Vec<FieldSchema> },
    Union { name: String, fields: Vec<FieldSchema> },
    /// A struct prefixed by the `size` and `version` header of a query block.
    Query { name: String, fields: Vec<FieldSchema> },
}

/// A field written either as `{name, type}` or as the pair `[name, type]`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum FieldSchema {
    Named {
        name: String,
        #[serde(rename = "type")]
        type_name: String,
    },
    Pair(String, String),
}

impl FieldSchema {
    pub fn name(&self) -> &str {
        match self {
            FieldSchema::Named { name, .. } | FieldSchema::Pair(name, _) => name,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            FieldSchema::Named { type_name, .. } | FieldSchema::Pair(_, type_name) => type_name,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct QuerySchema {
    pub name: String,
    pub query: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub fields: Vec<ControlSchema>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ControlSchema {
    pub name: String,
    #[serde(default)]
    pub kind: ControlKind,
    /// Dotted path of the backing struct field.
    #[serde(alias = "sfName")]
    pub sf_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ControlKind {
    #[default]
    Number,
    Enum,
}

/* ============================================================================
   Resolved definitions
   ============================================================================ */

/// A control exposed by a query, backed by a field of the query struct.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlMapping {
    pub name: String,
    pub kind: ControlKind,
    pub path: Vec<String>,
    /// Value names when the backing field is a declared enum.
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryDefinition {
    pub name: String,
    pub index: u32,
    pub prototype: Arc<StructPrototype>,
    pub controls: Vec<ControlMapping>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DefinitionFormat {
    Json,
    Yaml,
}

impl DefinitionFormat {
    /// Picks YAML for `.yaml`/`.yml` files and JSON otherwise.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => DefinitionFormat::Yaml,
            _ => DefinitionFormat::Json,
        }
    }
}

/* Configuration toggles for definition loading */
#[derive(Clone, Debug, Default)]
pub struct DefinitionConfig {
    /* Skip fields of unknown type with a warning instead of failing */
    pub continue_on_error: bool,
}

/* ============================================================================
   Registry
   ============================================================================ */

#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    config: DefinitionConfig,
    types: HashMap<String, FieldKind>,
    enums: HashMap<String, Vec<String>>,
    /* struct name -> (field name, declared type name) */
    field_types: HashMap<String, Vec<(String, String)>>,
    indices: BTreeMap<String, u32>,
    queries: BTreeMap<String, Arc<QueryDefinition>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: DefinitionConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn load_str(&mut self, text: &str, format: DefinitionFormat) -> Result<(), DefinitionError> {
        let document: DefinitionDocument = match format {
            DefinitionFormat::Json => serde_json::from_str(text)?,
            DefinitionFormat::Yaml => serde_yml::from_str(text)?,
        };
        self.load_document(document)
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read definitions from {}", path.display()))?;
        self.load_str(&contents, DefinitionFormat::from_path(path))
            .with_context(|| format!("failed to load definitions from {}", path.display()))?;
        Ok(())
    }

    pub fn load_document(&mut self, document: DefinitionDocument) -> Result<(), DefinitionError> {
        self.indices.extend(document.indices);
        for typedef in &document.types {
            self.read_type(typedef)?;
        }
        for query in &document.queries {
            self.read_query(query)?;
        }
        Ok(())
    }

    /// Looks up a type by name.
    ///
    /// Accepts C and fixed-width primitive names, previously defined types,
    /// `T*` for pointers and `T[n]` for arrays of primitives.
    pub fn lookup_type(&self, name: &str) -> Option<FieldKind> {
        let name = name.trim();
        if let Some(kind) = self.types.get(name) {
            return Some(kind.clone());
        }
        if let Some(ty) = primitive(name) {
            return Some(FieldKind::Primitive(ty));
        }

        if let Some(stripped) = name.strip_suffix(']') {
            let open = stripped.rfind('[')?;
            let len: usize = stripped[open + 1..].trim().parse().ok()?;
            /* fixed-length, NUL-padded text */
            if stripped[..open].trim() == "string" {
                return Some(FieldKind::Primitive(FieldType::OpaqueBytes(len)));
            }
            return match self.lookup_type(&stripped[..open])? {
                FieldKind::Primitive(element) => Some(FieldKind::Array { element, len }),
                _ => None,
            };
        }

        if let Some(base) = name.strip_suffix('*') {
            let target = match self.lookup_type(base)? {
                FieldKind::Struct(proto) | FieldKind::Union(proto) => Some(proto),
                _ => None,
            };
            return Some(FieldKind::Pointer { target });
        }
        None
    }

    pub fn prototype(&self, name: &str) -> Option<Arc<StructPrototype>> {
        self.types.get(name).and_then(|k| k.aggregate().cloned())
    }

    pub fn query(&self, name: &str) -> Option<Arc<QueryDefinition>> {
        self.queries.get(name).cloned()
    }

    pub fn queries(&self) -> impl Iterator<Item = &Arc<QueryDefinition>> {
        self.queries.values()
    }

    pub fn enum_value(&self, type_name: &str, value: &str) -> Result<i128, DefinitionError> {
        self.enums
            .get(type_name)
            .and_then(|values| values.iter().position(|v| v == value))
            .map(|idx| idx as i128)
            .ok_or_else(|| DefinitionError::UnknownEnumValue {
                type_name: type_name.to_string(),
                value: value.to_string(),
            })
    }

    pub fn enum_name(&self, type_name: &str, value: i128) -> Option<&str> {
        let values = self.enums.get(type_name)?;
        usize::try_from(value)
            .ok()
            .and_then(|idx| values.get(idx))
            .map(String::as_str)
    }

    fn read_type(&mut self, typedef: &TypeSchema) -> Result<(), DefinitionError> {
        match typedef {
            TypeSchema::Alias { name, alias } => {
                let kind = match self.lookup_type(alias) {
                    Some(kind) => kind,
                    None if self.config.continue_on_error => {
                        warn!(
                            "Downgraded alias '{}' from unknown type '{}' to int32",
                            name, alias
                        );
                        FieldKind::Primitive(FieldType::Int32)
                    }
                    None => {
                        return Err(DefinitionError::UnknownType {
                            type_name: alias.clone(),
                            context: name.clone(),
                        })
                    }
                };
                if let Some(values) = self.enums.get(alias.trim()).cloned() {
                    self.enums.insert(name.clone(), values);
                }
                self.types.insert(name.clone(), kind);
            }
            TypeSchema::Enum { name, values } => {
                self.enums.insert(name.clone(), values.clone());
                self.types
                    .insert(name.clone(), FieldKind::Primitive(FieldType::Int32));
            }
            TypeSchema::Struct { name, fields } => {
                let proto = self.read_fields(StructPrototype::builder(), name, fields, false)?;
                self.types.insert(name.clone(), FieldKind::Struct(proto));
            }
            TypeSchema::Union { name, fields } => {
                let proto =
                    self.read_fields(StructPrototype::union_builder(), name, fields, false)?;
                self.types.insert(name.clone(), FieldKind::Union(proto));
            }
            TypeSchema::Query { name, fields } => {
                let proto = self.read_fields(StructPrototype::builder(), name, fields, true)?;
                self.types.insert(name.clone(), FieldKind::Struct(proto));
            }
        }
        Ok(())
    }

    fn read_fields(
        &mut self,
        mut builder: StructPrototypeBuilder,
        type_name: &str,
        fields: &[FieldSchema],
        query_header: bool,
    ) -> Result<Arc<StructPrototype>, DefinitionError> {
        let mut declared = Vec::with_capacity(fields.len() + 2);
        if query_header {
            builder = builder
                .add_primitive("size", FieldType::UInt32)
                .add_primitive("version", FieldType::UInt32);
        }

        for field in fields {
            let Some(kind) = self.lookup_type(field.type_name()) else {
                if self.config.continue_on_error {
                    warn!(
                        "Skipped field '{}::{}' of unknown type '{}'",
                        type_name,
                        field.name(),
                        field.type_name()
                    );
                    continue;
                }
                return Err(DefinitionError::UnknownType {
                    type_name: field.type_name().to_string(),
                    context: format!("{}::{}", type_name, field.name()),
                });
            };
            declared.push((field.name().to_string(), field.type_name().trim().to_string()));
            builder = builder.add(FieldDescriptor::new(field.name(), kind));
        }

        let proto = builder
            .named(type_name)
            .build()
            .map_err(|source| DefinitionError::Layout {
                type_name: type_name.to_string(),
                source,
            })?;
        self.field_types.insert(type_name.to_string(), declared);
        Ok(proto)
    }

    fn read_query(&mut self, query: &QuerySchema) -> Result<(), DefinitionError> {
        let index = self.query_index(&query.query)?;
        let prototype = match self.types.get(query.type_name.trim()) {
            Some(FieldKind::Struct(proto)) => Arc::clone(proto),
            Some(_) => {
                return Err(DefinitionError::IllegalQueryType {
                    query: query.name.clone(),
                    type_name: query.type_name.clone(),
                })
            }
            None => {
                return Err(DefinitionError::UnknownType {
                    type_name: query.type_name.clone(),
                    context: query.name.clone(),
                })
            }
        };

        let controls = query
            .fields
            .iter()
            .map(|control| {
                let path: Vec<String> = split_path(&control.sf_name)
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                let values = match control.kind {
                    ControlKind::Enum => self
                        .declared_type(query.type_name.trim(), &path)
                        .and_then(|ty| self.enums.get(&ty).cloned())
                        .unwrap_or_default(),
                    ControlKind::Number => Vec::new(),
                };
                ControlMapping {
                    name: control.name.clone(),
                    kind: control.kind,
                    path,
                    values,
                }
            })
            .collect();

        debug!(
            "Registered query '{}' (index {:#x}) over '{}'",
            query.name, index, query.type_name
        );
        self.queries.insert(
            query.name.clone(),
            Arc::new(QueryDefinition {
                name: query.name.clone(),
                index,
                prototype,
                controls,
            }),
        );
        Ok(())
    }

    /* Declared type name of the field at `path`, following nested structs */
    fn declared_type(&self, root: &str, path: &[String]) -> Option<String> {
        let mut current = root.to_string();
        for segment in path {
            let fields = self.field_types.get(&current)?;
            current = fields
                .iter()
                .find(|(name, _)| name == segment)
                .map(|(_, ty)| ty.clone())?;
        }
        Some(current)
    }

    fn query_index(&self, text: &str) -> Result<u32, DefinitionError> {
        parse_query_index(text)
            .or_else(|| self.indices.get(text.trim()).copied())
            .ok_or_else(|| DefinitionError::InvalidQueryIndex {
                index: text.to_string(),
            })
    }
}

/// Parses a query index with an optional `0x`, `0o` or `0b` radix prefix.
pub fn parse_query_index(text: &str) -> Option<u32> {
    let text = text.trim();
    let (digits, radix) = match text.get(..2) {
        Some("0x") | Some("0X") => (&text[2..], 16),
        Some("0o") | Some("0O") => (&text[2..], 8),
        Some("0b") | Some("0B") => (&text[2..], 2),
        _ => (text, 10),
    };
    u32::from_str_radix(digits, radix).ok()
}

fn integer(size: usize, signed: bool) -> FieldType {
    match (size, signed) {
        (1, true) => FieldType::Int8,
        (1, false) => FieldType::UInt8,
        (2, true) => FieldType::Int16,
        (2, false) => FieldType::UInt16,
        (4, true) => FieldType::Int32,
        (4, false) => FieldType::UInt32,
        (_, true) => FieldType::Int64,
        (_, false) => FieldType::UInt64,
    }
}

/* Primitive spellings, sized for the host C ABI */
fn primitive(name: &str) -> Option<FieldType> {
    let ty = match name {
        "bool" | "boolean" => FieldType::Int32,
        "char" | "signed char" | "i8" | "int8" | "int8_t" => FieldType::Int8,
        "unsigned char" | "u8" | "uint8" | "uint8_t" => FieldType::UInt8,
        "short" | "short int" | "signed short" | "signed short int" | "i16" | "int16"
        | "int16_t" => FieldType::Int16,
        "unsigned short" | "unsigned short int" | "u16" | "uint16" | "uint16_t" => {
            FieldType::UInt16
        }
        "int" | "signed" | "signed int" | "i32" | "int32" | "int32_t" => FieldType::Int32,
        "unsigned" | "unsigned int" | "u32" | "uint32" | "uint32_t" => FieldType::UInt32,
        "long" | "long int" | "signed long" | "signed long int" => {
            integer(size_of::<c_long>(), true)
        }
        "unsigned long" | "unsigned long int" => integer(size_of::<c_ulong>(), false),
        "long long" | "long long int" | "signed long long" | "signed long long int" | "i64"
        | "int64" | "int64_t" => FieldType::Int64,
        "unsigned long long" | "unsigned long long int" | "u64" | "uint64" | "uint64_t" => {
            FieldType::UInt64
        }
        "size_t" | "uintptr_t" => integer(size_of::<usize>(), false),
        "intptr_t" | "ssize_t" => integer(size_of::<isize>(), true),
        /* signed 16.16 fixed point */
        "q16" | "q16.16" => FieldType::Int32,
        "void*" | "void *" => FieldType::Pointer,
        _ => return None,
    };
    Some(ty)
}
