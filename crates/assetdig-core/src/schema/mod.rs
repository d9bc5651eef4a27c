//! Field schemas derived from type description text.
//!
//! A type description is the source text of a serializable class. Three kinds
//! of lines matter:
//!
//! - field declarations, `public|private <Type> <name>;` or with an `=`
//!   initializer
//! - enum headers, `public enum <Name>` on a line of their own, whose members
//!   are the `<Member>,` lines up to the closing brace
//! - list types, `List<T>` or `T[]`, resolved structurally against the
//!   registry when a field uses them
//!
//! Everything else is ignored. The emitted field order is the declaration
//! order of the text. Jumbled decoding slices field groups by this order even
//! where the serialized bytes use a different one.

mod decoder;

use crate::error::{Error, Result};
use std::ops::Range;
use tracing::debug;

pub use decoder::{EnumTable, TypeDecoder, TypeRegistry, Value, ASSET_REF_TYPES, MAX_LIST_LEN};

/// Field visibility as declared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// `public`
    Public,
    /// `private`
    Private,
}

/// One declared field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Zero-based position in declaration order
    pub index: usize,
    /// Declared visibility
    pub access: Access,
    /// Type name exactly as written
    pub type_name: String,
    /// Field name
    pub name: String,
    /// Decoder resolved for `type_name`
    pub decoder: TypeDecoder,
}

/// Ordered field list of one record type.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<FieldDescriptor>,
}

impl Schema {
    /// Fields in declaration order
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Declaration index of a field
    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| Error::unknown_field(name))
    }

    /// Declaration range `first..=last`, as a half-open range.
    ///
    /// `last` is looked up at or after `first`.
    pub fn range(&self, first: &str, last: &str) -> Result<Range<usize>> {
        let start = self.index_of(first)?;
        match self.fields[start..].iter().position(|f| f.name == last) {
            Some(offset) => Ok(start..start + offset + 1),
            None => {
                // Distinguish a reversed pair from a missing name
                self.index_of(last)?;
                Err(Error::EmptyFieldRange {
                    first: first.to_string(),
                    last: last.to_string(),
                })
            }
        }
    }
}

/// Builds a [`Schema`] from type description text.
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    registry: TypeRegistry,
}

impl SchemaBuilder {
    /// Creates a builder over the built-in types
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder over a custom registry
    pub fn with_registry(registry: TypeRegistry) -> Self {
        Self { registry }
    }

    /// Registers an extra type name serialized as an asset reference
    pub fn asset_ref_alias(mut self, name: impl Into<String>) -> Self {
        self.registry = self.registry.asset_ref_alias(name);
        self
    }

    /// The registry, including enums registered by previous builds
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Parse `text` into a schema, registering its enums first.
    pub fn build(&mut self, text: &str) -> Result<Schema> {
        for table in parse_enums(text) {
            debug!("enum {} with {} members", table.name(), table.members().len());
            self.registry
                .register(table.name().to_string(), TypeDecoder::Enum(table));
        }

        let mut fields = Vec::new();
        for line in text.lines() {
            let Some((access, type_name, name)) = parse_field(line) else {
                continue;
            };
            let decoder = self
                .registry
                .resolve(type_name)
                .ok_or_else(|| Error::UnknownType {
                    type_name: type_name.to_string(),
                    field: name.to_string(),
                })?;
            fields.push(FieldDescriptor {
                index: fields.len(),
                access,
                type_name: type_name.to_string(),
                name: name.to_string(),
                decoder,
            });
        }

        debug!("schema with {} fields", fields.len());
        Ok(Schema { fields })
    }
}

fn is_ident(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

fn parse_enums(text: &str) -> Vec<EnumTable> {
    let mut tables = Vec::new();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        let Some(name) = line
            .trim()
            .strip_prefix("public enum ")
            .map(str::trim)
            .filter(|name| is_ident(name))
        else {
            continue;
        };

        let mut members = Vec::new();
        for body in lines.by_ref() {
            let (before, closed) = match body.find('}') {
                Some(i) => (&body[..i], true),
                None => (body, false),
            };
            if let Some(member) = before.trim().strip_suffix(',') {
                if is_ident(member) {
                    members.push(member.to_string());
                }
            }
            if closed {
                break;
            }
        }
        tables.push(EnumTable::new(name, members));
    }

    tables
}

fn parse_field(line: &str) -> Option<(Access, &str, &str)> {
    let line = line.trim_start();
    let (access, rest) = if let Some(rest) = line.strip_prefix("public") {
        (Access::Public, rest)
    } else if let Some(rest) = line.strip_prefix("private") {
        (Access::Private, rest)
    } else {
        return None;
    };
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }

    let rest = rest.trim_start();
    let (type_name, rest) = rest.split_at(rest.find(char::is_whitespace)?);
    let rest = rest.trim_start();
    let name_len = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    let (name, tail) = rest.split_at(name_len);
    let terminated = tail.starts_with(';') || tail.trim_start().starts_with('=');
    (terminated && is_ident(name)).then_some((access, type_name, name))
}
