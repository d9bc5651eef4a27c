//! Typed value decoders and the registry that maps declared type names onto them.

use crate::error::{Error, Result};
use crate::wire::{align4, Cursor};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Largest list length accepted before the stream is assumed to be out of sync
pub const MAX_LIST_LEN: i32 = 100;

/// Type names serialized as a 12-byte asset reference
pub const ASSET_REF_TYPES: &[&str] = &["Sprite", "Texture", "Block", "AudioClip", "Material"];

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Signed 32-bit integer
    Int(i32),
    /// 32-bit float
    Float(f32),
    /// Boolean stored as a 32-bit 0/1
    Bool(bool),
    /// UTF-8 string (also used for enum member names)
    Str(String),
    /// Asset reference triple
    AssetRef([u32; 3]),
    /// Game object reference
    GameObject([u32; 5]),
    /// Three floats
    Vector3([f32; 3]),
    /// Homogeneous list
    List(Vec<Value>),
}

impl Value {
    /// Integer payload, if any
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float payload, if any
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean payload, if any
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// String or enum member payload, if any
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    /// List payload, if any
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }
}

/// Ordered member table of an enum declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumTable {
    name: Arc<str>,
    members: Arc<[String]>,
}

impl EnumTable {
    /// Creates a table from the members in declaration order
    pub fn new(name: impl Into<Arc<str>>, members: Vec<String>) -> Self {
        Self {
            name: name.into(),
            members: members.into(),
        }
    }

    /// Enum type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Members in declaration order
    pub fn members(&self) -> &[String] {
        &self.members
    }
}

/// Decoder for one declared type.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDecoder {
    /// `int`
    Int32,
    /// `float`
    Float32,
    /// `bool`, stored as a 32-bit integer
    Bool,
    /// `string`, length-prefixed and padded to 4 bytes
    String,
    /// 3 x u32
    AssetRef,
    /// 5 x u32
    GameObject,
    /// 3 x f32
    Vector3,
    /// 32-bit index into a member table
    Enum(EnumTable),
    /// 32-bit length followed by that many inner values
    List(Box<TypeDecoder>),
}

impl TypeDecoder {
    /// Decode one value at the cursor.
    pub fn decode(&self, cursor: &mut Cursor<'_>) -> Result<Value> {
        match self {
            TypeDecoder::Int32 => cursor.read_i32().map(Value::Int),
            TypeDecoder::Float32 => cursor.read_f32().map(Value::Float),
            TypeDecoder::Bool => {
                let offset = cursor.pos();
                match cursor.read_i32()? {
                    0 => Ok(Value::Bool(false)),
                    1 => Ok(Value::Bool(true)),
                    value => Err(Error::InvalidBool { offset, value }),
                }
            }
            TypeDecoder::String => decode_string(cursor).map(Value::Str),
            TypeDecoder::AssetRef => Ok(Value::AssetRef([
                cursor.read_u32()?,
                cursor.read_u32()?,
                cursor.read_u32()?,
            ])),
            TypeDecoder::GameObject => Ok(Value::GameObject([
                cursor.read_u32()?,
                cursor.read_u32()?,
                cursor.read_u32()?,
                cursor.read_u32()?,
                cursor.read_u32()?,
            ])),
            TypeDecoder::Vector3 => Ok(Value::Vector3([
                cursor.read_f32()?,
                cursor.read_f32()?,
                cursor.read_f32()?,
            ])),
            TypeDecoder::Enum(table) => {
                let offset = cursor.pos();
                let index = cursor.read_i32()?;
                usize::try_from(index)
                    .ok()
                    .and_then(|i| table.members.get(i))
                    .map(|member| Value::Str(member.clone()))
                    .ok_or_else(|| Error::EnumOutOfRange {
                        type_name: table.name.to_string(),
                        index,
                        len: table.members.len(),
                        offset,
                    })
            }
            TypeDecoder::List(inner) => {
                let offset = cursor.pos();
                let len = cursor.read_i32()?;
                if !(0..=MAX_LIST_LEN).contains(&len) {
                    return Err(Error::SuspiciousLength {
                        offset,
                        len: len.into(),
                    });
                }
                trace!("list of {} at {}", len, offset);
                (0..len).map(|_| inner.decode(cursor)).collect::<Result<_>>().map(Value::List)
            }
        }
    }
}

fn decode_string(cursor: &mut Cursor<'_>) -> Result<String> {
    let len = cursor.read_u32()? as usize;
    if len == 0 {
        return Ok(String::new());
    }
    let value = cursor.read_utf8(len)?.to_owned();
    cursor.skip(align4(len) - len)?;
    Ok(value)
}

/// Maps declared type names onto decoders.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    types: HashMap<String, TypeDecoder>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Creates a registry holding the primitive and fixed composite types
    pub fn new() -> Self {
        let mut types = HashMap::new();
        types.insert("int".to_string(), TypeDecoder::Int32);
        types.insert("float".to_string(), TypeDecoder::Float32);
        types.insert("bool".to_string(), TypeDecoder::Bool);
        types.insert("string".to_string(), TypeDecoder::String);
        types.insert("GameObject".to_string(), TypeDecoder::GameObject);
        types.insert("Vector3".to_string(), TypeDecoder::Vector3);
        for name in ASSET_REF_TYPES {
            types.insert((*name).to_string(), TypeDecoder::AssetRef);
        }
        Self { types }
    }

    /// Registers (or replaces) a decoder under a type name
    pub fn register(&mut self, name: impl Into<String>, decoder: TypeDecoder) {
        self.types.insert(name.into(), decoder);
    }

    /// Registers an extra type name serialized as an asset reference
    pub fn asset_ref_alias(mut self, name: impl Into<String>) -> Self {
        self.register(name, TypeDecoder::AssetRef);
        self
    }

    /// Looks up a registered name without structural resolution
    pub fn get(&self, name: &str) -> Option<&TypeDecoder> {
        self.types.get(name)
    }

    /// Resolves a declared type name.
    ///
    /// `List<T>` and `T[]` wrap the decoder for `T`. A qualified name such as
    /// `Block.Category` falls back to its last segment.
    pub fn resolve(&self, type_name: &str) -> Option<TypeDecoder> {
        if let Some(decoder) = self.types.get(type_name) {
            return Some(decoder.clone());
        }
        if let Some(inner) = type_name
            .strip_prefix("List<")
            .and_then(|rest| rest.strip_suffix('>'))
        {
            return self.resolve(inner).map(|d| TypeDecoder::List(Box::new(d)));
        }
        if let Some(inner) = type_name.strip_suffix("[]") {
            return self.resolve(inner).map(|d| TypeDecoder::List(Box::new(d)));
        }
        match type_name.rsplit_once('.') {
            Some((_, last)) if !last.is_empty() => self.types.get(last).cloned(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn le(words: &[i32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    fn units() -> TypeDecoder {
        TypeDecoder::Enum(EnumTable::new(
            "Units",
            vec!["kg".into(), "mg".into(), "lt".into()],
        ))
    }

    #[test]
    fn test_list_accepts_bound() {
        let mut words = vec![100];
        words.extend(0..100);
        let data = le(&words);
        let decoder = TypeDecoder::List(Box::new(TypeDecoder::Int32));
        let value = decoder.decode(&mut Cursor::new(&data)).unwrap();
        let items = value.as_list().unwrap();
        assert_eq!(items.len(), 100);
        assert!(items.iter().enumerate().all(|(i, v)| v.as_int() == Some(i as i32)));
    }

    #[test]
    fn test_list_rejects_suspicious_length() {
        let data = le(&[101]);
        let decoder = TypeDecoder::List(Box::new(TypeDecoder::Int32));
        let err = decoder.decode(&mut Cursor::new(&data)).unwrap_err();
        assert!(matches!(err, Error::SuspiciousLength { len: 101, .. }));
        assert!(err.to_string().contains("suspicious"));
    }

    #[test]
    fn test_list_rejects_negative_length() {
        let data = le(&[-1, 7]);
        let decoder = TypeDecoder::List(Box::new(TypeDecoder::Int32));
        let mut cursor = Cursor::new(&data);
        let err = decoder.decode(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::SuspiciousLength { len: -1, offset: 0 }));
        assert!(err.is_stream_desync());
    }

    #[test]
    fn test_enum_bounds() {
        let decoder = units();
        let value = decoder.decode(&mut Cursor::new(&le(&[0]))).unwrap();
        assert_eq!(value, Value::Str("kg".into()));

        let err = decoder.decode(&mut Cursor::new(&le(&[3]))).unwrap_err();
        assert!(matches!(err, Error::EnumOutOfRange { index: 3, len: 3, .. }));
    }

    #[test]
    fn test_bool_rejects_other_values() {
        let data = le(&[1, 0, 2]);
        let mut cursor = Cursor::new(&data);
        assert_eq!(TypeDecoder::Bool.decode(&mut cursor).unwrap(), Value::Bool(true));
        assert_eq!(TypeDecoder::Bool.decode(&mut cursor).unwrap(), Value::Bool(false));
        let err = TypeDecoder::Bool.decode(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::InvalidBool { offset: 8, value: 2 }));
        assert!(err.is_stream_desync());
    }

    #[test]
    fn test_string_skips_padding() {
        let mut data = 5u32.to_le_bytes().to_vec();
        data.extend_from_slice(b"HELLO\0\0\0");
        data.extend_from_slice(&7i32.to_le_bytes());
        let mut cursor = Cursor::new(&data);
        assert_eq!(
            TypeDecoder::String.decode(&mut cursor).unwrap(),
            Value::Str("HELLO".into())
        );
        assert_eq!(cursor.pos(), 12);
        assert_eq!(TypeDecoder::Int32.decode(&mut cursor).unwrap(), Value::Int(7));
    }

    #[test]
    fn test_empty_string_reads_only_length() {
        let data = le(&[0, 9]);
        let mut cursor = Cursor::new(&data);
        assert_eq!(TypeDecoder::String.decode(&mut cursor).unwrap(), Value::Str(String::new()));
        assert_eq!(cursor.pos(), 4);
    }

    #[test]
    fn test_string_rejects_bad_utf8() {
        let mut data = 2u32.to_le_bytes().to_vec();
        data.extend_from_slice(&[0xFF, 0xFE, 0, 0]);
        let err = TypeDecoder::String.decode(&mut Cursor::new(&data)).unwrap_err();
        assert!(matches!(err, Error::InvalidUtf8 { offset: 4 }));
    }

    #[test]
    fn test_resolve_structural_names() {
        let mut registry = TypeRegistry::new();
        registry.register("Units", units());

        assert_eq!(
            registry.resolve("List<int>"),
            Some(TypeDecoder::List(Box::new(TypeDecoder::Int32)))
        );
        assert_eq!(
            registry.resolve("int[]"),
            Some(TypeDecoder::List(Box::new(TypeDecoder::Int32)))
        );
        assert_eq!(registry.resolve("ResourceItem.Units"), Some(units()));
        assert_eq!(
            registry.resolve("List<ResourceItem.Units>"),
            Some(TypeDecoder::List(Box::new(units())))
        );
        assert_eq!(registry.resolve("Texture"), Some(TypeDecoder::AssetRef));
        assert_eq!(registry.resolve("Manager"), None);
        assert_eq!(
            registry.asset_ref_alias("Manager").resolve("Manager"),
            Some(TypeDecoder::AssetRef)
        );
    }
}
