//! Decoding records out of raw table payloads.
//!
//! - [`SequentialDecoder`] walks a payload field by field in declaration
//!   order until the bytes run out at a record boundary.
//! - [`JumbledDecoder`] decodes one record from explicit field-group sections
//!   when the serialized order differs from the declared one.
//! - [`RecordDiscovery`] finds the records of a jumbled table by searching the
//!   payload for a marker string and drives the jumbled decoder over each one.

mod discovery;
mod jumbled;

use crate::error::{Error, Result};
use crate::schema::{FieldDescriptor, Schema, Value};
use crate::wire::Cursor;
use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::{debug, trace};

pub use discovery::{
    Discovery, DiscoveryConfig, RecordDiscovery, SectionLocator, SkippedRecord,
};
pub use jumbled::{
    Coverage, DecodeOptions, Decoded, JumbledDecoder, MissedRange, Section, SectionStart,
    UsedRange,
};

/// Field name to value mapping of one decoded record, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedRecord {
    fields: Vec<(String, Value)>,
}

impl DecodedRecord {
    /// Creates an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a record from ordered pairs
    pub fn from_fields(fields: Vec<(String, Value)>) -> Self {
        Self { fields }
    }

    /// Sets a field, replacing an earlier value of the same name in place
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Value of a field
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no fields were decoded
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Integer field
    pub fn int(&self, name: &str) -> Result<i32> {
        self.get(name)
            .and_then(Value::as_int)
            .ok_or_else(|| Error::field_kind(name, "an integer"))
    }

    /// Float field
    pub fn float(&self, name: &str) -> Result<f32> {
        self.get(name)
            .and_then(Value::as_float)
            .ok_or_else(|| Error::field_kind(name, "a float"))
    }

    /// Boolean field
    pub fn bool(&self, name: &str) -> Result<bool> {
        self.get(name)
            .and_then(Value::as_bool)
            .ok_or_else(|| Error::field_kind(name, "a boolean"))
    }

    /// String or enum member field
    pub fn str(&self, name: &str) -> Result<&str> {
        self.get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::field_kind(name, "a string"))
    }

    /// List field
    pub fn list(&self, name: &str) -> Result<&[Value]> {
        self.get(name)
            .and_then(Value::as_list)
            .ok_or_else(|| Error::field_kind(name, "a list"))
    }
}

impl Serialize for DecodedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Decode `fields` in order, mapping end of input to `Truncated` for the
/// numbered record, or to `SectionTruncated` when there is no record number.
fn decode_fields(
    fields: &[FieldDescriptor],
    cursor: &mut Cursor<'_>,
    record: Option<usize>,
    mut emit: impl FnMut(&FieldDescriptor, Value),
) -> Result<()> {
    for field in fields {
        let offset = cursor.pos();
        let value = field.decoder.decode(cursor).map_err(|e| match e {
            Error::UnexpectedEof { .. } => match record {
                Some(record) => Error::Truncated {
                    record,
                    field: field.name.clone(),
                    offset,
                },
                None => Error::SectionTruncated {
                    field: field.name.clone(),
                    offset,
                },
            },
            e => e,
        })?;
        trace!("{} @ {}: {:?}", field.name, offset, value);
        emit(field, value);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Reading,
    Done,
}

/// Decodes consecutive records laid out in declaration order.
#[derive(Debug, Clone, Copy)]
pub struct SequentialDecoder<'s> {
    schema: &'s Schema,
}

impl<'s> SequentialDecoder<'s> {
    /// Creates a decoder for one schema
    pub fn new(schema: &'s Schema) -> Self {
        Self { schema }
    }

    /// Iterate over the records starting at `first_offset`.
    ///
    /// The iterator ends cleanly when the payload is exhausted exactly at a
    /// record boundary. Running out of bytes anywhere else yields a single
    /// [`Error::Truncated`] and ends the iteration.
    pub fn records<'a>(&self, data: &'a [u8], first_offset: usize) -> Result<Records<'a, 's>> {
        Ok(Records {
            schema: self.schema,
            cursor: Cursor::at(data, first_offset)?,
            state: State::Reading,
            count: 0,
        })
    }

    /// Decode every record starting at `first_offset`.
    pub fn decode_all(&self, data: &[u8], first_offset: usize) -> Result<Vec<DecodedRecord>> {
        let records = self.records(data, first_offset)?.collect::<Result<Vec<_>>>()?;
        debug!("decoded {} records", records.len());
        Ok(records)
    }
}

/// Iterator returned by [`SequentialDecoder::records`]
#[derive(Debug)]
pub struct Records<'a, 's> {
    schema: &'s Schema,
    cursor: Cursor<'a>,
    state: State,
    count: usize,
}

impl Records<'_, '_> {
    fn decode_one(&mut self) -> Result<DecodedRecord> {
        let mut record = DecodedRecord::new();
        decode_fields(self.schema.fields(), &mut self.cursor, Some(self.count), |field, value| {
            record.fields.push((field.name.clone(), value))
        })?;
        Ok(record)
    }
}

impl Iterator for Records<'_, '_> {
    type Item = Result<DecodedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == State::Done {
            return None;
        }
        if self.cursor.at_end() || self.schema.is_empty() {
            trace!("end of stream after {} records", self.count);
            self.state = State::Done;
            return None;
        }

        match self.decode_one() {
            Ok(record) => {
                self.count += 1;
                Some(Ok(record))
            }
            Err(e) => {
                self.state = State::Done;
                Some(Err(e))
            }
        }
    }
}
