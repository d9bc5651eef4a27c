//! Decoding records whose serialized field order differs from the declared one.

use super::{decode_fields, DecodedRecord};
use crate::error::Result;
use crate::schema::{Schema, Value};
use crate::wire::Cursor;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use tracing::{debug, trace};

/// Where a section starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionStart {
    /// Absolute offset into the record bytes
    At(usize),
    /// This many bytes before the end of the previous section
    Back(usize),
    /// Directly after the previous section
    Here,
}

/// A run of consecutively declared fields read from one position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Where to start reading
    pub start: SectionStart,
    /// First field of the run
    pub first: String,
    /// Last field of the run, inclusive
    pub last: String,
}

impl Section {
    /// Section at an absolute offset
    pub fn at(offset: usize, first: impl Into<String>, last: impl Into<String>) -> Self {
        Self::new(SectionStart::At(offset), first, last)
    }

    /// Section starting `n` bytes before the current position
    pub fn back(n: usize, first: impl Into<String>, last: impl Into<String>) -> Self {
        Self::new(SectionStart::Back(n), first, last)
    }

    /// Section continuing from the current position
    pub fn here(first: impl Into<String>, last: impl Into<String>) -> Self {
        Self::new(SectionStart::Here, first, last)
    }

    fn new(start: SectionStart, first: impl Into<String>, last: impl Into<String>) -> Self {
        Self {
            start,
            first: first.into(),
            last: last.into(),
        }
    }
}

/// Options for one jumbled decode call
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    /// Report which declared fields and bytes the sections covered
    pub diagnostics: bool,
}

impl DecodeOptions {
    /// Creates options with diagnostics off
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables the coverage report
    pub fn diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }
}

/// Declared fields and bytes consumed by one section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsedRange {
    /// Declaration indices
    pub fields: Range<usize>,
    /// Byte offsets
    pub bytes: Range<usize>,
    /// Name of the first field
    pub first: String,
    /// Name of the last field
    pub last: String,
}

/// Declared fields no section covered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissedRange {
    /// Declaration indices
    pub fields: Range<usize>,
    /// End of the section covering the preceding field, if any
    pub from: Option<usize>,
    /// Start of the section covering the following field, if any
    pub to: Option<usize>,
    /// Name of the first field
    pub first: String,
    /// Name of the last field
    pub last: String,
}

/// Section coverage of one decoded record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Coverage {
    /// Sections in the order they were read
    pub used: Vec<UsedRange>,
    /// Gaps in declaration order
    pub missed: Vec<MissedRange>,
}

impl Coverage {
    fn new(schema: &Schema, used: Vec<UsedRange>) -> Self {
        let mut sorted: Vec<&UsedRange> = used.iter().collect();
        sorted.sort_by_key(|u| (u.fields.start, u.fields.end));

        let ends_at = |index: usize| {
            sorted
                .iter()
                .find(|u| u.fields.end == index)
                .map(|u| u.bytes.end)
        };
        let gap = |fields: Range<usize>, to: Option<usize>| MissedRange {
            from: ends_at(fields.start),
            to,
            first: schema.fields()[fields.start].name.clone(),
            last: schema.fields()[fields.end - 1].name.clone(),
            fields,
        };

        let mut missed = Vec::new();
        let mut next = 0;
        for u in &sorted {
            if u.fields.start > next {
                missed.push(gap(next..u.fields.start, Some(u.bytes.start)));
            }
            next = next.max(u.fields.end);
        }
        if next < schema.len() {
            missed.push(gap(next..schema.len(), None));
        }

        Self { used, missed }
    }
}

struct Row<'a>(&'a dyn fmt::Display, &'a dyn fmt::Display, &'a dyn fmt::Display);

fn opt(value: Option<usize>) -> String {
    value.map_or_else(|| "?".to_string(), |v| v.to_string())
}

fn row(
    f: &mut fmt::Formatter<'_>,
    Row(from, to, bytes): Row<'_>,
    fields: &Range<usize>,
    first: &str,
    last: &str,
) -> fmt::Result {
    writeln!(
        f,
        "{:>6} {:>6} {:>6} {:>4} {:>4} {:>4} {:25} {:25}",
        from,
        to,
        bytes,
        fields.start,
        fields.end - 1,
        fields.len(),
        first,
        last
    )
}

impl fmt::Display for Coverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = format!(
            "{:>6} {:>6} {:>6} {:>4} {:>4} {:>4} {:25} {:25}",
            "From", "To", "Bytes", "M1", "M2", "Mbrs", "StartField", "EndField"
        );
        writeln!(f, "Used:")?;
        writeln!(f, "{header}")?;
        for u in &self.used {
            let len = u.bytes.len();
            row(
                f,
                Row(&u.bytes.start, &u.bytes.end, &len),
                &u.fields,
                &u.first,
                &u.last,
            )?;
        }
        writeln!(f, "Missed:")?;
        writeln!(f, "{header}")?;
        for m in &self.missed {
            let (from, to) = (opt(m.from), opt(m.to));
            row(f, Row(&from, &to, &"?"), &m.fields, &m.first, &m.last)?;
        }
        Ok(())
    }
}

/// A record decoded from sections, plus its coverage when requested
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// The record, in declaration order
    pub record: DecodedRecord,
    /// Section coverage, present when diagnostics were enabled
    pub coverage: Option<Coverage>,
}

/// Decodes a record from explicitly placed field groups.
#[derive(Debug, Clone, Copy)]
pub struct JumbledDecoder<'s> {
    schema: &'s Schema,
    options: DecodeOptions,
}

impl<'s> JumbledDecoder<'s> {
    /// Creates a decoder for one schema
    pub fn new(schema: &'s Schema) -> Self {
        Self {
            schema,
            options: DecodeOptions::default(),
        }
    }

    /// Replaces the decode options
    pub fn with_options(mut self, options: DecodeOptions) -> Self {
        self.options = options;
        self
    }

    /// The schema sections are sliced from
    pub fn schema(&self) -> &'s Schema {
        self.schema
    }

    /// Decode one record from `data`.
    ///
    /// Each section seeks, then reads its declared field run in order. Values
    /// are merged by field, so a later section re-reading a field replaces
    /// the earlier value.
    pub fn decode_one(&self, data: &[u8], sections: &[Section]) -> Result<Decoded> {
        let mut cursor = Cursor::new(data);
        let mut values: BTreeMap<usize, Value> = BTreeMap::new();
        let mut used = Vec::with_capacity(sections.len());

        for section in sections {
            match section.start {
                SectionStart::At(offset) => cursor.seek(offset)?,
                SectionStart::Back(n) => cursor.seek_relative(-(n as i64))?,
                SectionStart::Here => {}
            }
            let fields = self.schema.range(&section.first, &section.last)?;
            let begin = cursor.pos();
            let run = &self.schema.fields()[fields.clone()];
            decode_fields(run, &mut cursor, None, |field, value| {
                values.insert(field.index, value);
            })?;
            let end = cursor.pos();
            trace!(
                "section {}..{} read {}..={} ({} fields)",
                begin,
                end,
                section.first,
                section.last,
                fields.len()
            );
            used.push(UsedRange {
                fields,
                bytes: begin..end,
                first: section.first.clone(),
                last: section.last.clone(),
            });
        }

        let record = DecodedRecord::from_fields(
            values
                .into_iter()
                .map(|(index, value)| (self.schema.fields()[index].name.clone(), value))
                .collect(),
        );

        let coverage = self.options.diagnostics.then(|| {
            let coverage = Coverage::new(self.schema, used);
            debug!("section coverage:\n{}", coverage);
            coverage
        });

        Ok(Decoded { record, coverage })
    }
}
