//! Section placement for block records.
//!
//! Block records serialize their field groups out of declaration order. Every
//! record carries the agent-function list near its tail, and the first entry
//! of that list is the marker string, so the list start sits 8 bytes before
//! the marker (a count and the first string length). From there the groups
//! are found by walking backward:
//!
//! ```text
//! altTexture1 .. myName .. toolTipHeader toolTipContent  name  description
//!  distanceToStreet  inputs .. optionalInputsAmounts  [agent list]
//! ```
//!
//! The name and description are the only strings reliably found by their
//! printable content; everything before them is reached through length
//! prefixes and fixed distances.

use crate::error::{Error, Result};
use crate::record::{Section, SectionLocator};
use crate::scanner::{BoundaryScanner, LocatedStr};
use crate::schema::Schema;
use crate::wire::Cursor;
use tracing::{trace, warn};

/// Distance from the name string back to the `isWalkable` flag
const WALKABLE_BEFORE_NAME: usize = 92;
/// Distance from `myName` back to `blockToCopy`
const COPY_BEFORE_MY_NAME: usize = 24;
/// Distance from the first localized string back to `altTexture1`
const TEXTURES_BEFORE_STRINGS: usize = 80;
/// Bounds on the agent-function count at the anchor
const AGENT_COUNT: std::ops::RangeInclusive<u32> = 1..=20;

/// Python-style `isupper`: at least one cased character and no lowercase ones
pub(crate) fn is_upper(s: &str) -> bool {
    s.chars().any(char::is_uppercase) && !s.chars().any(char::is_lowercase)
}

/// Finds the field-group sections of one block record.
#[derive(Debug, Clone)]
pub struct BlockLocator {
    scanner: BoundaryScanner,
    marker_len: usize,
    strings_before_copy: usize,
}

impl BlockLocator {
    /// Creates a locator for records of `schema` anchored by a marker of
    /// `marker_len` bytes
    pub fn new(schema: &Schema, marker_len: usize) -> Result<Self> {
        let icon = schema.index_of("icon")?;
        let copy = schema.index_of("blockToCopy")?;
        // Fails with EmptyFieldRange if the declared order is not what the
        // backward walk relies on
        schema.range("icon", "blockToCopy")?;

        Ok(Self {
            scanner: BoundaryScanner::new(),
            marker_len,
            strings_before_copy: copy - icon - 1,
        })
    }

    /// Replaces the boundary scanner
    pub fn with_scanner(mut self, scanner: BoundaryScanner) -> Self {
        self.scanner = scanner;
        self
    }

    fn find_by_int(&self, data: &[u8], end: usize, what: &'static str) -> Result<LocatedStr> {
        self.scanner
            .find_by_int(data, end)?
            .ok_or(Error::AnchorNotFound { what, offset: end })
    }
}

fn before(offset: usize, distance: usize, what: &'static str) -> Result<usize> {
    offset
        .checked_sub(distance)
        .ok_or(Error::AnchorNotFound { what, offset })
}

impl SectionLocator for BlockLocator {
    fn accepts(&self, data: &[u8], marker: usize) -> bool {
        let lens = marker.checked_sub(8).and_then(|anchor| {
            let mut cursor = Cursor::at(data, anchor).ok()?;
            Some((cursor.read_u32().ok()?, cursor.read_u32().ok()?))
        });
        match lens {
            Some((count, len)) if len as usize == self.marker_len && AGENT_COUNT.contains(&count) => {
                true
            }
            other => {
                warn!("weird lengths before marker at {}: {:?}", marker, other);
                false
            }
        }
    }

    fn locate(&self, data: &[u8], marker: usize) -> Result<Vec<Section>> {
        let anchor = before(marker, 8, "agent list")?;

        let found = self
            .scanner
            .find_str(data, anchor)?
            .ok_or(Error::AnchorNotFound {
                what: "description",
                offset: anchor,
            })?;

        // An upper-case "description" is really the name, followed by an
        // empty description
        let (name, description_end) = if is_upper(&found.content) {
            let mut cursor = Cursor::at(data, found.end)?;
            let len = cursor.read_u32()?;
            if len != 0 {
                return Err(Error::suspicious(
                    found.end,
                    format!("expected an empty description after '{}', found length {}", found.content, len),
                ));
            }
            let end = found.end + 4;
            (found, end)
        } else {
            let name = self.find_by_int(data, found.start, "name")?;
            (name, found.end)
        };
        trace!("block '{}' at {}, description ends at {}", name.content, name.start, description_end);

        let walkable = before(name.start, WALKABLE_BEFORE_NAME, "isWalkable")?;
        let my_name = self.find_by_int(data, walkable, "myName")?;
        let block_to_copy = before(my_name.start, COPY_BEFORE_MY_NAME, "blockToCopy")?;

        let mut strings_start = block_to_copy;
        for _ in 0..self.strings_before_copy {
            strings_start = self.find_by_int(data, strings_start, "localized string")?.start;
        }
        let textures = before(strings_start, TEXTURES_BEFORE_STRINGS, "altTexture1")?;

        Ok(vec![
            Section::at(textures, "altTexture1", "toolTipContent"),
            Section::at(description_end + 8, "distanceToStreet", "distanceToStreet"),
            Section::at(description_end + 16, "inputs", "optionalInputsAmounts"),
            Section::at(anchor, "allAgentFunctionsString", "needsAccessToProduce"),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaBuilder;

    #[test]
    fn test_is_upper() {
        assert!(is_upper("WETLAND"));
        assert!(is_upper("CANAL BRIDGE 2"));
        assert!(!is_upper("Wetland"));
        assert!(!is_upper("1234 --"));
        assert!(!is_upper(""));
    }

    const MINI: &str = "
public class Mini
{
    public int a;
    public Sprite icon;
    public string s1;
    public string s2;
    public int blockToCopy;
}
";

    #[test]
    fn test_walk_count_from_schema() {
        let schema = SchemaBuilder::new().build(MINI).unwrap();
        let locator = BlockLocator::new(&schema, 19).unwrap();
        assert_eq!(locator.strings_before_copy, 2);
    }

    #[test]
    fn test_requires_anchor_fields() {
        let schema = SchemaBuilder::new()
            .build("public class T\n{\n    public int a;\n}\n")
            .unwrap();
        assert!(matches!(
            BlockLocator::new(&schema, 19),
            Err(Error::UnknownField { .. })
        ));
    }

    #[test]
    fn test_accepts_checks_lengths() {
        let schema = SchemaBuilder::new().build(MINI).unwrap();
        let locator = BlockLocator::new(&schema, 6).unwrap();

        let mut data = Vec::new();
        data.extend(3u32.to_le_bytes());
        data.extend(6u32.to_le_bytes());
        data.extend(b"MARKER");
        assert!(locator.accepts(&data, 8));

        data[0..4].copy_from_slice(&21u32.to_le_bytes());
        assert!(!locator.accepts(&data, 8));
        assert!(!locator.accepts(&data, 4));
    }
}
