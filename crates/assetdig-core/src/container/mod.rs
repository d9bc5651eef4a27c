//! Serialized asset container directory parsing.
//!
//! ## Layout
//!
//! ```text
//! header (big-endian)   u32 directory size, u32 data end, u32 generation,
//!                       u32 data offset, 4 reserved bytes
//! version               NUL-terminated string
//! target (LE)           u32 platform, u8 has base definitions, u32 class count
//! class table           class count x { u32 class id, pad, i16 hint } + skips
//! preload table         u32 count x align4 { u64 path id, u32 offset, u32 size, u32 class index }
//! priority preloads     u32 count x { u32, align4, u64 }
//! shared assets         u32 count x { NUL name, 20 bytes, NUL file name }
//! ```
//!
//! Behaviour payloads start at `data offset + entry offset` with an owner
//! reference, an enabled flag, a script reference and a name, followed by the
//! type-specific bytes this crate decodes elsewhere.

use crate::error::{Error, Result};
use crate::wire::Cursor;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, trace, warn};

/// Class id of script-backed behaviour objects
pub const BEHAVIOUR_CLASS_ID: u32 = 114;

/// Layout constants a container must match
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Serialized file format generation
    pub format_generation: u32,
    /// Engine version string
    pub version: String,
    /// Build target platform id
    pub platform: u32,
    /// Class id of the behaviour kind whose payloads are extracted
    pub behaviour_class_id: u32,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            format_generation: 17,
            version: "5.6.2f1".to_string(),
            platform: 19,
            behaviour_class_id: BEHAVIOUR_CLASS_ID,
        }
    }
}

impl ContainerConfig {
    /// Creates a config with the supported defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the expected format generation
    pub fn format_generation(mut self, generation: u32) -> Self {
        self.format_generation = generation;
        self
    }

    /// Sets the expected engine version
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the expected platform id
    pub fn platform(mut self, platform: u32) -> Self {
        self.platform = platform;
        self
    }
}

/// Fixed container header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Size of the directory (metadata) section
    pub directory_size: u32,
    /// End of the data section
    pub data_end: u32,
    /// Format generation
    pub format_generation: u32,
    /// Start of the data section
    pub data_offset: u32,
    /// Engine version
    pub version: String,
    /// Build target platform
    pub platform: u32,
    /// Whether full type trees are embedded
    pub has_base_definitions: bool,
    /// Number of class table entries
    pub base_class_count: u32,
}

/// One class table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassEntry {
    /// Engine class id
    pub class_id: u32,
    /// The class id itself for base types, otherwise a negative discriminator
    pub type_hint: i32,
}

impl ClassEntry {
    fn new(class_id: u32, raw_hint: i16) -> Self {
        let type_hint = if raw_hint >= 0 {
            -1 - i32::from(raw_hint)
        } else {
            class_id as i32
        };
        Self {
            class_id,
            type_hint,
        }
    }
}

/// One preload table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreloadEntry {
    /// Unique object key
    pub path_id: u64,
    /// Absolute offset of the object in the container
    pub offset: usize,
    /// Object size in bytes
    pub size: usize,
    /// Class of the object
    pub class: ClassEntry,
}

/// A file referenced by objects in this container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedAsset {
    /// Archive name (often empty)
    pub archive_name: String,
    /// Referenced file name
    pub file_name: String,
}

/// Reference to another object, possibly in a shared file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    /// Index into the shared asset table
    pub file_id: u32,
    /// Path id within that file
    pub path_id: u64,
    /// The shared asset `file_id` indexes, when it is in range
    pub shared: Option<SharedAsset>,
}

/// Header and payload of one behaviour object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Behaviour {
    /// Owning game object
    pub owner: ObjectRef,
    /// Script class
    pub script: ObjectRef,
    /// Object name
    pub name: String,
    /// Type-specific bytes after the header
    pub payload: Bytes,
}

/// A retained preload entry and, for behaviours, its decoded header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Directory entry
    pub entry: PreloadEntry,
    /// Present when the entry is an enabled behaviour that parsed cleanly
    pub behaviour: Option<Behaviour>,
}

/// Which preload entries to keep
#[derive(Debug, Clone, Default)]
pub enum PathFilter {
    /// Every entry
    #[default]
    All,
    /// Only these path ids
    Only(BTreeSet<u64>),
}

impl PathFilter {
    /// Filter for a fixed set of path ids
    pub fn only(ids: impl IntoIterator<Item = u64>) -> Self {
        Self::Only(ids.into_iter().collect())
    }

    /// Whether an entry is retained
    pub fn matches(&self, path_id: u64) -> bool {
        match self {
            PathFilter::All => true,
            PathFilter::Only(ids) => ids.contains(&path_id),
        }
    }
}

/// A parsed container directory with extracted behaviour payloads
#[derive(Debug, Clone)]
pub struct Container {
    /// Fixed header
    pub header: ContainerHeader,
    /// Class table
    pub classes: Vec<ClassEntry>,
    /// Shared asset table
    pub shared_assets: Vec<SharedAsset>,
    /// Retained entries by path id
    pub assets: BTreeMap<u64, Asset>,
}

impl Container {
    /// Behaviours in path id order
    pub fn behaviours(&self) -> impl Iterator<Item = (u64, &Behaviour)> {
        self.assets
            .iter()
            .filter_map(|(id, asset)| asset.behaviour.as_ref().map(|b| (*id, b)))
    }

    /// First behaviour with the given name
    pub fn behaviour_named(&self, name: &str) -> Option<&Behaviour> {
        self.behaviours().map(|(_, b)| b).find(|b| b.name == name)
    }
}

/// Parses container directories
#[derive(Debug, Clone, Default)]
pub struct ContainerParser {
    config: ContainerConfig,
}

impl ContainerParser {
    /// Creates a parser for the default layout
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a parser with custom layout constants
    pub fn with_config(config: ContainerConfig) -> Self {
        Self { config }
    }

    /// Parse a whole container held in memory.
    ///
    /// Header mismatches abort the parse. A retained entry whose behaviour
    /// header does not check out is kept without a behaviour.
    pub fn parse(&self, data: &Bytes, filter: &PathFilter) -> Result<Container> {
        let mut cursor = Cursor::new(data);

        let header = self.read_header(&mut cursor)?;
        let classes = self.read_classes(&mut cursor, header.base_class_count)?;
        let entries = read_preload_table(&mut cursor, &classes, header.data_offset, filter)?;
        skip_priority_preloads(&mut cursor)?;
        let shared_assets = read_shared_assets(&mut cursor)?;

        debug!(
            "container {}: {} classes, {} retained entries, {} shared assets",
            header.version,
            classes.len(),
            entries.len(),
            shared_assets.len()
        );

        let mut assets = BTreeMap::new();
        for entry in entries {
            let behaviour = if entry.class.class_id != self.config.behaviour_class_id {
                trace!("path {} is class {}, not a behaviour", entry.path_id, entry.class.class_id);
                None
            } else {
                match read_behaviour(data, &entry, &shared_assets) {
                    Ok(behaviour) => {
                        trace!(
                            "path {}: behaviour '{}' with {} payload bytes",
                            entry.path_id,
                            behaviour.name,
                            behaviour.payload.len()
                        );
                        Some(behaviour)
                    }
                    Err(e) => {
                        warn!("skipping path {}: {}", entry.path_id, e);
                        None
                    }
                }
            };
            assets.insert(entry.path_id, Asset { entry, behaviour });
        }

        Ok(Container {
            header,
            classes,
            shared_assets,
            assets,
        })
    }

    /// Read and parse a container file
    pub fn parse_file(&self, path: impl AsRef<Path>, filter: &PathFilter) -> Result<Container> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| Error::file_read(path, e))?;
        self.parse(&Bytes::from(data), filter)
    }

    fn read_header(&self, cursor: &mut Cursor<'_>) -> Result<ContainerHeader> {
        let directory_size = cursor.read_u32_be()?;
        let data_end = cursor.read_u32_be()?;
        let format_generation = cursor.read_u32_be()?;
        let data_offset = cursor.read_u32_be()?;
        cursor.skip(4)?;

        if format_generation != self.config.format_generation {
            return Err(Error::format_assumption(
                "format generation",
                self.config.format_generation,
                format_generation,
            ));
        }

        let version = cursor.read_cstr()?.to_string();
        if version != self.config.version {
            return Err(Error::format_assumption("version", &self.config.version, version));
        }

        let platform = cursor.read_u32()?;
        if platform != self.config.platform {
            return Err(Error::format_assumption("platform", self.config.platform, platform));
        }

        let has_base_definitions = cursor.read_u8()? != 0;
        if has_base_definitions {
            return Err(Error::format_assumption("base definitions", false, true));
        }
        let base_class_count = cursor.read_u32()?;

        Ok(ContainerHeader {
            directory_size,
            data_end,
            format_generation,
            data_offset,
            version,
            platform,
            has_base_definitions,
            base_class_count,
        })
    }

    fn read_classes(&self, cursor: &mut Cursor<'_>, count: u32) -> Result<Vec<ClassEntry>> {
        (0..count)
            .map(|_| -> Result<ClassEntry> {
                let class_id = cursor.read_u32()?;
                cursor.skip(1)?;
                let entry = ClassEntry::new(class_id, cursor.read_i16()?);
                if class_id == self.config.behaviour_class_id {
                    cursor.skip(16)?;
                }
                cursor.skip(16)?;
                Ok(entry)
            })
            .collect()
    }
}

fn read_preload_table(
    cursor: &mut Cursor<'_>,
    classes: &[ClassEntry],
    data_offset: u32,
    filter: &PathFilter,
) -> Result<Vec<PreloadEntry>> {
    let count = cursor.read_u32()?;
    let mut entries = Vec::new();
    for _ in 0..count {
        cursor.align4()?;
        let path_id = cursor.read_u64()?;
        let offset = cursor.read_u32()?;
        let size = cursor.read_u32()?;
        let index = cursor.read_u32()?;

        let class = *classes.get(index as usize).ok_or_else(|| {
            Error::format_assumption(
                "class index",
                format!("below {}", classes.len()),
                index,
            )
        })?;

        if filter.matches(path_id) {
            entries.push(PreloadEntry {
                path_id,
                offset: offset as usize + data_offset as usize,
                size: size as usize,
                class,
            });
        }
    }
    trace!("preload table: {} entries, {} retained", count, entries.len());
    Ok(entries)
}

fn skip_priority_preloads(cursor: &mut Cursor<'_>) -> Result<()> {
    let count = cursor.read_u32()?;
    for _ in 0..count {
        cursor.skip(4)?;
        cursor.align4()?;
        cursor.skip(8)?;
    }
    Ok(())
}

fn read_shared_assets(cursor: &mut Cursor<'_>) -> Result<Vec<SharedAsset>> {
    let count = cursor.read_u32()?;
    (0..count)
        .map(|_| -> Result<SharedAsset> {
            let archive_name = cursor.read_cstr()?.to_string();
            cursor.skip(20)?;
            let file_name = cursor.read_cstr()?.to_string();
            Ok(SharedAsset {
                archive_name,
                file_name,
            })
        })
        .collect()
}

fn read_object_ref(cursor: &mut Cursor<'_>, shared: &[SharedAsset]) -> Result<ObjectRef> {
    let file_id = cursor.read_u32()?;
    let path_id = cursor.read_u64()?;
    Ok(ObjectRef {
        file_id,
        path_id,
        shared: shared.get(file_id as usize).cloned(),
    })
}

fn read_behaviour(data: &Bytes, entry: &PreloadEntry, shared: &[SharedAsset]) -> Result<Behaviour> {
    let mut cursor = Cursor::at(data, entry.offset)?;

    let owner = read_object_ref(&mut cursor, shared)?;
    if cursor.read_u8()? == 0 {
        return Err(Error::suspicious(entry.offset, "behaviour is disabled"));
    }
    cursor.align4()?;
    let script = read_object_ref(&mut cursor, shared)?;
    let name = cursor.read_prefixed_str()?.to_string();
    cursor.align4()?;

    let consumed = cursor.pos() - entry.offset;
    let remaining = entry.size.checked_sub(consumed).ok_or_else(|| {
        Error::suspicious(
            entry.offset,
            format!("header of {} bytes exceeds object size {}", consumed, entry.size),
        )
    })?;
    let start = cursor.pos();
    cursor.skip(remaining)?;

    Ok(Behaviour {
        owner,
        script,
        name,
        payload: data.slice(start..start + remaining),
    })
}
