//! Block and resource database extraction.
//!
//! The two game tables live in behaviour payloads of the same container
//! directory. The resource table is a plain run of records and is walked with
//! the [`SequentialDecoder`]; the block table is jumbled and goes through
//! [`RecordDiscovery`] with a [`BlockLocator`]. Block records then have their
//! resource references resolved against the resource table.

mod locator;
mod trim;

use crate::container::{Container, PathFilter};
use crate::error::{Error, Result};
use crate::record::{
    Coverage, DecodeOptions, DecodedRecord, DiscoveryConfig, JumbledDecoder, RecordDiscovery,
    SequentialDecoder, SkippedRecord,
};
use crate::schema::{Schema, SchemaBuilder, Value};
use bytes::Bytes;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub use locator::BlockLocator;
pub use trim::{trim, TrimStats};

/// Where the tables live and how their payloads are laid out
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path id of the block table
    pub block_path_id: u64,
    /// Path id of the resource table
    pub resource_path_id: u64,
    /// Behaviour name of the block table
    pub block_table: String,
    /// Behaviour name of the resource table
    pub resource_table: String,
    /// Payload offset of the first resource record
    pub resource_first_offset: usize,
    /// String found once near the tail of every block record
    pub marker: Vec<u8>,
    /// Marker occurrences closer than this belong to one block
    pub cluster_threshold: usize,
    /// Extra type names serialized as object references
    pub asset_ref_aliases: Vec<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            block_path_id: 21222,
            resource_path_id: 21225,
            block_table: "blockDB_current".to_string(),
            resource_table: "resourceDB".to_string(),
            resource_first_offset: 248,
            marker: b"oneAdjacentNeighbor".to_vec(),
            cluster_threshold: 256,
            asset_ref_aliases: vec!["Manager".to_string()],
        }
    }
}

impl DatabaseConfig {
    /// Creates a config for the supported game build
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the block and resource path ids
    pub fn path_ids(mut self, block: u64, resource: u64) -> Self {
        self.block_path_id = block;
        self.resource_path_id = resource;
        self
    }

    /// Sets the resource table's first record offset
    pub fn resource_first_offset(mut self, offset: usize) -> Self {
        self.resource_first_offset = offset;
        self
    }

    /// Sets the block marker string
    pub fn marker(mut self, marker: impl Into<Vec<u8>>) -> Self {
        self.marker = marker.into();
        self
    }

    /// Sets the marker cluster threshold
    pub fn cluster_threshold(mut self, threshold: usize) -> Self {
        self.cluster_threshold = threshold;
        self
    }

    /// Preload entries worth parsing
    pub fn path_filter(&self) -> PathFilter {
        PathFilter::only([self.block_path_id, self.resource_path_id])
    }

    /// A schema builder knowing the configured reference aliases
    pub fn schema_builder(&self) -> SchemaBuilder {
        self.asset_ref_aliases
            .iter()
            .fold(SchemaBuilder::new(), |builder, alias| builder.asset_ref_alias(alias.as_str()))
    }
}

/// Table payloads gathered across one or more containers
#[derive(Debug, Clone, Default)]
pub struct TableMatches {
    /// Block table payload
    pub blocks: Option<Bytes>,
    /// Resource table payload
    pub resources: Option<Bytes>,
}

impl TableMatches {
    /// Creates an empty match set
    pub fn new() -> Self {
        Self::default()
    }

    /// Take any table still missing from `container`; earlier matches win
    pub fn collect(&mut self, container: &Container, config: &DatabaseConfig) {
        for (path_id, behaviour) in container.behaviours() {
            let slot = if behaviour.name == config.block_table {
                &mut self.blocks
            } else if behaviour.name == config.resource_table {
                &mut self.resources
            } else {
                continue;
            };
            if slot.is_none() {
                debug!(
                    "found table '{}' at path {} ({} bytes)",
                    behaviour.name,
                    path_id,
                    behaviour.payload.len()
                );
                *slot = Some(behaviour.payload.clone());
            }
        }
    }

    /// Whether both tables were found
    pub fn is_complete(&self) -> bool {
        self.blocks.is_some() && self.resources.is_some()
    }

    /// Block and resource payloads, or the name of the first missing table
    pub fn into_tables(self, config: &DatabaseConfig) -> Result<(Bytes, Bytes)> {
        let blocks = self.blocks.ok_or_else(|| Error::TableNotFound {
            name: config.block_table.clone(),
        })?;
        let resources = self.resources.ok_or_else(|| Error::TableNotFound {
            name: config.resource_table.clone(),
        })?;
        Ok((blocks, resources))
    }
}

/// One resource record
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(transparent)]
pub struct ResourceRecord {
    record: DecodedRecord,
}

impl ResourceRecord {
    /// Wraps a decoded record that carries an alias
    pub fn new(record: DecodedRecord) -> Result<Self> {
        record.str("alias")?;
        Ok(Self { record })
    }

    /// Display name blocks refer to
    pub fn alias(&self) -> &str {
        self.record.str("alias").unwrap_or_default()
    }

    /// All decoded fields
    pub fn record(&self) -> &DecodedRecord {
        &self.record
    }
}

/// Resource amounts by alias
pub type Amounts = BTreeMap<String, f64>;

/// A block record with resolved resource references
#[derive(Debug, Clone, PartialEq)]
pub struct BlockRecord {
    record: DecodedRecord,
    header: String,
    name: String,
    category: String,
    connect_upper: [bool; 4],
    /// Consumed resources
    pub inputs: Amounts,
    /// Produced resources
    pub outputs: Amounts,
    /// Optionally consumed resources
    pub optional_inputs: Amounts,
}

/// The resource list fields and their amount lists
const RESOURCE_LISTS: [(&str, &str); 3] = [
    ("inputs", "inputsAmounts"),
    ("outputs", "outputsAmounts"),
    ("optionalInputs", "optionalInputsAmounts"),
];

const CONNECT_UPPER: [&str; 4] = [
    "connectUpperForward",
    "connectUpperBack",
    "connectUpperLeft",
    "connectUpperRight",
];

/// Round a widened single-precision amount back to what was authored
fn round8(value: f32) -> f64 {
    (f64::from(value) * 1e8).round() / 1e8
}

fn resolve(
    record: &DecodedRecord,
    indices: &str,
    amounts: &str,
    resources: &[ResourceRecord],
) -> Result<Amounts> {
    let indices = record.list(indices)?;
    let amounts = record.list(amounts)?;

    indices
        .iter()
        .zip(amounts)
        .map(|(index, amount)| -> Result<(String, f64)> {
            let index = index.as_int().ok_or_else(|| Error::field_kind("resource index", "an integer"))?;
            let amount = amount.as_float().ok_or_else(|| Error::field_kind("resource amount", "a float"))?;
            let resource = usize::try_from(index)
                .ok()
                .and_then(|i| i.checked_sub(1))
                .and_then(|i| resources.get(i))
                .ok_or(Error::UnresolvedResource {
                    index,
                    len: resources.len(),
                })?;
            Ok((resource.alias().to_string(), round8(amount)))
        })
        .collect()
}

impl BlockRecord {
    /// Resolve the resource references of a decoded block.
    ///
    /// Indices are 1-based positions in the resource table as decoded, before
    /// any sorting.
    pub fn new(record: DecodedRecord, resources: &[ResourceRecord]) -> Result<Self> {
        let [inputs, outputs, optional_inputs] = RESOURCE_LISTS
            .map(|(indices, amounts)| resolve(&record, indices, amounts, resources));

        let mut connect_upper = [false; 4];
        for (flag, name) in connect_upper.iter_mut().zip(CONNECT_UPPER) {
            *flag = record.bool(name)?;
        }

        Ok(Self {
            header: record.str("toolTipHeader")?.to_string(),
            name: record.str("myName")?.to_string(),
            category: record.str("category")?.to_string(),
            connect_upper,
            inputs: inputs?,
            outputs: outputs?,
            optional_inputs: optional_inputs?,
            record,
        })
    }

    /// Display header (`toolTipHeader`)
    pub fn header(&self) -> &str {
        &self.header
    }

    /// Internal name (`myName`)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Category enum member
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Forward, back, left and right upper connection flags
    pub fn connect_upper(&self) -> [bool; 4] {
        self.connect_upper
    }

    /// All decoded fields, with references unresolved
    pub fn record(&self) -> &DecodedRecord {
        &self.record
    }

    fn amounts(&self, field: &str) -> Option<&Amounts> {
        match field {
            "inputs" => Some(&self.inputs),
            "outputs" => Some(&self.outputs),
            "optionalInputs" => Some(&self.optional_inputs),
            _ => None,
        }
    }
}

impl Serialize for BlockRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.record.len()))?;
        for (name, value) in self.record.iter() {
            match self.amounts(name) {
                Some(amounts) => map.serialize_entry(name, amounts)?,
                None => map.serialize_entry(name, value)?,
            }
        }
        map.end()
    }
}

/// Both decoded tables
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Database {
    /// Blocks sorted by header
    pub blocks: Vec<BlockRecord>,
    /// Resources sorted by alias
    pub resources: Vec<ResourceRecord>,
    /// Blocks the scan gave up on
    #[serde(skip)]
    pub skipped: Vec<SkippedRecord>,
    /// Decoded blocks whose resource references did not resolve
    #[serde(skip)]
    pub unresolved: usize,
    /// Section coverage per decoded block, when diagnostics were enabled
    #[serde(skip)]
    pub coverage: Vec<Coverage>,
}

/// Decodes both tables with their schemas
#[derive(Debug, Clone)]
pub struct DatabaseDecoder<'s> {
    block_schema: &'s Schema,
    resource_schema: &'s Schema,
    config: DatabaseConfig,
    options: DecodeOptions,
}

impl<'s> DatabaseDecoder<'s> {
    /// Creates a decoder
    pub fn new(block_schema: &'s Schema, resource_schema: &'s Schema, config: DatabaseConfig) -> Self {
        Self {
            block_schema,
            resource_schema,
            config,
            options: DecodeOptions::default(),
        }
    }

    /// Replaces the block decode options
    pub fn with_options(mut self, options: DecodeOptions) -> Self {
        self.options = options;
        self
    }

    /// Decode the resource table in payload order
    pub fn unpack_resources(&self, data: &[u8]) -> Result<Vec<ResourceRecord>> {
        let resources = SequentialDecoder::new(self.resource_schema)
            .decode_all(data, self.config.resource_first_offset)?
            .into_iter()
            .map(ResourceRecord::new)
            .collect::<Result<Vec<_>>>()?;
        info!("unpacked {} resources", resources.len());
        Ok(resources)
    }

    /// Decode the block table against already decoded resources
    pub fn unpack_blocks(&self, data: &[u8], resources: &[ResourceRecord]) -> Result<Database> {
        let locator = BlockLocator::new(self.block_schema, self.config.marker.len())?;
        let discovery = RecordDiscovery::new(
            JumbledDecoder::new(self.block_schema).with_options(self.options),
            locator,
            DiscoveryConfig::new(self.config.marker.clone())
                .cluster_threshold(self.config.cluster_threshold),
        )
        .discover(data)?;

        let mut database = Database {
            skipped: discovery.skipped,
            coverage: discovery.coverage,
            ..Database::default()
        };
        for record in discovery.records {
            if is_known_bad(&record) {
                debug!("dropping known bad block record");
                continue;
            }
            match BlockRecord::new(record, resources) {
                Ok(block) => database.blocks.push(block),
                Err(e) if e.is_recoverable() => {
                    warn!("skipping block: {}", e);
                    database.unresolved += 1;
                }
                Err(e) => return Err(e),
            }
        }
        info!("unpacked {} blocks", database.blocks.len());
        Ok(database)
    }

    /// Decode both tables and sort them for output
    pub fn unpack(&self, block_data: &[u8], resource_data: &[u8]) -> Result<Database> {
        let mut resources = self.unpack_resources(resource_data)?;
        let mut database = self.unpack_blocks(block_data, &resources)?;

        database.blocks.sort_by(|a, b| a.header.cmp(&b.header));
        resources.sort_by(|a, b| a.alias().cmp(b.alias()));
        database.resources = resources;
        Ok(database)
    }
}

/// The one block whose serialized data is inconsistent in the shipped game
fn is_known_bad(record: &DecodedRecord) -> bool {
    record.get("toolTipHeader") == Some(&Value::Str("WETLAND".into()))
        && record.get("myName") == Some(&Value::Str("T Old Cactus".into()))
}
