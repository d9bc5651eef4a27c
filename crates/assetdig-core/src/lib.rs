//! # assetdig-core
//!
//! A library for digging typed records out of serialized game asset containers.
//!
//! This crate provides the core functionality for:
//! - Parsing container directories and extracting behaviour payloads
//! - Building field schemas from declarative type descriptions
//! - Decoding records laid out in declaration order or in jumbled field groups
//! - Recovering record boundaries heuristically when no index exists
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`container`]: Container directory parsing
//! - [`schema`]: Type descriptions, field schemas and value decoders
//! - [`record`]: Sequential and jumbled record decoding, marker discovery
//! - [`scanner`]: Backward string boundary scanning
//! - [`db`]: Block and resource table extraction
//! - [`wire`]: Bounded little-endian cursor
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use assetdig_core::{ContainerParser, DatabaseConfig, DatabaseDecoder, TableMatches};
//!
//! let config = DatabaseConfig::new();
//! let container = ContainerParser::new().parse_file("sharedassets0.assets", &config.path_filter())?;
//!
//! let mut matches = TableMatches::new();
//! matches.collect(&container, &config);
//! let (blocks, resources) = matches.into_tables(&config)?;
//!
//! let mut builder = config.schema_builder();
//! let block_schema = builder.build(&std::fs::read_to_string("Block.cs")?)?;
//! let resource_schema = builder.build(&std::fs::read_to_string("ResourceItem.cs")?)?;
//!
//! let database = DatabaseDecoder::new(&block_schema, &resource_schema, config)
//!     .unpack(&blocks, &resources)?;
//! println!("{} blocks, {} resources", database.blocks.len(), database.resources.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Extensibility
//!
//! - [`SectionLocator`]: Place the field groups of a jumbled record relative
//!   to its marker
//! - [`TypeRegistry`]: Register extra type names before building schemas

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod container;
pub mod db;
pub mod error;
pub mod record;
pub mod scanner;
pub mod schema;
pub mod wire;

// Re-export primary types for convenience
pub use container::{Container, ContainerConfig, ContainerParser, PathFilter};
pub use db::{trim, BlockRecord, Database, DatabaseConfig, DatabaseDecoder, ResourceRecord, TableMatches};
pub use error::{Error, Result};
pub use record::{
    DecodeOptions, DecodedRecord, JumbledDecoder, RecordDiscovery, Section, SectionLocator,
    SequentialDecoder,
};
pub use scanner::{BoundaryScanner, LocatedStr, ScannerConfig};
pub use schema::{Schema, SchemaBuilder, TypeDecoder, TypeRegistry, Value};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
