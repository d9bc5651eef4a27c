//! Marker-driven segmentation of a jumbled table into records.
//!
//! ## Algorithm Overview
//!
//! 1. Find every occurrence of the marker (a field name string that appears
//!    near the tail of each record)
//! 2. Group occurrences closer than the cluster threshold; each cluster is one
//!    record
//! 3. Drop the first cluster, which precedes the first real record
//! 4. Pick the first occurrence in each cluster the locator accepts as anchor
//! 5. Ask the locator for the record's sections and decode them
//!
//! A record that fails anywhere in steps 4-5 with a recoverable error is
//! logged and skipped; the scan always continues with the next cluster.

use super::{Coverage, DecodedRecord, JumbledDecoder, Section};
use crate::error::Result;
use crate::scanner::{cluster_offsets, find_all};
use tracing::{debug, trace, warn};

/// Places the field-group sections of one record relative to its marker.
///
/// Closures of the shape `Fn(&[u8], usize) -> Result<Vec<Section>>` implement
/// this trait and accept every marker occurrence.
pub trait SectionLocator {
    /// Whether the marker occurrence at `marker` can anchor a record
    fn accepts(&self, data: &[u8], marker: usize) -> bool {
        let _ = (data, marker);
        true
    }

    /// Sections of the record anchored at `marker`
    fn locate(&self, data: &[u8], marker: usize) -> Result<Vec<Section>>;
}

impl<F> SectionLocator for F
where
    F: Fn(&[u8], usize) -> Result<Vec<Section>>,
{
    fn locate(&self, data: &[u8], marker: usize) -> Result<Vec<Section>> {
        self(data, marker)
    }
}

/// Configuration for marker discovery
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Byte string searched for
    pub marker: Vec<u8>,
    /// Occurrences closer than this belong to the same record
    pub cluster_threshold: usize,
}

impl DiscoveryConfig {
    /// Creates a config for a marker with the default threshold of 256 bytes
    pub fn new(marker: impl Into<Vec<u8>>) -> Self {
        Self {
            marker: marker.into(),
            cluster_threshold: 256,
        }
    }

    /// Sets the cluster threshold
    pub fn cluster_threshold(mut self, threshold: usize) -> Self {
        self.cluster_threshold = threshold;
        self
    }
}

/// A record the scan gave up on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    /// First marker offset of the record's cluster
    pub marker: usize,
    /// Why it was skipped
    pub reason: String,
}

/// Outcome of a discovery scan
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Decoded records in payload order
    pub records: Vec<DecodedRecord>,
    /// Coverage of each decoded record, when diagnostics were enabled
    pub coverage: Vec<Coverage>,
    /// Records skipped as suspicious
    pub skipped: Vec<SkippedRecord>,
}

/// Drives a [`JumbledDecoder`] over every record of a payload
#[derive(Debug, Clone)]
pub struct RecordDiscovery<'s, L> {
    decoder: JumbledDecoder<'s>,
    locator: L,
    config: DiscoveryConfig,
}

impl<'s, L: SectionLocator> RecordDiscovery<'s, L> {
    /// Creates a discovery scan
    pub fn new(decoder: JumbledDecoder<'s>, locator: L, config: DiscoveryConfig) -> Self {
        Self {
            decoder,
            locator,
            config,
        }
    }

    /// Marker clusters of `data`, including the leading artifact cluster
    pub fn clusters(&self, data: &[u8]) -> Vec<Vec<usize>> {
        let offsets = find_all(data, &self.config.marker);
        trace!("{} marker occurrences", offsets.len());
        cluster_offsets(&offsets, self.config.cluster_threshold)
    }

    /// Scan `data` and decode every record found.
    ///
    /// Only errors that are not recoverable at a record boundary (such as a
    /// section naming a field the schema lacks) abort the scan.
    pub fn discover(&self, data: &[u8]) -> Result<Discovery> {
        let clusters = self.clusters(data);
        let mut discovery = Discovery::default();

        let Some((artifact, clusters)) = clusters.split_first() else {
            debug!("marker not found");
            return Ok(discovery);
        };
        trace!("dropping leading marker cluster at {:?}", artifact);

        for cluster in clusters {
            let first = cluster[0];
            let Some(&anchor) = cluster.iter().find(|&&m| self.locator.accepts(data, m)) else {
                warn!("no usable marker in cluster at {}: {:?}", first, cluster);
                discovery.skipped.push(SkippedRecord {
                    marker: first,
                    reason: "no marker occurrence passed the consistency check".into(),
                });
                continue;
            };

            let decoded = self
                .locator
                .locate(data, anchor)
                .and_then(|sections| self.decoder.decode_one(data, &sections));
            match decoded {
                Ok(decoded) => {
                    discovery.records.push(decoded.record);
                    discovery.coverage.extend(decoded.coverage);
                }
                Err(e) if e.is_recoverable() => {
                    warn!("skipping suspicious record at {}: {}", anchor, e);
                    discovery.skipped.push(SkippedRecord {
                        marker: first,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        debug!(
            "discovered {} records, skipped {}",
            discovery.records.len(),
            discovery.skipped.len()
        );
        Ok(discovery)
    }
}
