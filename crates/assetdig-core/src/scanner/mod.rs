//! Heuristic scanning of raw record bytes.
//!
//! Some tables cannot be walked front to back because their serialized field
//! order differs from the declared one. The helpers here recover anchors by
//! working backward through the bytes instead:
//!
//! 1. [`BoundaryScanner::find_str`] looks for a run of printable ASCII ending
//!    shortly before an offset, which is almost always the tail of a string
//! 2. [`BoundaryScanner::find_by_int`] steps back over aligned 32-bit words
//!    until one reads as a plausible string length
//! 3. [`find_all`] and [`cluster_offsets`] locate repeated marker strings and
//!    group them into one cluster per record
//!
//! Neither backward search is an error when it comes up empty: callers get
//! `Ok(None)` and decide what that means for the record at hand.

use crate::error::{Error, Result};
use crate::wire::align4;
use tracing::{trace, warn};

/// Bytes considered printable by the run detector (space through `z`)
const PRINTABLE: std::ops::RangeInclusive<u8> = 0x20..=0x7A;

/// A length-prefixed string recovered from raw bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedStr {
    /// Offset of the 32-bit length prefix
    pub start: usize,
    /// End of the string, including alignment padding
    pub end: usize,
    /// Decoded string content
    pub content: String,
}

/// Tuning for the backward searches
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Printable run length that marks string content
    pub min_printable_run: usize,
    /// How far back either search may look
    pub window: usize,
    /// Exclusive upper bound for a plausible string length
    pub max_string_len: u32,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            min_printable_run: 10,
            window: 500,
            max_string_len: 500,
        }
    }
}

impl ScannerConfig {
    /// Creates a new scanner config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the printable run threshold
    pub fn min_printable_run(mut self, run: usize) -> Self {
        self.min_printable_run = run;
        self
    }

    /// Sets the backward search window
    pub fn window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    /// Sets the string length bound
    pub fn max_string_len(mut self, len: u32) -> Self {
        self.max_string_len = len;
        self
    }
}

/// Backward string recovery over a byte buffer
#[derive(Debug, Clone, Default)]
pub struct BoundaryScanner {
    config: ScannerConfig,
}

impl BoundaryScanner {
    /// Creates a new scanner with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new scanner with custom configuration
    pub fn with_config(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Find the string whose printable content ends somewhere before `end`.
    ///
    /// The end of the first sufficiently long printable run (walking
    /// backward) is aligned up to 4 bytes and handed to
    /// [`find_by_int`](Self::find_by_int).
    pub fn find_str(&self, data: &[u8], end: usize) -> Result<Option<LocatedStr>> {
        let end = end.min(data.len());
        let floor = end.saturating_sub(self.config.window.saturating_sub(1));

        let mut run = 0;
        let mut run_end = end;
        let mut found = false;
        for i in (floor..end).rev() {
            if PRINTABLE.contains(&data[i]) {
                run += 1;
                if run >= self.config.min_printable_run {
                    found = true;
                    break;
                }
            } else {
                run = 0;
                run_end = i;
            }
        }

        if !found {
            trace!("no printable run before {}", end);
            return Ok(None);
        }
        self.find_by_int(data, align4(run_end))
    }

    /// Find the length prefix of a string ending at `end`.
    ///
    /// Walks back over 4-byte aligned words starting 8 bytes before `end` and
    /// accepts the first one in `1..max_string_len`. If the declared length
    /// does not account for the distance to `end` (allowing up to 3 padding
    /// bytes), `end` is re-derived from the length.
    pub fn find_by_int(&self, data: &[u8], end: usize) -> Result<Option<LocatedStr>> {
        let Some(first) = end.checked_sub(8) else {
            return Ok(None);
        };

        let mut candidate = None;
        let mut i = first & !3;
        while i + self.config.window > end {
            if let Some(word) = data.get(i..i + 4) {
                let len = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                if 0 < len && len < self.config.max_string_len {
                    candidate = Some((i, len as usize));
                    break;
                }
            }
            if i < 4 {
                break;
            }
            i -= 4;
        }

        let Some((start, len)) = candidate else {
            trace!("no length prefix before {}", end);
            return Ok(None);
        };

        let content_start = start + 4;
        let gap = end as i64 - content_start as i64 - len as i64;
        let end = if (0..4).contains(&gap) {
            end
        } else {
            let corrected = content_start + align4(len);
            warn!(
                "string at {} declares {} bytes but ends {} bytes later; using end {}",
                start,
                len,
                end - content_start,
                corrected
            );
            corrected
        };

        let bytes = data
            .get(content_start..content_start + len)
            .ok_or(Error::UnexpectedEof {
                at: content_start,
                need: len,
                rem: data.len().saturating_sub(content_start),
            })?;
        let content = std::str::from_utf8(bytes)
            .map_err(|_| Error::InvalidUtf8 {
                offset: content_start,
            })?
            .to_owned();

        Ok(Some(LocatedStr {
            start,
            end,
            content,
        }))
    }
}

/// Find a subsequence within a byte slice
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Offsets of every non-overlapping occurrence of `needle`
pub fn find_all(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    let mut offsets = Vec::new();
    if needle.is_empty() {
        return offsets;
    }

    let mut position = 0;
    while let Some(relative) = find_subsequence(&haystack[position..], needle) {
        offsets.push(position + relative);
        position += relative + needle.len();
    }
    offsets
}

/// Group ascending offsets into clusters.
///
/// An offset closer than `threshold` to its predecessor joins the
/// predecessor's cluster; a larger gap starts a new one.
pub fn cluster_offsets(offsets: &[usize], threshold: usize) -> Vec<Vec<usize>> {
    let mut clusters: Vec<Vec<usize>> = Vec::new();
    for &offset in offsets {
        let joins = clusters
            .last()
            .and_then(|cluster| cluster.last())
            .is_some_and(|&prev| offset.saturating_sub(prev) < threshold);
        if !joins {
            clusters.push(Vec::new());
        }
        if let Some(cluster) = clusters.last_mut() {
            cluster.push(offset);
        }
    }
    clusters
}
