//! Dropping blocks the player cannot build or that duplicate another block.

use super::BlockRecord;
use std::collections::HashSet;
use tracing::info;

/// Categories that never appear in the build menu
const UNAVAILABLE_CATEGORIES: &[&str] = &["WILD_TILES"];
/// Headers of blocks that never appear in the build menu
const UNAVAILABLE_HEADERS: &[&str] = &["CANAL BRIDGE"];

/// How many blocks [`trim`] removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimStats {
    /// Blocks that cannot be built
    pub unavailable: usize,
    /// Blocks equivalent to an earlier block
    pub equivalent: usize,
}

/// Everything that distinguishes one block from another for planning
type Equivalence = (Vec<(&'static str, String, u64)>, [bool; 4]);

fn equivalence(block: &BlockRecord) -> Equivalence {
    let mut resources: Vec<_> = [
        ("inputs", &block.inputs),
        ("optionalInputs", &block.optional_inputs),
        ("outputs", &block.outputs),
    ]
    .into_iter()
    .flat_map(|(kind, amounts)| {
        amounts
            .iter()
            .map(move |(resource, amount)| (kind, resource.clone(), amount.to_bits()))
    })
    .collect();
    resources.sort();
    (resources, block.connect_upper())
}

/// Remove unavailable blocks, then every block equivalent to an earlier one.
pub fn trim(blocks: &mut Vec<BlockRecord>) -> TrimStats {
    let before = blocks.len();
    blocks.retain(|b| {
        !UNAVAILABLE_CATEGORIES.contains(&b.category()) && !UNAVAILABLE_HEADERS.contains(&b.header())
    });
    let available = blocks.len();

    let mut seen = HashSet::new();
    blocks.retain(|b| seen.insert(equivalence(b)));

    let stats = TrimStats {
        unavailable: before - available,
        equivalent: available - blocks.len(),
    };
    info!(
        "trimmed blocks: {} unavailable, {} equivalent",
        stats.unavailable, stats.equivalent
    );
    stats
}
