/// Output classification and per-address aggregation.

use std::collections::HashMap;
use crate::types::{AddrValue, OutputEntry, OutputKind};

/// Returns false for outputs that never credit a recipient
/// (`nonstandard` and `nulldata` scripts).
pub fn has_valid_outs(output: &OutputEntry) -> bool {
    is_countable(&output.kind)
}

pub fn is_countable(kind: &OutputKind) -> bool {
    match kind {
        OutputKind::Standard(_) => true,
        OutputKind::NonStandard | OutputKind::NullData => false,
    }
}

/// Collapse entries to one per distinct address, summing values.
///
/// Addresses keep the position of their first appearance; coinstake
/// detection compares the leading entries of the input and output sides.
pub fn group_by_addr<I>(entries: I) -> Vec<AddrValue>
where
    I: IntoIterator<Item = AddrValue>,
{
    let mut grouped: Vec<AddrValue> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for entry in entries {
        match index.get(&entry.addr) {
            Some(&pos) => grouped[pos].val += entry.val,
            None => {
                index.insert(entry.addr.clone(), grouped.len());
                grouped.push(entry);
            }
        }
    }

    grouped
}
