//! Parsed-message representation: a flat scalar map (first occurrence of
//! each tag) plus an indexed repeating-group view keyed by synthesized
//! `"tag.index"` strings, built without a per-message-type schema.

use std::collections::HashMap;

/// Count tags that introduce a FIX repeating group in messages this engine
/// sends or receives.
pub const GROUP_COUNT_TAGS: &[u32] = &[146, 267, 268, 453, 73, 393];

/// A single parsed FIX message: the scalar (first-occurrence) view plus the
/// indexed repeating-group view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedMessage {
    /// tag -> value, first occurrence only.
    fields: HashMap<u32, String>,
    /// "tag.index" -> value for fields that occurred while a repeating
    /// group was in scope (see `Codec::parse`).
    indexed: HashMap<String, String>,
    /// count tag -> declared entry count (e.g. 268 -> NoMDEntries value).
    group_counts: HashMap<u32, usize>,
}

impl ParsedMessage {
    pub(crate) fn new(
        fields: HashMap<u32, String>,
        indexed: HashMap<String, String>,
        group_counts: HashMap<u32, usize>,
    ) -> Self {
        Self {
            fields,
            indexed,
            group_counts,
        }
    }

    /// MsgType (tag 35), if present.
    pub fn msg_type(&self) -> Option<&str> {
        self.fields.get(&35).map(String::as_str)
    }

    /// Scalar field lookup: first occurrence of `tag`.
    pub fn get(&self, tag: u32) -> Option<&str> {
        self.fields.get(&tag).map(String::as_str)
    }

    /// Scalar field lookup parsed as `u64`.
    pub fn get_u64(&self, tag: u32) -> Option<u64> {
        self.get(tag).and_then(|v| v.parse().ok())
    }

    /// Declared entry count for a repeating-group count tag (e.g. 268).
    pub fn group_count(&self, count_tag: u32) -> usize {
        self.group_counts.get(&count_tag).copied().unwrap_or(0)
    }

    /// Indexed repeating-group member lookup: `tag` at `index` within
    /// whichever group scope produced it. Falls back to the un-indexed
    /// scalar value when `index == 0` and no indexed entry exists, per the
    /// dispatcher's repeating-group extraction rule.
    pub fn indexed(&self, tag: u32, index: usize) -> Option<&str> {
        let key = format!("{tag}.{index}");
        if let Some(v) = self.indexed.get(&key) {
            return Some(v.as_str());
        }
        if index == 0 {
            return self.get(tag);
        }
        None
    }

    /// Iterate `[0, count)` for `count_tag`, yielding the index and a lookup
    /// closure bound to that index — the pattern the dispatcher uses to pull
    /// a group entry's member tags and stop early on a missing primary key.
    pub fn group_entries(&self, count_tag: u32) -> impl Iterator<Item = usize> {
        0..self.group_count(count_tag)
    }

    pub fn has_poss_dup(&self) -> bool {
        self.get(43) == Some("Y")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_to_scalar_at_index_zero() {
        let mut fields = HashMap::new();
        fields.insert(55u32, "OGDC".to_string());
        let msg = ParsedMessage::new(fields, HashMap::new(), HashMap::new());
        assert_eq!(msg.indexed(55, 0), Some("OGDC"));
        assert_eq!(msg.indexed(55, 1), None);
    }

    #[test]
    fn group_entries_iterates_declared_count() {
        let mut counts = HashMap::new();
        counts.insert(268u32, 2);
        let msg = ParsedMessage::new(HashMap::new(), HashMap::new(), counts);
        let idxs: Vec<usize> = msg.group_entries(268).collect();
        assert_eq!(idxs, vec![0, 1]);
    }
}
