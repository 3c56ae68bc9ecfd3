//! Posting lists: which documents contain a term, how often, and where.
//!
//! Built around a single ordered map keyed by doc id so
//! `frequency == positions.len()` holds as an invariant rather than
//! something a later rebuild pass has to restore; delta-encoded doc ids
//! plus parallel frequency/position arrays are the wire representation (see
//! `serialize_compact`).

use crate::error::{Result, SearchError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type DocId = u64;
pub type Position = u32;

/// A single document's occurrences of a term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingEntry {
    pub doc_id: DocId,
    pub frequency: u32,
    pub positions: Vec<Position>,
}

/// Ordered-by-doc-id posting list for one term.
#[derive(Debug, Clone, Default)]
pub struct PostingList {
    entries: BTreeMap<DocId, (u32, Vec<Position>)>,
}

impl PostingList {
    pub fn new() -> Self {
        Self { entries: BTreeMap::new() }
    }

    /// Record an occurrence of the term in `doc_id` at `position` (if
    /// position tracking is enabled for this field). Repeated calls for the
    /// same doc accumulate frequency and positions.
    pub fn add(&mut self, doc_id: DocId, frequency: u32, position: Option<Position>) {
        let entry = self.entries.entry(doc_id).or_insert((0, Vec::new()));
        entry.0 += frequency;
        if let Some(pos) = position {
            entry.1.push(pos);
        }
    }

    pub fn remove_entry(&mut self, doc_id: DocId) {
        self.entries.remove(&doc_id);
    }

    pub fn get_entry(&self, doc_id: DocId) -> Option<PostingEntry> {
        self.entries.get(&doc_id).map(|(freq, positions)| PostingEntry {
            doc_id,
            frequency: *freq,
            positions: positions.clone(),
        })
    }

    pub fn contains(&self, doc_id: DocId) -> bool {
        self.entries.contains_key(&doc_id)
    }

    pub fn term_frequency(&self, doc_id: DocId) -> u32 {
        self.entries.get(&doc_id).map(|(freq, _)| *freq).unwrap_or(0)
    }

    pub fn doc_ids(&self) -> impl Iterator<Item = DocId> + '_ {
        self.entries.keys().copied()
    }

    pub fn iterate(&self) -> impl Iterator<Item = PostingEntry> + '_ {
        self.entries.iter().map(|(&doc_id, (freq, positions))| PostingEntry {
            doc_id,
            frequency: *freq,
            positions: positions.clone(),
        })
    }

    pub fn doc_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge another posting list's entries into this one, summing
    /// frequencies and concatenating positions for shared documents.
    pub fn merge(&mut self, other: &PostingList) {
        for (doc_id, (freq, positions)) in &other.entries {
            let entry = self.entries.entry(*doc_id).or_insert((0, Vec::new()));
            entry.0 += freq;
            entry.1.extend(positions.iter().copied());
        }
    }

    /// Evict the oldest 10% of entries by doc id when the list exceeds
    /// `max_size`. "Oldest" here means lowest doc id, which for
    /// monotonically-assigned ids approximates insertion order.
    pub fn evict_oldest_if_over(&mut self, max_size: usize) -> usize {
        if self.entries.len() <= max_size {
            return 0;
        }
        let evict_count = (self.entries.len() / 10).max(1);
        let to_remove: Vec<DocId> = self.entries.keys().take(evict_count).copied().collect();
        for doc_id in &to_remove {
            self.entries.remove(doc_id);
        }
        to_remove.len()
    }

    /// Compact on-disk representation: a delta-encoded run of doc ids, a
    /// frequency per id, then a position-count-prefixed run of positions
    /// per id (0 count when position tracking was disabled for that entry).
    pub fn serialize_compact(&self) -> Result<Vec<u8>> {
        let doc_ids: Vec<DocId> = self.entries.keys().copied().collect();
        let delta_bytes = delta_encode(&doc_ids);

        let mut buf = Vec::new();
        buf.extend_from_slice(&(doc_ids.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(delta_bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(&delta_bytes);

        for (freq, positions) in self.entries.values() {
            buf.extend_from_slice(&freq.to_le_bytes());
            buf.extend_from_slice(&(positions.len() as u32).to_le_bytes());
            for &pos in positions {
                buf.extend_from_slice(&pos.to_le_bytes());
            }
        }

        Ok(buf)
    }

    pub fn deserialize_compact(buf: &[u8]) -> Result<Self> {
        if buf.len() < 8 {
            return Err(SearchError::CorruptRecord("truncated posting list header".into()));
        }
        let count = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
        let delta_len = u32::from_le_bytes(buf[4..8].try_into().unwrap()) as usize;

        let mut offset = 8;
        if offset + delta_len > buf.len() {
            return Err(SearchError::CorruptRecord("truncated doc id deltas".into()));
        }
        let doc_ids = delta_decode(&buf[offset..offset + delta_len])?;
        if doc_ids.len() != count {
            return Err(SearchError::CorruptRecord(format!(
                "posting list entry count {count} does not match decoded doc id count {}",
                doc_ids.len()
            )));
        }
        offset += delta_len;

        let mut entries = BTreeMap::new();
        for &doc_id in &doc_ids {
            if offset + 8 > buf.len() {
                return Err(SearchError::CorruptRecord("truncated posting list entry".into()));
            }
            let freq = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
            let pos_count = u32::from_le_bytes(buf[offset + 4..offset + 8].try_into().unwrap()) as usize;
            offset += 8;

            let mut positions = Vec::with_capacity(pos_count);
            for _ in 0..pos_count {
                if offset + 4 > buf.len() {
                    return Err(SearchError::CorruptRecord("truncated position list".into()));
                }
                positions.push(u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap()));
                offset += 4;
            }

            entries.insert(doc_id, (freq, positions));
        }

        Ok(PostingList { entries })
    }
}

/// Delta-encode an ascending sequence of doc ids: the first id is stored
/// absolute, every id after it as the difference from its predecessor, each
/// written as a LEB128 varint.
pub fn delta_encode(ids: &[DocId]) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut prev: DocId = 0;
    for (i, &id) in ids.iter().enumerate() {
        let delta = if i == 0 { id } else { id - prev };
        write_varint(&mut buf, delta);
        prev = id;
    }
    buf
}

/// Inverse of `delta_encode`: reconstructs the ascending sequence by
/// prefix-summing the deltas.
pub fn delta_decode(buf: &[u8]) -> Result<Vec<DocId>> {
    let mut ids = Vec::new();
    let mut cursor = 0usize;
    let mut prev: DocId = 0;
    while cursor < buf.len() {
        let (delta, consumed) = read_varint(&buf[cursor..])?;
        cursor += consumed;
        let id = if ids.is_empty() { delta } else { prev + delta };
        ids.push(id);
        prev = id;
    }
    Ok(ids)
}

fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            buf.push(byte | 0x80);
        } else {
            buf.push(byte);
            break;
        }
    }
}

fn read_varint(buf: &[u8]) -> Result<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        if shift >= 64 {
            return Err(SearchError::CorruptRecord("varint too long".into()));
        }
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
        shift += 7;
    }
    Err(SearchError::CorruptRecord("truncated varint".into()))
}

/// Serde wrapper used only for embedding a `PostingList` inside other
/// serde-derived structs (term dictionary chunk snapshots); the compact
/// binary format above is what actually goes to disk for the list itself.
#[derive(Serialize, Deserialize)]
pub struct PostingListSnapshot {
    pub bytes: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_accumulates_frequency_and_positions() {
        let mut list = PostingList::new();
        list.add(1, 1, Some(0));
        list.add(1, 1, Some(5));
        list.add(2, 1, Some(3));

        assert_eq!(list.doc_count(), 2);
        let e1 = list.get_entry(1).unwrap();
        assert_eq!(e1.frequency, 2);
        assert_eq!(e1.positions, vec![0, 5]);
    }

    #[test]
    fn test_frequency_matches_positions_len_invariant() {
        let mut list = PostingList::new();
        list.add(1, 1, Some(0));
        list.add(1, 1, Some(1));
        list.add(1, 1, Some(2));
        let e = list.get_entry(1).unwrap();
        assert_eq!(e.frequency as usize, e.positions.len());
    }

    #[test]
    fn test_merge_sums_frequencies() {
        let mut a = PostingList::new();
        a.add(1, 2, None);
        let mut b = PostingList::new();
        b.add(1, 3, None);
        b.add(2, 1, None);

        a.merge(&b);
        assert_eq!(a.term_frequency(1), 5);
        assert_eq!(a.term_frequency(2), 1);
        assert_eq!(a.doc_count(), 2);
    }

    #[test]
    fn test_roundtrip_compact() {
        let mut list = PostingList::new();
        list.add(1, 1, Some(0));
        list.add(5, 3, Some(1));
        list.add(5, 0, Some(2));

        let bytes = list.serialize_compact().unwrap();
        let decoded = PostingList::deserialize_compact(&bytes).unwrap();

        assert_eq!(decoded.doc_count(), 2);
        assert_eq!(decoded.term_frequency(5), 4);
    }

    #[test]
    fn test_eviction_removes_oldest_ten_percent() {
        let mut list = PostingList::new();
        for doc_id in 0..100u64 {
            list.add(doc_id, 1, None);
        }

        let evicted = list.evict_oldest_if_over(50);
        assert_eq!(evicted, 10);
        assert_eq!(list.doc_count(), 90);
        assert!(!list.contains(0));
        assert!(list.contains(99));
    }

    #[test]
    fn test_no_eviction_under_limit() {
        let mut list = PostingList::new();
        list.add(1, 1, None);
        assert_eq!(list.evict_oldest_if_over(10), 0);
    }

    #[test]
    fn test_delta_roundtrip_ascending_sequence() {
        let ids: Vec<DocId> = vec![0, 1, 4, 9, 1000, 1_000_000];
        let encoded = delta_encode(&ids);
        let decoded = delta_decode(&encoded).unwrap();
        assert_eq!(decoded, ids);
    }

    #[test]
    fn test_delta_roundtrip_empty_sequence() {
        let ids: Vec<DocId> = vec![];
        let encoded = delta_encode(&ids);
        assert!(encoded.is_empty());
        assert_eq!(delta_decode(&encoded).unwrap(), ids);
    }

    #[test]
    fn test_compact_roundtrip_survives_doc_ids_beyond_u32() {
        let mut list = PostingList::new();
        let big_id: DocId = (u32::MAX as DocId) + 1000;
        list.add(big_id, 1, Some(0));

        let bytes = list.serialize_compact().unwrap();
        let decoded = PostingList::deserialize_compact(&bytes).unwrap();

        assert!(decoded.contains(big_id));
        assert_eq!(decoded.term_frequency(big_id), 1);
    }
}
