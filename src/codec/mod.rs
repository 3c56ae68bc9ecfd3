//! Wire codec for posting lists and documents.
//!
//! Version-tagged, length-framed records with optional `snap` compression.
//! Records above `compression_threshold` are compressed before the size cap
//! is enforced, so the cap always applies to the decompressed size.

use crate::error::{Result, SearchError};
use crate::postings::PostingList;

/// Current wire format version. Bumped whenever the framing or the posting
/// list's on-disk shape changes incompatibly.
const FORMAT_VERSION: u8 = 1;

const FLAG_COMPRESSED: u8 = 0b0000_0001;

/// Marks a record as a sentinel written in place of a document that was
/// rejected for exceeding `max_record_size`, rather than the document's own
/// encoded bytes.
const FLAG_SENTINEL: u8 = 0b0000_0010;

/// Encode a posting list for storage, compressing it first if it exceeds
/// `compression_threshold` bytes in its uncompressed form.
pub fn encode_posting_list(
    list: &PostingList,
    compression_threshold: usize,
    max_record_size: usize,
) -> Result<Vec<u8>> {
    let raw = list.serialize_compact()?;
    encode_record(&raw, compression_threshold, max_record_size)
}

pub fn decode_posting_list(buf: &[u8], max_record_size: usize) -> Result<PostingList> {
    let raw = decode_record(buf, max_record_size)?;
    PostingList::deserialize_compact(&raw)
}

/// Encode a document (already serialized to JSON bytes by the caller) with
/// the same framing and compression rules, enforcing the size cap as
/// `DocumentTooLarge` rather than `CorruptRecord`.
pub fn encode_document(json_bytes: &[u8], compression_threshold: usize, max_record_size: usize) -> Result<Vec<u8>> {
    if json_bytes.len() > max_record_size {
        return Err(SearchError::DocumentTooLarge(format!(
            "document is {} bytes, exceeds max_record_size of {} bytes",
            json_bytes.len(),
            max_record_size
        )));
    }
    encode_record(json_bytes, compression_threshold, max_record_size)
}

pub fn decode_document(buf: &[u8], max_record_size: usize) -> Result<Vec<u8>> {
    decode_record(buf, max_record_size)
}

/// Builds the minimal marker record written at a document's key when its
/// real content was rejected by `encode_document` for being too large. Holds
/// just the rejection reason, so it always fits well under `max_record_size`
/// regardless of how big the real document was.
pub fn encode_sentinel_document(reason: &str, max_record_size: usize) -> Result<Vec<u8>> {
    let payload = reason.as_bytes();
    let mut out = Vec::with_capacity(2 + payload.len());
    out.push(FORMAT_VERSION);
    out.push(FLAG_SENTINEL);
    out.extend_from_slice(payload);
    if out.len() > max_record_size {
        return Err(SearchError::DocumentTooLarge(
            "rejection reason itself exceeds max_record_size".into(),
        ));
    }
    Ok(out)
}

/// True if `buf` is a sentinel record written by `encode_sentinel_document`
/// rather than an actual encoded document.
pub fn is_sentinel_document(buf: &[u8]) -> bool {
    buf.len() >= 2 && buf[1] & FLAG_SENTINEL != 0
}

/// The rejection reason held by a sentinel record, if `buf` is one.
pub fn sentinel_reason(buf: &[u8]) -> Option<String> {
    if is_sentinel_document(buf) {
        Some(String::from_utf8_lossy(&buf[2..]).into_owned())
    } else {
        None
    }
}

fn encode_record(raw: &[u8], compression_threshold: usize, max_record_size: usize) -> Result<Vec<u8>> {
    if raw.len() > max_record_size {
        return Err(SearchError::DocumentTooLarge(format!(
            "record is {} bytes, exceeds max_record_size of {} bytes",
            raw.len(),
            max_record_size
        )));
    }

    let (payload, flags) = if raw.len() >= compression_threshold {
        let compressed = snap::raw::Encoder::new()
            .compress_vec(raw)
            .map_err(|e| SearchError::Serialization(format!("snap compress error: {e}")))?;
        (compressed, FLAG_COMPRESSED)
    } else {
        (raw.to_vec(), 0u8)
    };

    let mut out = Vec::with_capacity(2 + payload.len());
    out.push(FORMAT_VERSION);
    out.push(flags);
    out.extend_from_slice(&payload);
    Ok(out)
}

fn decode_record(buf: &[u8], max_record_size: usize) -> Result<Vec<u8>> {
    if buf.len() < 2 {
        return Err(SearchError::CorruptRecord("record shorter than header".into()));
    }

    let version = buf[0];
    if version != FORMAT_VERSION {
        return Err(SearchError::CorruptRecord(format!(
            "unsupported record version {version}, expected {FORMAT_VERSION}"
        )));
    }

    let flags = buf[1];
    let payload = &buf[2..];

    let raw = if flags & FLAG_COMPRESSED != 0 {
        snap::raw::Decoder::new()
            .decompress_vec(payload)
            .map_err(|e| SearchError::CorruptRecord(format!("snap decompress error: {e}")))?
    } else {
        payload.to_vec()
    };

    if raw.len() > max_record_size {
        return Err(SearchError::CorruptRecord(format!(
            "decompressed record is {} bytes, exceeds max_record_size of {} bytes",
            raw.len(),
            max_record_size
        )));
    }

    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posting_list_roundtrip_uncompressed() {
        let mut list = PostingList::new();
        list.add(1, 1, None);
        list.add(2, 3, None);

        let encoded = encode_posting_list(&list, 1_000_000, 10_000_000).unwrap();
        let decoded = decode_posting_list(&encoded, 10_000_000).unwrap();
        assert_eq!(decoded.doc_count(), 2);
    }

    #[test]
    fn test_posting_list_roundtrip_compressed() {
        let mut list = PostingList::new();
        for doc_id in 0..5000u64 {
            list.add(doc_id, 1, None);
        }

        let encoded = encode_posting_list(&list, 16, 10_000_000).unwrap();
        assert_eq!(encoded[1] & FLAG_COMPRESSED, FLAG_COMPRESSED);

        let decoded = decode_posting_list(&encoded, 10_000_000).unwrap();
        assert_eq!(decoded.doc_count(), 5000);
    }

    #[test]
    fn test_oversized_document_rejected() {
        let bytes = vec![0u8; 100];
        let result = encode_document(&bytes, 1_000_000, 50);
        assert!(matches!(result, Err(SearchError::DocumentTooLarge(_))));
    }

    #[test]
    fn test_sentinel_document_roundtrip() {
        let sentinel = encode_sentinel_document("document is 100 bytes, exceeds max_record_size of 50 bytes", 1_000).unwrap();
        assert!(is_sentinel_document(&sentinel));
        assert_eq!(sentinel_reason(&sentinel).as_deref(), Some("document is 100 bytes, exceeds max_record_size of 50 bytes"));
    }

    #[test]
    fn test_real_document_is_not_a_sentinel() {
        let encoded = encode_document(b"{\"title\":\"ok\"}", 1_000_000, 1_000_000).unwrap();
        assert!(!is_sentinel_document(&encoded));
        assert_eq!(sentinel_reason(&encoded), None);
    }

    #[test]
    fn test_corrupt_version_byte_rejected() {
        let mut list = PostingList::new();
        list.add(1, 1, None);
        let mut encoded = encode_posting_list(&list, 1_000_000, 10_000_000).unwrap();
        encoded[0] = 0xFF;

        let result = decode_posting_list(&encoded, 10_000_000);
        assert!(matches!(result, Err(SearchError::CorruptRecord(_))));
    }
}
