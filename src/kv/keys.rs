//! Canonical key forms.
//!
//! Keys are built so a lexicographic prefix scan gives the right iteration
//! order for each use (e.g. scanning all terms of a field in an index).

pub fn index_key(index: &str) -> String {
    format!("index:{index}")
}

pub fn index_scan_prefix() -> &'static str {
    "index:"
}

pub fn doc_key(index: &str, doc_id: &str) -> String {
    format!("doc:{index}:{doc_id}")
}

pub fn doc_scan_prefix(index: &str) -> String {
    format!("doc:{index}:")
}

pub fn term_key(index: &str, field: &str, term: &str) -> String {
    format!("term:{index}:{field}:{term}")
}

pub fn term_scan_prefix(index: &str, field: &str) -> String {
    format!("term:{index}:{field}:")
}

pub fn stats_key(index: &str, name: &str) -> String {
    format!("stats:{index}:{name}")
}

pub fn stats_scan_prefix(index: &str) -> String {
    format!("stats:{index}:")
}

pub fn term_list_key(index: &str) -> String {
    format!("term_list:{index}")
}

/// Maps the numeric doc id posting lists key on back to the original
/// external string doc id, so hydration can fetch the right document body.
pub fn docid_map_key(index: &str, numeric_doc_id: u64) -> String {
    format!("docid_map:{index}:{numeric_doc_id}")
}

pub fn docid_map_scan_prefix(index: &str) -> String {
    format!("docid_map:{index}:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_forms_are_stable() {
        assert_eq!(index_key("books"), "index:books");
        assert_eq!(doc_key("books", "42"), "doc:books:42");
        assert_eq!(term_key("books", "title", "rust"), "term:books:title:rust");
        assert_eq!(stats_key("books", "total_documents"), "stats:books:total_documents");
        assert_eq!(term_list_key("books"), "term_list:books");
    }

    #[test]
    fn test_prefixes_match_their_keys() {
        let key = term_key("books", "title", "rust");
        assert!(key.starts_with(&term_scan_prefix("books", "title")));
    }

    #[test]
    fn test_docid_map_key_matches_its_prefix() {
        let key = docid_map_key("books", 42);
        assert!(key.starts_with(&docid_map_scan_prefix("books")));
    }
}
