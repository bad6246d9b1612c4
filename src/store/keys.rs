//! Object-store key layout and combined identifiers
//!
//! Canonical documents live at deterministic paths derived from
//! (owner, collection, item):
//!
//! ```text
//! collections/{owner}/{collection}/collection.json
//! collections/{owner}/{collection}/items/{item}/manifest.json
//! collections/{owner}/{collection}/items/{item}/images/...
//! ```
//!
//! Documents self-reference through `store://{key}` locators; the endpoint
//! layer swaps those for externally addressable URLs. Externally, resources
//! are addressed by combined ids: `{owner}_{collection}_{item}` for
//! manifests, `{owner}_{collection}` for collections (`-` as a fallback
//! delimiter).

use crate::types::{KuraError, Result};

/// Scheme marking an internal storage locator
pub const STORE_SCHEME: &str = "store://";

pub fn collection_key(owner: &str, collection: &str) -> String {
    format!("collections/{}/{}/collection.json", owner, collection)
}

pub fn manifest_key(owner: &str, collection: &str, item: &str) -> String {
    format!("collections/{}/{}/items/{}/manifest.json", owner, collection, item)
}

/// Prefix under which every key of one item lives (recursive delete root)
pub fn item_prefix(owner: &str, collection: &str, item: &str) -> String {
    format!("collections/{}/{}/items/{}/", owner, collection, item)
}

/// Prefix enumerating a collection's items (delimiter listing groups by item id)
pub fn items_prefix(owner: &str, collection: &str) -> String {
    format!("collections/{}/{}/items/", owner, collection)
}

/// Prefix under which every key of one collection lives
pub fn collection_prefix(owner: &str, collection: &str) -> String {
    format!("collections/{}/{}/", owner, collection)
}

/// Prefix enumerating an owner's collections
pub fn collections_prefix(owner: &str) -> String {
    format!("collections/{}/", owner)
}

/// Internal locator for a key
pub fn locator(key: &str) -> String {
    format!("{}{}", STORE_SCHEME, key)
}

/// Key behind an internal locator, if it is one
pub fn locator_key(locator: &str) -> Option<&str> {
    locator.strip_prefix(STORE_SCHEME)
}

pub fn combined_manifest_id(owner: &str, collection: &str, item: &str) -> String {
    format!("{}_{}_{}", owner, collection, item)
}

pub fn combined_collection_id(owner: &str, collection: &str) -> String {
    format!("{}_{}", owner, collection)
}

/// Split a combined id into exactly `expected` parts.
///
/// `_`-delimited ids are preferred; ids without underscores fall back to
/// `-` delimiting. Any other part count is a format error, rejected at the
/// boundary.
pub fn split_combined_id(id: &str, expected: usize) -> Result<Vec<&str>> {
    let parts: Vec<&str> = if id.contains('_') {
        id.split('_').collect()
    } else {
        id.split('-').collect()
    };

    if parts.len() != expected || parts.iter().any(|p| p.is_empty()) {
        return Err(KuraError::BadRequest(format!(
            "Invalid combined id {:?}: expected {} parts",
            id, expected
        )));
    }

    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(
            collection_key("u1", "c1"),
            "collections/u1/c1/collection.json"
        );
        assert_eq!(
            manifest_key("u1", "c1", "i1"),
            "collections/u1/c1/items/i1/manifest.json"
        );
        assert!(manifest_key("u1", "c1", "i1").starts_with(&item_prefix("u1", "c1", "i1")));
        assert!(item_prefix("u1", "c1", "i1").starts_with(&items_prefix("u1", "c1")));
        assert!(items_prefix("u1", "c1").starts_with(&collection_prefix("u1", "c1")));
        assert!(collection_prefix("u1", "c1").starts_with(&collections_prefix("u1")));
    }

    #[test]
    fn test_locator_roundtrip() {
        let key = manifest_key("u1", "c1", "i1");
        let loc = locator(&key);
        assert!(loc.starts_with("store://"));
        assert_eq!(locator_key(&loc), Some(key.as_str()));
        assert_eq!(locator_key("https://example.org/x"), None);
    }

    #[test]
    fn test_split_combined_id_underscore() {
        let parts = split_combined_id("u1_c1_i1", 3).unwrap();
        assert_eq!(parts, vec!["u1", "c1", "i1"]);
    }

    #[test]
    fn test_split_combined_id_hyphen_fallback() {
        let parts = split_combined_id("u1-c1", 2).unwrap();
        assert_eq!(parts, vec!["u1", "c1"]);

        // Underscores take precedence over hyphens
        let parts = split_combined_id("u-1_c1_i1", 3).unwrap();
        assert_eq!(parts, vec!["u-1", "c1", "i1"]);
    }

    #[test]
    fn test_split_combined_id_rejects_wrong_arity() {
        assert!(split_combined_id("u1_c1", 3).is_err());
        assert!(split_combined_id("u1_c1_i1_x", 3).is_err());
        assert!(split_combined_id("", 3).is_err());
        assert!(split_combined_id("u1__i1", 3).is_err());
    }
}
