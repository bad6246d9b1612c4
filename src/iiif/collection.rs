//! Canonical (v3-shaped) collection model
//!
//! A collection groups lightweight references to manifests. The reference
//! label is a denormalized copy of the manifest's label, maintained by the
//! repository's rename propagation; it can go stale between a manifest
//! update and the propagation write (eventual consistency, not a foreign
//! key). The `manifestId` back-pointer on each reference is how the
//! repository finds references to update or remove.

use serde::{Deserialize, Serialize};

use crate::access::AccessRecord;
use crate::iiif::manifest::{MetadataEntry, RequiredStatement, Thumbnail, PRESENTATION_3_CONTEXT};
use crate::iiif::text::{bilingual, LanguageMap};

/// Lightweight reference to a manifest held in a collection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestRef {
    /// Locator of the referenced manifest (storage locator at rest,
    /// rewritten to an endpoint URL when served)
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Denormalized copy of the manifest label
    #[serde(default, deserialize_with = "crate::iiif::text::lenient")]
    pub label: LanguageMap,
    #[serde(
        default,
        deserialize_with = "crate::iiif::text::lenient_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub summary: Option<LanguageMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<Vec<Thumbnail>>,
    /// Internal cross-reference to the manifest's item id
    #[serde(rename = "manifestId", skip_serializing_if = "Option::is_none")]
    pub manifest_id: Option<String>,
}

impl ManifestRef {
    pub fn new(locator: &str, item_id: &str, label: LanguageMap) -> Self {
        Self {
            id: locator.to_string(),
            kind: "Manifest".to_string(),
            label,
            summary: None,
            thumbnail: None,
            manifest_id: Some(item_id.to_string()),
        }
    }

    /// Whether this reference points at the given item id
    pub fn refers_to(&self, item_id: &str) -> bool {
        match &self.manifest_id {
            Some(id) => id == item_id,
            // Legacy references carry no manifestId; fall back to the locator
            None => self.id.contains(item_id),
        }
    }
}

/// Auth service descriptor attached to private collections
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionService {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub kind: String,
    pub profile: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Public collection document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Collection {
    #[serde(rename = "@context")]
    pub context: serde_json::Value,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(deserialize_with = "crate::iiif::text::lenient")]
    pub label: LanguageMap,
    #[serde(
        default,
        deserialize_with = "crate::iiif::text::lenient_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub summary: Option<LanguageMap>,
    pub items: Vec<ManifestRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Vec<MetadataEntry>>,
    #[serde(rename = "requiredStatement", skip_serializing_if = "Option::is_none")]
    pub required_statement: Option<RequiredStatement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<Vec<CollectionService>>,
}

/// Stored form: public collection plus the internal access record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredCollection {
    #[serde(flatten)]
    pub collection: Collection,

    #[serde(rename = "x-access", skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessRecord>,
}

impl StoredCollection {
    /// Build a fresh collection document around its storage locator.
    pub fn new(
        locator: &str,
        owner: &str,
        label: LanguageMap,
        summary: Option<LanguageMap>,
        is_public: bool,
        auth_access_url: Option<&str>,
    ) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        let visibility = if is_public {
            ("公開", "Public")
        } else {
            ("非公開", "Private")
        };

        let metadata = vec![
            MetadataEntry::bilingual("作成日", "Created", &now, &now),
            MetadataEntry::bilingual("公開設定", "Visibility", visibility.0, visibility.1),
        ];

        // Private collections advertise where to authenticate
        let service = match (is_public, auth_access_url) {
            (false, Some(url)) => Some(vec![CollectionService {
                id: url.to_string(),
                kind: "AuthCookieService1".to_string(),
                profile: "http://iiif.io/api/auth/1/login".to_string(),
                label: Some("Login Required".to_string()),
                description: Some("This collection requires authentication".to_string()),
            }]),
            _ => None,
        };

        Self {
            collection: Collection {
                context: serde_json::Value::String(PRESENTATION_3_CONTEXT.to_string()),
                id: locator.to_string(),
                kind: "Collection".to_string(),
                label,
                summary,
                items: Vec::new(),
                metadata: Some(metadata),
                required_statement: None,
                service,
            },
            access: Some(AccessRecord::new(owner, is_public)),
        }
    }

    /// Strip the internal envelope before the document leaves the service
    pub fn into_public(self) -> Collection {
        self.collection
    }

    /// Stamp (or refresh) the `Updated` system metadata entry
    pub fn touch_updated(&mut self) {
        let now = chrono::Utc::now().to_rfc3339();
        let updated = MetadataEntry::bilingual("更新日", "Updated", &now, &now);

        let metadata = self.collection.metadata.get_or_insert_with(Vec::new);
        match metadata.iter_mut().find(|m| m.has_label("更新日", "Updated")) {
            Some(entry) => *entry = updated,
            None => metadata.push(updated),
        }
    }

    /// Append a manifest reference (denormalized label cache entry)
    pub fn add_item(&mut self, reference: ManifestRef) {
        self.collection.items.push(reference);
        self.touch_updated();
    }

    /// Propagate a manifest rename into the reference cache.
    /// Returns whether a reference was updated.
    pub fn rename_item(&mut self, item_id: &str, label: LanguageMap) -> bool {
        let mut renamed = false;
        for item in &mut self.collection.items {
            if item.refers_to(item_id) {
                item.label = label.clone();
                renamed = true;
            }
        }
        if renamed {
            self.touch_updated();
        }
        renamed
    }

    /// Drop the reference to a deleted manifest.
    /// Returns whether a reference was removed.
    pub fn remove_item(&mut self, item_id: &str) -> bool {
        let before = self.collection.items.len();
        self.collection.items.retain(|item| !item.refers_to(item_id));
        let removed = self.collection.items.len() != before;
        if removed {
            self.touch_updated();
        }
        removed
    }

    pub fn owner(&self) -> Option<&str> {
        self.access.as_ref().map(|a| a.owner.as_str())
    }

    pub fn is_public(&self) -> bool {
        self.access.as_ref().map(|a| a.is_public).unwrap_or(true)
    }
}

/// Default bilingual label used when none is supplied
pub fn default_label() -> LanguageMap {
    bilingual("コレクション", "Collection")
}
