//! Repository operations over the document store
//!
//! Maps manifest/collection lifecycle operations onto object-store keys.
//! Partial updates exist only at this layer: every mutation reads the
//! document, edits the in-memory structure and rewrites the whole object.
//! The collection's item references are a denormalized label cache kept in
//! sync on create/rename/delete; a crash between the manifest write and the
//! reference write leaves the cache transiently stale, which readers must
//! tolerate.
//!
//! Bulk operations (listing, recursive delete) continue past individual
//! failures: one unreadable manifest must not take down the rest of a
//! collection.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::access::is_visible_to;
use crate::iiif::collection::{ManifestRef, StoredCollection};
use crate::iiif::geo::{GeoAnnotation, NavPlace};
use crate::iiif::manifest::{ImageInput, MetadataEntry, StoredManifest};
use crate::iiif::text::{display_text, LanguageMap};
use crate::store::{keys, ListPage, ObjectStore};
use crate::types::{KuraError, Result};

/// Repository over an object store
pub struct Repository {
    store: Arc<dyn ObjectStore>,
    page_size: usize,
}

/// Outcome of creating a manifest
#[derive(Debug, Clone)]
pub struct CreatedManifest {
    pub item_id: String,
    pub combined_id: String,
    pub locator: String,
}

/// Outcome of a recursive delete; best-effort, not atomic
#[derive(Debug, Clone, Default)]
pub struct DeleteOutcome {
    pub deleted: usize,
    pub failed: usize,
}

/// Caller-supplied fields for a manifest update (full replace semantics)
#[derive(Debug, Clone, Default)]
pub struct ManifestUpdate {
    pub label: LanguageMap,
    pub summary: Option<LanguageMap>,
    pub images: Vec<ImageInput>,
    pub is_public: bool,
    pub rights: Option<String>,
    pub attribution: Option<String>,
    pub required_statement: Option<crate::iiif::manifest::RequiredStatement>,
    pub homepage: Option<Vec<crate::iiif::manifest::LinkedResource>>,
    pub see_also: Option<Vec<crate::iiif::manifest::LinkedResource>>,
    pub provider: Option<Vec<crate::iiif::manifest::LinkedResource>>,
    pub extra_metadata: Vec<MetadataEntry>,
    pub nav_place: Option<NavPlace>,
    /// Keyed by canvas index
    pub geo_annotations: Option<BTreeMap<String, GeoAnnotation>>,
}

/// Listing row for a collection's items
#[derive(Debug, Clone, serde::Serialize)]
pub struct ItemSummary {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "imageCount")]
    pub image_count: usize,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "isPublic")]
    pub is_public: bool,
    /// Storage locator of the first image, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

/// Listing row for an owner's collections
#[derive(Debug, Clone, serde::Serialize)]
pub struct CollectionSummary {
    pub id: String,
    pub label: LanguageMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<LanguageMap>,
    #[serde(rename = "itemCount")]
    pub item_count: usize,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "isPublic")]
    pub is_public: bool,
}

impl Repository {
    pub fn new(store: Arc<dyn ObjectStore>, page_size: usize) -> Self {
        Self { store, page_size }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    // ------------------------------------------------------------------
    // Raw document IO
    // ------------------------------------------------------------------

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let bytes = match self.store.get(key).await? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| KuraError::Storage(format!("Corrupt document at {}: {}", key, e)))
    }

    async fn write_json<T: Serialize>(&self, key: &str, doc: &T) -> Result<()> {
        let body = serde_json::to_vec_pretty(doc)
            .map_err(|e| KuraError::Internal(format!("Serialize failed for {}: {}", key, e)))?;
        self.store.put(key, Bytes::from(body)).await
    }

    // ------------------------------------------------------------------
    // Collections
    // ------------------------------------------------------------------

    pub async fn get_collection(&self, owner: &str, collection: &str) -> Result<Option<StoredCollection>> {
        self.read_json(&keys::collection_key(owner, collection)).await
    }

    pub async fn put_collection(
        &self,
        owner: &str,
        collection: &str,
        doc: &StoredCollection,
    ) -> Result<()> {
        self.write_json(&keys::collection_key(owner, collection), doc).await
    }

    /// Create a collection document. Fails if one already exists.
    pub async fn create_collection(
        &self,
        owner: &str,
        collection: &str,
        label: LanguageMap,
        summary: Option<LanguageMap>,
        is_public: bool,
        auth_access_url: Option<&str>,
    ) -> Result<StoredCollection> {
        let key = keys::collection_key(owner, collection);
        if self.store.get(&key).await?.is_some() {
            return Err(KuraError::BadRequest(format!(
                "Collection {} already exists",
                collection
            )));
        }

        let doc = StoredCollection::new(
            &keys::locator(&key),
            owner,
            label,
            summary,
            is_public,
            auth_access_url,
        );
        self.write_json(&key, &doc).await?;
        info!(owner = %owner, collection = %collection, "Created collection");
        Ok(doc)
    }

    /// Delete a collection and everything stored under it
    pub async fn delete_collection(&self, owner: &str, collection: &str) -> Result<DeleteOutcome> {
        let outcome = self
            .delete_prefix(&keys::collection_prefix(owner, collection))
            .await?;
        info!(
            owner = %owner,
            collection = %collection,
            deleted = outcome.deleted,
            failed = outcome.failed,
            "Deleted collection"
        );
        Ok(outcome)
    }

    /// List an owner's collections, skipping unreadable ones
    pub async fn list_collections(&self, owner: &str) -> Result<Vec<CollectionSummary>> {
        let prefix = keys::collections_prefix(owner);
        let mut summaries = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .store
                .list(&prefix, Some('/'), cursor.as_deref(), self.page_size)
                .await?;

            for group in &page.common_prefixes {
                let collection_id = match trailing_segment(group) {
                    Some(id) => id,
                    None => continue,
                };
                match self.get_collection(owner, collection_id).await {
                    Ok(Some(doc)) => summaries.push(CollectionSummary {
                        id: collection_id.to_string(),
                        label: doc.collection.label.clone(),
                        summary: doc.collection.summary.clone(),
                        item_count: doc.collection.items.len(),
                        created_at: created_at(doc.collection.metadata.as_deref()),
                        is_public: doc.is_public(),
                    }),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(owner = %owner, collection = %collection_id, error = %e,
                              "Skipping unreadable collection");
                    }
                }
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    /// Collections visible to the caller, per the access predicate
    pub async fn list_collections_for(
        &self,
        owner: &str,
        caller: Option<&str>,
    ) -> Result<Vec<CollectionSummary>> {
        let mut summaries = Vec::new();
        for summary in self.list_collections(owner).await? {
            let doc = self.get_collection(owner, &summary.id).await.ok().flatten();
            let record = doc.as_ref().and_then(|d| d.access.as_ref());
            if is_visible_to(record, caller) {
                summaries.push(summary);
            }
        }
        Ok(summaries)
    }

    // ------------------------------------------------------------------
    // Manifests
    // ------------------------------------------------------------------

    pub async fn get_manifest(
        &self,
        owner: &str,
        collection: &str,
        item: &str,
    ) -> Result<Option<StoredManifest>> {
        self.read_json(&keys::manifest_key(owner, collection, item)).await
    }

    pub async fn put_manifest(
        &self,
        owner: &str,
        collection: &str,
        item: &str,
        doc: &StoredManifest,
    ) -> Result<()> {
        self.write_json(&keys::manifest_key(owner, collection, item), doc).await
    }

    /// Create a manifest and register it in the parent collection
    pub async fn create_manifest(
        &self,
        owner: &str,
        collection: &str,
        label: LanguageMap,
        summary: Option<LanguageMap>,
        images: &[ImageInput],
        is_public: bool,
    ) -> Result<CreatedManifest> {
        let mut parent = self
            .get_collection(owner, collection)
            .await?
            .ok_or_else(|| KuraError::NotFound(format!("Collection {} not found", collection)))?;

        let item_id = uuid::Uuid::new_v4().to_string();
        let key = keys::manifest_key(owner, collection, &item_id);
        let locator = keys::locator(&key);

        let doc = StoredManifest::new(
            &locator,
            owner,
            collection,
            label.clone(),
            summary,
            images,
            is_public,
        );
        self.write_json(&key, &doc).await?;

        // Denormalized reference for fast collection listing; written after
        // the manifest so a crash in between leaves an orphan, not a
        // dangling reference
        parent.add_item(ManifestRef::new(&locator, &item_id, label));
        self.put_collection(owner, collection, &parent).await?;

        info!(owner = %owner, collection = %collection, item = %item_id, "Created manifest");

        Ok(CreatedManifest {
            combined_id: keys::combined_manifest_id(owner, collection, &item_id),
            item_id,
            locator,
        })
    }

    /// Ingest an externally produced manifest document in either protocol
    /// shape. Legacy (v2) input is converted to the canonical shape before
    /// storage; the document is re-homed onto a fresh storage locator and
    /// registered in the parent collection.
    pub async fn import_manifest(
        &self,
        owner: &str,
        collection: &str,
        doc: &serde_json::Value,
        is_public: bool,
    ) -> Result<CreatedManifest> {
        let manifest = crate::iiif::convert::ensure_canonical(doc)
            .map_err(|e| KuraError::BadRequest(format!("Unparseable manifest document: {}", e)))?;

        let mut parent = self
            .get_collection(owner, collection)
            .await?
            .ok_or_else(|| KuraError::NotFound(format!("Collection {} not found", collection)))?;

        let item_id = uuid::Uuid::new_v4().to_string();
        let key = keys::manifest_key(owner, collection, &item_id);
        let locator = keys::locator(&key);
        let label = manifest.label.clone();

        let mut stored = StoredManifest {
            manifest,
            access: Some(
                crate::access::AccessRecord::new(owner, is_public).with_collection(collection),
            ),
            geo_annotations: BTreeMap::new(),
        };
        // Re-home the document; canvas and image locators stay as imported
        // (external URLs pass through the endpoint layer untouched)
        stored.manifest.id = locator.clone();

        self.write_json(&key, &stored).await?;

        parent.add_item(ManifestRef::new(&locator, &item_id, label));
        self.put_collection(owner, collection, &parent).await?;

        info!(owner = %owner, collection = %collection, item = %item_id, "Imported manifest");

        Ok(CreatedManifest {
            combined_id: keys::combined_manifest_id(owner, collection, &item_id),
            item_id,
            locator,
        })
    }

    /// Replace a manifest's content and propagate a title change into the
    /// parent collection's reference cache.
    pub async fn update_manifest(
        &self,
        owner: &str,
        collection: &str,
        item: &str,
        update: ManifestUpdate,
    ) -> Result<StoredManifest> {
        let key = keys::manifest_key(owner, collection, item);
        let mut doc: StoredManifest = self
            .read_json(&key)
            .await?
            .ok_or_else(|| KuraError::NotFound(format!("Manifest {} not found", item)))?;

        let old_label = doc.manifest.label.clone();
        let locator = keys::locator(&key);

        doc.replace_content(
            &locator,
            update.label.clone(),
            update.summary,
            &update.images,
            update.is_public,
        );
        doc.manifest.rights = update.rights;
        doc.manifest.attribution = update.attribution;
        doc.manifest.required_statement = update.required_statement;
        doc.manifest.homepage = update.homepage;
        doc.manifest.see_also = update.see_also;
        doc.manifest.provider = update.provider;
        doc.manifest.nav_place = update.nav_place;
        if let Some(metadata) = doc.manifest.metadata.as_mut() {
            metadata.extend(update.extra_metadata);
        }
        if let Some(geo) = update.geo_annotations {
            doc.geo_annotations = geo;
        }

        self.write_json(&key, &doc).await?;

        // Rename propagation into the denormalized reference; best-effort,
        // readers tolerate staleness
        if old_label != update.label {
            if let Err(e) = self.propagate_rename(owner, collection, item, update.label).await {
                warn!(owner = %owner, collection = %collection, item = %item, error = %e,
                      "Failed to propagate rename into collection reference");
            }
        }

        Ok(doc)
    }

    async fn propagate_rename(
        &self,
        owner: &str,
        collection: &str,
        item: &str,
        label: LanguageMap,
    ) -> Result<()> {
        let mut parent = match self.get_collection(owner, collection).await? {
            Some(parent) => parent,
            None => return Ok(()),
        };
        if parent.rename_item(item, label) {
            self.put_collection(owner, collection, &parent).await?;
        }
        Ok(())
    }

    /// Replace one canvas's georeferencing record (API-level partial update:
    /// read, mutate, rewrite the whole document).
    pub async fn set_geo_annotation(
        &self,
        owner: &str,
        collection: &str,
        item: &str,
        canvas_index: usize,
        annotation: Option<GeoAnnotation>,
    ) -> Result<StoredManifest> {
        let key = keys::manifest_key(owner, collection, item);
        let mut doc: StoredManifest = self
            .read_json(&key)
            .await?
            .ok_or_else(|| KuraError::NotFound(format!("Manifest {} not found", item)))?;

        if canvas_index >= doc.manifest.items.len() {
            return Err(KuraError::BadRequest(format!(
                "Canvas index {} out of range",
                canvas_index
            )));
        }

        doc.set_geo_annotation(canvas_index, annotation);

        self.write_json(&key, &doc).await?;
        Ok(doc)
    }

    /// Delete a manifest: every key under its item prefix, then its
    /// collection reference. Best-effort; a crash mid-delete leaves orphaned
    /// keys that no enumeration rooted at the collection's reference list
    /// will ever see.
    pub async fn delete_manifest(
        &self,
        owner: &str,
        collection: &str,
        item: &str,
    ) -> Result<DeleteOutcome> {
        let outcome = self
            .delete_prefix(&keys::item_prefix(owner, collection, item))
            .await?;

        match self.get_collection(owner, collection).await {
            Ok(Some(mut parent)) => {
                if parent.remove_item(item) {
                    if let Err(e) = self.put_collection(owner, collection, &parent).await {
                        warn!(owner = %owner, collection = %collection, item = %item, error = %e,
                              "Failed to drop collection reference after delete");
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(owner = %owner, collection = %collection, item = %item, error = %e,
                      "Could not open collection to drop reference after delete");
            }
        }

        info!(
            owner = %owner,
            collection = %collection,
            item = %item,
            deleted = outcome.deleted,
            failed = outcome.failed,
            "Deleted manifest"
        );
        Ok(outcome)
    }

    /// Enumerate and delete every key under a prefix, continuing past
    /// individual failures.
    async fn delete_prefix(&self, prefix: &str) -> Result<DeleteOutcome> {
        let mut outcome = DeleteOutcome::default();
        let mut cursor: Option<String> = None;

        loop {
            let page: ListPage = self
                .store
                .list(prefix, None, cursor.as_deref(), self.page_size)
                .await?;

            for key in &page.keys {
                match self.store.delete(key).await {
                    Ok(()) => outcome.deleted += 1,
                    Err(e) => {
                        outcome.failed += 1;
                        warn!(key = %key, error = %e, "Failed to delete object");
                    }
                }
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(outcome)
    }

    /// List a collection's items by enumerating the item prefix, opening
    /// each manifest, and skipping (but logging) unreadable ones.
    pub async fn list_items(&self, owner: &str, collection: &str) -> Result<Vec<ItemSummary>> {
        let prefix = keys::items_prefix(owner, collection);
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .store
                .list(&prefix, Some('/'), cursor.as_deref(), self.page_size)
                .await?;

            for group in &page.common_prefixes {
                let item_id = match trailing_segment(group) {
                    Some(id) => id,
                    None => continue,
                };
                match self.get_manifest(owner, collection, item_id).await {
                    Ok(Some(doc)) => items.push(item_summary(item_id, &doc)),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(owner = %owner, collection = %collection, item = %item_id, error = %e,
                              "Skipping unreadable manifest in listing");
                    }
                }
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    /// Items visible to the caller, per the access predicate
    pub async fn list_items_for(
        &self,
        owner: &str,
        collection: &str,
        caller: Option<&str>,
    ) -> Result<Vec<ItemSummary>> {
        let mut visible = Vec::new();
        for summary in self.list_items(owner, collection).await? {
            let doc = self
                .get_manifest(owner, collection, &summary.id)
                .await
                .ok()
                .flatten();
            let record = doc.as_ref().and_then(|d| d.access.as_ref());
            if is_visible_to(record, caller) {
                visible.push(summary);
            }
        }
        Ok(visible)
    }
}

fn item_summary(item_id: &str, doc: &StoredManifest) -> ItemSummary {
    let manifest = &doc.manifest;
    ItemSummary {
        id: item_id.to_string(),
        title: display_text(&manifest.label).unwrap_or("Untitled").to_string(),
        description: manifest
            .summary
            .as_ref()
            .and_then(|s| display_text(s))
            .map(|s| s.to_string()),
        image_count: manifest.items.len(),
        created_at: created_at(manifest.metadata.as_deref()),
        is_public: doc.is_public(),
        thumbnail: manifest
            .items
            .first()
            .and_then(|c| c.image_body())
            .map(|b| b.id.clone()),
    }
}

/// `Created` metadata value, falling back to epoch for sorting stability
fn created_at(metadata: Option<&[MetadataEntry]>) -> String {
    metadata
        .and_then(|entries| {
            entries
                .iter()
                .find(|m| m.has_label("作成日", "Created"))
                .and_then(|m| display_text(&m.value).map(|s| s.to_string()))
        })
        .unwrap_or_else(|| "1970-01-01T00:00:00Z".to_string())
}

/// Last path segment of a delimiter group prefix ("a/b/c/" -> "c")
fn trailing_segment(prefix: &str) -> Option<&str> {
    prefix.trim_end_matches('/').rsplit('/').next().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iiif::text::bilingual;
    use crate::store::MemoryStore;

    fn repo() -> Repository {
        Repository::new(Arc::new(MemoryStore::new()), 1000)
    }

    fn image(url: &str) -> ImageInput {
        ImageInput {
            url: url.to_string(),
            width: 800,
            height: 600,
            mime_type: None,
            is_iiif: false,
            iiif_base_url: None,
            access: None,
        }
    }

    async fn seeded(repo: &Repository) -> CreatedManifest {
        repo.create_collection("u1", "c1", bilingual("資料集", "Papers"), None, true, None)
            .await
            .unwrap();
        repo.create_manifest(
            "u1",
            "c1",
            bilingual("古地図", "Old map"),
            None,
            &[image("store://img/0.jpg")],
            true,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_manifest_registers_collection_reference() {
        let repo = repo();
        let created = seeded(&repo).await;

        let doc = repo
            .get_manifest("u1", "c1", &created.item_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.manifest.id, created.locator);
        assert_eq!(doc.owner(), Some("u1"));

        let parent = repo.get_collection("u1", "c1").await.unwrap().unwrap();
        assert_eq!(parent.collection.items.len(), 1);
        let reference = &parent.collection.items[0];
        assert!(reference.refers_to(&created.item_id));
        assert_eq!(reference.label.get("en").unwrap()[0], "Old map");
    }

    #[tokio::test]
    async fn test_create_manifest_requires_collection() {
        let repo = repo();
        let result = repo
            .create_manifest("u1", "nope", bilingual("x", "x"), None, &[], true)
            .await;
        assert!(matches!(result, Err(KuraError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_propagates_rename_to_reference() {
        let repo = repo();
        let created = seeded(&repo).await;

        repo.update_manifest(
            "u1",
            "c1",
            &created.item_id,
            ManifestUpdate {
                label: bilingual("新しい地図", "New map"),
                images: vec![image("store://img/0.jpg")],
                is_public: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let parent = repo.get_collection("u1", "c1").await.unwrap().unwrap();
        assert_eq!(
            parent.collection.items[0].label.get("en").unwrap()[0],
            "New map"
        );
    }

    #[tokio::test]
    async fn test_update_keeps_reference_when_label_unchanged() {
        let repo = repo();
        let created = seeded(&repo).await;
        let before = repo.get_collection("u1", "c1").await.unwrap().unwrap();

        repo.update_manifest(
            "u1",
            "c1",
            &created.item_id,
            ManifestUpdate {
                label: bilingual("古地図", "Old map"),
                images: vec![image("store://img/1.jpg")],
                is_public: false,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let after = repo.get_collection("u1", "c1").await.unwrap().unwrap();
        assert_eq!(
            before.collection.items[0].label,
            after.collection.items[0].label
        );
    }

    #[tokio::test]
    async fn test_delete_removes_keys_and_reference() {
        let repo = repo();
        let created = seeded(&repo).await;

        // A sibling object under the item prefix (an uploaded image)
        let image_key = format!("collections/u1/c1/items/{}/images/0.jpg", created.item_id);
        repo.store()
            .put(&image_key, Bytes::from_static(b"jpegdata"))
            .await
            .unwrap();

        let outcome = repo.delete_manifest("u1", "c1", &created.item_id).await.unwrap();
        assert_eq!(outcome.deleted, 2);
        assert_eq!(outcome.failed, 0);

        assert!(repo
            .get_manifest("u1", "c1", &created.item_id)
            .await
            .unwrap()
            .is_none());
        assert!(repo.store().get(&image_key).await.unwrap().is_none());

        let parent = repo.get_collection("u1", "c1").await.unwrap().unwrap();
        assert!(parent.collection.items.is_empty());
    }

    #[tokio::test]
    async fn test_listing_skips_corrupt_manifest() {
        let repo = repo();
        seeded(&repo).await;
        repo.create_manifest("u1", "c1", bilingual("二", "Two"), None, &[], true)
            .await
            .unwrap();
        let third = repo
            .create_manifest("u1", "c1", bilingual("三", "Three"), None, &[], true)
            .await
            .unwrap();

        // Corrupt the third manifest out-of-band
        let key = keys::manifest_key("u1", "c1", &third.item_id);
        repo.store()
            .put(&key, Bytes::from_static(b"not json"))
            .await
            .unwrap();

        let items = repo.list_items("u1", "c1").await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.id != third.item_id));
    }

    #[tokio::test]
    async fn test_listing_filters_by_caller() {
        let repo = repo();
        seeded(&repo).await;
        let private = repo
            .create_manifest("u1", "c1", bilingual("秘", "Private"), None, &[], false)
            .await
            .unwrap();

        let as_owner = repo.list_items_for("u1", "c1", Some("u1")).await.unwrap();
        assert_eq!(as_owner.len(), 2);

        let as_stranger = repo.list_items_for("u1", "c1", Some("u2")).await.unwrap();
        assert_eq!(as_stranger.len(), 1);
        assert!(as_stranger.iter().all(|i| i.id != private.item_id));

        let anonymous = repo.list_items_for("u1", "c1", None).await.unwrap();
        assert_eq!(anonymous.len(), 1);
    }

    #[tokio::test]
    async fn test_list_collections() {
        let repo = repo();
        seeded(&repo).await;
        repo.create_collection("u1", "c2", bilingual("第二", "Second"), None, false, None)
            .await
            .unwrap();

        let all = repo.list_collections("u1").await.unwrap();
        assert_eq!(all.len(), 2);

        let visible = repo.list_collections_for("u1", None).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, "c1");
    }

    #[tokio::test]
    async fn test_duplicate_collection_rejected() {
        let repo = repo();
        seeded(&repo).await;
        let result = repo
            .create_collection("u1", "c1", bilingual("x", "x"), None, true, None)
            .await;
        assert!(matches!(result, Err(KuraError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_set_geo_annotation_partial_update() {
        let repo = repo();
        let created = seeded(&repo).await;

        let annotation = GeoAnnotation {
            points: vec![crate::iiif::geo::parse_csv_point("6690,7517,35.7,139.7").unwrap()],
            ..Default::default()
        };

        let doc = repo
            .set_geo_annotation("u1", "c1", &created.item_id, 0, Some(annotation.clone()))
            .await
            .unwrap();
        assert_eq!(doc.geo_annotation(0), Some(&annotation));

        // Out-of-range canvas index is a format error
        let result = repo
            .set_geo_annotation("u1", "c1", &created.item_id, 9, Some(annotation))
            .await;
        assert!(matches!(result, Err(KuraError::BadRequest(_))));

        // Removal
        let doc = repo
            .set_geo_annotation("u1", "c1", &created.item_id, 0, None)
            .await
            .unwrap();
        assert!(doc.geo_annotations.is_empty());
    }

    #[tokio::test]
    async fn test_import_legacy_manifest_stored_canonically() {
        let repo = repo();
        seeded(&repo).await;

        let v2 = serde_json::json!({
            "@context": "http://iiif.io/api/presentation/2/context.json",
            "@id": "https://example.org/m1",
            "@type": "sc:Manifest",
            "label": "輸入地図",
            "sequences": [{"canvases": [{
                "@id": "https://example.org/m1/canvas/1",
                "width": 100, "height": 100,
                "images": [{"resource": {"@id": "https://example.org/img.jpg", "format": "image/jpeg"}}]
            }]}]
        });

        let created = repo.import_manifest("u1", "c1", &v2, true).await.unwrap();
        let stored = repo
            .get_manifest("u1", "c1", &created.item_id)
            .await
            .unwrap()
            .unwrap();

        // Canonical shape on a fresh locator; imported image URL untouched
        assert_eq!(stored.manifest.kind, "Manifest");
        assert_eq!(stored.manifest.id, created.locator);
        assert_eq!(stored.manifest.label.get("ja").unwrap()[0], "輸入地図");
        assert_eq!(
            stored.manifest.items[0].image_body().unwrap().id,
            "https://example.org/img.jpg"
        );

        let parent = repo.get_collection("u1", "c1").await.unwrap().unwrap();
        assert_eq!(parent.collection.items.len(), 2);

        // Unparseable input rejected at the boundary
        assert!(repo
            .import_manifest("u1", "c1", &serde_json::json!([1, 2]), true)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_delete_prefix_paginates() {
        let repo = Repository::new(Arc::new(MemoryStore::new()), 2);
        for i in 0..7 {
            repo.store()
                .put(&format!("p/{}", i), Bytes::from_static(b"x"))
                .await
                .unwrap();
        }
        let outcome = repo.delete_prefix("p/").await.unwrap();
        assert_eq!(outcome.deleted, 7);
        let page = repo.store().list("p/", None, None, 10).await.unwrap();
        assert!(page.keys.is_empty());
    }
}
