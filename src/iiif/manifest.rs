//! Canonical (v3-shaped) manifest model
//!
//! A manifest describes one digitized object: multilingual label/summary,
//! an ordered list of canvases (one page each, one painting annotation each)
//! and descriptive metadata. The stored form wraps the public document in an
//! internal envelope carrying access control (`x-access`, per-canvas
//! `x-canvas-access`) and the georeferencing point sets
//! (`x-geo-annotations`); `StoredManifest::into_public` is the single strip
//! step before anything leaves the service.
//!
//! Canonical documents self-reference through `store://{key}` locators.
//! The endpoint layer rewrites those into externally addressable URLs; the
//! model itself never knows the public base URL.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::access::{AccessRecord, CanvasAccess};
use crate::iiif::geo::{GeoAnnotation, NavPlace};
use crate::iiif::text::{bilingual, LanguageMap};

/// JSON-LD context of the Presentation API v3
pub const PRESENTATION_3_CONTEXT: &str = "http://iiif.io/api/presentation/3/context.json";

/// Profile string of the IIIF Image API v2 level2 compliance
pub const IMAGE_2_LEVEL2_PROFILE: &str = "http://iiif.io/api/image/2/level2.json";

/// One label/value pair of descriptive metadata, both multilingual
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetadataEntry {
    #[serde(deserialize_with = "crate::iiif::text::lenient")]
    pub label: LanguageMap,
    #[serde(deserialize_with = "crate::iiif::text::lenient")]
    pub value: LanguageMap,
}

impl MetadataEntry {
    pub fn bilingual(label_ja: &str, label_en: &str, value_ja: &str, value_en: &str) -> Self {
        Self {
            label: bilingual(label_ja, label_en),
            value: bilingual(value_ja, value_en),
        }
    }

    /// Match a system metadata entry by its ja or en label
    pub fn has_label(&self, ja: &str, en: &str) -> bool {
        let first = |lang: &str| {
            self.label
                .get(lang)
                .and_then(|v| v.first())
                .map(|s| s.as_str())
        };
        first("ja") == Some(ja) || first("en") == Some(en)
    }
}

/// Attribution/usage statement shown alongside the object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequiredStatement {
    #[serde(deserialize_with = "crate::iiif::text::lenient")]
    pub label: LanguageMap,
    #[serde(deserialize_with = "crate::iiif::text::lenient")]
    pub value: LanguageMap,
}

/// Thumbnail descriptor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thumbnail {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// IIIF Image API service descriptor attached to an image body.
/// Kept in the v2-style `@id`/`@type` form the stored documents use.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageService {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub kind: String,
    pub profile: String,
}

impl ImageService {
    pub fn level2(base_url: impl Into<String>) -> Self {
        Self {
            id: base_url.into(),
            kind: "ImageService2".to_string(),
            profile: IMAGE_2_LEVEL2_PROFILE.to_string(),
        }
    }
}

/// Image resource painted onto a canvas
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageBody {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub format: String,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<Vec<ImageService>>,
}

/// The painting annotation binding an image to its canvas
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaintingAnnotation {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub motivation: String,
    pub target: String,
    pub body: ImageBody,
}

/// AnnotationPage holding the painting annotation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnnotationPage {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub items: Vec<PaintingAnnotation>,
}

/// One page/surface of the object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Canvas {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "crate::iiif::text::lenient")]
    pub label: LanguageMap,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<Vec<Thumbnail>>,
    pub items: Vec<AnnotationPage>,

    /// Served georeferencing annotation pages; populated only at response
    /// time, never stored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Vec<serde_json::Value>>,

    /// Per-canvas access override (internal only)
    #[serde(rename = "x-canvas-access", skip_serializing_if = "Option::is_none")]
    pub access: Option<CanvasAccess>,
}

impl Canvas {
    /// The painting annotation's image body, if the canvas is well-formed
    pub fn image_body(&self) -> Option<&ImageBody> {
        self.items.first()?.items.first().map(|a| &a.body)
    }

    pub fn image_body_mut(&mut self) -> Option<&mut ImageBody> {
        self.items.first_mut()?.items.first_mut().map(|a| &mut a.body)
    }
}

/// Linked resource used by homepage / seeAlso / provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkedResource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(
        default,
        deserialize_with = "crate::iiif::text::lenient_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub label: Option<LanguageMap>,
}

/// Public (serializable to callers) manifest document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
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
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<Vec<Thumbnail>>,
    pub items: Vec<Canvas>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Vec<MetadataEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rights: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
    #[serde(rename = "requiredStatement", skip_serializing_if = "Option::is_none")]
    pub required_statement: Option<RequiredStatement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage: Option<Vec<LinkedResource>>,
    #[serde(rename = "seeAlso", skip_serializing_if = "Option::is_none")]
    pub see_also: Option<Vec<LinkedResource>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<Vec<LinkedResource>>,
    #[serde(rename = "navPlace", skip_serializing_if = "Option::is_none")]
    pub nav_place: Option<NavPlace>,
}

impl Manifest {
    /// Find the system `Created` metadata entry
    pub fn created_entry(&self) -> Option<&MetadataEntry> {
        self.metadata
            .as_ref()?
            .iter()
            .find(|m| m.has_label("作成日", "Created"))
    }
}

/// Descriptor of an already-stored image, as handed over by the upload
/// collaborator. Treated as opaque input when building canvases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInput {
    /// Storage locator (`store://...`) or external image URL
    pub url: String,
    pub width: u32,
    pub height: u32,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Whether the image is served by an external IIIF Image service
    #[serde(rename = "isIiif", default)]
    pub is_iiif: bool,
    #[serde(rename = "iiifBaseUrl", skip_serializing_if = "Option::is_none")]
    pub iiif_base_url: Option<String>,
    /// Per-canvas access override supplied at upload time
    #[serde(default)]
    pub access: Option<CanvasAccess>,
}

/// Stored form: public manifest plus the internal envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredManifest {
    #[serde(flatten)]
    pub manifest: Manifest,

    /// Manifest-level access record (internal only)
    #[serde(rename = "x-access", skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessRecord>,

    /// Georeferencing point sets keyed by canvas index (internal only).
    /// String keys: JSON object keys, and flatten-compatible.
    #[serde(
        rename = "x-geo-annotations",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub geo_annotations: BTreeMap<String, GeoAnnotation>,
}

impl StoredManifest {
    /// Build a fresh manifest document around its storage locator.
    ///
    /// `locator` is the canonical `store://` self-reference; canvases are
    /// numbered 0-based in storage (the endpoint layer renumbers 1-based
    /// when serving).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        locator: &str,
        owner: &str,
        collection_id: &str,
        label: LanguageMap,
        summary: Option<LanguageMap>,
        images: &[ImageInput],
        is_public: bool,
    ) -> Self {
        let now = chrono::Utc::now().to_rfc3339();

        let thumbnail = images.first().map(|img| {
            vec![Thumbnail {
                id: img.url.clone(),
                kind: "Image".to_string(),
                format: img
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| "image/jpeg".to_string()),
                width: Some(img.width.min(200)),
                height: Some(img.height.min(200)),
            }]
        });

        let items = images
            .iter()
            .enumerate()
            .map(|(index, img)| build_canvas(locator, index, img))
            .collect();

        let metadata = vec![
            MetadataEntry::bilingual("作成日", "Created", &now, &now),
            MetadataEntry::bilingual("コレクションID", "Collection ID", collection_id, collection_id),
        ];

        Self {
            manifest: Manifest {
                context: serde_json::Value::String(PRESENTATION_3_CONTEXT.to_string()),
                id: locator.to_string(),
                kind: "Manifest".to_string(),
                label,
                summary,
                thumbnail,
                items,
                metadata: Some(metadata),
                rights: None,
                attribution: None,
                required_statement: None,
                homepage: None,
                see_also: None,
                provider: None,
                nav_place: None,
            },
            access: Some(
                AccessRecord::new(owner, is_public).with_collection(collection_id),
            ),
            geo_annotations: BTreeMap::new(),
        }
    }

    /// Replace the canvases from a fresh image list, keeping `Created` and
    /// stamping `Updated`. Full replace-on-update semantics; the caller
    /// passes the complete new state.
    pub fn replace_content(
        &mut self,
        locator: &str,
        label: LanguageMap,
        summary: Option<LanguageMap>,
        images: &[ImageInput],
        is_public: bool,
    ) {
        let now = chrono::Utc::now().to_rfc3339();
        let created = self
            .manifest
            .created_entry()
            .cloned()
            .unwrap_or_else(|| MetadataEntry::bilingual("作成日", "Created", &now, &now));
        let collection_id = self
            .access
            .as_ref()
            .and_then(|a| a.collection_id.clone())
            .unwrap_or_default();

        // Full replace: only the system entries survive an update; callers
        // supply their custom rows with every write
        let metadata = vec![
            created,
            MetadataEntry::bilingual("更新日", "Updated", &now, &now),
            MetadataEntry::bilingual(
                "コレクションID",
                "Collection ID",
                &collection_id,
                &collection_id,
            ),
        ];

        self.manifest.label = label;
        self.manifest.summary = summary;
        self.manifest.items = images
            .iter()
            .enumerate()
            .map(|(index, img)| build_canvas(locator, index, img))
            .collect();
        self.manifest.thumbnail = images.first().map(|img| {
            vec![Thumbnail {
                id: img.url.clone(),
                kind: "Image".to_string(),
                format: img
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| "image/jpeg".to_string()),
                width: Some(img.width.min(200)),
                height: Some(img.height.min(200)),
            }]
        });
        self.manifest.metadata = Some(metadata);

        if let Some(access) = &mut self.access {
            access.is_public = is_public;
        }
    }

    /// Strip the internal envelope: the one place `x-access`,
    /// `x-canvas-access` and `x-geo-annotations` are removed before a
    /// document leaves the service.
    pub fn into_public(self) -> Manifest {
        let mut manifest = self.manifest;
        for canvas in &mut manifest.items {
            canvas.access = None;
        }
        manifest
    }

    /// Access record for the canvas at `index`, applying inheritance
    pub fn canvas_access(&self, index: usize) -> Option<AccessRecord> {
        let canvas = self.manifest.items.get(index);
        crate::access::canvas_record(self.access.as_ref(), canvas.and_then(|c| c.access.as_ref()))
    }

    /// Georeferencing record for the canvas at `index`
    pub fn geo_annotation(&self, index: usize) -> Option<&GeoAnnotation> {
        self.geo_annotations.get(&index.to_string())
    }

    /// Replace (or clear) the georeferencing record for one canvas
    pub fn set_geo_annotation(&mut self, index: usize, annotation: Option<GeoAnnotation>) {
        match annotation {
            Some(annotation) => {
                self.geo_annotations.insert(index.to_string(), annotation);
            }
            None => {
                self.geo_annotations.remove(&index.to_string());
            }
        }
    }

    pub fn owner(&self) -> Option<&str> {
        self.access.as_ref().map(|a| a.owner.as_str())
    }

    pub fn is_public(&self) -> bool {
        self.access.as_ref().map(|a| a.is_public).unwrap_or(true)
    }
}

fn build_canvas(locator: &str, index: usize, img: &ImageInput) -> Canvas {
    let canvas_id = format!("{}/canvas/{}", locator, index);
    let number = index + 1;

    // External IIIF-served images keep (or gain) their service descriptor
    let service = if img.is_iiif || img.url.contains("iiif") {
        let base = img
            .iiif_base_url
            .clone()
            .unwrap_or_else(|| img.url.replace("/full/full/0/default.jpg", ""));
        Some(vec![ImageService::level2(base)])
    } else {
        None
    };

    Canvas {
        id: canvas_id.clone(),
        kind: "Canvas".to_string(),
        label: bilingual(&format!("画像 {}", number), &format!("Image {}", number)),
        width: img.width,
        height: img.height,
        thumbnail: None,
        items: vec![AnnotationPage {
            id: format!("{}/page", canvas_id),
            kind: "AnnotationPage".to_string(),
            items: vec![PaintingAnnotation {
                id: format!("{}/annotation", canvas_id),
                kind: "Annotation".to_string(),
                motivation: "painting".to_string(),
                target: canvas_id,
                body: ImageBody {
                    id: img.url.clone(),
                    kind: "Image".to_string(),
                    format: img
                        .mime_type
                        .clone()
                        .unwrap_or_else(|| "image/jpeg".to_string()),
                    width: img.width,
                    height: img.height,
                    service,
                },
            }],
        }],
        annotations: None,
        access: img.access.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(url: &str, width: u32, height: u32) -> ImageInput {
        ImageInput {
            url: url.to_string(),
            width,
            height,
            mime_type: None,
            is_iiif: false,
            iiif_base_url: None,
            access: None,
        }
    }

    fn sample() -> StoredManifest {
        StoredManifest::new(
            "store://collections/u1/c1/items/i1/manifest.json",
            "u1",
            "c1",
            bilingual("琉球図", "Ryukyu map"),
            Some(bilingual("説明", "A description")),
            &[
                image("store://collections/u1/c1/items/i1/images/0.jpg", 4000, 3000),
                image("store://collections/u1/c1/items/i1/images/1.jpg", 2000, 1500),
            ],
            false,
        )
    }

    #[test]
    fn test_new_manifest_shape() {
        let stored = sample();
        let manifest = &stored.manifest;

        assert_eq!(manifest.kind, "Manifest");
        assert_eq!(manifest.id, "store://collections/u1/c1/items/i1/manifest.json");
        assert_eq!(manifest.items.len(), 2);

        let canvas = &manifest.items[0];
        assert_eq!(canvas.kind, "Canvas");
        assert_eq!(canvas.width, 4000);
        assert_eq!(canvas.label.get("en").unwrap()[0], "Image 1");
        // Exactly one page with exactly one painting annotation
        assert_eq!(canvas.items.len(), 1);
        assert_eq!(canvas.items[0].items.len(), 1);
        assert_eq!(canvas.items[0].items[0].motivation, "painting");
        assert_eq!(canvas.items[0].items[0].target, canvas.id);

        // Thumbnail from the first image, clamped to 200
        let thumb = &manifest.thumbnail.as_ref().unwrap()[0];
        assert_eq!(thumb.width, Some(200));

        let access = stored.access.as_ref().unwrap();
        assert_eq!(access.owner, "u1");
        assert!(!access.is_public);
        assert_eq!(access.collection_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_iiif_source_gains_service_descriptor() {
        let stored = StoredManifest::new(
            "store://m",
            "u1",
            "c1",
            bilingual("t", "t"),
            None,
            &[ImageInput {
                url: "https://iiif.example.org/img/full/full/0/default.jpg".to_string(),
                width: 100,
                height: 100,
                mime_type: None,
                is_iiif: true,
                iiif_base_url: None,
                access: None,
            }],
            true,
        );

        let body = stored.manifest.items[0].image_body().unwrap();
        let service = &body.service.as_ref().unwrap()[0];
        assert_eq!(service.kind, "ImageService2");
        assert_eq!(service.id, "https://iiif.example.org/img");
    }

    #[test]
    fn test_into_public_strips_internal_fields() {
        let mut stored = sample();
        stored.manifest.items[0].access = Some(CanvasAccess {
            is_public: Some(false),
            ..Default::default()
        });
        stored.set_geo_annotation(0, Some(GeoAnnotation::default()));

        let public = stored.into_public();
        let value = serde_json::to_value(&public).unwrap();

        assert!(value.get("x-access").is_none());
        assert!(value.get("x-geo-annotations").is_none());
        for canvas in value["items"].as_array().unwrap() {
            assert!(canvas.get("x-canvas-access").is_none());
        }
    }

    #[test]
    fn test_replace_content_preserves_created_stamps_updated() {
        let mut stored = sample();
        let created = stored.manifest.created_entry().unwrap().value.clone();

        stored.replace_content(
            "store://collections/u1/c1/items/i1/manifest.json",
            bilingual("新しい題", "New title"),
            None,
            &[image("store://collections/u1/c1/items/i1/images/2.jpg", 800, 600)],
            true,
        );

        assert_eq!(stored.manifest.items.len(), 1);
        assert_eq!(stored.manifest.created_entry().unwrap().value, created);
        let metadata = stored.manifest.metadata.as_ref().unwrap();
        assert!(metadata.iter().any(|m| m.has_label("更新日", "Updated")));
        assert!(stored.is_public());
    }

    #[test]
    fn test_canvas_access_inheritance() {
        let mut stored = sample();
        // Canvas 0 overrides; canvas 1 inherits
        stored.manifest.items[0].access = Some(CanvasAccess {
            is_public: Some(true),
            ..Default::default()
        });

        let c0 = stored.canvas_access(0).unwrap();
        assert!(c0.is_public);
        let c1 = stored.canvas_access(1).unwrap();
        assert!(!c1.is_public);
        assert_eq!(c1.owner, "u1");
    }

    #[test]
    fn test_stored_roundtrip_keeps_envelope() {
        let stored = sample();
        let json = serde_json::to_string(&stored).unwrap();
        assert!(json.contains("x-access"));

        let back: StoredManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stored);
    }
}
