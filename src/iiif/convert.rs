//! Presentation API version conversion
//!
//! The canonical storage shape is v3. Legacy (v2) documents are converted to
//! canonical shape on ingest (`to_canonical`) and canonical documents are
//! re-projected into v2 shape on demand (`to_legacy`). Both directions are
//! structural and lossy beyond a ja/en label set: only the first language
//! pair surviving a v2 round-trip is guaranteed to reappear after a
//! subsequent v2 -> v3 -> v2 cycle.
//!
//! v2's polymorphic label (string | value-object | pair list | language map)
//! is parsed into the `V2Text` union once at the boundary and immediately
//! collapsed to the canonical language map; the union never travels further.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::iiif::collection::Collection;
use crate::iiif::manifest::{
    AnnotationPage, Canvas, ImageBody, ImageService, Manifest, MetadataEntry, PaintingAnnotation,
    RequiredStatement, IMAGE_2_LEVEL2_PROFILE, PRESENTATION_3_CONTEXT,
};
use crate::iiif::text::{bilingual, LanguageMap};

/// JSON-LD context of the Presentation API v2
pub const PRESENTATION_2_CONTEXT: &str = "http://iiif.io/api/presentation/2/context.json";

/// JSON-LD context of the Image API v2
pub const IMAGE_2_CONTEXT: &str = "http://iiif.io/api/image/2/context.json";

/// Protocol shape of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentVersion {
    /// v2: `@id` + `@type` + `sequences`
    Legacy,
    /// v3: `id` + `type`, no `@`-prefixed identity keys
    Canonical,
}

impl DocumentVersion {
    /// Detect the shape of a raw document. Documents matching neither rule
    /// are treated as canonical (permissive default).
    pub fn detect(doc: &Value) -> Self {
        let has = |key: &str| doc.get(key).is_some();

        if has("@id") && has("@type") && doc.get("sequences").map(|s| s.is_array()).unwrap_or(false)
        {
            return Self::Legacy;
        }
        Self::Canonical
    }
}

// ============================================================================
// v2 polymorphic text
// ============================================================================

/// A `{"@value": ..., "@language": ...}` pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LanguagePair {
    #[serde(rename = "@language", skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(rename = "@value")]
    pub value: String,
}

/// One element of a v2 text list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum V2TextItem {
    Plain(String),
    Pair(LanguagePair),
    Map(serde_json::Map<String, Value>),
}

/// The v2 label/description union, resolved at the parse boundary only
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum V2Text {
    Plain(String),
    Pair(LanguagePair),
    List(Vec<V2TextItem>),
    Map(serde_json::Map<String, Value>),
}

impl V2Text {
    pub fn parse(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// Extract a display string. Precedence: explicit `@value` field, first
    /// list element, first map entry.
    pub fn display(&self) -> Option<String> {
        match self {
            Self::Plain(s) => Some(s.clone()),
            Self::Pair(pair) => Some(pair.value.clone()),
            Self::List(items) => items.first().and_then(|item| match item {
                V2TextItem::Plain(s) => Some(s.clone()),
                V2TextItem::Pair(pair) => Some(pair.value.clone()),
                V2TextItem::Map(map) => first_map_string(map),
            }),
            Self::Map(map) => first_map_string(map),
        }
    }
}

fn first_map_string(map: &serde_json::Map<String, Value>) -> Option<String> {
    let (_, value) = map.iter().next()?;
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(arr) => match arr.first() {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        },
        _ => None,
    }
}

/// Whether the text contains CJK code points (Japanese detection)
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(|c| {
        matches!(c,
            '\u{3000}'..='\u{303f}'   // punctuation
            | '\u{3040}'..='\u{309f}' // hiragana
            | '\u{30a0}'..='\u{30ff}' // katakana
            | '\u{4e00}'..='\u{9faf}' // kanji
            | '\u{3400}'..='\u{4dbf}' // kanji extension A
        )
    })
}

/// Collapse a v2 text union into a canonical language map. The guessed
/// language and its ja/en counterpart carry the same string: the converter
/// does not attempt translation.
pub fn convert_text(value: &Value) -> LanguageMap {
    let text = V2Text::parse(value)
        .and_then(|t| t.display())
        .unwrap_or_else(|| "Untitled".to_string());

    let mut map = LanguageMap::new();
    let (primary, fallback) = if contains_cjk(&text) {
        ("ja", "en")
    } else {
        ("en", "ja")
    };
    map.insert(primary.to_string(), vec![text.clone()]);
    map.insert(fallback.to_string(), vec![text]);
    map
}

// ============================================================================
// v2 -> canonical
// ============================================================================

/// Convert a legacy manifest into the canonical shape.
///
/// Sequences/canvases/images flatten 1:1 into Canvas/AnnotationPage/
/// Annotation triples; canvases missing an identity get a synthetic
/// index-based one.
pub fn to_canonical(v2: &Value) -> Manifest {
    let id = v2
        .get("@id")
        .or_else(|| v2.get("id"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let label = v2.get("label").map(convert_text).unwrap_or_default();
    let summary = v2.get("description").map(convert_text);

    let metadata = v2.get("metadata").and_then(|v| v.as_array()).map(|items| {
        items
            .iter()
            .map(|item| MetadataEntry {
                label: item.get("label").map(convert_text).unwrap_or_default(),
                value: item.get("value").map(convert_text).unwrap_or_default(),
            })
            .collect::<Vec<_>>()
    });

    let required_statement = v2.get("attribution").map(|attribution| RequiredStatement {
        label: bilingual("帰属", "Attribution"),
        value: convert_text(attribution),
    });

    let rights = v2
        .get("license")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let canvases = v2
        .get("sequences")
        .and_then(|s| s.as_array())
        .and_then(|s| s.first())
        .and_then(|seq| seq.get("canvases"))
        .and_then(|c| c.as_array())
        .map(|canvases| {
            canvases
                .iter()
                .enumerate()
                .map(|(index, canvas)| convert_canvas(canvas, index))
                .collect()
        })
        .unwrap_or_default();

    Manifest {
        context: Value::String(PRESENTATION_3_CONTEXT.to_string()),
        id,
        kind: "Manifest".to_string(),
        label,
        summary,
        thumbnail: None,
        items: canvases,
        metadata,
        rights,
        attribution: None,
        required_statement,
        homepage: None,
        see_also: None,
        provider: None,
        nav_place: None,
    }
}

fn convert_canvas(canvas: &Value, index: usize) -> Canvas {
    let canvas_id = canvas
        .get("@id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("canvas-{}", index));

    let width = canvas.get("width").and_then(|v| v.as_u64()).unwrap_or(1000) as u32;
    let height = canvas.get("height").and_then(|v| v.as_u64()).unwrap_or(1000) as u32;

    let label = canvas
        .get("label")
        .map(convert_text)
        .unwrap_or_else(|| bilingual(&format!("画像 {}", index + 1), &format!("Image {}", index + 1)));

    let annotations = canvas
        .get("images")
        .and_then(|v| v.as_array())
        .map(|images| {
            images
                .iter()
                .enumerate()
                .map(|(image_index, image)| {
                    let resource = image.get("resource").cloned().unwrap_or(Value::Null);
                    let body_id = resource
                        .get("@id")
                        .or_else(|| resource.get("id"))
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();

                    let service = resource.get("service").and_then(|service| {
                        let service = if service.is_array() {
                            service.get(0)?
                        } else {
                            service
                        };
                        let service_id = service
                            .get("@id")
                            .or_else(|| service.get("id"))
                            .and_then(|v| v.as_str())?;
                        Some(vec![ImageService::level2(service_id)])
                    });

                    PaintingAnnotation {
                        id: format!("{}/annotation/{}", canvas_id, image_index),
                        kind: "Annotation".to_string(),
                        motivation: "painting".to_string(),
                        target: canvas_id.clone(),
                        body: ImageBody {
                            id: body_id,
                            kind: "Image".to_string(),
                            format: resource
                                .get("format")
                                .and_then(|v| v.as_str())
                                .unwrap_or("image/jpeg")
                                .to_string(),
                            width: resource
                                .get("width")
                                .and_then(|v| v.as_u64())
                                .unwrap_or(width as u64) as u32,
                            height: resource
                                .get("height")
                                .and_then(|v| v.as_u64())
                                .unwrap_or(height as u64) as u32,
                            service,
                        },
                    }
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    Canvas {
        id: canvas_id.clone(),
        kind: "Canvas".to_string(),
        label,
        width,
        height,
        thumbnail: None,
        items: vec![AnnotationPage {
            id: format!("{}/page", canvas_id),
            kind: "AnnotationPage".to_string(),
            items: annotations,
        }],
        annotations: None,
        access: None,
    }
}

/// Accept a document in either shape, converting legacy input to canonical.
pub fn ensure_canonical(doc: &Value) -> Result<Manifest, serde_json::Error> {
    match DocumentVersion::detect(doc) {
        DocumentVersion::Legacy => Ok(to_canonical(doc)),
        DocumentVersion::Canonical => serde_json::from_value(doc.clone()),
    }
}

// ============================================================================
// canonical -> v2
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct V2Manifest {
    #[serde(rename = "@context")]
    pub context: &'static str,
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub kind: &'static str,
    pub label: Vec<LanguagePair>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub sequences: Vec<V2Sequence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Vec<V2Metadata>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct V2Metadata {
    pub label: Vec<LanguagePair>,
    pub value: Vec<LanguagePair>,
}

#[derive(Debug, Clone, Serialize)]
pub struct V2Sequence {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub kind: &'static str,
    pub label: &'static str,
    pub canvases: Vec<V2Canvas>,
}

#[derive(Debug, Clone, Serialize)]
pub struct V2Canvas {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub kind: &'static str,
    pub label: Vec<LanguagePair>,
    pub height: u32,
    pub width: u32,
    pub images: Vec<V2Image>,
}

#[derive(Debug, Clone, Serialize)]
pub struct V2Image {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub kind: &'static str,
    pub motivation: &'static str,
    pub resource: V2Resource,
    pub on: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct V2Resource {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub kind: &'static str,
    pub format: String,
    pub height: u32,
    pub width: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<V2ServiceRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct V2ServiceRef {
    #[serde(rename = "@context")]
    pub context: &'static str,
    #[serde(rename = "@id")]
    pub id: String,
    pub profile: &'static str,
}

/// A canonical language map as a v2 pair list
fn pairs(map: &LanguageMap) -> Vec<LanguagePair> {
    map.iter()
        .flat_map(|(lang, values)| {
            values.iter().map(move |value| LanguagePair {
                language: Some(lang.clone()),
                value: value.clone(),
            })
        })
        .collect()
}

/// Legacy description: summary's first available language, ja before en
fn legacy_description(summary: Option<&LanguageMap>) -> Option<String> {
    let summary = summary?;
    for lang in ["ja", "en"] {
        if let Some(first) = summary.get(lang).and_then(|v| v.first()) {
            return Some(first.clone());
        }
    }
    summary.values().next().and_then(|v| v.first()).cloned()
}

/// Rewrite an endpoint URL from the v3 path family to the v2 one
fn v2_url(id: &str) -> String {
    id.replace("/iiif/3/", "/iiif/2/")
}

/// Re-project a canonical manifest into the legacy shape.
///
/// Each canvas yields one legacy canvas with exactly one image entry sourced
/// from its painting annotation; an image service is attached only when the
/// source annotation carries one.
pub fn to_legacy(manifest: &Manifest) -> V2Manifest {
    let id = v2_url(&manifest.id);

    let canvases = manifest
        .items
        .iter()
        .filter_map(|canvas| {
            let canvas_id = v2_url(&canvas.id);
            let body = canvas.image_body()?;

            let service = body.service.as_ref().and_then(|services| {
                let service = services.first()?;
                Some(V2ServiceRef {
                    context: IMAGE_2_CONTEXT,
                    id: service.id.clone(),
                    profile: IMAGE_2_LEVEL2_PROFILE,
                })
            });

            Some(V2Canvas {
                id: canvas_id.clone(),
                kind: "sc:Canvas",
                label: pairs(&canvas.label),
                height: canvas.height,
                width: canvas.width,
                images: vec![V2Image {
                    id: format!("{}/annotation/painting", canvas_id),
                    kind: "oa:Annotation",
                    motivation: "sc:painting",
                    resource: V2Resource {
                        id: body.id.clone(),
                        kind: "dctypes:Image",
                        format: body.format.clone(),
                        height: body.height,
                        width: body.width,
                        service,
                    },
                    on: canvas_id.clone(),
                }],
            })
        })
        .collect();

    let metadata = manifest.metadata.as_ref().map(|entries| {
        entries
            .iter()
            .map(|entry| V2Metadata {
                label: pairs(&entry.label),
                value: pairs(&entry.value),
            })
            .collect()
    });

    let attribution = manifest.attribution.clone().or_else(|| {
        manifest
            .required_statement
            .as_ref()
            .and_then(|rs| legacy_description(Some(&rs.value)))
    });

    V2Manifest {
        context: PRESENTATION_2_CONTEXT,
        id: id.clone(),
        kind: "sc:Manifest",
        label: pairs(&manifest.label),
        description: legacy_description(manifest.summary.as_ref()),
        sequences: vec![V2Sequence {
            id: format!("{}/sequence/normal", id),
            kind: "sc:Sequence",
            label: "Current Page Order",
            canvases,
        }],
        metadata,
        attribution,
        license: manifest.rights.clone(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct V2Collection {
    #[serde(rename = "@context")]
    pub context: &'static str,
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub kind: &'static str,
    pub label: Vec<LanguagePair>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifests: Option<Vec<V2ManifestRef>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct V2ManifestRef {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub kind: &'static str,
    pub label: Vec<LanguagePair>,
}

/// Re-project a canonical collection into the legacy shape
pub fn to_legacy_collection(collection: &Collection) -> V2Collection {
    let manifests = if collection.items.is_empty() {
        None
    } else {
        Some(
            collection
                .items
                .iter()
                .map(|item| V2ManifestRef {
                    id: v2_url(&item.id),
                    kind: "sc:Manifest",
                    label: pairs(&item.label),
                })
                .collect(),
        )
    };

    V2Collection {
        context: PRESENTATION_2_CONTEXT,
        id: v2_url(&collection.id),
        kind: "sc:Collection",
        label: pairs(&collection.label),
        description: legacy_description(collection.summary.as_ref()),
        manifests,
    }
}
