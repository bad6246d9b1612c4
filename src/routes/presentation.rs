//! Presentation endpoints: manifests and collections in v3 or v2 shape
//!
//! Read path: fetch the canonical document, gate on the manifest-level
//! access record, rewrite internal `store://` locators into externally
//! addressable endpoint URLs (1-based canvas numbering), render geo
//! annotation pages, strip the internal envelope, and project to the legacy
//! shape when the v2 path family was requested.
//!
//! Canvas-level access is NOT enforced here: once the manifest gate passes
//! the full skeleton is returned, and per-canvas rules apply only when the
//! image bytes are fetched through the image endpoint.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use crate::access::{extract_bearer_token, resolve};
use crate::iiif::collection::StoredCollection;
use crate::iiif::convert::{to_legacy, to_legacy_collection, PRESENTATION_2_CONTEXT};
use crate::iiif::geo::GEOREF_CONTEXT;
use crate::iiif::manifest::{ImageService, Manifest, StoredManifest, PRESENTATION_3_CONTEXT};
use crate::server::AppState;
use crate::store::keys;
use crate::types::{KuraError, Result};

/// Requested protocol shape, selected by the `/3/` or `/2/` path segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedVersion {
    V2,
    V3,
}

impl ServedVersion {
    pub fn media_type(&self) -> String {
        let context = match self {
            Self::V2 => PRESENTATION_2_CONTEXT,
            Self::V3 => PRESENTATION_3_CONTEXT,
        };
        format!("application/ld+json;profile=\"{}\"", context)
    }
}

/// Caller identity as asserted by the external identity provider
/// (trusted header) plus any bearer capability token on the request.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub identity: Option<String>,
    pub bearer_token: Option<String>,
}

impl Caller {
    pub fn from_headers(headers: &hyper::HeaderMap) -> Self {
        let identity = headers
            .get("x-kura-user")
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        let bearer_token = extract_bearer_token(
            headers.get("authorization").and_then(|v| v.to_str().ok()),
        )
        .map(|s| s.to_string());
        Self {
            identity,
            bearer_token,
        }
    }
}

/// Gate a request on a document's access record: session identity through
/// the resolver, or a capability token bound to (resource, owner).
fn passes_gate(
    state: &AppState,
    record: Option<&crate::access::AccessRecord>,
    caller: &Caller,
    combined_id: &str,
) -> bool {
    if resolve(record, caller.identity.as_deref()) {
        return true;
    }
    match (&caller.bearer_token, record.map(|r| r.owner.as_str())) {
        (Some(token), Some(owner)) => state.tokens.authorizes(token, combined_id, owner),
        _ => false,
    }
}

/// Serve a manifest by combined id in the requested shape.
pub async fn serve_manifest(
    state: &AppState,
    combined_id: &str,
    version: ServedVersion,
    caller: &Caller,
) -> Result<Value> {
    let parts = keys::split_combined_id(combined_id, 3)?;
    let (owner, collection, item) = (parts[0], parts[1], parts[2]);

    let stored = state
        .repo
        .get_manifest(owner, collection, item)
        .await?
        .ok_or_else(|| KuraError::NotFound("Manifest not found".to_string()))?;

    if !passes_gate(state, stored.access.as_ref(), caller, combined_id) {
        return Err(KuraError::Unauthorized(
            "This manifest requires authentication to access".to_string(),
        ));
    }

    let presented = present_manifest(stored, state.args.base_url(), combined_id);
    match version {
        ServedVersion::V3 => Ok(presented),
        ServedVersion::V2 => {
            let manifest: Manifest = serde_json::from_value(presented)
                .map_err(|e| KuraError::Internal(format!("Re-projection failed: {}", e)))?;
            Ok(serde_json::to_value(to_legacy(&manifest))
                .map_err(|e| KuraError::Internal(e.to_string()))?)
        }
    }
}

/// Serve a collection by combined id in the requested shape.
pub async fn serve_collection(
    state: &AppState,
    combined_id: &str,
    version: ServedVersion,
    caller: &Caller,
) -> Result<Value> {
    let parts = keys::split_combined_id(combined_id, 2)?;
    let (owner, collection_id) = (parts[0], parts[1]);

    let stored = state
        .repo
        .get_collection(owner, collection_id)
        .await?
        .ok_or_else(|| KuraError::NotFound("Collection not found".to_string()))?;

    if !passes_gate(state, stored.access.as_ref(), caller, combined_id) {
        return Err(KuraError::Unauthorized(
            "This collection requires authentication to access".to_string(),
        ));
    }

    let presented =
        present_collection(state, stored, owner, collection_id, combined_id).await;
    match version {
        ServedVersion::V3 => {
            Ok(serde_json::to_value(&presented).map_err(|e| KuraError::Internal(e.to_string()))?)
        }
        ServedVersion::V2 => Ok(serde_json::to_value(to_legacy_collection(&presented))
            .map_err(|e| KuraError::Internal(e.to_string()))?),
    }
}

/// Rewrite an internal image locator into the image endpoint URL
fn image_url(base_url: &str, key: &str) -> String {
    format!("{}/iiif/image/{}", base_url, urlencoding::encode(key))
}

/// Rewrite a stored manifest for serving: endpoint locators, 1-based canvas
/// numbering, geo annotation pages, then the single internal-envelope strip.
pub fn present_manifest(mut stored: StoredManifest, base_url: &str, combined_id: &str) -> Value {
    let manifest_url = format!("{}/iiif/3/{}/manifest", base_url, combined_id);
    let has_geo = stored.geo_annotations.values().any(|g| !g.points.is_empty());

    stored.manifest.id = manifest_url;

    if let Some(thumbnails) = stored.manifest.thumbnail.as_mut() {
        for thumb in thumbnails {
            if let Some(key) = keys::locator_key(&thumb.id) {
                thumb.id = image_url(base_url, key);
            }
        }
    }

    // Per-canvas public flags are needed before the envelope strip
    let canvas_flags: Vec<bool> = (0..stored.manifest.items.len())
        .map(|i| {
            stored
                .canvas_access(i)
                .map(|r| r.is_public)
                .unwrap_or(true)
        })
        .collect();
    let geo_annotations = std::mem::take(&mut stored.geo_annotations);

    for (index, canvas) in stored.manifest.items.iter_mut().enumerate() {
        let number = index + 1;
        let canvas_url = format!("{}/iiif/3/{}/canvas/{}", base_url, combined_id, number);

        if canvas.id.starts_with(keys::STORE_SCHEME) {
            canvas.id = canvas_url.clone();
        }

        if let Some(thumbnails) = canvas.thumbnail.as_mut() {
            for thumb in thumbnails {
                if let Some(key) = keys::locator_key(&thumb.id) {
                    thumb.id = image_url(base_url, key);
                }
            }
        }

        if let Some(page) = canvas.items.first_mut() {
            if page.id.starts_with(keys::STORE_SCHEME) {
                page.id = format!("{}/page", canvas_url);
            }
            if let Some(annotation) = page.items.first_mut() {
                if annotation.id.starts_with(keys::STORE_SCHEME) {
                    annotation.id = format!("{}/annotation", canvas_url);
                }
                if annotation.target.starts_with(keys::STORE_SCHEME) {
                    annotation.target = canvas_url.clone();
                }
                let body_key = keys::locator_key(&annotation.body.id).map(|s| s.to_string());
                if let Some(key) = body_key {
                    let url = image_url(base_url, &key);
                    annotation.body.id = format!("{}?canvas={}", url, number);

                    // Non-public canvases advertise the image service so
                    // viewers know where to negotiate access
                    let canvas_public = canvas_flags.get(index).copied().unwrap_or(true);
                    if !canvas_public && annotation.body.service.is_none() {
                        annotation.body.service = Some(vec![ImageService::level2(url)]);
                    }
                }
            }
        }

        if let Some(geo) = geo_annotations.get(&index.to_string()) {
            if !geo.points.is_empty() {
                canvas.annotations = Some(vec![geo.annotation_page(&canvas_url)]);
            }
        }
    }

    let manifest = stored.into_public();
    let mut value = serde_json::to_value(&manifest).unwrap_or_else(|_| json!({}));

    // Geo-bearing manifests prepend the georef extension context
    if has_geo {
        let context = value
            .get("@context")
            .cloned()
            .unwrap_or_else(|| json!(PRESENTATION_3_CONTEXT));
        let combined = match context {
            Value::String(s) => json!([GEOREF_CONTEXT, s]),
            Value::Array(mut items) => {
                let marker = json!(GEOREF_CONTEXT);
                if !items.contains(&marker) {
                    items.insert(0, marker);
                }
                Value::Array(items)
            }
            other => other,
        };
        value["@context"] = combined;
    }

    value
}

/// Rewrite a stored collection for serving: endpoint locators for the
/// collection itself and each manifest reference, dropping references whose
/// canonical manifest is gone (logged, never fatal).
pub async fn present_collection(
    state: &AppState,
    stored: StoredCollection,
    owner: &str,
    collection_id: &str,
    combined_id: &str,
) -> crate::iiif::collection::Collection {
    let base_url = state.args.base_url();
    let mut collection = stored.into_public();
    collection.id = format!("{}/iiif/3/collection/{}", base_url, combined_id);

    let mut items = Vec::with_capacity(collection.items.len());
    for mut item in collection.items.drain(..) {
        let item_id = match reference_item_id(&item) {
            Some(id) => id,
            None => {
                warn!(reference = %item.id, "Dropping collection reference without item id");
                continue;
            }
        };

        // Verify the referenced manifest still resolves; a reference whose
        // canonical document was deleted out-of-band is skipped, the rest
        // of the collection still lists
        match state.repo.get_manifest(owner, collection_id, &item_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!(owner = %owner, collection = %collection_id, item = %item_id,
                      "Collection references a missing manifest; skipping");
                continue;
            }
            Err(e) => {
                warn!(owner = %owner, collection = %collection_id, item = %item_id, error = %e,
                      "Collection references an unreadable manifest; skipping");
                continue;
            }
        }

        let manifest_combined = keys::combined_manifest_id(owner, collection_id, &item_id);
        item.id = format!("{}/iiif/3/{}/manifest", base_url, manifest_combined);
        item.manifest_id = None;
        item.thumbnail = None;
        items.push(item);
    }
    collection.items = items;

    collection
}

/// Item id behind a manifest reference: the explicit back-pointer, else the
/// `/items/{id}/manifest.json` path segment, else the last locator segment.
fn reference_item_id(item: &crate::iiif::collection::ManifestRef) -> Option<String> {
    if let Some(id) = &item.manifest_id {
        return Some(id.clone());
    }

    if let Some(start) = item.id.find("/items/") {
        let rest = &item.id[start + "/items/".len()..];
        if let Some(end) = rest.find('/') {
            let segment = &rest[..end];
            if !segment.is_empty() {
                return Some(segment.to_string());
            }
        }
    }

    item.id
        .rsplit('/')
        .next()
        .map(|s| s.trim_end_matches(".json").to_string())
        .filter(|s| !s.is_empty())
}

// ============================================================================
// HTTP handlers
// ============================================================================

type FullResponse = Response<Full<Bytes>>;

fn presentation_headers(version: ServedVersion) -> [(&'static str, String); 4] {
    [
        ("Content-Type", version.media_type()),
        ("Access-Control-Allow-Origin", "*".to_string()),
        ("Access-Control-Allow-Methods", "GET, OPTIONS".to_string()),
        (
            "Access-Control-Allow-Headers",
            "Content-Type, Authorization".to_string(),
        ),
    ]
}

fn json_response(status: StatusCode, body: &Value) -> FullResponse {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

/// Error body per the taxonomy; AUTH_REQUIRED carries the auth service URL
/// so the caller can remediate.
fn error_response(err: KuraError, auth_service: Option<String>) -> FullResponse {
    let status = err.status_code();
    let label = match status {
        StatusCode::BAD_REQUEST => "Invalid request",
        StatusCode::UNAUTHORIZED => "Authentication required",
        StatusCode::FORBIDDEN => "Access denied",
        StatusCode::NOT_FOUND => "Not found",
        _ => "Internal error",
    };
    let mut body = json!({
        "error": label,
        "message": err.to_string(),
    });
    if status == StatusCode::UNAUTHORIZED {
        if let Some(url) = auth_service {
            body["authService"] = json!(url);
        }
    }
    json_response(status, &body)
}

pub async fn handle_manifest(
    state: Arc<AppState>,
    combined_id: &str,
    version: ServedVersion,
    caller: Caller,
) -> FullResponse {
    match serve_manifest(&state, combined_id, version, &caller).await {
        Ok(document) => {
            let mut builder = Response::builder().status(StatusCode::OK);
            for (name, value) in presentation_headers(version) {
                builder = builder.header(name, value);
            }
            builder
                .body(Full::new(Bytes::from(document.to_string())))
                .unwrap()
        }
        Err(err) => {
            let auth_service = format!(
                "{}/iiif/auth/access/{}",
                state.args.base_url(),
                combined_id
            );
            error_response(err, Some(auth_service))
        }
    }
}

pub async fn handle_collection(
    state: Arc<AppState>,
    combined_id: &str,
    version: ServedVersion,
    caller: Caller,
) -> FullResponse {
    match serve_collection(&state, combined_id, version, &caller).await {
        Ok(document) => {
            let mut builder = Response::builder().status(StatusCode::OK);
            for (name, value) in presentation_headers(version) {
                builder = builder.header(name, value);
            }
            builder
                .body(Full::new(Bytes::from(document.to_string())))
                .unwrap()
        }
        Err(err) => {
            let auth_service = format!(
                "{}/iiif/auth/access/{}",
                state.args.base_url(),
                combined_id
            );
            error_response(err, Some(auth_service))
        }
    }
}
