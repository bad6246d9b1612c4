//! Image byte proxy and image-service information
//!
//! Image bytes are served through `/iiif/image/{key}` keyed by storage path.
//! The endpoint independently re-resolves per-canvas access before
//! streaming: the manifest endpoint always returns the full skeleton once
//! its own gate passes, so this is the layer where a private canvas inside a
//! public manifest actually bites.
//!
//! An `info.json` suffix returns an Image API v2 descriptor instead of
//! bytes, with placeholder 1000x1000 dimensions when the manifest cannot
//! supply real ones.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::access::resolve;
use crate::iiif::manifest::{StoredManifest, IMAGE_2_LEVEL2_PROFILE};
use crate::routes::presentation::Caller;
use crate::server::AppState;
use crate::store::keys;
use crate::types::{KuraError, Result};

const IMAGE_2_CONTEXT: &str = "http://iiif.io/api/image/2/context.json";

/// Placeholder dimensions when the manifest cannot supply real ones
const PLACEHOLDER_DIM: u32 = 1000;

/// Parsed image request
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    /// Storage key of the image object
    pub key: String,
    /// Whether the caller asked for info.json instead of bytes
    pub info_json: bool,
    /// 1-based canvas number from the `canvas` query parameter
    pub canvas: Option<usize>,
}

impl ImageRequest {
    /// Parse the path remainder after `/iiif/image/` plus the query string.
    pub fn parse(raw_path: &str, query: Option<&str>) -> Result<Self> {
        let decoded = urlencoding::decode(raw_path)
            .map_err(|_| KuraError::BadRequest("Malformed image path".to_string()))?
            .into_owned();

        let (key, info_json) = match decoded.strip_suffix("/info.json") {
            Some(stripped) => (stripped.to_string(), true),
            None => (decoded, false),
        };

        if key.is_empty() {
            return Err(KuraError::BadRequest("Empty image path".to_string()));
        }

        let canvas = query.and_then(|q| {
            q.split('&')
                .find_map(|pair| pair.strip_prefix("canvas="))
                .and_then(|v| v.parse::<usize>().ok())
        });

        Ok(Self {
            key,
            info_json,
            canvas,
        })
    }

    /// (owner, collection, item) when the key lies inside a collection tree
    fn collection_coords(&self) -> Option<(&str, &str, &str)> {
        let mut parts = self.key.split('/');
        if parts.next() != Some("collections") {
            return None;
        }
        let owner = parts.next()?;
        let collection = parts.next()?;
        if parts.next() != Some("items") {
            return None;
        }
        let item = parts.next()?;
        Some((owner, collection, item))
    }
}

/// Canvas index this image belongs to: the explicit 1-based query parameter,
/// else a match of the stored body locator against the requested key.
fn target_canvas(manifest: &StoredManifest, request: &ImageRequest) -> Option<usize> {
    if let Some(number) = request.canvas {
        if number >= 1 && number <= manifest.manifest.items.len() {
            return Some(number - 1);
        }
        return None;
    }

    let locator = keys::locator(&request.key);
    manifest
        .manifest
        .items
        .iter()
        .position(|canvas| canvas.image_body().map(|b| b.id == locator).unwrap_or(false))
}

/// Resolve per-canvas access for the requested image. Manifest gate first:
/// a manifest-level deny short-circuits canvas evaluation entirely.
fn check_image_access(
    manifest: &StoredManifest,
    request: &ImageRequest,
    caller: &Caller,
) -> Result<()> {
    let identity = caller.identity.as_deref();

    if !resolve(manifest.access.as_ref(), identity) {
        return Err(match identity {
            None => KuraError::Unauthorized("Authentication required".to_string()),
            Some(_) => KuraError::Forbidden("Access denied".to_string()),
        });
    }

    let record = match target_canvas(manifest, request) {
        Some(index) => manifest.canvas_access(index),
        // Unmatched image inside the item tree falls back to the manifest gate
        None => manifest.access.as_ref().cloned(),
    };

    if !resolve(record.as_ref(), identity) {
        return Err(match identity {
            None => KuraError::Unauthorized("Authentication required".to_string()),
            Some(_) => KuraError::Forbidden("Access denied to this image".to_string()),
        });
    }

    Ok(())
}

/// Image API information document for the key
fn info_document(
    base_url: &str,
    request: &ImageRequest,
    manifest: Option<&StoredManifest>,
) -> Value {
    let image_id = format!(
        "{}/iiif/image/{}",
        base_url,
        urlencoding::encode(&request.key)
    );

    let (width, height) = manifest
        .and_then(|m| {
            let index = target_canvas(m, request).unwrap_or(0);
            m.manifest.items.get(index).map(|c| (c.width, c.height))
        })
        .unwrap_or((PLACEHOLDER_DIM, PLACEHOLDER_DIM));

    json!({
        "@context": IMAGE_2_CONTEXT,
        "@id": image_id,
        "protocol": "http://iiif.io/api/image",
        "width": width,
        "height": height,
        "profile": [
            IMAGE_2_LEVEL2_PROFILE,
            {
                "formats": ["jpg", "png", "webp"],
                "qualities": ["default", "color", "gray"],
                "supports": [
                    "regionByPct", "sizeByForcedWh", "sizeByWh",
                    "sizeAboveFull", "rotationBy90s", "mirroring"
                ]
            }
        ]
    })
}

/// Content type by extension; stored objects carry no media-type metadata
fn content_type_for(key: &str) -> &'static str {
    match key.rsplit('.').next().map(|ext| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "webp" => "image/webp",
        Some(ext) if ext == "gif" => "image/gif",
        Some(ext) if ext == "tif" || ext == "tiff" => "image/tiff",
        Some(ext) if ext == "json" => "application/json",
        _ => "image/jpeg",
    }
}

/// Serve image bytes or an info.json descriptor
pub async fn serve_image(
    state: &AppState,
    request: &ImageRequest,
    caller: &Caller,
) -> Result<Response<Full<Bytes>>> {
    debug!(key = %request.key, info_json = request.info_json, "Image request");

    // Images inside a collection tree are gated by their manifest's records
    let manifest = match request.collection_coords() {
        Some((owner, collection, item)) => {
            let manifest = state.repo.get_manifest(owner, collection, item).await?;
            if let Some(manifest) = &manifest {
                check_image_access(manifest, request, caller)?;
            }
            manifest
        }
        None => None,
    };

    if request.info_json {
        let info = info_document(state.args.base_url(), request, manifest.as_ref());
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "application/json")
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
            .body(Full::new(Bytes::from(info.to_string())))
            .unwrap());
    }

    let bytes = state
        .repo
        .store()
        .get(&request.key)
        .await?
        .ok_or_else(|| KuraError::NotFound("Image not found".to_string()))?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", content_type_for(&request.key))
        .header("Content-Length", bytes.len().to_string())
        .header("Cache-Control", "public, max-age=3600")
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type")
        .body(Full::new(bytes))
        .unwrap())
}

/// HTTP handler wrapping `serve_image` with the error envelope
pub async fn handle_image(
    state: Arc<AppState>,
    raw_path: &str,
    query: Option<&str>,
    caller: Caller,
) -> Response<Full<Bytes>> {
    let request = match ImageRequest::parse(raw_path, query) {
        Ok(request) => request,
        Err(err) => return error_body(err),
    };

    match serve_image(&state, &request, &caller).await {
        Ok(response) => response,
        Err(err) => error_body(err),
    }
}

fn error_body(err: KuraError) -> Response<Full<Bytes>> {
    let status = err.status_code();
    let body = json!({ "error": err.to_string() });
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::CanvasAccess;
    use crate::iiif::manifest::ImageInput;
    use crate::iiif::text::bilingual;
    use crate::server::test_state;

    #[test]
    fn test_parse_image_request() {
        let request = ImageRequest::parse(
            "collections%2Fu1%2Fc1%2Fitems%2Fi1%2Fimages%2F0.jpg",
            Some("canvas=2"),
        )
        .unwrap();
        assert_eq!(request.key, "collections/u1/c1/items/i1/images/0.jpg");
        assert_eq!(request.canvas, Some(2));
        assert!(!request.info_json);

        let request = ImageRequest::parse("collections/u1/c1/items/i1/images/0.jpg/info.json", None)
            .unwrap();
        assert!(request.info_json);
        assert_eq!(request.key, "collections/u1/c1/items/i1/images/0.jpg");

        assert!(ImageRequest::parse("", None).is_err());
    }

    #[test]
    fn test_collection_coords() {
        let request = ImageRequest::parse("collections/u1/c1/items/i1/images/0.jpg", None).unwrap();
        assert_eq!(request.collection_coords(), Some(("u1", "c1", "i1")));

        let request = ImageRequest::parse("standalone/pic.jpg", None).unwrap();
        assert!(request.collection_coords().is_none());
    }

    #[test]
    fn test_content_type_inference() {
        assert_eq!(content_type_for("a/b.png"), "image/png");
        assert_eq!(content_type_for("a/b.jpg"), "image/jpeg");
        assert_eq!(content_type_for("noext"), "image/jpeg");
    }

    async fn seed(state: &AppState, canvas_access: Option<CanvasAccess>, is_public: bool) -> String {
        state
            .repo
            .create_collection("u1", "c1", bilingual("集", "Set"), None, true, None)
            .await
            .unwrap();
        let created = state
            .repo
            .create_manifest(
                "u1",
                "c1",
                bilingual("図", "Map"),
                None,
                &[ImageInput {
                    url: String::new(), // patched below
                    width: 640,
                    height: 480,
                    mime_type: None,
                    is_iiif: false,
                    iiif_base_url: None,
                    access: canvas_access,
                }],
                is_public,
            )
            .await
            .unwrap();

        // Point the canvas body at a real stored object
        let image_key = format!("collections/u1/c1/items/{}/images/0.jpg", created.item_id);
        state
            .repo
            .store()
            .put(&image_key, Bytes::from_static(b"jpegbytes"))
            .await
            .unwrap();
        let mut doc = state
            .repo
            .get_manifest("u1", "c1", &created.item_id)
            .await
            .unwrap()
            .unwrap();
        doc.manifest.items[0].image_body_mut().unwrap().id = keys::locator(&image_key);
        state
            .repo
            .put_manifest("u1", "c1", &created.item_id, &doc)
            .await
            .unwrap();

        image_key
    }

    #[tokio::test]
    async fn test_public_image_streams_bytes() {
        let state = test_state().await;
        let key = seed(&state, None, true).await;

        let request = ImageRequest::parse(&key, Some("canvas=1")).unwrap();
        let response = serve_image(&state, &request, &Caller::default()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "image/jpeg"
        );
    }

    #[tokio::test]
    async fn test_private_canvas_under_public_manifest_gates_bytes() {
        let state = test_state().await;
        let key = seed(
            &state,
            Some(CanvasAccess {
                is_public: Some(false),
                allowed_users: vec!["friend".to_string()],
                allowed_groups: Vec::new(),
            }),
            true,
        )
        .await;

        let request = ImageRequest::parse(&key, Some("canvas=1")).unwrap();

        // Anonymous: 401
        let err = serve_image(&state, &request, &Caller::default()).await.unwrap_err();
        assert!(matches!(err, KuraError::Unauthorized(_)));

        // Stranger with identity: 403
        let stranger = Caller {
            identity: Some("u2".to_string()),
            bearer_token: None,
        };
        let err = serve_image(&state, &request, &stranger).await.unwrap_err();
        assert!(matches!(err, KuraError::Forbidden(_)));

        // Owner passes
        let owner = Caller {
            identity: Some("u1".to_string()),
            bearer_token: None,
        };
        assert!(serve_image(&state, &request, &owner).await.is_ok());

        // Allow-listed identity passes
        let friend = Caller {
            identity: Some("friend".to_string()),
            bearer_token: None,
        };
        assert!(serve_image(&state, &request, &friend).await.is_ok());
    }

    #[tokio::test]
    async fn test_canvas_matched_by_locator_when_query_absent() {
        let state = test_state().await;
        let key = seed(
            &state,
            Some(CanvasAccess {
                is_public: Some(false),
                ..Default::default()
            }),
            true,
        )
        .await;

        let request = ImageRequest::parse(&key, None).unwrap();
        let err = serve_image(&state, &request, &Caller::default()).await.unwrap_err();
        assert!(matches!(err, KuraError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_manifest_level_deny_short_circuits() {
        let state = test_state().await;
        // Public canvas override under a private manifest: manifest gate
        // still denies first
        let key = seed(
            &state,
            Some(CanvasAccess {
                is_public: Some(true),
                ..Default::default()
            }),
            false,
        )
        .await;

        let request = ImageRequest::parse(&key, Some("canvas=1")).unwrap();
        let stranger = Caller {
            identity: Some("u2".to_string()),
            bearer_token: None,
        };
        let err = serve_image(&state, &request, &stranger).await.unwrap_err();
        assert!(matches!(err, KuraError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_info_json_uses_canvas_dimensions() {
        let state = test_state().await;
        let key = seed(&state, None, true).await;

        let request = ImageRequest::parse(&format!("{}/info.json", key), None).unwrap();
        let response = serve_image(&state, &request, &Caller::default()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let request = ImageRequest::parse("standalone/pic.jpg/info.json", None).unwrap();
        let info = info_document("http://x.test", &request, None);
        // Placeholder dimensions when no manifest backs the image
        assert_eq!(info["width"], 1000);
        assert_eq!(info["height"], 1000);
    }

    #[tokio::test]
    async fn test_missing_image_is_not_found() {
        let state = test_state().await;
        let request = ImageRequest::parse("standalone/nope.jpg", None).unwrap();
        let err = serve_image(&state, &request, &Caller::default()).await.unwrap_err();
        assert!(matches!(err, KuraError::NotFound(_)));
    }
}
