//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. One shared `AppState`
//! behind an Arc; a single match router dispatches on (method, path).
//! The core is stateless per request: nothing mutable survives between
//! requests except the read-only configuration and the store handle.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::access::TokenService;
use crate::config::Args;
use crate::routes::{self, Caller, ServedVersion};
use crate::store::{ObjectStore, Repository};
use crate::types::KuraError;

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Document repository over the object store
    pub repo: Repository,
    /// Capability token service
    pub tokens: TokenService,
}

impl AppState {
    pub fn new(args: Args, store: Arc<dyn ObjectStore>) -> Result<Self, KuraError> {
        let tokens = TokenService::new(args.jwt_secret(), args.jwt_expiry_seconds)?;
        let repo = Repository::new(store, args.list_page_size);
        Ok(Self { args, repo, tokens })
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<(), KuraError> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Kura listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - insecure default signing secret");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(|q| q.to_string());
    let caller = Caller::from_headers(req.headers());

    info!("{} {}", method, path);

    let response = match (method, path.as_str()) {
        // Liveness probe
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            routes::health_check(Arc::clone(&state))
        }

        // Version info for deployment verification
        (Method::GET, "/version") => routes::version_info(),

        // CORS preflight
        (Method::OPTIONS, _) => preflight_response(),

        // ====================================================================
        // Presentation endpoints, v3 and v2 path families
        // ====================================================================

        (Method::GET, p) if p.starts_with("/iiif/3/collection/") => {
            let id = p.strip_prefix("/iiif/3/collection/").unwrap_or("");
            routes::handle_collection(state, id, ServedVersion::V3, caller).await
        }

        (Method::GET, p) if p.starts_with("/iiif/2/collection/") => {
            let id = p.strip_prefix("/iiif/2/collection/").unwrap_or("");
            routes::handle_collection(state, id, ServedVersion::V2, caller).await
        }

        (Method::GET, p) if p.starts_with("/iiif/3/") && p.ends_with("/manifest") => {
            let id = manifest_id(p, "/iiif/3/");
            routes::handle_manifest(state, id, ServedVersion::V3, caller).await
        }

        (Method::GET, p) if p.starts_with("/iiif/2/") && p.ends_with("/manifest") => {
            let id = manifest_id(p, "/iiif/2/");
            routes::handle_manifest(state, id, ServedVersion::V2, caller).await
        }

        // ====================================================================
        // Auth: access service and token issuance
        // ====================================================================

        (Method::GET, p) if p.starts_with("/iiif/auth/access/") => {
            let id = p.strip_prefix("/iiif/auth/access/").unwrap_or("");
            routes::handle_access(state, id, caller).await
        }

        (Method::POST, p) if p.starts_with("/iiif/auth/token/") => {
            let id = p.strip_prefix("/iiif/auth/token/").unwrap_or("");
            routes::handle_token(state, id, caller).await
        }

        // ====================================================================
        // Image byte proxy (+ info.json), keyed by storage path
        // ====================================================================

        (Method::GET, p) if p.starts_with("/iiif/image/") => {
            let raw = p.strip_prefix("/iiif/image/").unwrap_or("");
            routes::handle_image(state, raw, query.as_deref(), caller).await
        }

        // Unversioned manifest alias, served canonical
        (Method::GET, p) if p.starts_with("/iiif/") && p.ends_with("/manifest") => {
            let id = manifest_id(p, "/iiif/");
            routes::handle_manifest(state, id, ServedVersion::V3, caller).await
        }

        // Not found
        _ => not_found_response(&path),
    };

    Ok(response)
}

/// Combined id between a path prefix and the trailing `/manifest`
fn manifest_id<'a>(path: &'a str, prefix: &str) -> &'a str {
    path.strip_prefix(prefix)
        .and_then(|p| p.strip_suffix("/manifest"))
        .unwrap_or("")
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

/// AppState over an in-memory store for unit tests
#[cfg(test)]
pub async fn test_state() -> AppState {
    use crate::store::MemoryStore;
    use clap::Parser;

    let args = Args::parse_from([
        "kura",
        "--dev-mode",
        "true",
        "--base-url",
        "http://x.test",
    ]);
    AppState::new(args, Arc::new(MemoryStore::new())).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_id_extraction() {
        assert_eq!(manifest_id("/iiif/3/u_c_i/manifest", "/iiif/3/"), "u_c_i");
        assert_eq!(manifest_id("/iiif/2/u_c_i/manifest", "/iiif/2/"), "u_c_i");
        assert_eq!(manifest_id("/iiif/u_c_i/manifest", "/iiif/"), "u_c_i");
    }

    #[tokio::test]
    async fn test_state_builds() {
        let state = test_state().await;
        assert_eq!(state.args.base_url(), "http://x.test");
        assert_eq!(state.tokens.expiry_seconds(), 3600);
    }
}
