//! Access and token issuance endpoints
//!
//! - GET  /iiif/auth/access/{id} - owner check, hands off to the token service
//! - POST /iiif/auth/token/{id}  - issues a capability token for the owner
//!
//! User authentication itself is delegated to the external identity
//! provider; these endpoints only consume the asserted identity and mint
//! capability tokens scoped to one resource.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::routes::presentation::Caller;
use crate::server::AppState;
use crate::store::keys;
use crate::types::{KuraError, Result};

/// Successful token issuance response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}

/// Successful access-service response: where to fetch the token
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessResponse {
    pub token_service: String,
}

/// Owner gate shared by both endpoints: the id must be a manifest combined
/// id and the caller must be the owner encoded in its first segment.
fn require_owner(combined_id: &str, caller: &Caller) -> Result<String> {
    let identity = caller
        .identity
        .clone()
        .ok_or_else(|| KuraError::Unauthorized("Not authenticated".to_string()))?;

    let parts = keys::split_combined_id(combined_id, 3)?;
    let owner = parts[0];

    if identity != owner {
        return Err(KuraError::Forbidden("Access denied".to_string()));
    }

    Ok(identity)
}

/// Access service: confirms the caller may obtain a token and points at the
/// token service.
pub fn serve_access(state: &AppState, combined_id: &str, caller: &Caller) -> Result<AccessResponse> {
    require_owner(combined_id, caller)?;
    Ok(AccessResponse {
        token_service: format!("{}/iiif/auth/token/{}", state.args.base_url(), combined_id),
    })
}

/// Token service: issues a capability token bound to (resource, owner).
pub fn serve_token(state: &AppState, combined_id: &str, caller: &Caller) -> Result<TokenResponse> {
    let identity = require_owner(combined_id, caller)?;

    let access_token = state.tokens.issue(combined_id, &identity)?;
    info!(resource = %combined_id, identity = %identity, "Issued capability token");

    Ok(TokenResponse {
        access_token,
        token_type: "Bearer",
        expires_in: state.tokens.expiry_seconds(),
    })
}

pub async fn handle_access(
    state: Arc<AppState>,
    combined_id: &str,
    caller: Caller,
) -> Response<Full<Bytes>> {
    match serve_access(&state, combined_id, &caller) {
        Ok(response) => json_ok(&response),
        Err(err) => json_error(err),
    }
}

pub async fn handle_token(
    state: Arc<AppState>,
    combined_id: &str,
    caller: Caller,
) -> Response<Full<Bytes>> {
    match serve_token(&state, combined_id, &caller) {
        Ok(response) => json_ok(&response),
        Err(err) => json_error(err),
    }
}

fn json_ok<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

fn json_error(err: KuraError) -> Response<Full<Bytes>> {
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
    use crate::server::test_state;

    fn caller(identity: Option<&str>) -> Caller {
        Caller {
            identity: identity.map(|s| s.to_string()),
            bearer_token: None,
        }
    }

    #[tokio::test]
    async fn test_token_issued_to_owner() {
        let state = test_state().await;
        let response = serve_token(&state, "u1_c1_i1", &caller(Some("u1"))).unwrap();

        assert_eq!(response.token_type, "Bearer");
        assert_eq!(response.expires_in, 3600);

        // The issued token is a capability for exactly this resource/owner
        assert!(state.tokens.authorizes(&response.access_token, "u1_c1_i1", "u1"));
        assert!(!state.tokens.authorizes(&response.access_token, "u1_c1_i2", "u1"));
    }

    #[tokio::test]
    async fn test_token_requires_identity() {
        let state = test_state().await;
        let err = serve_token(&state, "u1_c1_i1", &caller(None)).unwrap_err();
        assert!(matches!(err, KuraError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_token_denied_to_non_owner() {
        let state = test_state().await;
        let err = serve_token(&state, "u1_c1_i1", &caller(Some("u2"))).unwrap_err();
        assert!(matches!(err, KuraError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_malformed_id_rejected() {
        let state = test_state().await;
        let err = serve_token(&state, "not-enough", &caller(Some("u1"))).unwrap_err();
        assert!(matches!(err, KuraError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_access_hands_off_to_token_service() {
        let state = test_state().await;
        let response = serve_access(&state, "u1_c1_i1", &caller(Some("u1"))).unwrap();
        assert_eq!(
            response.token_service,
            "http://x.test/iiif/auth/token/u1_c1_i1"
        );

        assert!(serve_access(&state, "u1_c1_i1", &caller(Some("u2"))).is_err());
        assert!(serve_access(&state, "u1_c1_i1", &caller(None)).is_err());
    }
}
