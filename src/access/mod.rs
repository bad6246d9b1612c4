//! Access control resolution for manifests, collections and canvases
//!
//! Access metadata travels with each stored document as an internal
//! `x-access` record (owner, visibility, allow-list). Resolution is a pure
//! function over (record, caller identity):
//!
//! - no record: unrestricted
//! - public: anyone
//! - owner: always
//! - allow-listed identity: allowed
//! - otherwise: denied
//!
//! A canvas without its own record inherits the manifest record; a canvas
//! record, when present, fully overrides the manifest record (the owner is
//! the only inherited field, since canvas records never carry one).

pub mod token;

use serde::{Deserialize, Serialize};

pub use token::{extract_bearer_token, TokenClaims, TokenService};

/// Access record for a manifest or collection (internal `x-access` field)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessRecord {
    /// Owning identity; the only caller allowed to mutate the document
    pub owner: String,

    #[serde(rename = "isPublic")]
    pub is_public: bool,

    /// Parent collection (manifests only)
    #[serde(rename = "collectionId", skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<String>,

    #[serde(rename = "allowedUsers", default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_users: Vec<String>,

    /// Reserved for group-based allow-lists; persisted but never consulted
    #[serde(rename = "allowedGroups", default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_groups: Vec<String>,
}

impl AccessRecord {
    pub fn new(owner: impl Into<String>, is_public: bool) -> Self {
        Self {
            owner: owner.into(),
            is_public,
            collection_id: None,
            allowed_users: Vec::new(),
            allowed_groups: Vec::new(),
        }
    }

    pub fn with_collection(mut self, collection_id: impl Into<String>) -> Self {
        self.collection_id = Some(collection_id.into());
        self
    }

    pub fn with_allowed_users(mut self, users: Vec<String>) -> Self {
        self.allowed_users = users;
        self
    }
}

/// Per-canvas access override (internal `x-canvas-access` field).
/// All fields optional: an absent `isPublic` falls back to the manifest's
/// visibility, matching how stored documents were written historically.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CanvasAccess {
    #[serde(rename = "isPublic", skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,

    #[serde(rename = "allowedUsers", default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_users: Vec<String>,

    #[serde(rename = "allowedGroups", default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_groups: Vec<String>,
}

/// Resolve whether `caller` may view a resource guarded by `record`.
///
/// Total over all inputs: every (record, identity) pair yields a plain
/// allow/deny. Rules evaluated in order, first match wins.
pub fn resolve(record: Option<&AccessRecord>, caller: Option<&str>) -> bool {
    let record = match record {
        // No access record means unrestricted
        None => return true,
        Some(r) => r,
    };

    if record.is_public {
        return true;
    }

    match caller {
        Some(identity) => {
            identity == record.owner || record.allowed_users.iter().any(|u| u == identity)
        }
        None => false,
    }
}

/// Effective access record for a canvas within its manifest.
///
/// No canvas record: the manifest record applies unchanged. With a canvas
/// record, the canvas settings fully replace the manifest's visibility and
/// allow-list; only the owner is carried over.
pub fn canvas_record(
    manifest: Option<&AccessRecord>,
    canvas: Option<&CanvasAccess>,
) -> Option<AccessRecord> {
    match (manifest, canvas) {
        (m, None) => m.cloned(),
        (m, Some(c)) => {
            let owner = m.map(|r| r.owner.clone()).unwrap_or_default();
            let manifest_public = m.map(|r| r.is_public).unwrap_or(true);
            Some(AccessRecord {
                owner,
                is_public: c.is_public.unwrap_or(manifest_public),
                collection_id: None,
                allowed_users: c.allowed_users.clone(),
                allowed_groups: c.allowed_groups.clone(),
            })
        }
    }
}

/// Listing predicate: the same rules as `resolve`, applied per item.
pub fn is_visible_to(record: Option<&AccessRecord>, caller: Option<&str>) -> bool {
    resolve(record, caller)
}
