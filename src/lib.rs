//! Kura - IIIF Presentation gateway and manifest store
//!
//! Kura keeps canonical (Presentation API v3) manifest and collection
//! documents in an object store and serves them over HTTP in v3 or v2
//! shape, gating non-public resources behind owner/allow-list access
//! records and short-lived capability tokens.
//!
//! ## Components
//!
//! - **iiif**: data model, multilingual text normalization, v2<->v3
//!   conversion, georeferencing extension
//! - **access**: access-control resolution and capability tokens
//! - **store**: object store (key layout, prefix listing) and the document
//!   repository built on it
//! - **server**/**routes**: HTTP surface (manifests, collections, image
//!   proxy, auth services)

pub mod access;
pub mod config;
pub mod iiif;
pub mod routes;
pub mod server;
pub mod store;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{KuraError, Result};
