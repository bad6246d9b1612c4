//! HTTP route handlers

pub mod auth_routes;
pub mod health;
pub mod image;
pub mod presentation;

pub use auth_routes::{handle_access, handle_token};
pub use health::{health_check, version_info};
pub use image::handle_image;
pub use presentation::{handle_collection, handle_manifest, Caller, ServedVersion};
