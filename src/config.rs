//! Configuration for Kura
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use uuid::Uuid;

/// Kura - IIIF Presentation gateway and manifest store
#[derive(Parser, Debug, Clone)]
#[command(name = "kura")]
#[command(about = "IIIF Presentation gateway serving v2/v3 manifests from an object store")]
pub struct Args {
    /// Unique node identifier for this gateway instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Externally addressable base URL of this gateway
    /// Used when rewriting internal storage locators into endpoint URLs
    /// (e.g., "https://iiif.example.org")
    #[arg(long, env = "BASE_URL", default_value = "http://localhost:8080")]
    pub base_url: String,

    /// Root directory of the document store
    #[arg(long, env = "STORAGE_DIR", default_value = "./data")]
    pub storage_dir: PathBuf,

    /// Enable development mode (insecure default signing secret)
    #[arg(long, env = "DEV_MODE", default_value = "false", action = clap::ArgAction::Set)]
    pub dev_mode: bool,

    /// Secret for capability token signing (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Capability token expiry in seconds
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "3600")]
    pub jwt_expiry_seconds: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Maximum number of keys returned per storage listing page
    #[arg(long, env = "LIST_PAGE_SIZE", default_value = "1000")]
    pub list_page_size: usize,
}

impl Args {
    /// Get effective signing secret (uses default in dev mode)
    pub fn jwt_secret(&self) -> String {
        if self.dev_mode {
            self.jwt_secret
                .clone()
                .unwrap_or_else(|| "dev-only-insecure-secret-0123456789abcdef".to_string())
        } else {
            self.jwt_secret
                .clone()
                .expect("JWT_SECRET is required in production mode")
        }
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.jwt_secret.is_none() {
            return Err("JWT_SECRET is required in production mode".to_string());
        }

        if self.list_page_size == 0 {
            return Err("LIST_PAGE_SIZE must be greater than zero".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_mode_secret_fallback() {
        let args = Args::parse_from(["kura", "--dev-mode", "true"]);
        assert!(args.jwt_secret().len() >= 32);
    }

    #[test]
    fn test_validate_requires_secret_in_production() {
        let args = Args::parse_from(["kura"]);
        assert!(args.validate().is_err());

        let args = Args::parse_from(["kura", "--jwt-secret", "s3cret"]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_base_url_trims_trailing_slash() {
        let args = Args::parse_from(["kura", "--dev-mode", "true", "--base-url", "http://x.test/"]);
        assert_eq!(args.base_url(), "http://x.test");
    }
}
